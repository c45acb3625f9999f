//! An in-memory [`Host`] used by unit and integration tests. Not part of
//! the public API surface beyond the `util` feature.

use crate::{
    common::{Message, Output, StatusCode},
    host::{AccessStatus, Host, StorageStatus, TxContext},
};
use bytes::Bytes;
use ethereum_types::{Address, H256, U256};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StorageValue {
    pub value: H256,
    pub dirty: bool,
}

#[derive(Clone, Debug, Default)]
pub struct Account {
    pub balance: U256,
    pub code: Bytes,
    pub nonce: u64,
    pub storage: HashMap<H256, StorageValue>,
    pub transient_storage: HashMap<H256, H256>,
}

#[derive(Clone, Debug, Default)]
pub struct Recorded {
    pub calls: Vec<Message>,
    pub logs: Vec<(Address, Bytes, Vec<H256>)>,
    pub selfdestructs: Vec<(Address, Address)>,
    /// Every address touched by `account_exists`/`get_balance`/`call`, in order.
    pub account_accesses: Vec<Address>,
}

/// Host used by tests: all accounts start out empty, all storage starts out
/// zero, and every call the EVM makes outward is recorded (not executed)
/// unless the test drives `call_result` to simulate one.
#[derive(Debug)]
pub struct MockedHost {
    pub accounts: HashMap<Address, Account>,
    pub tx_context: TxContext,
    pub block_hashes: HashMap<u64, H256>,
    /// The `Output` returned for every `Host::call` the interpreter issues.
    pub call_result: Output,
    pub accessed_accounts: Mutex<HashSet<Address>>,
    pub accessed_storage_keys: Mutex<HashSet<(Address, H256)>>,
    pub recorded: Mutex<Recorded>,
}

impl Default for MockedHost {
    fn default() -> Self {
        Self {
            accounts: HashMap::new(),
            tx_context: TxContext {
                tx_gas_price: U256::zero(),
                tx_origin: Address::zero(),
                block_coinbase: Address::zero(),
                block_number: 0,
                block_timestamp: 0,
                block_gas_limit: 0,
                block_difficulty: U256::zero(),
                chain_id: U256::zero(),
                block_base_fee: U256::zero(),
                blob_hashes: Vec::new(),
                blob_base_fee: U256::zero(),
            },
            block_hashes: HashMap::new(),
            call_result: Output {
                status_code: StatusCode::Success,
                gas_left: 0,
                gas_refund: 0,
                output_data: Bytes::new(),
                create_address: None,
            },
            accessed_accounts: Mutex::new(HashSet::new()),
            accessed_storage_keys: Mutex::new(HashSet::new()),
            recorded: Mutex::new(Recorded::default()),
        }
    }
}

impl Host for MockedHost {
    fn account_exists(&self, address: Address) -> anyhow::Result<bool> {
        self.recorded.lock().account_accesses.push(address);
        Ok(self.accounts.contains_key(&address))
    }

    fn get_storage(&self, address: Address, key: H256) -> anyhow::Result<H256> {
        Ok(self
            .accounts
            .get(&address)
            .and_then(|a| a.storage.get(&key))
            .map(|s| s.value)
            .unwrap_or_default())
    }

    fn set_storage(
        &mut self,
        address: Address,
        key: H256,
        value: H256,
    ) -> anyhow::Result<StorageStatus> {
        let account = self.accounts.entry(address).or_default();
        let old = account.storage.get(&key).map(|s| s.value).unwrap_or_default();

        let status = if old == value {
            StorageStatus::Unchanged
        } else if old.is_zero() {
            StorageStatus::Added
        } else if value.is_zero() {
            StorageStatus::Deleted
        } else {
            StorageStatus::Modified
        };

        account.storage.insert(
            key,
            StorageValue {
                value,
                dirty: true,
            },
        );
        Ok(status)
    }

    fn get_transient_storage(&self, address: Address, key: H256) -> anyhow::Result<H256> {
        Ok(self
            .accounts
            .get(&address)
            .and_then(|a| a.transient_storage.get(&key))
            .copied()
            .unwrap_or_default())
    }

    fn set_transient_storage(
        &mut self,
        address: Address,
        key: H256,
        value: H256,
    ) -> anyhow::Result<()> {
        self.accounts
            .entry(address)
            .or_default()
            .transient_storage
            .insert(key, value);
        Ok(())
    }

    fn get_balance(&self, address: Address) -> anyhow::Result<U256> {
        self.recorded.lock().account_accesses.push(address);
        Ok(self
            .accounts
            .get(&address)
            .map(|a| a.balance)
            .unwrap_or_default())
    }

    fn get_code_size(&self, address: Address) -> anyhow::Result<U256> {
        Ok(self
            .accounts
            .get(&address)
            .map(|a| a.code.len().into())
            .unwrap_or_default())
    }

    fn get_code_hash(&self, address: Address) -> anyhow::Result<H256> {
        use sha3::{Digest, Keccak256};
        Ok(self
            .accounts
            .get(&address)
            .map(|a| H256::from_slice(&Keccak256::digest(&a.code)))
            .unwrap_or_default())
    }

    fn copy_code(&self, address: Address, offset: usize, buffer: &mut [u8]) -> anyhow::Result<usize> {
        let code = self
            .accounts
            .get(&address)
            .map(|a| a.code.clone())
            .unwrap_or_default();

        if offset >= code.len() {
            return Ok(0);
        }

        let n = buffer.len().min(code.len() - offset);
        buffer[..n].copy_from_slice(&code[offset..offset + n]);
        Ok(n)
    }

    fn get_nonce(&self, address: Address) -> anyhow::Result<u64> {
        Ok(self.accounts.get(&address).map(|a| a.nonce).unwrap_or(0))
    }

    fn set_code(&mut self, address: Address, code: Bytes) -> anyhow::Result<()> {
        self.accounts.entry(address).or_default().code = code;
        Ok(())
    }

    fn selfdestruct(&mut self, address: Address, beneficiary: Address) -> anyhow::Result<bool> {
        let was_empty = !self.accounts.contains_key(&beneficiary);
        let balance = self.accounts.get(&address).map(|a| a.balance).unwrap_or_default();
        self.accounts.entry(beneficiary).or_default().balance += balance;
        if let Some(account) = self.accounts.get_mut(&address) {
            account.balance = U256::zero();
        }
        self.recorded.lock().selfdestructs.push((address, beneficiary));
        Ok(was_empty)
    }

    fn call(&mut self, msg: &Message) -> anyhow::Result<Output> {
        let mut recorded = self.recorded.lock();
        recorded.account_accesses.push(msg.destination);
        recorded.calls.push(msg.clone());
        Ok(self.call_result.clone())
    }

    fn get_tx_context(&self) -> anyhow::Result<TxContext> {
        Ok(self.tx_context.clone())
    }

    fn get_block_hash(&self, block_number: u64) -> anyhow::Result<H256> {
        Ok(self.block_hashes.get(&block_number).copied().unwrap_or_default())
    }

    fn emit_log(&mut self, address: Address, data: &[u8], topics: &[H256]) -> anyhow::Result<()> {
        self.recorded
            .lock()
            .logs
            .push((address, data.to_vec().into(), topics.to_vec()));
        Ok(())
    }

    fn access_account(&mut self, address: Address) -> anyhow::Result<AccessStatus> {
        if self.accessed_accounts.lock().insert(address) {
            Ok(AccessStatus::Cold)
        } else {
            Ok(AccessStatus::Warm)
        }
    }

    fn access_storage(&mut self, address: Address, key: H256) -> anyhow::Result<AccessStatus> {
        if self.accessed_storage_keys.lock().insert((address, key)) {
            Ok(AccessStatus::Cold)
        } else {
            Ok(AccessStatus::Warm)
        }
    }
}
