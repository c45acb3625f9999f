use crate::{
    common::{address_to_u256, u256_to_address, Revision, StatusCode},
    host::{AccessStatus, Host, StorageStatus, TxContext},
    instructions::{
        memory,
        properties::{ADDITIONAL_COLD_ACCOUNT_ACCESS_COST, COLD_ACCOUNT_ACCESS_COST, COLD_SLOAD_COST,
            WARM_STORAGE_READ_COST},
    },
    state::ExecutionState,
};
use ethereum_types::{H256, U256};

pub(crate) fn address(state: &mut ExecutionState) -> Result<(), StatusCode> {
    state.stack.push(address_to_u256(state.message.destination))
}

pub(crate) fn caller(state: &mut ExecutionState) -> Result<(), StatusCode> {
    state.stack.push(address_to_u256(state.message.sender))
}

pub(crate) fn callvalue(state: &mut ExecutionState) -> Result<(), StatusCode> {
    state.stack.push(state.message.value)
}

fn host_err(_: anyhow::Error) -> StatusCode {
    StatusCode::InternalError
}

pub(crate) fn balance<H: Host>(host: &mut H, state: &mut ExecutionState) -> Result<(), StatusCode> {
    let address = u256_to_address(state.stack.pop()?);

    if state.evm_revision >= Revision::Berlin
        && host.access_account(address).map_err(host_err)? == AccessStatus::Cold
    {
        state.gas_left -= i64::from(ADDITIONAL_COLD_ACCOUNT_ACCESS_COST);
        if state.gas_left < 0 {
            return Err(StatusCode::OutOfGas);
        }
    }

    let balance = host.get_balance(address).map_err(host_err)?;
    state.stack.push(balance)
}

pub(crate) fn extcodesize<H: Host>(
    host: &mut H,
    state: &mut ExecutionState,
) -> Result<(), StatusCode> {
    let address = u256_to_address(state.stack.pop()?);

    if state.evm_revision >= Revision::Berlin
        && host.access_account(address).map_err(host_err)? == AccessStatus::Cold
    {
        state.gas_left -= i64::from(ADDITIONAL_COLD_ACCOUNT_ACCESS_COST);
        if state.gas_left < 0 {
            return Err(StatusCode::OutOfGas);
        }
    }

    let code_size = host.get_code_size(address).map_err(host_err)?;
    state.stack.push(code_size)
}

pub(crate) fn origin_accessor(tx_context: &TxContext) -> U256 {
    address_to_u256(tx_context.tx_origin)
}

pub(crate) fn coinbase_accessor(tx_context: &TxContext) -> U256 {
    address_to_u256(tx_context.block_coinbase)
}

pub(crate) fn gasprice_accessor(tx_context: &TxContext) -> U256 {
    tx_context.tx_gas_price
}

pub(crate) fn timestamp_accessor(tx_context: &TxContext) -> U256 {
    tx_context.block_timestamp.into()
}

pub(crate) fn number_accessor(tx_context: &TxContext) -> U256 {
    tx_context.block_number.into()
}

pub(crate) fn gaslimit_accessor(tx_context: &TxContext) -> U256 {
    tx_context.block_gas_limit.into()
}

pub(crate) fn difficulty_accessor(tx_context: &TxContext) -> U256 {
    tx_context.block_difficulty
}

pub(crate) fn chainid_accessor(tx_context: &TxContext) -> U256 {
    tx_context.chain_id
}

pub(crate) fn basefee_accessor(tx_context: &TxContext) -> U256 {
    tx_context.block_base_fee
}

pub(crate) fn blobbasefee_accessor(tx_context: &TxContext) -> U256 {
    tx_context.blob_base_fee
}

pub(crate) fn blobhash<H: Host>(host: &mut H, state: &mut ExecutionState) -> Result<(), StatusCode> {
    let index = state.stack.pop()?;
    let tx_context = host.get_tx_context().map_err(host_err)?;

    let hash = if index < U256::from(tx_context.blob_hashes.len()) {
        tx_context.blob_hashes[index.as_usize()]
    } else {
        H256::zero()
    };

    state.stack.push(U256::from_big_endian(hash.as_bytes()))
}

pub(crate) fn push_txcontext<H: Host>(
    host: &mut H,
    state: &mut ExecutionState,
    accessor: fn(&TxContext) -> U256,
) -> Result<(), StatusCode> {
    let tx_context = host.get_tx_context().map_err(host_err)?;
    state.stack.push(accessor(&tx_context))
}

pub(crate) fn selfbalance<H: Host>(
    host: &mut H,
    state: &mut ExecutionState,
) -> Result<(), StatusCode> {
    let balance = host
        .get_balance(state.message.destination)
        .map_err(host_err)?;
    state.stack.push(balance)
}

pub(crate) fn blockhash<H: Host>(
    host: &mut H,
    state: &mut ExecutionState,
) -> Result<(), StatusCode> {
    let number = state.stack.pop()?;

    let upper_bound = host.get_tx_context().map_err(host_err)?.block_number;
    let lower_bound = upper_bound.saturating_sub(256);

    let mut header = H256::zero();
    if number <= u64::MAX.into() {
        let n = number.as_u64();
        if (lower_bound..upper_bound).contains(&n) {
            header = host.get_block_hash(n).map_err(host_err)?;
        }
    }

    state.stack.push(U256::from_big_endian(&header.0))
}

pub(crate) fn do_log<H: Host>(
    host: &mut H,
    state: &mut ExecutionState,
    num_topics: usize,
) -> Result<(), StatusCode> {
    if state.message.is_static {
        return Err(StatusCode::WriteProtection);
    }

    let offset = state.stack.pop()?;
    let size = state.stack.pop()?;

    state.stack.require(num_topics)?;

    let data = {
        let region = memory::verify_memory_region(state, offset, size)?;

        if let Some(region) = &region {
            let cost = region.size as i64 * 8;
            state.gas_left -= cost;
            if state.gas_left < 0 {
                return Err(StatusCode::OutOfGas);
            }
        }

        region
            .map(|r| state.memory.slice(r.offset, r.size).to_vec())
            .unwrap_or_default()
    };

    let mut topics = arrayvec::ArrayVec::<H256, 4>::new();
    for _ in 0..num_topics {
        topics.push(H256(state.stack.pop()?.into()));
    }

    host.emit_log(state.message.destination, &data, &topics)
        .map_err(host_err)
}

pub(crate) fn sload<H: Host>(host: &mut H, state: &mut ExecutionState) -> Result<(), StatusCode> {
    let key = H256(state.stack.pop()?.into());

    if state.evm_revision >= Revision::Berlin
        && host
            .access_storage(state.message.destination, key)
            .map_err(host_err)?
            == AccessStatus::Cold
    {
        const ADDITIONAL_COLD_SLOAD_COST: u16 = COLD_SLOAD_COST - WARM_STORAGE_READ_COST;
        state.gas_left -= i64::from(ADDITIONAL_COLD_SLOAD_COST);
        if state.gas_left < 0 {
            return Err(StatusCode::OutOfGas);
        }
    }

    let value = host
        .get_storage(state.message.destination, key)
        .map_err(host_err)?;
    state.stack.push(U256::from_big_endian(value.as_bytes()))
}

pub(crate) fn sstore<H: Host>(host: &mut H, state: &mut ExecutionState) -> Result<(), StatusCode> {
    if state.message.is_static {
        return Err(StatusCode::WriteProtection);
    }

    if state.evm_revision >= Revision::Istanbul && state.gas_left <= 2300 {
        return Err(StatusCode::OutOfGas);
    }

    let key = H256(state.stack.pop()?.into());
    let value = H256(state.stack.pop()?.into());

    let mut cost: u16 = 0;
    if state.evm_revision >= Revision::Berlin
        && host
            .access_storage(state.message.destination, key)
            .map_err(host_err)?
            == AccessStatus::Cold
    {
        cost = COLD_SLOAD_COST;
    }

    let status = host
        .set_storage(state.message.destination, key, value)
        .map_err(host_err)?;

    cost = match status {
        StorageStatus::Unchanged | StorageStatus::ModifiedAgain => {
            if state.evm_revision >= Revision::Berlin {
                cost + WARM_STORAGE_READ_COST
            } else if state.evm_revision == Revision::Istanbul {
                800
            } else if state.evm_revision == Revision::Constantinople {
                200
            } else {
                5000
            }
        }
        StorageStatus::Modified | StorageStatus::Deleted => {
            if state.evm_revision >= Revision::Berlin {
                cost + 5000 - COLD_SLOAD_COST
            } else {
                5000
            }
        }
        StorageStatus::Added => cost + 20000,
    };

    state.gas_left -= i64::from(cost);
    if state.gas_left < 0 {
        return Err(StatusCode::OutOfGas);
    }

    Ok(())
}

pub(crate) fn tload<H: Host>(host: &mut H, state: &mut ExecutionState) -> Result<(), StatusCode> {
    let key = H256(state.stack.pop()?.into());
    let value = host
        .get_transient_storage(state.message.destination, key)
        .map_err(host_err)?;
    state.stack.push(U256::from_big_endian(value.as_bytes()))
}

pub(crate) fn tstore<H: Host>(host: &mut H, state: &mut ExecutionState) -> Result<(), StatusCode> {
    if state.message.is_static {
        return Err(StatusCode::WriteProtection);
    }

    let key = H256(state.stack.pop()?.into());
    let value = H256(state.stack.pop()?.into());
    host.set_transient_storage(state.message.destination, key, value)
        .map_err(host_err)
}

/// Returns the accrued refund from a successful SELFDESTRUCT, per EIP-3529
/// (post-London there is none; pre-London it's a flat 24000).
pub(crate) fn selfdestruct<H: Host>(
    host: &mut H,
    state: &mut ExecutionState,
) -> Result<(), StatusCode> {
    if state.message.is_static {
        return Err(StatusCode::WriteProtection);
    }

    let beneficiary = u256_to_address(state.stack.pop()?);

    if state.evm_revision >= Revision::Berlin
        && host.access_account(beneficiary).map_err(host_err)? == AccessStatus::Cold
    {
        state.gas_left -= i64::from(COLD_ACCOUNT_ACCESS_COST);
        if state.gas_left < 0 {
            return Err(StatusCode::OutOfGas);
        }
    }

    if state.evm_revision >= Revision::Tangerine
        && (state.evm_revision == Revision::Tangerine
            || !host
                .get_balance(state.message.destination)
                .map_err(host_err)?
                .is_zero())
        && !host.account_exists(beneficiary).map_err(host_err)?
    {
        // After Tangerine Whistle apply the additional cost of sending
        // value to a non-existing account.
        state.gas_left -= 25000;
        if state.gas_left < 0 {
            return Err(StatusCode::OutOfGas);
        }
    }

    let beneficiary_was_empty = host
        .selfdestruct(state.message.destination, beneficiary)
        .map_err(host_err)?;
    let _ = beneficiary_was_empty;

    if state.evm_revision < Revision::London {
        state.gas_refund += 24000;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use crate::common::u256_to_address;
    use ethereum_types::Address;
    use hex_literal::hex;

    #[test]
    fn u256_to_address_conversion() {
        assert_eq!(
            u256_to_address(0x42.into()),
            Address::from(hex!("0000000000000000000000000000000000000042"))
        );
    }
}
