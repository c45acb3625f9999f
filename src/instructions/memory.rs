use crate::{common::*, gas, state::*};
use ethereum_types::U256;
use sha3::{Digest, Keccak256};
use std::cmp::min;

/// Upper bound on any single offset/size the interpreter will entertain;
/// anything beyond this is treated as an immediate out-of-gas rather than
/// grown for real (no real EVM execution ever has enough gas to pay for it).
pub(crate) const MAX_BUFFER_SIZE: u32 = u32::MAX;

pub(crate) struct MemoryRegion {
    pub offset: usize,
    pub size: usize,
}

/// Charge for, and grow memory to cover, `[offset, offset+size)`. Returns
/// `None` (and charges nothing) if `size == 0`, matching the convention that
/// a zero-length access never touches memory.
pub(crate) fn verify_memory_region(
    state: &mut ExecutionState,
    offset: U256,
    size: U256,
) -> Result<Option<MemoryRegion>, StatusCode> {
    if size.is_zero() {
        return Ok(None);
    }

    if offset > U256::from(MAX_BUFFER_SIZE) || size > U256::from(MAX_BUFFER_SIZE) {
        return Err(StatusCode::OutOfGas);
    }

    let offset = offset.as_usize();
    let size = size.as_usize();

    let new_size = offset.checked_add(size).ok_or(StatusCode::OutOfGas)?;
    if new_size > MAX_BUFFER_SIZE as usize {
        return Err(StatusCode::OutOfGas);
    }

    let cost = gas::memory_gas_cost(state.memory.size(), new_size);
    state.gas_left -= cost;
    if state.gas_left < 0 {
        return Err(StatusCode::OutOfGas);
    }

    Ok(Some(MemoryRegion { offset, size }))
}

pub(crate) fn mload(state: &mut ExecutionState) -> Result<(), StatusCode> {
    let index = state.stack.pop()?;

    let region = verify_memory_region(state, index, U256::from(32))?.unwrap();

    let value = state.memory.load32(region.offset);
    state.stack.push(value)
}

pub(crate) fn mstore(state: &mut ExecutionState) -> Result<(), StatusCode> {
    let index = state.stack.pop()?;
    let value = state.stack.pop()?;

    let region = verify_memory_region(state, index, U256::from(32))?.unwrap();

    state.memory.store32(region.offset, value);
    Ok(())
}

pub(crate) fn mstore8(state: &mut ExecutionState) -> Result<(), StatusCode> {
    let index = state.stack.pop()?;
    let value = state.stack.pop()?;

    let region = verify_memory_region(state, index, U256::one())?.unwrap();

    state.memory.store_byte(region.offset, value.low_u32() as u8);
    Ok(())
}

pub(crate) fn msize(state: &mut ExecutionState) -> Result<(), StatusCode> {
    state.stack.push(state.memory.size().into())
}

pub(crate) fn mcopy(state: &mut ExecutionState) -> Result<(), StatusCode> {
    let dst = state.stack.pop()?;
    let src = state.stack.pop()?;
    let size = state.stack.pop()?;

    let max_offset = dst.max(src);
    let region = verify_memory_region(state, max_offset, size)?;

    if region.is_some() {
        let copy_cost = 3 * num_words(size.as_usize());
        state.gas_left -= copy_cost;
        if state.gas_left < 0 {
            return Err(StatusCode::OutOfGas);
        }

        state
            .memory
            .copy_within(dst.as_usize(), src.as_usize(), size.as_usize());
    }

    Ok(())
}

/// The size of the EVM 256-bit word.
const WORD_SIZE: i64 = 32;

/// Returns the number of words needed to cover `size_in_bytes`.
pub(crate) fn num_words(size_in_bytes: usize) -> i64 {
    ((size_in_bytes as i64) + (WORD_SIZE - 1)) / WORD_SIZE
}

pub(crate) fn calldatacopy(state: &mut ExecutionState) -> Result<(), StatusCode> {
    let mem_index = state.stack.pop()?;
    let input_index = state.stack.pop()?;
    let size = state.stack.pop()?;

    let region = verify_memory_region(state, mem_index, size)?;

    if let Some(region) = region {
        let copy_cost = num_words(region.size) * 3;
        state.gas_left -= copy_cost;
        if state.gas_left < 0 {
            return Err(StatusCode::OutOfGas);
        }

        let input_len = state.message.input_data.len();
        let src = min(U256::from(input_len), input_index).as_usize();

        state
            .memory
            .copy_from(region.offset, &state.message.input_data, src, region.size);
    }

    Ok(())
}

pub(crate) fn keccak256(state: &mut ExecutionState) -> Result<(), StatusCode> {
    let index = state.stack.pop()?;
    let size = state.stack.pop()?;

    let region = verify_memory_region(state, index, size)?;

    let hash = if let Some(region) = region {
        let w = num_words(region.size);
        let cost = w * 6;
        state.gas_left -= cost;
        if state.gas_left < 0 {
            return Err(StatusCode::OutOfGas);
        }

        Keccak256::digest(state.memory.slice(region.offset, region.size))
    } else {
        Keccak256::digest([])
    };

    state.stack.push(U256::from_big_endian(&hash))
}

pub(crate) fn codesize(stack: &mut Stack, code: &[u8]) -> Result<(), StatusCode> {
    stack.push(code.len().into())
}

pub(crate) fn codecopy(state: &mut ExecutionState, code: &[u8]) -> Result<(), StatusCode> {
    let mem_index = state.stack.pop()?;
    let input_index = state.stack.pop()?;
    let size = state.stack.pop()?;

    let region = verify_memory_region(state, mem_index, size)?;

    if let Some(region) = region {
        let copy_cost = num_words(region.size) * 3;
        state.gas_left -= copy_cost;
        if state.gas_left < 0 {
            return Err(StatusCode::OutOfGas);
        }

        let src = min(U256::from(code.len()), input_index).as_usize();
        state.memory.copy_from(region.offset, code, src, region.size);
    }

    Ok(())
}

pub(crate) fn extcodehash<H: crate::host::Host>(
    host: &mut H,
    state: &mut ExecutionState,
) -> Result<(), StatusCode> {
    let addr = u256_to_address(state.stack.pop()?);

    if state.evm_revision >= Revision::Berlin
        && host
            .access_account(addr)
            .map_err(|_| StatusCode::InternalError)?
            == crate::host::AccessStatus::Cold
    {
        state.gas_left -= i64::from(super::properties::ADDITIONAL_COLD_ACCOUNT_ACCESS_COST);
        if state.gas_left < 0 {
            return Err(StatusCode::OutOfGas);
        }
    }

    let hash = host
        .get_code_hash(addr)
        .map_err(|_| StatusCode::InternalError)?;
    state.stack.push(U256::from_big_endian(hash.as_bytes()))
}

pub(crate) fn extcodecopy<H: crate::host::Host>(
    host: &mut H,
    state: &mut ExecutionState,
) -> Result<(), StatusCode> {
    let addr = u256_to_address(state.stack.pop()?);
    let mem_index = state.stack.pop()?;
    let input_index = state.stack.pop()?;
    let size = state.stack.pop()?;

    let region = verify_memory_region(state, mem_index, size)?;

    if let Some(region) = &region {
        let copy_cost = num_words(region.size) * 3;
        state.gas_left -= copy_cost;
        if state.gas_left < 0 {
            return Err(StatusCode::OutOfGas);
        }
    }

    if state.evm_revision >= Revision::Berlin
        && host
            .access_account(addr)
            .map_err(|_| StatusCode::InternalError)?
            == crate::host::AccessStatus::Cold
    {
        state.gas_left -= i64::from(super::properties::ADDITIONAL_COLD_ACCOUNT_ACCESS_COST);
        if state.gas_left < 0 {
            return Err(StatusCode::OutOfGas);
        }
    }

    if let Some(region) = region {
        let src = min(U256::from(MAX_BUFFER_SIZE), input_index).as_usize();
        let mut buf = vec![0u8; region.size];
        host.copy_code(addr, src, &mut buf)
            .map_err(|_| StatusCode::InternalError)?;
        state.memory.copy_from(region.offset, &buf, 0, region.size);
    }

    Ok(())
}

pub(crate) fn returndatasize(state: &mut ExecutionState) -> Result<(), StatusCode> {
    state.stack.push(state.return_data.len().into())
}

pub(crate) fn returndatacopy(state: &mut ExecutionState) -> Result<(), StatusCode> {
    let mem_index = state.stack.pop()?;
    let input_index = state.stack.pop()?;
    let size = state.stack.pop()?;

    if size > U256::from(MAX_BUFFER_SIZE) || input_index > U256::from(MAX_BUFFER_SIZE) {
        return Err(StatusCode::InvalidMemoryAccess);
    }
    let src = input_index.as_usize();
    let copy_len = size.as_usize();

    if src.saturating_add(copy_len) > state.return_data.len() {
        return Err(StatusCode::InvalidMemoryAccess);
    }

    let region = verify_memory_region(state, mem_index, size)?;

    if let Some(region) = region {
        let copy_cost = num_words(region.size) * 3;
        state.gas_left -= copy_cost;
        if state.gas_left < 0 {
            return Err(StatusCode::OutOfGas);
        }

        state
            .memory
            .copy_from(region.offset, &state.return_data, src, region.size);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        common::{CallKind, Message},
        state::ExecutionState,
    };
    use ethereum_types::Address;

    fn test_message() -> Message {
        Message {
            kind: CallKind::Call,
            is_static: false,
            depth: 0,
            gas: 0,
            destination: Address::zero(),
            sender: Address::zero(),
            input_data: Default::default(),
            value: U256::zero(),
        }
    }

    #[test]
    fn mstore_then_mload_roundtrips() {
        let mut state = ExecutionState::new(test_message(), Revision::Shanghai);
        state.gas_left = 1_000_000;
        state.stack.push(U256::from(42)).unwrap();
        state.stack.push(U256::zero()).unwrap();
        mstore(&mut state).unwrap();

        state.stack.push(U256::zero()).unwrap();
        mload(&mut state).unwrap();
        assert_eq!(state.stack.pop().unwrap(), U256::from(42));
    }
}
