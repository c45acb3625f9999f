use crate::{
    common::{address_to_u256, u256_to_address, CallKind, Message, Revision, StatusCode},
    gas,
    host::{AccessStatus, Host},
    instructions::{memory, properties::ADDITIONAL_COLD_ACCOUNT_ACCESS_COST},
    state::ExecutionState,
};
use bytes::Bytes;
use ethereum_types::{H256, U256};
use std::cmp::min;

fn host_err(_: anyhow::Error) -> StatusCode {
    StatusCode::InternalError
}

/// CALL/CALLCODE/DELEGATECALL/STATICCALL. `is_static` is the forced
/// staticness of STATICCALL; the message additionally inherits the current
/// frame's staticness.
pub(crate) fn call<H: Host>(
    host: &mut H,
    state: &mut ExecutionState,
    kind: CallKind,
    is_static: bool,
) -> Result<(), StatusCode> {
    let gas = state.stack.pop()?;
    let dst = u256_to_address(state.stack.pop()?);
    let value = if is_static || matches!(kind, CallKind::DelegateCall) {
        U256::zero()
    } else {
        state.stack.pop()?
    };
    let has_value = !value.is_zero();
    let input_offset = state.stack.pop()?;
    let input_size = state.stack.pop()?;
    let output_offset = state.stack.pop()?;
    let output_size = state.stack.pop()?;

    state.stack.push(U256::zero())?; // Assume failure.

    if state.evm_revision >= Revision::Berlin
        && host.access_account(dst).map_err(host_err)? == AccessStatus::Cold
    {
        state.gas_left -= i64::from(ADDITIONAL_COLD_ACCOUNT_ACCESS_COST);
        if state.gas_left < 0 {
            return Err(StatusCode::OutOfGas);
        }
    }

    let input_region = memory::verify_memory_region(state, input_offset, input_size)?;
    let output_region = memory::verify_memory_region(state, output_offset, output_size)?;

    let mut msg = Message {
        kind,
        is_static: is_static || state.message.is_static,
        depth: state.message.depth + 1,
        destination: dst,
        sender: if matches!(kind, CallKind::DelegateCall) {
            state.message.sender
        } else {
            state.message.destination
        },
        gas: i64::MAX,
        value: if matches!(kind, CallKind::DelegateCall) {
            state.message.value
        } else {
            value
        },
        input_data: input_region
            .map(|r| state.memory.slice(r.offset, r.size).to_vec().into())
            .unwrap_or_default(),
    };

    let mut cost: i64 = if has_value { 9000 } else { 0 };

    if matches!(kind, CallKind::Call) {
        if has_value && state.message.is_static {
            return Err(StatusCode::WriteProtection);
        }

        if (has_value || state.evm_revision < Revision::Spurious)
            && !host.account_exists(dst).map_err(host_err)?
        {
            cost += 25000;
        }
    }
    state.gas_left -= cost;
    if state.gas_left < 0 {
        return Err(StatusCode::OutOfGas);
    }

    if gas < U256::from(msg.gas) {
        msg.gas = gas.as_u64() as i64;
    }

    let eip150_active = state.evm_revision >= Revision::Tangerine;
    if eip150_active {
        msg.gas = gas::call_gas(true, state.gas_left, msg.gas);
    } else if msg.gas > state.gas_left {
        return Err(StatusCode::OutOfGas);
    }

    if has_value {
        msg.gas += 2300; // Add stipend.
        state.gas_left += 2300;
    }

    state.return_data = Default::default();

    let caller_balance = if has_value {
        host.get_balance(state.message.destination).map_err(host_err)?
    } else {
        U256::zero()
    };

    if state.message.depth < 1024 && !(has_value && caller_balance < value) {
        let msg_gas = msg.gas;
        let result = host.call(&msg).map_err(host_err)?;
        state.return_data = result.output_data.clone();
        state
            .stack
            .set_top(if matches!(result.status_code, StatusCode::Success) {
                U256::one()
            } else {
                U256::zero()
            })?;

        if let Some(region) = output_region {
            let copy_size = min(region.size, result.output_data.len());
            if copy_size > 0 {
                state
                    .memory
                    .copy_from(region.offset, &result.output_data, 0, copy_size);
            }
        }

        let gas_used = msg_gas - result.gas_left;
        state.gas_left -= gas_used;
        if matches!(result.status_code, StatusCode::Success) {
            state.gas_refund += result.gas_refund;
        }
    }

    Ok(())
}

/// CREATE/CREATE2.
pub(crate) fn create<H: Host>(
    host: &mut H,
    state: &mut ExecutionState,
    create2: bool,
) -> Result<(), StatusCode> {
    if state.message.is_static {
        return Err(StatusCode::WriteProtection);
    }

    let endowment = state.stack.pop()?;
    let init_code_offset = state.stack.pop()?;
    let init_code_size = state.stack.pop()?;

    let region = memory::verify_memory_region(state, init_code_offset, init_code_size)?;

    let call_kind = if create2 {
        let salt = state.stack.pop()?;

        if let Some(region) = &region {
            let salt_cost = memory::num_words(region.size) * 6;
            state.gas_left -= salt_cost;
            if state.gas_left < 0 {
                return Err(StatusCode::OutOfGas);
            }
        }

        CallKind::Create2 {
            salt: H256(salt.into()),
        }
    } else {
        CallKind::Create
    };

    state.stack.push(U256::zero())?;
    state.return_data = Default::default();

    let caller_balance = if endowment.is_zero() {
        U256::zero()
    } else {
        host.get_balance(state.message.destination).map_err(host_err)?
    };

    if state.message.depth < 1024 && !(!endowment.is_zero() && caller_balance < endowment) {
        let msg = Message {
            gas: if state.evm_revision >= Revision::Tangerine {
                state.gas_left - state.gas_left / 64
            } else {
                state.gas_left
            },
            is_static: false,
            destination: Default::default(),
            kind: call_kind,
            input_data: if let Some(region) = &region {
                state.memory.slice(region.offset, region.size).to_vec().into()
            } else {
                Bytes::new()
            },
            sender: state.message.destination,
            depth: state.message.depth + 1,
            value: endowment,
        };
        let msg_gas = msg.gas;
        let result = host.call(&msg).map_err(host_err)?;
        state.gas_left -= msg_gas - result.gas_left;

        state.return_data = result.output_data;
        if result.status_code == StatusCode::Success {
            state.gas_refund += result.gas_refund;
            state.stack.set_top(address_to_u256(
                result.create_address.expect("successful CREATE always sets create_address"),
            ))?;
        }
    }

    Ok(())
}
