use crate::{
    common::{CallKind, Message, Output, Revision, StatusCode},
    host::Host,
    instructions::{
        arithmetic, bitwise, boolean, call, control::*, external, instruction_table::*, memory,
        stack_manip,
    },
    opcode::OpCode,
    state::{ExecutionState, Stack},
};
use bytes::Bytes;
use ethereum_types::U256;

fn check_requirements(
    instruction_table: &InstructionTable,
    state: &mut ExecutionState,
    op: OpCode,
) -> Result<(), StatusCode> {
    let metrics = instruction_table[op.to_usize()].ok_or(StatusCode::UndefinedInstruction)?;

    state.gas_left -= metrics.gas_cost as i64;
    if state.gas_left < 0 {
        return Err(StatusCode::OutOfGas);
    }

    let stack_size = state.stack.len();
    if stack_size == Stack::limit() {
        if metrics.can_overflow_stack {
            return Err(StatusCode::StackOverflow);
        }
    } else if stack_size < metrics.stack_height_required.into() {
        return Err(StatusCode::StackUnderflow);
    }

    Ok(())
}

#[derive(Clone, Debug)]
pub struct JumpdestMap(Vec<bool>);

impl JumpdestMap {
    pub fn contains(&self, dst: U256) -> bool {
        dst < self.0.len().into() && self.0[dst.as_usize()]
    }
}

/// EVM bytecode paired with its precomputed JUMPDEST validity map.
#[derive(Clone, Debug)]
pub struct AnalyzedCode {
    jumpdest_map: JumpdestMap,
    code: Bytes,
}

impl AnalyzedCode {
    /// Analyze code and prepare it for execution.
    pub fn analyze(code: impl AsRef<[u8]>) -> Self {
        let code = code.as_ref();
        let mut jumpdest_map = vec![false; code.len()];

        let mut i = 0;
        while i < code.len() {
            let opcode = OpCode(code[i]);
            i += match opcode {
                OpCode::JUMPDEST => {
                    jumpdest_map[i] = true;
                    1
                }
                OpCode::PUSH1
                | OpCode::PUSH2
                | OpCode::PUSH3
                | OpCode::PUSH4
                | OpCode::PUSH5
                | OpCode::PUSH6
                | OpCode::PUSH7
                | OpCode::PUSH8
                | OpCode::PUSH9
                | OpCode::PUSH10
                | OpCode::PUSH11
                | OpCode::PUSH12
                | OpCode::PUSH13
                | OpCode::PUSH14
                | OpCode::PUSH15
                | OpCode::PUSH16
                | OpCode::PUSH17
                | OpCode::PUSH18
                | OpCode::PUSH19
                | OpCode::PUSH20
                | OpCode::PUSH21
                | OpCode::PUSH22
                | OpCode::PUSH23
                | OpCode::PUSH24
                | OpCode::PUSH25
                | OpCode::PUSH26
                | OpCode::PUSH27
                | OpCode::PUSH28
                | OpCode::PUSH29
                | OpCode::PUSH30
                | OpCode::PUSH31
                | OpCode::PUSH32 => opcode.to_usize() - OpCode::PUSH1.to_usize() + 2,
                // PUSH0 has no immediate bytes, unlike PUSH1..PUSH32.
                _ => 1,
            }
        }

        let mut padded_code = vec![0_u8; i + 1];
        padded_code[..code.len()].copy_from_slice(code);
        padded_code[i] = OpCode::STOP.to_u8();

        let jumpdest_map = JumpdestMap(jumpdest_map);
        let code = padded_code.into();

        Self { jumpdest_map, code }
    }

    /// Execute analyzed EVM bytecode to completion. Always returns; the EVM
    /// error taxonomy has no suspension points and never unwinds.
    pub fn execute<H: Host>(&self, host: &mut H, message: Message, revision: Revision) -> Output {
        match run(&self.code, &self.jumpdest_map, host, message, revision) {
            Ok(output) => output,
            Err(status_code) => Output {
                status_code,
                gas_left: 0,
                gas_refund: 0,
                output_data: Bytes::new(),
                create_address: None,
            },
        }
    }
}

struct SuccessfulOutput {
    reverted: bool,
    gas_left: i64,
    gas_refund: i64,
    output_data: Bytes,
}

impl From<SuccessfulOutput> for Output {
    fn from(o: SuccessfulOutput) -> Self {
        Self {
            status_code: if o.reverted {
                StatusCode::Revert
            } else {
                StatusCode::Success
            },
            gas_left: o.gas_left,
            gas_refund: if o.reverted { 0 } else { o.gas_refund },
            output_data: o.output_data,
            create_address: None,
        }
    }
}

fn run<H: Host>(
    code: &Bytes,
    jumpdest_map: &JumpdestMap,
    host: &mut H,
    message: Message,
    revision: Revision,
) -> Result<Output, StatusCode> {
    let mut state = ExecutionState::new(message, revision);
    let instruction_table = get_baseline_instruction_table(revision);

    let mut reverted = false;
    let mut pc = 0;

    loop {
        let op = OpCode(code[pc]);

        check_requirements(instruction_table, &mut state, op)?;

        match op {
            OpCode::STOP => break,
            OpCode::ADD => arithmetic::add(&mut state.stack)?,
            OpCode::MUL => arithmetic::mul(&mut state.stack)?,
            OpCode::SUB => arithmetic::sub(&mut state.stack)?,
            OpCode::DIV => arithmetic::div(&mut state.stack)?,
            OpCode::SDIV => arithmetic::sdiv(&mut state.stack)?,
            OpCode::MOD => arithmetic::modulo(&mut state.stack)?,
            OpCode::SMOD => arithmetic::smod(&mut state.stack)?,
            OpCode::ADDMOD => arithmetic::addmod(&mut state.stack)?,
            OpCode::MULMOD => arithmetic::mulmod(&mut state.stack)?,
            OpCode::EXP => arithmetic::exp(&mut state)?,
            OpCode::SIGNEXTEND => arithmetic::signextend(&mut state.stack)?,
            OpCode::LT => boolean::lt(&mut state.stack)?,
            OpCode::GT => boolean::gt(&mut state.stack)?,
            OpCode::SLT => boolean::slt(&mut state.stack)?,
            OpCode::SGT => boolean::sgt(&mut state.stack)?,
            OpCode::EQ => boolean::eq(&mut state.stack)?,
            OpCode::ISZERO => boolean::iszero(&mut state.stack)?,
            OpCode::AND => boolean::and(&mut state.stack)?,
            OpCode::OR => boolean::or(&mut state.stack)?,
            OpCode::XOR => boolean::xor(&mut state.stack)?,
            OpCode::NOT => boolean::not(&mut state.stack)?,
            OpCode::BYTE => bitwise::byte(&mut state.stack)?,
            OpCode::SHL => bitwise::shl(&mut state.stack)?,
            OpCode::SHR => bitwise::shr(&mut state.stack)?,
            OpCode::SAR => bitwise::sar(&mut state.stack)?,

            OpCode::KECCAK256 => memory::keccak256(&mut state)?,
            OpCode::ADDRESS => external::address(&mut state)?,
            OpCode::BALANCE => external::balance(host, &mut state)?,
            OpCode::CALLER => external::caller(&mut state)?,
            OpCode::CALLVALUE => external::callvalue(&mut state)?,
            OpCode::CALLDATALOAD => calldataload(&mut state)?,
            OpCode::CALLDATASIZE => calldatasize(&mut state)?,
            OpCode::CALLDATACOPY => memory::calldatacopy(&mut state)?,
            OpCode::CODESIZE => memory::codesize(&mut state.stack, code)?,
            OpCode::CODECOPY => memory::codecopy(&mut state, code)?,
            OpCode::EXTCODESIZE => external::extcodesize(host, &mut state)?,
            OpCode::EXTCODECOPY => memory::extcodecopy(host, &mut state)?,
            OpCode::RETURNDATASIZE => memory::returndatasize(&mut state)?,
            OpCode::RETURNDATACOPY => memory::returndatacopy(&mut state)?,
            OpCode::EXTCODEHASH => memory::extcodehash(host, &mut state)?,
            OpCode::BLOCKHASH => external::blockhash(host, &mut state)?,
            OpCode::ORIGIN => external::push_txcontext(host, &mut state, external::origin_accessor)?,
            OpCode::COINBASE => {
                external::push_txcontext(host, &mut state, external::coinbase_accessor)?
            }
            OpCode::GASPRICE => {
                external::push_txcontext(host, &mut state, external::gasprice_accessor)?
            }
            OpCode::TIMESTAMP => {
                external::push_txcontext(host, &mut state, external::timestamp_accessor)?
            }
            OpCode::NUMBER => external::push_txcontext(host, &mut state, external::number_accessor)?,
            OpCode::DIFFICULTY => {
                external::push_txcontext(host, &mut state, external::difficulty_accessor)?
            }
            OpCode::GASLIMIT => {
                external::push_txcontext(host, &mut state, external::gaslimit_accessor)?
            }
            OpCode::CHAINID => external::push_txcontext(host, &mut state, external::chainid_accessor)?,
            OpCode::BASEFEE => external::push_txcontext(host, &mut state, external::basefee_accessor)?,
            OpCode::BLOBHASH => external::blobhash(host, &mut state)?,
            OpCode::BLOBBASEFEE => {
                external::push_txcontext(host, &mut state, external::blobbasefee_accessor)?
            }
            OpCode::SELFBALANCE => external::selfbalance(host, &mut state)?,
            OpCode::POP => stack_manip::pop(&mut state.stack)?,
            OpCode::MLOAD => memory::mload(&mut state)?,
            OpCode::MSTORE => memory::mstore(&mut state)?,
            OpCode::MSTORE8 => memory::mstore8(&mut state)?,
            OpCode::MCOPY => memory::mcopy(&mut state)?,
            OpCode::JUMP => {
                pc = op_jump(&mut state, jumpdest_map)?;
                continue;
            }
            OpCode::JUMPI => {
                if !state.stack.peek(1)?.is_zero() {
                    pc = op_jump(&mut state, jumpdest_map)?;
                    state.stack.pop()?;
                    continue;
                } else {
                    state.stack.pop()?;
                    state.stack.pop()?;
                }
            }
            OpCode::PC => state.stack.push(pc.into())?,
            OpCode::MSIZE => memory::msize(&mut state)?,
            OpCode::SLOAD => external::sload(host, &mut state)?,
            OpCode::SSTORE => external::sstore(host, &mut state)?,
            OpCode::GAS => state.stack.push(state.gas_left.into())?,
            OpCode::JUMPDEST => {}
            OpCode::TLOAD => external::tload(host, &mut state)?,
            OpCode::TSTORE => external::tstore(host, &mut state)?,
            OpCode::PUSH0 => state.stack.push(U256::zero())?,

            OpCode::PUSH1
            | OpCode::PUSH2
            | OpCode::PUSH3
            | OpCode::PUSH4
            | OpCode::PUSH5
            | OpCode::PUSH6
            | OpCode::PUSH7
            | OpCode::PUSH8
            | OpCode::PUSH9
            | OpCode::PUSH10
            | OpCode::PUSH11
            | OpCode::PUSH12
            | OpCode::PUSH13
            | OpCode::PUSH14
            | OpCode::PUSH15
            | OpCode::PUSH16
            | OpCode::PUSH17
            | OpCode::PUSH18
            | OpCode::PUSH19
            | OpCode::PUSH20
            | OpCode::PUSH21
            | OpCode::PUSH22
            | OpCode::PUSH23
            | OpCode::PUSH24
            | OpCode::PUSH25
            | OpCode::PUSH26
            | OpCode::PUSH27
            | OpCode::PUSH28
            | OpCode::PUSH29
            | OpCode::PUSH30
            | OpCode::PUSH31
            | OpCode::PUSH32 => {
                let push_len = op.to_usize() - OpCode::PUSH1.to_usize() + 1;
                stack_manip::push(&mut state.stack, &code[pc + 1..], push_len)?;
                pc += push_len;
            }

            OpCode::DUP1
            | OpCode::DUP2
            | OpCode::DUP3
            | OpCode::DUP4
            | OpCode::DUP5
            | OpCode::DUP6
            | OpCode::DUP7
            | OpCode::DUP8
            | OpCode::DUP9
            | OpCode::DUP10
            | OpCode::DUP11
            | OpCode::DUP12
            | OpCode::DUP13
            | OpCode::DUP14
            | OpCode::DUP15
            | OpCode::DUP16 => stack_manip::dup(
                &mut state.stack,
                op.to_usize() - OpCode::DUP1.to_usize() + 1,
            )?,

            OpCode::SWAP1
            | OpCode::SWAP2
            | OpCode::SWAP3
            | OpCode::SWAP4
            | OpCode::SWAP5
            | OpCode::SWAP6
            | OpCode::SWAP7
            | OpCode::SWAP8
            | OpCode::SWAP9
            | OpCode::SWAP10
            | OpCode::SWAP11
            | OpCode::SWAP12
            | OpCode::SWAP13
            | OpCode::SWAP14
            | OpCode::SWAP15
            | OpCode::SWAP16 => stack_manip::swap(
                &mut state.stack,
                op.to_usize() - OpCode::SWAP1.to_usize() + 1,
            )?,

            OpCode::LOG0 | OpCode::LOG1 | OpCode::LOG2 | OpCode::LOG3 | OpCode::LOG4 => {
                external::do_log(host, &mut state, op.to_usize() - OpCode::LOG0.to_usize())?
            }
            OpCode::CREATE | OpCode::CREATE2 => {
                call::create(host, &mut state, op == OpCode::CREATE2)?
            }
            OpCode::CALL | OpCode::CALLCODE | OpCode::DELEGATECALL | OpCode::STATICCALL => {
                call::call(
                    host,
                    &mut state,
                    match op {
                        OpCode::CALL | OpCode::STATICCALL => CallKind::Call,
                        OpCode::CALLCODE => CallKind::CallCode,
                        OpCode::DELEGATECALL => CallKind::DelegateCall,
                        _ => unreachable!(),
                    },
                    op == OpCode::STATICCALL,
                )?
            }
            OpCode::RETURN | OpCode::REVERT => {
                ret(&mut state)?;
                reverted = op == OpCode::REVERT;
                break;
            }
            OpCode::INVALID => return Err(StatusCode::InvalidInstruction),
            OpCode::SELFDESTRUCT => {
                external::selfdestruct(host, &mut state)?;
                break;
            }
            other => unreachable!("reached unhandled opcode: {}", other),
        }

        pc += 1;
    }

    let output = SuccessfulOutput {
        reverted,
        gas_left: state.gas_left,
        gas_refund: state.gas_refund,
        output_data: state.output_data.clone(),
    };

    Ok(output.into())
}
