use crate::{state::*, StatusCode};
use ethereum_types::U256;

pub(crate) fn push(stack: &mut Stack, code: &[u8], push_len: usize) -> Result<(), StatusCode> {
    stack.push(U256::from_big_endian(&code[..push_len]))
}

pub(crate) fn dup(stack: &mut Stack, height: usize) -> Result<(), StatusCode> {
    stack.dup(height)
}

pub(crate) fn swap(stack: &mut Stack, height: usize) -> Result<(), StatusCode> {
    stack.swap(height)
}

pub(crate) fn pop(stack: &mut Stack) -> Result<(), StatusCode> {
    stack.pop().map(drop)
}
