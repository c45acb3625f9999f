use crate::common::{Message, Revision, StatusCode};
use arrayvec::ArrayVec;
use bytes::Bytes;
use ethereum_types::U256;
use getset::{Getters, MutGetters};

const STACK_SIZE: usize = 1024;

/// EVM stack. Every operation that can violate the 1024-item bound or
/// underflow returns a `StatusCode` rather than panicking.
#[derive(Clone, Debug, Default)]
pub struct Stack(ArrayVec<U256, STACK_SIZE>);

impl Stack {
    pub const fn limit() -> usize {
        STACK_SIZE
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Ensure at least `n` items are present, else `StackUnderflow`.
    pub fn require(&self, n: usize) -> Result<(), StatusCode> {
        if self.0.len() < n {
            return Err(StatusCode::StackUnderflow);
        }
        Ok(())
    }

    /// Ensure at least `n` free slots remain, else `StackOverflow`.
    pub fn require_capacity(&self, n: usize) -> Result<(), StatusCode> {
        if self.0.len() + n > STACK_SIZE {
            return Err(StatusCode::StackOverflow);
        }
        Ok(())
    }

    fn pos_from_top(&self, pos: usize) -> usize {
        self.0.len() - 1 - pos
    }

    /// Peek the `pos`-th item from the top (0 = top).
    pub fn peek(&self, pos: usize) -> Result<U256, StatusCode> {
        self.require(pos + 1)?;
        Ok(self.0[self.pos_from_top(pos)])
    }

    /// Alias for `peek(0)`, the current top of stack.
    pub fn back(&self) -> Result<U256, StatusCode> {
        self.peek(0)
    }

    pub fn push(&mut self, v: U256) -> Result<(), StatusCode> {
        self.require_capacity(1)?;
        self.0.push(v);
        Ok(())
    }

    pub fn pop(&mut self) -> Result<U256, StatusCode> {
        self.0.pop().ok_or(StatusCode::StackUnderflow)
    }

    /// DUPn: push a copy of the item `height` slots below the top.
    pub fn dup(&mut self, height: usize) -> Result<(), StatusCode> {
        self.require(height)?;
        self.require_capacity(1)?;
        let v = self.0[self.pos_from_top(height - 1)];
        self.0.push(v);
        Ok(())
    }

    /// SWAPn: exchange the top item with the one `height` slots below it.
    pub fn swap(&mut self, height: usize) -> Result<(), StatusCode> {
        self.require(height + 1)?;
        let top = self.0.len() - 1;
        let other = self.pos_from_top(height);
        self.0.swap(top, other);
        Ok(())
    }

    /// Overwrite the top-of-stack item in place (used to replace the
    /// optimistic "assume failure" push CALL/CREATE make before the child
    /// frame runs).
    pub fn set_top(&mut self, v: U256) -> Result<(), StatusCode> {
        self.require(1)?;
        let top = self.0.len() - 1;
        self.0[top] = v;
        Ok(())
    }
}

/// Round `size` up to the nearest multiple of 32.
fn num_words(size: usize) -> usize {
    (size + 31) / 32
}

/// Byte-addressable EVM memory. Grows only forward, in 32-byte words; callers
/// are responsible for charging gas for the growth via `gas::memory_gas_cost`
/// before calling the mutating methods here.
#[derive(Clone, Debug, Default)]
pub struct Memory(Vec<u8>);

impl Memory {
    pub fn size(&self) -> usize {
        self.0.len()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }

    /// Number of 32-byte words needed to cover `offset + len` bytes.
    pub fn words_required(offset: usize, len: usize) -> usize {
        if len == 0 {
            return 0;
        }
        num_words(offset.saturating_add(len))
    }

    fn ensure_capacity(&mut self, offset: usize, len: usize) {
        if len == 0 {
            return;
        }
        let needed = num_words(offset + len) * 32;
        if needed > self.0.len() {
            self.0.resize(needed, 0);
        }
    }

    pub fn store_byte(&mut self, offset: usize, value: u8) {
        self.ensure_capacity(offset, 1);
        self.0[offset] = value;
    }

    pub fn store32(&mut self, offset: usize, value: U256) {
        self.ensure_capacity(offset, 32);
        value.to_big_endian(&mut self.0[offset..offset + 32]);
    }

    pub fn load32(&mut self, offset: usize) -> U256 {
        self.ensure_capacity(offset, 32);
        U256::from_big_endian(&self.0[offset..offset + 32])
    }

    /// Copy `len` bytes from `src[src_offset..]` (zero-padded past its end)
    /// into `self[dst_offset..]`, growing `self` as needed.
    pub fn copy_from(&mut self, dst_offset: usize, src: &[u8], src_offset: usize, len: usize) {
        if len == 0 {
            return;
        }
        self.ensure_capacity(dst_offset, len);
        for i in 0..len {
            let byte = src.get(src_offset + i).copied().unwrap_or(0);
            self.0[dst_offset + i] = byte;
        }
    }

    /// MCOPY: copy within memory itself, correctly handling overlap.
    pub fn copy_within(&mut self, dst_offset: usize, src_offset: usize, len: usize) {
        if len == 0 {
            return;
        }
        let required = dst_offset.max(src_offset) + len;
        self.ensure_capacity(0, required);
        self.0.copy_within(src_offset..src_offset + len, dst_offset);
    }

    pub fn slice(&self, offset: usize, len: usize) -> &[u8] {
        &self.0[offset..offset + len]
    }
}

/// EVM execution state: one instance per call frame.
#[derive(Clone, Debug, Getters, MutGetters)]
pub struct ExecutionState {
    #[getset(get = "pub", get_mut = "pub")]
    pub(crate) gas_left: i64,
    #[getset(get = "pub", get_mut = "pub")]
    pub(crate) gas_refund: i64,
    #[getset(get = "pub", get_mut = "pub")]
    pub(crate) stack: Stack,
    #[getset(get = "pub", get_mut = "pub")]
    pub(crate) memory: Memory,
    pub(crate) message: Message,
    pub(crate) evm_revision: Revision,
    #[getset(get = "pub", get_mut = "pub")]
    pub(crate) return_data: Bytes,
    pub(crate) output_data: Bytes,
}

impl ExecutionState {
    pub fn new(message: Message, evm_revision: Revision) -> Self {
        Self {
            gas_left: message.gas,
            gas_refund: 0,
            stack: Default::default(),
            memory: Default::default(),
            message,
            evm_revision,
            return_data: Default::default(),
            output_data: Bytes::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stack_lifo() {
        let mut stack = Stack::default();

        let items = [0xde, 0xad, 0xbe, 0xef];

        for (i, item) in items.iter().copied().enumerate() {
            stack.push(item.into()).unwrap();
            assert_eq!(stack.len(), i + 1);
        }

        assert_eq!(stack.peek(2).unwrap(), 0xad.into());
        assert_eq!(stack.pop().unwrap(), 0xef.into());
        assert_eq!(stack.peek(2).unwrap(), 0xbe.into());
    }

    #[test]
    fn stack_underflow() {
        let mut stack = Stack::default();
        assert_eq!(stack.pop().unwrap_err(), StatusCode::StackUnderflow);
    }

    #[test]
    fn stack_overflow() {
        let mut stack = Stack::default();
        for i in 0..Stack::limit() {
            stack.push(i.into()).unwrap();
        }
        assert_eq!(stack.push(0.into()).unwrap_err(), StatusCode::StackOverflow);
    }

    #[test]
    fn memory_grows_in_words() {
        let mut mem = Memory::default();
        mem.store_byte(5, 1);
        assert_eq!(mem.size(), 32);
        mem.store32(32, U256::from(7));
        assert_eq!(mem.size(), 64);
    }
}
