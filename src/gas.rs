//! Gas formulas that don't belong to any single opcode: memory expansion,
//! the EIP-150 63/64 call-gas clamp, and the constants behind EIP-2929's
//! cold/warm access-list surcharges.
//!
//! Per-opcode static gas tables live in `instructions::properties`, which
//! this module re-exports the access-list constants from to keep a single
//! source of truth.

pub use crate::instructions::properties::{
    ADDITIONAL_COLD_ACCOUNT_ACCESS_COST, COLD_ACCOUNT_ACCESS_COST, COLD_SLOAD_COST,
    WARM_STORAGE_READ_COST,
};

const WORD_SIZE: i64 = 32;

fn words(size: usize) -> i64 {
    ((size as i64) + (WORD_SIZE - 1)) / WORD_SIZE
}

/// Cost, in gas, of growing memory from `current_size` to `new_size` bytes
/// (the classic `3*words + words^2/512` quadratic memory-expansion formula).
/// Returns 0 if `new_size <= current_size`.
pub fn memory_gas_cost(current_size: usize, new_size: usize) -> i64 {
    if new_size <= current_size {
        return 0;
    }
    let new_words = words(new_size);
    let current_words = words(current_size);
    let new_cost = 3 * new_words + new_words * new_words / 512;
    let current_cost = 3 * current_words + current_words * current_words / 512;
    new_cost - current_cost
}

/// EIP-150's 63/64 rule: clamp the gas forwarded to a child call so the
/// caller always retains at least 1/64th of what it had left.
///
/// `available` is the caller's gas left after static/dynamic costs have
/// already been deducted; `requested` is what the instruction asked to
/// forward (`i64::MAX` if CALL's `gas` operand exceeded the caller's own
/// balance, per the "cap, don't fail" rule below EIP-150).
pub fn call_gas(eip150_active: bool, available: i64, requested: i64) -> i64 {
    if !eip150_active {
        return requested;
    }
    let capped = available - available / 64;
    requested.min(capped)
}

/// EIP-3529 reduced the max refund quotient from 1/2 to 1/5 of gas used.
pub fn max_refund_quotient(eip3529_active: bool) -> i64 {
    if eip3529_active {
        5
    } else {
        2
    }
}

/// Cap the accrued refund counter at `gas_used / max_refund_quotient`.
pub fn capped_refund(gas_used: i64, refund: i64, eip3529_active: bool) -> i64 {
    refund.min(gas_used / max_refund_quotient(eip3529_active))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_expansion_is_quadratic() {
        assert_eq!(memory_gas_cost(0, 32), 3);
        assert_eq!(memory_gas_cost(0, 0), 0);
        assert_eq!(memory_gas_cost(32, 32), 0);
    }

    #[test]
    fn call_gas_clamps_to_63_64ths() {
        // available=10000, requested=20000 -> clamp to 10000 - 10000/64 = 9844
        assert_eq!(call_gas(true, 10000, 20000), 9844);
        assert_eq!(call_gas(false, 10000, 20000), 20000);
    }
}
