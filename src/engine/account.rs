//! Per-engine entropy bookkeeping.
//!
//! The account is a plain value embedded in an engine's locked state. It has
//! no synchronization of its own; whoever mutates it must already hold the
//! owning engine's lock.

use serde::{Deserialize, Serialize};

/// Signed estimate of the unpredictable bits an engine has left.
///
/// The estimate is advisory: debits may take it below zero. Only a floor
/// wrapper turns it into a hard limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EntropyAccount {
    bits: i64,
}

impl EntropyAccount {
    /// Creates an account holding `bits`.
    pub fn new(bits: i64) -> Self {
        Self { bits }
    }

    /// Creates an account for a freshly installed seed of `len` bytes.
    pub fn for_seed_len(len: usize) -> Self {
        Self::new(bits_in_bytes(len))
    }

    /// Subtracts `bits`. There is no floor.
    pub fn debit(&mut self, bits: u64) {
        let bits = i64::try_from(bits).unwrap_or(i64::MAX);
        self.bits = self.bits.saturating_sub(bits);
    }

    /// Adds `bits`, saturating at the ends of the `i64` range.
    pub fn credit(&mut self, bits: i64) {
        self.bits = self.bits.saturating_add(bits);
    }

    /// Replaces the estimate outright.
    pub fn reset(&mut self, bits: i64) {
        self.bits = bits;
    }

    /// Current estimate in bits.
    #[inline]
    pub fn estimate(&self) -> i64 {
        self.bits
    }
}

/// Converts a byte count to a bit count without overflowing.
pub(crate) fn bits_in_bytes(len: usize) -> i64 {
    i64::try_from(len).unwrap_or(i64::MAX).saturating_mul(8)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_seed_len_initializes_bits() {
        assert_eq!(EntropyAccount::for_seed_len(32).estimate(), 256);
        assert_eq!(EntropyAccount::for_seed_len(0).estimate(), 0);
    }

    #[test]
    fn test_debit_may_go_negative() {
        let mut account = EntropyAccount::new(16);
        account.debit(32);
        assert_eq!(account.estimate(), -16);
    }

    #[test]
    fn test_credit_saturates() {
        let mut account = EntropyAccount::new(i64::MAX - 1);
        account.credit(10);
        assert_eq!(account.estimate(), i64::MAX);

        let mut account = EntropyAccount::new(i64::MIN + 1);
        account.credit(-10);
        assert_eq!(account.estimate(), i64::MIN);
    }

    #[test]
    fn test_huge_debit_saturates() {
        let mut account = EntropyAccount::new(0);
        account.debit(u64::MAX);
        assert_eq!(account.estimate(), -i64::MAX);
        account.debit(u64::MAX);
        assert_eq!(account.estimate(), i64::MIN);
    }

    proptest! {
        #[test]
        fn prop_debits_sum(start in 0usize..=64, debits in proptest::collection::vec(0u64..=64, 0..50)) {
            let mut account = EntropyAccount::for_seed_len(start);
            for bits in &debits {
                account.debit(*bits);
            }
            let spent: i64 = debits.iter().map(|b| *b as i64).sum();
            prop_assert_eq!(account.estimate(), 8 * start as i64 - spent);
        }
    }
}
