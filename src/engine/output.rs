//! Derived output operations built from a `next_bits` primitive.
//!
//! Each helper draws from a caller-supplied bit source, so the same
//! arithmetic serves an engine holding its own lock and a wrapper calling
//! through to the engine it decorates. Entropy is debited by the caller using
//! the nominal cost, never by these helpers.

/// Bits debited by [`f64_from`]: one double's mantissa.
pub const DOUBLE_COST_BITS: u64 = 53;

/// Minimum bits needed to choose uniformly among `bound - origin` values.
///
/// Returns 0 for an empty or single-valued range.
pub fn entropy_of_range(origin: i64, bound: i64) -> u32 {
    let span = bound as i128 - origin as i128;
    if span <= 1 {
        return 0;
    }
    128 - (span - 1).leading_zeros()
}

pub(crate) fn u64_from(next: &mut dyn FnMut(u32) -> u32) -> u64 {
    let high = next(32) as u64;
    let low = next(32) as u64;
    (high << 32) | low
}

pub(crate) fn bool_from(next: &mut dyn FnMut(u32) -> u32) -> bool {
    next(1) != 0
}

/// Uniform double in `[0, 1)` from 26 + 27 bits.
pub(crate) fn f64_from(next: &mut dyn FnMut(u32) -> u32) -> f64 {
    let high = (next(26) as u64) << 27;
    let low = next(27) as u64;
    (high + low) as f64 * (1.0 / (1u64 << 53) as f64)
}

/// Uniform value in `[0, bound)`; `bound` must be non-zero.
///
/// Powers of two take exactly `log2(bound)` bits; other bounds reject the
/// low zone of a 32-bit draw so the result carries no modulo bias.
pub(crate) fn below_from(next: &mut dyn FnMut(u32) -> u32, bound: u32) -> u32 {
    debug_assert!(bound > 0);
    if bound.is_power_of_two() {
        return next(bound.trailing_zeros());
    }
    let threshold = bound.wrapping_neg() % bound;
    loop {
        let candidate = next(32);
        if candidate >= threshold {
            return candidate % bound;
        }
    }
}

/// Fills `dest` with big-endian words; a trailing partial word is truncated.
pub(crate) fn fill_from(next: &mut dyn FnMut(u32) -> u32, dest: &mut [u8]) {
    for chunk in dest.chunks_mut(4) {
        let word = next(32).to_be_bytes();
        chunk.copy_from_slice(&word[..chunk.len()]);
    }
}

/// Shifts a full 32-bit word down to its top `bits` bits.
#[inline]
pub(crate) fn top_bits(word: u32, bits: u32) -> u32 {
    debug_assert!(bits <= 32);
    word.checked_shr(32 - bits).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counting_source() -> impl FnMut(u32) -> u32 {
        let mut word = 0u32;
        move |bits| {
            word = word.wrapping_add(0x9E37_79B9);
            top_bits(word, bits)
        }
    }

    #[test]
    fn test_entropy_of_int_ranges() {
        assert_eq!(entropy_of_range(0, 1), 0);
        assert_eq!(entropy_of_range(0, 2), 1);
        assert_eq!(entropy_of_range(0, 1 << 24), 24);
        assert_eq!(entropy_of_range(1 << 22, 1 << 24), 24);
        assert_eq!(entropy_of_range(-(1 << 24), 0), 24);
        assert_eq!(entropy_of_range(-(1 << 24), 1), 25);
    }

    #[test]
    fn test_entropy_of_long_ranges() {
        assert_eq!(entropy_of_range(0, 1 << 32), 32);
        assert_eq!(entropy_of_range(0, 1 << 42), 42);
        assert_eq!(entropy_of_range(0, i64::MAX), 63);
        assert_eq!(entropy_of_range(i64::MIN, i64::MAX), 64);
        assert_eq!(entropy_of_range(-(1 << 42), 1), 43);
        assert_eq!(entropy_of_range(5, 5), 0);
    }

    #[test]
    fn test_top_bits() {
        assert_eq!(top_bits(0xF000_0001, 4), 0xF);
        assert_eq!(top_bits(0xF000_0001, 32), 0xF000_0001);
        assert_eq!(top_bits(0xFFFF_FFFF, 0), 0);
    }

    #[test]
    fn test_below_stays_in_range() {
        let mut source = counting_source();
        for bound in [1u32, 2, 3, 7, 10, 1 << 20, u32::MAX] {
            for _ in 0..200 {
                assert!(below_from(&mut source, bound) < bound);
            }
        }
    }

    #[test]
    fn test_double_in_unit_interval() {
        let mut source = counting_source();
        for _ in 0..1000 {
            let value = f64_from(&mut source);
            assert!((0.0..1.0).contains(&value));
        }
    }

    #[test]
    fn test_fill_handles_partial_word() {
        let mut source = |_bits: u32| 0x0102_0304u32;
        let mut dest = [0u8; 6];
        fill_from(&mut source, &mut dest);
        assert_eq!(dest, [1, 2, 3, 4, 1, 2]);
    }

    #[test]
    fn test_u64_concatenates_words() {
        let mut words = [0xAAAA_AAAAu32, 0x5555_5555].into_iter();
        let mut source = |_bits: u32| words.next().unwrap_or(0);
        assert_eq!(u64_from(&mut source), 0xAAAA_AAAA_5555_5555);
    }
}
