//! Property-based tests for wraparound sequence comparison
//!
//! Every ordering decision in the receive pipeline depends on these
//! comparisons, so they are checked against a plain modular-arithmetic
//! reference over the whole input space.

use gamestream_protocol::sequence::{is_before, is_before16, is_before24, is_before32, SeqNumber};
use proptest::prelude::*;

/// `a` precedes `b` when `(a - b) mod 2^16` falls in the upper half
fn reference_before16(a: u16, b: u16) -> bool {
    (i32::from(a) - i32::from(b)).rem_euclid(1 << 16) >= 1 << 15
}

fn reference_before24(a: u32, b: u32) -> bool {
    (i64::from(a & 0xFF_FFFF) - i64::from(b & 0xFF_FFFF)).rem_euclid(1 << 24) >= 1 << 23
}

#[test]
fn test_wrap_boundary() {
    assert!(is_before(0xFFFF, 0x0000, true));
    assert!(!is_before(0x0000, 0xFFFF, true));
    assert!(!is_before(0xFFFF, 0x0000, false));
    assert!(is_before(0x0000, 0xFFFF, false));

    assert!(is_before24(0xFF_FFFF, 0));
    assert!(is_before32(u32::MAX, 0));
    assert!(SeqNumber::new(0xFFFF).lt(SeqNumber::new(0)));
    assert_eq!(SeqNumber::new(0xFFFF).next(), SeqNumber::new(0));
}

#[test]
fn test_exhaustive_around_wrap() {
    for a in 0xFF00u16..=0xFFFF {
        for b in 0x0000u16..0x0100 {
            assert_eq!(is_before16(a, b), reference_before16(a, b), "a={a:#x} b={b:#x}");
            assert_eq!(is_before16(b, a), reference_before16(b, a), "a={b:#x} b={a:#x}");
        }
    }
}

proptest! {
    #[test]
    fn test_before16_matches_reference(a in any::<u16>(), b in any::<u16>()) {
        prop_assert_eq!(is_before(a, b, true), reference_before16(a, b));
    }

    #[test]
    fn test_before24_matches_reference(a in any::<u32>(), b in any::<u32>()) {
        prop_assert_eq!(is_before24(a, b), reference_before24(a, b));
    }

    #[test]
    fn test_before_is_irreflexive(a in any::<u16>()) {
        prop_assert!(!is_before16(a, a));
    }

    #[test]
    fn test_at_most_one_direction(a in any::<u16>(), b in any::<u16>()) {
        prop_assert!(!(is_before16(a, b) && is_before16(b, a)));
    }

    #[test]
    fn test_successor_follows(a in any::<u16>(), step in 1u16..0x8000) {
        let seq = SeqNumber::new(a);
        let ahead = seq + step;
        prop_assert!(seq.lt(ahead));
        prop_assert!(ahead.gt(seq));
        prop_assert_eq!(seq.distance_to(ahead), step as i16);
    }
}
