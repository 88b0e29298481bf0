//! Sequence Number Handling
//!
//! RTP sequence numbers are 16-bit values that wrap around, stream packet
//! indexes are 24-bit and frame numbers are 32-bit. Every ordering decision in
//! the pipeline goes through the wraparound-aware comparisons in this module:
//! `a` is before `b` when the signed difference `a - b`, taken modulo the
//! width of the counter, is negative.

use std::fmt;
use std::ops::{Add, AddAssign, Sub};

/// Mask for 24-bit stream packet indexes
pub const PACKET_INDEX_MASK: u32 = 0x00FF_FFFF;

/// Returns true if `a` precedes `b`.
///
/// With `wrap_aware` the comparison uses 16-bit wraparound signed arithmetic,
/// so `0xFFFF` precedes `0x0000`. Without it the values are compared as plain
/// integers.
#[inline]
pub fn is_before(a: u16, b: u16, wrap_aware: bool) -> bool {
    if wrap_aware {
        is_before16(a, b)
    } else {
        a < b
    }
}

/// Wraparound-aware "before" for 16-bit counters
#[inline]
pub fn is_before16(a: u16, b: u16) -> bool {
    (a.wrapping_sub(b) as i16) < 0
}

/// Wraparound-aware "before" for 24-bit counters (stream packet indexes)
///
/// Only the low 24 bits of each argument are significant.
#[inline]
pub fn is_before24(a: u32, b: u32) -> bool {
    (a.wrapping_sub(b) & PACKET_INDEX_MASK) >= 0x0080_0000
}

/// Wraparound-aware "before" for 32-bit counters (frame numbers)
#[inline]
pub fn is_before32(a: u32, b: u32) -> bool {
    (a.wrapping_sub(b) as i32) < 0
}

/// RTP sequence number with 16-bit wraparound semantics
#[derive(Copy, Clone, Eq, PartialEq, Hash)]
pub struct SeqNumber(u16);

impl SeqNumber {
    /// Create a new sequence number
    #[inline]
    pub fn new(value: u16) -> Self {
        SeqNumber(value)
    }

    /// Get the raw sequence number value
    #[inline]
    pub fn as_raw(self) -> u16 {
        self.0
    }

    /// Increment the sequence number by 1
    #[inline]
    pub fn increment(&mut self) {
        self.0 = self.0.wrapping_add(1);
    }

    /// Get the next sequence number
    #[inline]
    pub fn next(self) -> Self {
        SeqNumber(self.0.wrapping_add(1))
    }

    /// Signed distance from this sequence number to another
    ///
    /// Positive values mean `other` is ahead of `self`.
    #[inline]
    pub fn distance_to(self, other: SeqNumber) -> i16 {
        other.0.wrapping_sub(self.0) as i16
    }

    /// Check if this sequence number precedes another
    #[inline]
    pub fn lt(self, other: SeqNumber) -> bool {
        is_before16(self.0, other.0)
    }

    /// Check if this sequence number precedes or equals another
    #[inline]
    pub fn le(self, other: SeqNumber) -> bool {
        self == other || self.lt(other)
    }

    /// Check if this sequence number follows another
    #[inline]
    pub fn gt(self, other: SeqNumber) -> bool {
        is_before16(other.0, self.0)
    }

    /// Check if this sequence number follows or equals another
    #[inline]
    pub fn ge(self, other: SeqNumber) -> bool {
        self == other || self.gt(other)
    }
}

impl fmt::Debug for SeqNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SeqNumber({})", self.0)
    }
}

impl fmt::Display for SeqNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u16> for SeqNumber {
    fn from(value: u16) -> Self {
        SeqNumber(value)
    }
}

impl From<SeqNumber> for u16 {
    fn from(seq: SeqNumber) -> u16 {
        seq.0
    }
}

impl Add<u16> for SeqNumber {
    type Output = SeqNumber;

    fn add(self, rhs: u16) -> SeqNumber {
        SeqNumber(self.0.wrapping_add(rhs))
    }
}

impl AddAssign<u16> for SeqNumber {
    fn add_assign(&mut self, rhs: u16) {
        self.0 = self.0.wrapping_add(rhs);
    }
}

impl Sub for SeqNumber {
    type Output = i16;

    /// Signed distance between two sequence numbers
    fn sub(self, rhs: SeqNumber) -> i16 {
        rhs.distance_to(self)
    }
}
