//! Decode consumer capability bits

use std::fmt;
use std::ops::BitOr;

/// Capabilities advertised by the video or audio decode consumer
#[derive(Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct Capabilities(u32);

impl Capabilities {
    /// Access units are pushed to the decoder synchronously from the receive
    /// thread instead of through the ready pool
    pub const DIRECT_SUBMIT: Capabilities = Capabilities(0x1);

    /// The decoder can recover from loss by invalidating reference frames,
    /// so a new sync frame is not required after every drop
    pub const REFERENCE_FRAME_INVALIDATION: Capabilities = Capabilities(0x2);

    /// No capabilities
    pub const fn empty() -> Self {
        Capabilities(0)
    }

    /// Build from raw bits
    pub const fn from_bits(bits: u32) -> Self {
        Capabilities(bits)
    }

    /// Raw bits
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Check if every capability in `other` is present
    #[inline]
    pub const fn contains(self, other: Capabilities) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for Capabilities {
    type Output = Capabilities;

    fn bitor(self, rhs: Capabilities) -> Capabilities {
        Capabilities(self.0 | rhs.0)
    }
}

impl fmt::Debug for Capabilities {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names = Vec::new();
        if self.contains(Capabilities::DIRECT_SUBMIT) {
            names.push("DIRECT_SUBMIT");
        }
        if self.contains(Capabilities::REFERENCE_FRAME_INVALIDATION) {
            names.push("REFERENCE_FRAME_INVALIDATION");
        }
        write!(f, "Capabilities({})", names.join(" | "))
    }
}
