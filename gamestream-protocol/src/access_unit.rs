//! Access units: one decodable frame as a chain of byte views
//!
//! Most of a frame is referenced straight out of the receive ring: each
//! `Fragment::Shared` holds a `Packet` handle and the byte range it covers.
//! Only NAL units split off during the first-packet scan are copied.

use crate::ring::Packet;
use bytes::{Bytes, BytesMut};
use std::fmt;
use std::ops::{BitOr, Range};
use std::time::Instant;

/// Access unit flags
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct UnitFlags(u8);

impl UnitFlags {
    /// The unit starts with codec parameter sets
    pub const CODEC_CONFIG: UnitFlags = UnitFlags(0x1);
    /// The unit starts with a picture decodable on its own
    pub const SYNC_FRAME: UnitFlags = UnitFlags(0x2);

    /// No flags set
    pub const fn empty() -> Self {
        UnitFlags(0)
    }

    /// Check if no flag is set
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Check if every flag in `other` is set
    #[inline]
    pub const fn contains(self, other: UnitFlags) -> bool {
        self.0 & other.0 == other.0
    }

    /// Set the flags in `other`
    pub fn insert(&mut self, other: UnitFlags) {
        self.0 |= other.0;
    }
}

impl BitOr for UnitFlags {
    type Output = UnitFlags;

    fn bitor(self, rhs: UnitFlags) -> UnitFlags {
        UnitFlags(self.0 | rhs.0)
    }
}

impl fmt::Debug for UnitFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names = Vec::new();
        if self.contains(UnitFlags::CODEC_CONFIG) {
            names.push("CODEC_CONFIG");
        }
        if self.contains(UnitFlags::SYNC_FRAME) {
            names.push("SYNC_FRAME");
        }
        write!(f, "UnitFlags({})", names.join(" | "))
    }
}

/// One piece of an access unit
#[derive(Clone)]
pub enum Fragment {
    /// Bytes referenced from a received packet
    Shared { packet: Packet, range: Range<usize> },
    /// Bytes copied out of a packet
    Copied(Bytes),
}

impl Fragment {
    /// Fragment bytes
    #[inline]
    pub fn data(&self) -> &[u8] {
        match self {
            Fragment::Shared { packet, range } => &packet.data()[range.clone()],
            Fragment::Copied(bytes) => bytes,
        }
    }

    /// Fragment length
    #[inline]
    pub fn len(&self) -> usize {
        match self {
            Fragment::Shared { range, .. } => range.len(),
            Fragment::Copied(bytes) => bytes.len(),
        }
    }

    /// Check if the fragment is empty
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for Fragment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Fragment::Shared { packet, range } => f
                .debug_struct("Shared")
                .field("range", range)
                .field("refs", &packet.ref_count())
                .finish(),
            Fragment::Copied(bytes) => f.debug_tuple("Copied").field(&bytes.len()).finish(),
        }
    }
}

/// One complete frame of Annex-B bitstream
#[derive(Debug, Default)]
pub struct AccessUnit {
    frame_number: u32,
    received_at: Option<Instant>,
    flags: UnitFlags,
    fragments: Vec<Fragment>,
    total_len: usize,
}

impl AccessUnit {
    /// Create an empty unit with room for `fragments` pieces
    pub fn with_capacity(fragments: usize) -> Self {
        AccessUnit {
            fragments: Vec::with_capacity(fragments),
            ..Default::default()
        }
    }

    /// Start a new frame
    pub fn begin(&mut self, frame_number: u32, received_at: Instant) {
        self.clear();
        self.frame_number = frame_number;
        self.received_at = Some(received_at);
    }

    /// Append a byte range of a received packet by reference
    pub fn push_shared(&mut self, packet: &Packet, range: Range<usize>) {
        if range.is_empty() {
            return;
        }
        self.total_len += range.len();
        self.fragments.push(Fragment::Shared {
            packet: packet.clone(),
            range,
        });
    }

    /// Append a copy of `data`
    pub fn push_copied(&mut self, data: &[u8]) {
        if data.is_empty() {
            return;
        }
        self.total_len += data.len();
        self.fragments
            .push(Fragment::Copied(Bytes::copy_from_slice(data)));
    }

    /// Set flags derived from the leading NAL unit
    pub fn set_flags(&mut self, flags: UnitFlags) {
        self.flags = flags;
    }

    /// Frame number
    pub fn frame_number(&self) -> u32 {
        self.frame_number
    }

    /// Receive time of the frame's first packet
    pub fn received_at(&self) -> Option<Instant> {
        self.received_at
    }

    /// Flags
    pub fn flags(&self) -> UnitFlags {
        self.flags
    }

    /// Fragments in bitstream order
    pub fn fragments(&self) -> &[Fragment] {
        &self.fragments
    }

    /// Iterate over the fragment bytes in bitstream order
    pub fn iter(&self) -> impl Iterator<Item = &[u8]> {
        self.fragments.iter().map(Fragment::data)
    }

    /// Total number of bytes
    pub fn len(&self) -> usize {
        self.total_len
    }

    /// Check if the unit holds no bytes
    pub fn is_empty(&self) -> bool {
        self.total_len == 0
    }

    /// Concatenate every fragment into one buffer
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.total_len);
        for data in self.iter() {
            buf.extend_from_slice(data);
        }
        buf.freeze()
    }

    /// Drop every fragment, releasing the packets they reference
    pub fn clear(&mut self) {
        self.fragments.clear();
        self.total_len = 0;
        self.flags = UnitFlags::empty();
        self.received_at = None;
    }
}
