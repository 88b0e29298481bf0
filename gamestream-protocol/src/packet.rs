//! Wire formats for the video and audio streams
//!
//! Every datagram starts with a standard 12-byte RTP fixed header. Video
//! datagrams follow it with a 16-byte video header and, on the first packet
//! of a frame, a host-generation-specific frame header before the Annex-B
//! payload. Audio datagrams carry the Opus payload directly after the RTP
//! header.
//!
//! ```text
//! video:  | RTP (12) | video header (16) | frame header (0/8/12, first packet) | Annex-B ... |
//! audio:  | RTP (12) | Opus ... |
//! ```

use crate::ring::Packet;
use crate::sequence::{SeqNumber, PACKET_INDEX_MASK};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::fmt;
use thiserror::Error;

/// Size of the RTP fixed header
pub const RTP_HEADER_SIZE: usize = 12;

/// Size of the video packet header that follows the RTP header
pub const VIDEO_HEADER_SIZE: usize = 16;

/// RTP packet type carried by every audio datagram
pub const AUDIO_PACKET_TYPE: u8 = 97;

/// RTP packet type used on video datagrams
pub const VIDEO_PACKET_TYPE: u8 = 0;

/// Keep-alive datagram sent on each stream socket
pub const KEEPALIVE_PAYLOAD: &[u8; 4] = b"PING";

/// RTP version 2 with no padding, extension or CSRCs
const RTP_HEADER_BYTE: u8 = 0x80;

/// RTP extension bit (in the first header byte)
const RTP_FLAG_EXTENSION: u8 = 0x10;

/// Marker byte at the start of the per-frame header
const FRAME_HEADER_TYPE: u8 = 0x01;

/// Packet parsing errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PacketError {
    #[error("Packet too short: expected at least {expected} bytes, got {actual}")]
    TooShort { expected: usize, actual: usize },

    #[error("Unexpected RTP packet type {actual} (expected {expected})")]
    UnexpectedPacketType { expected: u8, actual: u8 },

    #[error("Unsupported RTP version {0}")]
    UnsupportedVersion(u8),
}

fn ensure_len(data: &[u8], expected: usize) -> Result<(), PacketError> {
    if data.len() < expected {
        Err(PacketError::TooShort {
            expected,
            actual: data.len(),
        })
    } else {
        Ok(())
    }
}

/// RTP fixed header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RtpHeader {
    /// Version, padding, extension and CSRC count bits
    pub header: u8,
    /// Marker bit and payload type
    pub packet_type: u8,
    /// Sequence number
    pub seq: SeqNumber,
    /// Media timestamp
    pub timestamp: u32,
    /// Synchronization source
    pub ssrc: u32,
}

impl RtpHeader {
    /// Create a header with the given packet type and sequence number
    pub fn new(packet_type: u8, seq: SeqNumber, timestamp: u32, ssrc: u32) -> Self {
        RtpHeader {
            header: RTP_HEADER_BYTE,
            packet_type,
            seq,
            timestamp,
            ssrc,
        }
    }

    /// Parse the fixed header from the start of a datagram
    pub fn parse(data: &[u8]) -> Result<Self, PacketError> {
        ensure_len(data, RTP_HEADER_SIZE)?;

        let mut buf = data;
        let header = buf.get_u8();
        let version = header >> 6;
        if version != 2 {
            return Err(PacketError::UnsupportedVersion(version));
        }

        Ok(RtpHeader {
            header,
            packet_type: buf.get_u8(),
            seq: SeqNumber::new(buf.get_u16()),
            timestamp: buf.get_u32(),
            ssrc: buf.get_u32(),
        })
    }

    /// Check if the extension bit is set
    #[inline]
    pub fn has_extension(&self) -> bool {
        self.header & RTP_FLAG_EXTENSION != 0
    }

    /// Total header length, including a header extension if present
    pub fn header_len(&self, data: &[u8]) -> Result<usize, PacketError> {
        if !self.has_extension() {
            return Ok(RTP_HEADER_SIZE);
        }

        // Extension: 16-bit profile, 16-bit length in 32-bit words
        ensure_len(data, RTP_HEADER_SIZE + 4)?;
        let words = u16::from_be_bytes([data[RTP_HEADER_SIZE + 2], data[RTP_HEADER_SIZE + 3]]);
        let len = RTP_HEADER_SIZE + 4 + words as usize * 4;
        ensure_len(data, len)?;
        Ok(len)
    }

    /// Serialize the fixed header
    pub fn write_to(&self, buf: &mut BytesMut) {
        buf.put_u8(self.header);
        buf.put_u8(self.packet_type);
        buf.put_u16(self.seq.as_raw());
        buf.put_u32(self.timestamp);
        buf.put_u32(self.ssrc);
    }
}

/// Video packet flags
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct VideoFlags(u8);

impl VideoFlags {
    /// The payload carries picture data (clear on FEC parity shards)
    pub const CONTAINS_PICTURE_DATA: VideoFlags = VideoFlags(0x01);
    /// Last packet of a frame
    pub const END_OF_FRAME: VideoFlags = VideoFlags(0x02);
    /// First packet of a frame
    pub const START_OF_FRAME: VideoFlags = VideoFlags(0x04);

    /// No flags set
    pub const fn empty() -> Self {
        VideoFlags(0)
    }

    /// Build from the raw flag byte
    pub const fn from_bits(bits: u8) -> Self {
        VideoFlags(bits)
    }

    /// Raw flag byte
    pub const fn bits(self) -> u8 {
        self.0
    }

    /// Check if every flag in `other` is set
    #[inline]
    pub const fn contains(self, other: VideoFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for VideoFlags {
    type Output = VideoFlags;

    fn bitor(self, rhs: VideoFlags) -> VideoFlags {
        VideoFlags(self.0 | rhs.0)
    }
}

impl fmt::Debug for VideoFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names = Vec::new();
        if self.contains(VideoFlags::START_OF_FRAME) {
            names.push("SOF");
        }
        if self.contains(VideoFlags::CONTAINS_PICTURE_DATA) {
            names.push("PIC");
        }
        if self.contains(VideoFlags::END_OF_FRAME) {
            names.push("EOF");
        }
        write!(f, "VideoFlags({:#04x} {})", self.0, names.join("|"))
    }
}

/// Video packet header (16 bytes, little-endian fields)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoHeader {
    /// Stream-wide packet index (24 bits)
    pub stream_packet_index: u32,
    /// Frame this packet belongs to
    pub frame_index: u32,
    /// Packet flags
    pub flags: VideoFlags,
    /// Multi-FEC flags
    pub multi_fec_flags: u8,
    /// Multi-FEC block layout
    pub multi_fec_blocks: u8,
    /// FEC shard information
    pub fec_info: u32,
}

impl VideoHeader {
    /// Create a header for a data packet with no FEC information
    pub fn new(stream_packet_index: u32, frame_index: u32, flags: VideoFlags) -> Self {
        VideoHeader {
            stream_packet_index: stream_packet_index & PACKET_INDEX_MASK,
            frame_index,
            flags,
            multi_fec_flags: 0,
            multi_fec_blocks: 0,
            fec_info: 0,
        }
    }

    /// Parse the header from the bytes following the RTP header
    pub fn parse(data: &[u8]) -> Result<Self, PacketError> {
        ensure_len(data, VIDEO_HEADER_SIZE)?;

        let mut buf = data;
        // Index lives in the upper 24 bits of the first word
        let stream_packet_index = buf.get_u32_le() >> 8;
        let frame_index = buf.get_u32_le();
        let flags = VideoFlags::from_bits(buf.get_u8());
        let _reserved = buf.get_u8();
        let multi_fec_flags = buf.get_u8();
        let multi_fec_blocks = buf.get_u8();
        let fec_info = buf.get_u32_le();

        Ok(VideoHeader {
            stream_packet_index,
            frame_index,
            flags,
            multi_fec_flags,
            multi_fec_blocks,
            fec_info,
        })
    }

    /// Serialize the header
    pub fn write_to(&self, buf: &mut BytesMut) {
        buf.put_u32_le((self.stream_packet_index & PACKET_INDEX_MASK) << 8);
        buf.put_u32_le(self.frame_index);
        buf.put_u8(self.flags.bits());
        buf.put_u8(0);
        buf.put_u8(self.multi_fec_flags);
        buf.put_u8(self.multi_fec_blocks);
        buf.put_u32_le(self.fec_info);
    }

    /// Index of this shard within its FEC block
    pub fn fec_shard_index(&self) -> u32 {
        (self.fec_info >> 12) & 0x3FF
    }

    /// Number of data shards in the FEC block
    pub fn fec_data_shards(&self) -> u32 {
        (self.fec_info >> 22) & 0x3FF
    }
}

/// Host server generation, which determines the per-frame header size
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HostGeneration {
    /// No frame header
    Legacy,
    /// 8-byte frame header
    Gen5,
    /// 12-byte frame header
    #[default]
    Gen7,
}

impl HostGeneration {
    /// Length of the frame header carried by the first packet of each frame
    pub fn frame_header_len(self) -> usize {
        match self {
            HostGeneration::Legacy => 0,
            HostGeneration::Gen5 => 8,
            HostGeneration::Gen7 => 12,
        }
    }
}

/// A received video datagram with its parsed headers
#[derive(Debug, Clone)]
pub struct VideoPacket {
    /// Backing datagram
    pub packet: Packet,
    /// RTP header
    pub rtp: RtpHeader,
    /// Video header
    pub header: VideoHeader,
    /// Offset of the first byte after the video header
    pub payload_offset: usize,
}

impl VideoPacket {
    /// Parse the headers of a received datagram
    pub fn parse(packet: Packet) -> Result<Self, PacketError> {
        let data = packet.data();
        let rtp = RtpHeader::parse(data)?;
        let rtp_len = rtp.header_len(data)?;
        let header = VideoHeader::parse(&data[rtp_len..])?;

        Ok(VideoPacket {
            rtp,
            header,
            payload_offset: rtp_len + VIDEO_HEADER_SIZE,
            packet,
        })
    }

    /// RTP sequence number
    #[inline]
    pub fn seq(&self) -> SeqNumber {
        self.rtp.seq
    }

    /// Bytes after the video header (frame header included on first packets)
    #[inline]
    pub fn payload(&self) -> &[u8] {
        &self.packet.data()[self.payload_offset..]
    }
}

/// A received audio datagram with its parsed header
#[derive(Debug, Clone)]
pub struct AudioPacket {
    /// Backing datagram
    pub packet: Packet,
    /// RTP header
    pub rtp: RtpHeader,
    /// Offset of the Opus payload
    pub payload_offset: usize,
}

impl AudioPacket {
    /// Parse a received datagram, rejecting anything that is not an audio packet
    pub fn parse(packet: Packet) -> Result<Self, PacketError> {
        let data = packet.data();
        let rtp = RtpHeader::parse(data)?;
        if rtp.packet_type != AUDIO_PACKET_TYPE {
            return Err(PacketError::UnexpectedPacketType {
                expected: AUDIO_PACKET_TYPE,
                actual: rtp.packet_type,
            });
        }
        let payload_offset = rtp.header_len(data)?;

        Ok(AudioPacket {
            rtp,
            payload_offset,
            packet,
        })
    }

    /// RTP sequence number
    #[inline]
    pub fn seq(&self) -> SeqNumber {
        self.rtp.seq
    }

    /// Opus payload
    #[inline]
    pub fn payload(&self) -> &[u8] {
        &self.packet.data()[self.payload_offset..]
    }
}

/// Splits encoded frames into video datagrams, as a host does
///
/// Used by the synthetic host and by tests to produce wire-exact input.
#[derive(Debug, Clone)]
pub struct VideoPacketizer {
    /// Maximum payload bytes per datagram (excluding headers)
    packet_size: usize,
    generation: HostGeneration,
    next_seq: SeqNumber,
    next_packet_index: u32,
    ssrc: u32,
}

impl VideoPacketizer {
    /// Create a packetizer
    pub fn new(packet_size: usize, generation: HostGeneration) -> Self {
        VideoPacketizer {
            packet_size: packet_size.max(1),
            generation,
            next_seq: SeqNumber::new(0),
            next_packet_index: 0,
            ssrc: 0,
        }
    }

    /// Set the first RTP sequence number to use
    pub fn with_initial_seq(mut self, seq: SeqNumber) -> Self {
        self.next_seq = seq;
        self
    }

    /// Set the first stream packet index to use
    pub fn with_initial_packet_index(mut self, index: u32) -> Self {
        self.next_packet_index = index & PACKET_INDEX_MASK;
        self
    }

    /// Next RTP sequence number that will be assigned
    pub fn next_seq(&self) -> SeqNumber {
        self.next_seq
    }

    /// Split one frame into datagrams
    ///
    /// The frame header is prepended to the frame before splitting, so the
    /// first datagram's payload budget includes it.
    pub fn packetize(&mut self, frame_index: u32, frame: &[u8]) -> Vec<Bytes> {
        let header_len = self.generation.frame_header_len();
        let mut body = BytesMut::with_capacity(header_len + frame.len());
        if header_len > 0 {
            body.put_u8(FRAME_HEADER_TYPE);
            body.put_bytes(0, header_len - 1);
        }
        body.extend_from_slice(frame);

        let chunks: Vec<&[u8]> = if body.is_empty() {
            vec![&body[..]]
        } else {
            body.chunks(self.packet_size).collect()
        };
        let last = chunks.len() - 1;

        chunks
            .iter()
            .enumerate()
            .map(|(i, chunk)| {
                let mut flags = VideoFlags::CONTAINS_PICTURE_DATA;
                if i == 0 {
                    flags = flags | VideoFlags::START_OF_FRAME;
                }
                if i == last {
                    flags = flags | VideoFlags::END_OF_FRAME;
                }
                self.encode(frame_index, flags, chunk)
            })
            .collect()
    }

    /// Encode a single datagram, advancing the sequence counters
    pub fn encode(&mut self, frame_index: u32, flags: VideoFlags, payload: &[u8]) -> Bytes {
        let mut buf = BytesMut::with_capacity(RTP_HEADER_SIZE + VIDEO_HEADER_SIZE + payload.len());
        RtpHeader::new(VIDEO_PACKET_TYPE, self.next_seq, frame_index, self.ssrc).write_to(&mut buf);
        VideoHeader::new(self.next_packet_index, frame_index, flags).write_to(&mut buf);
        buf.extend_from_slice(payload);

        self.next_seq.increment();
        self.next_packet_index = (self.next_packet_index + 1) & PACKET_INDEX_MASK;
        buf.freeze()
    }
}

/// Encode an audio datagram
pub fn encode_audio_packet(seq: SeqNumber, timestamp: u32, payload: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(RTP_HEADER_SIZE + payload.len());
    RtpHeader::new(AUDIO_PACKET_TYPE, seq, timestamp, 0).write_to(&mut buf);
    buf.extend_from_slice(payload);
    buf.freeze()
}
