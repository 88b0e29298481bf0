//! Video frame assembly
//!
//! `FrameAssembler` turns in-order video packets into access units. It is
//! driven by a single thread and owns all of its state; loss is reported
//! through a `LossReporter` and progress through shared `StreamCounters`.
//!
//! Packet handling, in order:
//!
//! 1. Packets from frames before the expected one, or whose stream packet
//!    index does not advance, are dropped.
//! 2. A frame start while a frame is still open abandons the open frame.
//! 3. A continuation with no open frame is ignored if it looks like FEC
//!    padding and otherwise resyncs past its frame and reports it lost.
//! 4. A frame start ahead of the expected frame reports the skipped frames.
//! 5. A stream packet index gap inside a frame drops the frame.
//! 6. The first packet of a frame is scanned to split and classify its
//!    leading NAL units; every other packet is appended by reference.
//! 7. End of frame seals the access unit, unless a sync frame is pending.
//! 8. With no free access unit, the ready set is flushed and a full resync
//!    requested.
//! 9. Too many consecutive dropped frames request a full resync.

use crate::access_unit::{AccessUnit, UnitFlags};
use crate::capability::Capabilities;
use crate::loss::LossReporter;
use crate::nal::{starts_with_start_code, NalClass, NalScanner, NalUnit, VideoFormat};
use crate::packet::{HostGeneration, VideoFlags, VideoPacket};
use crate::pool::{BufferPool, Pooled};
use crate::sequence::{is_before24, is_before32, PACKET_INDEX_MASK};
use crate::stats::StreamCounters;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

/// Consecutive dropped frames that force a full resync
pub const CONSECUTIVE_DROP_LIMIT: u32 = 120;

/// Frame assembler configuration
#[derive(Debug, Clone)]
pub struct AssemblerConfig {
    /// Codec of the stream
    pub format: VideoFormat,
    /// Host generation, which sets the frame header length
    pub host_generation: HostGeneration,
    /// Nominal payload bytes per packet
    pub packet_size: usize,
    /// Decoder capabilities
    pub capabilities: Capabilities,
    /// Discard frames until the first sync frame or parameter sets
    pub require_initial_sync_frame: bool,
    /// Consecutive dropped frames before a full resync is forced
    pub max_consecutive_drops: u32,
    /// Minimum interval between "waiting for sync frame" logs
    pub waiting_log_interval: Duration,
}

impl Default for AssemblerConfig {
    fn default() -> Self {
        AssemblerConfig {
            format: VideoFormat::H264,
            host_generation: HostGeneration::Gen7,
            packet_size: 1024,
            capabilities: Capabilities::empty(),
            require_initial_sync_frame: true,
            max_consecutive_drops: CONSECUTIVE_DROP_LIMIT,
            waiting_log_interval: Duration::from_secs(1),
        }
    }
}

impl AssemblerConfig {
    /// A sync frame is required after every drop unless the decoder can
    /// invalidate reference frames
    pub fn strict_sync_wait(&self) -> bool {
        !self
            .capabilities
            .contains(Capabilities::REFERENCE_FRAME_INVALIDATION)
    }
}

/// Frame assembler statistics
#[derive(Debug, Clone, Default)]
pub struct AssemblerStats {
    /// Access units emitted
    pub frames_completed: u64,
    /// Frames abandoned or discarded
    pub frames_dropped: u64,
    /// Complete frames discarded while waiting for a sync frame
    pub sync_waits: u64,
    /// Full resyncs forced by the consecutive drop limit
    pub escalations: u64,
    /// Frames lost to an empty access unit pool
    pub pool_exhaustions: u64,
    /// Stale or duplicate packets dropped
    pub stale_packets: u64,
    /// Parity or padding packets that carried no picture data
    pub fec_packets: u64,
}

/// Video depacketizer
pub struct FrameAssembler {
    config: AssemblerConfig,
    pool: BufferPool<AccessUnit>,
    loss: LossReporter,
    counters: Arc<StreamCounters>,
    stats: AssemblerStats,

    /// Frame being assembled, or the next one expected
    next_frame_number: Option<u32>,
    /// Stream packet index of the last accepted packet
    last_packet_index: Option<u32>,
    /// Frame under construction
    in_progress: AccessUnit,
    /// The current frame's start packet has been seen
    frame_active: bool,
    /// The first packet ended right after a start code; the leading NAL
    /// header is the first byte of the next packet
    header_pending: bool,
    waiting_for_sync: bool,
    waiting_for_next_successful_frame: bool,
    /// First frame after the last emitted one
    start_frame_number: u32,
    consecutive_drops: u32,
    sync_frame_seen: bool,
    last_waiting_log: Option<Instant>,
}

impl FrameAssembler {
    /// Create an assembler that seals frames into units from `pool`
    pub fn new(
        config: AssemblerConfig,
        pool: BufferPool<AccessUnit>,
        loss: LossReporter,
        counters: Arc<StreamCounters>,
    ) -> Self {
        let waiting_for_sync = config.require_initial_sync_frame;
        FrameAssembler {
            config,
            pool,
            loss,
            counters,
            stats: AssemblerStats::default(),
            next_frame_number: None,
            last_packet_index: None,
            in_progress: AccessUnit::with_capacity(64),
            frame_active: false,
            header_pending: false,
            waiting_for_sync,
            waiting_for_next_successful_frame: false,
            start_frame_number: 0,
            consecutive_drops: 0,
            sync_frame_seen: !waiting_for_sync,
            last_waiting_log: None,
        }
    }

    /// Feed one in-order packet, returning a sealed access unit when a frame
    /// completes
    pub fn process(&mut self, packet: VideoPacket) -> Option<Pooled<AccessUnit>> {
        let header = packet.header;
        let frame = header.frame_index;
        let index = header.stream_packet_index & PACKET_INDEX_MASK;
        let first = header.flags.contains(VideoFlags::START_OF_FRAME);
        let last = header.flags.contains(VideoFlags::END_OF_FRAME);

        let expected = match self.next_frame_number {
            Some(expected) => expected,
            None => {
                debug!(frame, index, "video stream baseline");
                self.start_frame_number = frame;
                frame
            }
        };
        self.next_frame_number = Some(expected);

        if is_before32(frame, expected) {
            trace!(frame, expected, "dropping packet from an earlier frame");
            self.stats.stale_packets += 1;
            return None;
        }
        if let Some(last_index) = self.last_packet_index {
            if !is_before24(last_index, index) {
                trace!(index, last_index, "dropping stale packet");
                self.stats.stale_packets += 1;
                return None;
            }
        }

        if first {
            let mut abandoned = false;
            if self.frame_active {
                warn!(
                    frame,
                    open_frame = self.in_progress.frame_number(),
                    "frame start before end of previous frame"
                );
                self.abandon_frame();
                abandoned = true;
            }

            if frame != expected {
                warn!(
                    first = expected,
                    last = frame.wrapping_sub(1),
                    "network dropped entire frames"
                );
                self.report_lost(expected, frame.wrapping_sub(1));
                if !abandoned {
                    self.abandon_frame();
                }
            }

            self.begin_frame(&packet);
        } else if !self.frame_active {
            if self.looks_like_fec(&packet) {
                trace!(frame, index, "ignoring padding outside a frame");
                self.stats.fec_packets += 1;
                return None;
            }

            warn!(frame, "start of frame was lost");
            self.report_lost(expected, frame);
            self.next_frame_number = Some(frame.wrapping_add(1));
            self.abandon_frame();
            return None;
        } else {
            let contiguous = self
                .last_packet_index
                .is_some_and(|last_index| (last_index + 1) & PACKET_INDEX_MASK == index);
            if frame != expected || !contiguous {
                warn!(
                    frame,
                    index,
                    last_index = ?self.last_packet_index,
                    "packet lost inside frame, dropping frame"
                );
                self.next_frame_number = Some(frame.wrapping_add(1));
                self.abandon_frame();
                return None;
            }

            self.last_packet_index = Some(index);
            if header.flags.contains(VideoFlags::CONTAINS_PICTURE_DATA) {
                let range = packet.payload_offset..packet.packet.len();
                self.in_progress.push_shared(&packet.packet, range);
                if self.header_pending {
                    self.header_pending = false;
                    if let Some(&byte) = packet.payload().first() {
                        let flags = self.leading_flags(byte);
                        self.apply_leading_flags(frame, flags);
                    }
                }
            } else {
                self.stats.fec_packets += 1;
            }
        }

        if last && self.frame_active {
            return self.complete_frame();
        }
        None
    }

    /// FEC padding heuristics: no picture data, or a short payload on a
    /// packet that does not end its frame
    fn looks_like_fec(&self, packet: &VideoPacket) -> bool {
        let flags = packet.header.flags;
        !flags.contains(VideoFlags::CONTAINS_PICTURE_DATA)
            || (packet.payload().len() < self.config.packet_size
                && !flags.contains(VideoFlags::END_OF_FRAME))
    }

    fn begin_frame(&mut self, packet: &VideoPacket) {
        let frame = packet.header.frame_index;
        self.next_frame_number = Some(frame);
        self.last_packet_index = Some(packet.header.stream_packet_index & PACKET_INDEX_MASK);
        self.frame_active = true;
        self.header_pending = false;
        self.in_progress
            .begin(frame, packet.packet.received_at());

        if !packet
            .header
            .flags
            .contains(VideoFlags::CONTAINS_PICTURE_DATA)
        {
            self.stats.fec_packets += 1;
            return;
        }

        let header_len = self.config.host_generation.frame_header_len();
        let start = (packet.payload_offset + header_len).min(packet.packet.len());
        let flags = self.split_leading_nals(packet, start);
        self.apply_leading_flags(frame, flags);
    }

    fn leading_flags(&self, header: u8) -> UnitFlags {
        match self.config.format.classify(header) {
            NalClass::ParameterSet => UnitFlags::CODEC_CONFIG,
            NalClass::SyncPicture => UnitFlags::SYNC_FRAME,
            NalClass::Picture => UnitFlags::empty(),
        }
    }

    fn apply_leading_flags(&mut self, frame: u32, flags: UnitFlags) {
        self.in_progress.set_flags(flags);
        if !flags.is_empty() {
            self.sync_frame_seen = true;
            if self.waiting_for_sync {
                info!(frame, ?flags, "sync frame received");
                self.waiting_for_sync = false;
            }
        }
    }

    /// Split the NAL units ahead of the first picture NAL out of the first
    /// packet and reference the rest, returning flags for the leading NAL
    fn split_leading_nals(&mut self, packet: &VideoPacket, start: usize) -> UnitFlags {
        let bytes = packet.packet.data();
        let end = bytes.len();
        let data = &bytes[start..];

        if !starts_with_start_code(data) {
            self.in_progress.push_shared(&packet.packet, start..end);
            return UnitFlags::empty();
        }

        let units: Vec<NalUnit> = NalScanner::new(data).collect();
        let Some(leading) = units.first() else {
            self.in_progress.push_shared(&packet.packet, start..end);
            return UnitFlags::empty();
        };
        let flags = match leading.header_byte(data) {
            Some(byte) => self.leading_flags(byte),
            None => {
                self.header_pending = leading.end == data.len();
                UnitFlags::empty()
            }
        };

        for (i, unit) in units.iter().enumerate() {
            let parameter_set = unit
                .header_byte(data)
                .is_some_and(|byte| self.config.format.classify(byte) == NalClass::ParameterSet);
            match units.get(i + 1) {
                // Padding up to the next start code stays with this unit
                Some(next) if parameter_set => {
                    self.in_progress.push_copied(&data[unit.start..next.start]);
                }
                _ => {
                    self.in_progress
                        .push_shared(&packet.packet, start + unit.start..end);
                    break;
                }
            }
        }
        flags
    }

    fn complete_frame(&mut self) -> Option<Pooled<AccessUnit>> {
        let frame = self.in_progress.frame_number();
        self.frame_active = false;
        self.next_frame_number = Some(frame.wrapping_add(1));

        if self.waiting_for_sync {
            let now = Instant::now();
            let should_log = self
                .last_waiting_log
                .map_or(true, |at| now.duration_since(at) >= self.config.waiting_log_interval);
            if should_log {
                info!(frame, "waiting for sync frame");
                self.last_waiting_log = Some(now);
            }
            self.stats.sync_waits += 1;
            self.drop_frame_state();
            return None;
        }

        let Some(mut unit) = self.pool.acquire_free() else {
            let flushed = self.pool.flush_ready();
            warn!(frame, flushed, "no free access unit, requesting full resync");
            self.stats.pool_exhaustions += 1;
            self.stats.frames_dropped += 1;
            self.counters.record_drop();
            self.in_progress.clear();
            self.loss.full_resync();
            self.waiting_for_sync = true;
            return None;
        };

        std::mem::swap(&mut *unit, &mut self.in_progress);
        self.in_progress.clear();

        if self.waiting_for_next_successful_frame {
            if is_before32(self.start_frame_number, frame) {
                debug!(
                    first = self.start_frame_number,
                    last = frame.wrapping_sub(1),
                    "reporting frames lost before this one"
                );
                self.loss
                    .invalidate(self.start_frame_number, frame.wrapping_sub(1));
            }
            self.waiting_for_next_successful_frame = false;
        }

        self.start_frame_number = frame.wrapping_add(1);
        self.consecutive_drops = 0;
        self.stats.frames_completed += 1;
        self.counters.record_frame();
        trace!(frame, len = unit.len(), flags = ?unit.flags(), "frame complete");
        Some(unit)
    }

    /// Report lost frames now. The next successful frame only reports what
    /// was not already covered here.
    fn report_lost(&mut self, first: u32, last: u32) {
        self.loss.invalidate(first, last);
        if self.start_frame_number == first {
            self.start_frame_number = last.wrapping_add(1);
        }
    }

    /// Abandon the open frame after loss
    fn abandon_frame(&mut self) {
        self.waiting_for_next_successful_frame = true;
        self.drop_frame_state();
    }

    fn drop_frame_state(&mut self) {
        self.in_progress.clear();
        self.frame_active = false;
        self.header_pending = false;
        self.stats.frames_dropped += 1;
        self.counters.record_drop();

        if self.config.strict_sync_wait() || !self.sync_frame_seen {
            self.waiting_for_sync = true;
        }

        self.consecutive_drops += 1;
        if self.consecutive_drops >= self.config.max_consecutive_drops {
            warn!(
                drops = self.consecutive_drops,
                "consecutive drop limit reached, requesting full resync"
            );
            self.consecutive_drops = 0;
            self.stats.escalations += 1;
            self.waiting_for_sync = true;
            self.loss.full_resync();
        }
    }

    /// Discard frames until the next sync frame, e.g. after a decoder error
    pub fn request_sync_frame(&mut self) {
        self.waiting_for_sync = true;
    }

    /// Check if frames are being discarded until a sync frame arrives
    pub fn is_waiting_for_sync(&self) -> bool {
        self.waiting_for_sync
    }

    /// Current run of dropped frames
    pub fn consecutive_drops(&self) -> u32 {
        self.consecutive_drops
    }

    /// Frame being assembled or expected next
    pub fn next_frame_number(&self) -> Option<u32> {
        self.next_frame_number
    }

    /// Get statistics
    pub fn stats(&self) -> &AssemblerStats {
        &self.stats
    }

    /// Configuration
    pub fn config(&self) -> &AssemblerConfig {
        &self.config
    }
}
