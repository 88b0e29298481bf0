//! Audio depacketizer
//!
//! Audio packets are self-contained Opus frames, so assembly only tracks the
//! last accepted sequence number. A forward gap asks the decoder to conceal
//! the missing audio once before the new payload is delivered.

use crate::packet::AudioPacket;
use crate::pool::BufferPool;
use crate::sequence::SeqNumber;
use crate::stats::StreamCounters;
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Destination of accepted audio
pub trait AudioSink {
    /// Audio was lost; the decoder should synthesize a replacement
    fn conceal(&mut self);

    /// Deliver one accepted payload
    fn payload(&mut self, data: &[u8]);
}

/// What happened to a packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioOutcome {
    /// Delivered in sequence
    Accepted,
    /// Delivered after a concealment call for a forward gap
    AcceptedAfterGap,
    /// Backward or duplicate, dropped
    Dropped,
}

/// Audio assembler statistics
#[derive(Debug, Clone, Default)]
pub struct AudioStats {
    /// Payloads delivered
    pub packets_accepted: u64,
    /// Concealment calls made
    pub concealments: u64,
    /// Backward or duplicate packets dropped
    pub packets_dropped: u64,
}

/// Audio depacketizer
pub struct AudioAssembler {
    last_seq: Option<SeqNumber>,
    counters: Arc<StreamCounters>,
    stats: AudioStats,
}

impl AudioAssembler {
    /// Create an assembler
    pub fn new(counters: Arc<StreamCounters>) -> Self {
        AudioAssembler {
            last_seq: None,
            counters,
            stats: AudioStats::default(),
        }
    }

    /// Handle one in-order packet
    pub fn process<S>(&mut self, packet: &AudioPacket, sink: &mut S) -> AudioOutcome
    where
        S: AudioSink + ?Sized,
    {
        let seq = packet.seq();
        let mut outcome = AudioOutcome::Accepted;

        if let Some(last) = self.last_seq {
            if !seq.gt(last) {
                trace!(%seq, %last, "dropping old audio packet");
                self.stats.packets_dropped += 1;
                return AudioOutcome::Dropped;
            }

            let gap = seq.as_raw().wrapping_sub(last.as_raw()).wrapping_sub(1);
            if gap > 0 {
                debug!(%seq, missing = gap, "audio gap, concealing");
                self.counters.record_lost(u64::from(gap));
                self.stats.concealments += 1;
                sink.conceal();
                outcome = AudioOutcome::AcceptedAfterGap;
            }
        }

        self.last_seq = Some(seq);
        self.stats.packets_accepted += 1;
        sink.payload(packet.payload());
        outcome
    }

    /// Last accepted sequence number
    pub fn last_seq(&self) -> Option<SeqNumber> {
        self.last_seq
    }

    /// Get statistics
    pub fn stats(&self) -> &AudioStats {
        &self.stats
    }
}

/// Decoder input buffered in the audio pool
#[derive(Debug, Clone, Default)]
pub struct AudioFrame {
    /// Opus payload, empty for a concealment request
    pub data: Vec<u8>,
    /// The decoder should conceal lost audio instead of decoding `data`
    pub conceal: bool,
}

impl AudioFrame {
    /// Buffer with room for `capacity` payload bytes
    pub fn with_capacity(capacity: usize) -> Self {
        AudioFrame {
            data: Vec::with_capacity(capacity),
            conceal: false,
        }
    }

    /// Reset for reuse
    pub fn clear(&mut self) {
        self.data.clear();
        self.conceal = false;
    }
}

/// Sink that copies accepted audio into a pool for a decode thread
///
/// When no free buffer is available the oldest ready buffer is dropped to
/// make room.
pub struct PooledAudioSink {
    pool: BufferPool<AudioFrame>,
    dropped: u64,
}

impl PooledAudioSink {
    /// Create a sink publishing into `pool`
    pub fn new(pool: BufferPool<AudioFrame>) -> Self {
        PooledAudioSink { pool, dropped: 0 }
    }

    /// Ready buffers dropped to make room
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    fn publish(&mut self, conceal: bool, data: &[u8]) {
        let mut frame = match self.pool.acquire_free() {
            Some(frame) => frame,
            None => {
                if self.pool.drop_oldest_ready() {
                    self.dropped += 1;
                }
                match self.pool.acquire_free() {
                    Some(frame) => frame,
                    None => {
                        warn!("audio pool exhausted, dropping payload");
                        return;
                    }
                }
            }
        };

        frame.conceal = conceal;
        frame.data.clear();
        frame.data.extend_from_slice(data);
        self.pool.publish(frame);
    }
}

impl AudioSink for PooledAudioSink {
    fn conceal(&mut self) {
        self.publish(true, &[]);
    }

    fn payload(&mut self, data: &[u8]) {
        self.publish(false, data);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::encode_audio_packet;
    use crate::pool::QueueProfile;
    use crate::ring::Packet;

    #[derive(Default)]
    struct Recorder {
        calls: Vec<Option<Vec<u8>>>,
    }

    impl AudioSink for Recorder {
        fn conceal(&mut self) {
            self.calls.push(None);
        }

        fn payload(&mut self, data: &[u8]) {
            self.calls.push(Some(data.to_vec()));
        }
    }

    fn audio(seq: u16) -> AudioPacket {
        let datagram = encode_audio_packet(SeqNumber::new(seq), 0, &seq.to_be_bytes());
        AudioPacket::parse(Packet::from_slice(&datagram)).unwrap()
    }

    #[test]
    fn test_in_sequence_accepted() {
        let mut assembler = AudioAssembler::new(Arc::new(StreamCounters::new()));
        let mut sink = Recorder::default();
        for seq in [0xFFFE, 0xFFFF, 0] {
            assert_eq!(assembler.process(&audio(seq), &mut sink), AudioOutcome::Accepted);
        }
        assert_eq!(sink.calls.len(), 3);
        assert!(sink.calls.iter().all(Option::is_some));
    }

    #[test]
    fn test_forward_gap_conceals_once() {
        let counters = Arc::new(StreamCounters::new());
        let mut assembler = AudioAssembler::new(Arc::clone(&counters));
        let mut sink = Recorder::default();

        assembler.process(&audio(10), &mut sink);
        assert_eq!(
            assembler.process(&audio(14), &mut sink),
            AudioOutcome::AcceptedAfterGap
        );

        assert_eq!(
            sink.calls,
            vec![Some(vec![0, 10]), None, Some(vec![0, 14])]
        );
        assert_eq!(counters.snapshot().packets_lost, 3);
    }

    #[test]
    fn test_backward_and_duplicate_dropped() {
        let mut assembler = AudioAssembler::new(Arc::new(StreamCounters::new()));
        let mut sink = Recorder::default();

        assembler.process(&audio(20), &mut sink);
        assert_eq!(assembler.process(&audio(20), &mut sink), AudioOutcome::Dropped);
        assert_eq!(assembler.process(&audio(19), &mut sink), AudioOutcome::Dropped);
        assert_eq!(sink.calls.len(), 1);
        assert_eq!(assembler.stats().packets_dropped, 2);
        assert_eq!(assembler.last_seq(), Some(SeqNumber::new(20)));
    }

    #[test]
    fn test_pooled_sink_drops_oldest() {
        let pool = BufferPool::new_with_cleanup(
            2,
            QueueProfile::Shared,
            || AudioFrame::with_capacity(64),
            AudioFrame::clear,
        );
        let mut sink = PooledAudioSink::new(pool.clone());

        sink.payload(b"one");
        sink.conceal();
        sink.payload(b"three");
        assert_eq!(sink.dropped(), 1);

        let first = pool.take_ready().unwrap();
        assert!(first.conceal);
        assert!(first.data.is_empty());
        drop(first);
        let second = pool.take_ready().unwrap();
        assert_eq!(second.data, b"three");
        assert!(pool.take_ready().is_none());
    }

    #[test]
    fn test_pooled_sink_counts_only_real_drops() {
        let pool = BufferPool::new_with_cleanup(
            1,
            QueueProfile::Shared,
            || AudioFrame::with_capacity(64),
            AudioFrame::clear,
        );
        let mut sink = PooledAudioSink::new(pool.clone());

        // The only buffer is held by the decoder, so nothing can be dropped
        sink.payload(b"one");
        let held = pool.take_ready().unwrap();
        sink.payload(b"two");
        assert_eq!(sink.dropped(), 0);
        assert!(pool.take_ready().is_none());
        drop(held);
    }
}
