//! Reorder queue for out-of-order datagrams
//!
//! Holds packets that arrive ahead of the next expected RTP sequence number
//! and releases them in ascending order once the gap is filled. Two bounds
//! force delivery when the gap is never filled: the number of held entries
//! and the age of the oldest entry. Either one moves the expected sequence
//! number forward to the lowest held entry, skipping the missing packets.

use crate::sequence::SeqNumber;
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// Reorder queue bounds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReorderConfig {
    /// Maximum number of held entries
    pub max_size: usize,
    /// Maximum time an entry may be held
    pub max_queue_time: Duration,
}

impl ReorderConfig {
    /// Bounds for the video stream
    pub fn video() -> Self {
        ReorderConfig {
            max_size: 128,
            max_queue_time: Duration::from_millis(10),
        }
    }

    /// Bounds for the audio stream
    pub fn audio() -> Self {
        ReorderConfig {
            max_size: 16,
            max_queue_time: Duration::from_millis(30),
        }
    }
}

impl Default for ReorderConfig {
    fn default() -> Self {
        Self::video()
    }
}

/// Outcome of adding a packet
#[derive(Debug)]
pub enum AddResult<T> {
    /// The packet is the next expected one and nothing is held: deliver it now
    HandleNow(T),
    /// The packet was queued and nothing can be delivered yet
    Queued,
    /// The packet was queued and `pop_ready` will now return packets
    Ready,
    /// The packet is stale or a duplicate and was dropped
    Rejected,
}

/// A held packet
#[derive(Debug)]
pub struct ReorderEntry<T> {
    /// RTP sequence number
    pub seq: SeqNumber,
    /// Time the packet was queued
    pub arrival: Instant,
    /// The packet
    pub item: T,
}

/// Reorder queue statistics
#[derive(Debug, Clone, Default)]
pub struct ReorderStats {
    /// Packets that had to be held
    pub queued: u64,
    /// Stale or duplicate packets dropped
    pub rejected: u64,
    /// Sequence numbers skipped by forced delivery
    pub skipped: u64,
    /// Forced deliveries caused by the size bound
    pub size_evictions: u64,
    /// Forced deliveries caused by the time bound
    pub time_evictions: u64,
}

/// Per-stream reorder queue keyed by RTP sequence number
pub struct ReorderQueue<T> {
    /// Held entries in ascending wraparound order
    entries: VecDeque<ReorderEntry<T>>,
    /// Next sequence number to deliver, unset until the first packet
    next_expected: Option<SeqNumber>,
    config: ReorderConfig,
    stats: ReorderStats,
}

impl<T> ReorderQueue<T> {
    /// Create an empty queue
    pub fn new(config: ReorderConfig) -> Self {
        ReorderQueue {
            entries: VecDeque::with_capacity(config.max_size + 1),
            next_expected: None,
            config,
            stats: ReorderStats::default(),
        }
    }

    /// Add a packet received now
    pub fn add(&mut self, seq: SeqNumber, item: T) -> AddResult<T> {
        self.add_at(seq, item, Instant::now())
    }

    /// Add a packet received at `now`
    pub fn add_at(&mut self, seq: SeqNumber, item: T, now: Instant) -> AddResult<T> {
        let expected = match self.next_expected {
            Some(expected) => expected,
            None => {
                // First packet seeds the queue
                self.next_expected = Some(seq.next());
                return AddResult::HandleNow(item);
            }
        };

        if seq.lt(expected) {
            trace!(%seq, %expected, "rejecting stale packet");
            self.stats.rejected += 1;
            return AddResult::Rejected;
        }

        if self.entries.is_empty() && seq == expected {
            self.next_expected = Some(seq.next());
            return AddResult::HandleNow(item);
        }

        // First held entry that follows `seq`
        let position = self
            .entries
            .iter()
            .position(|entry| !entry.seq.lt(seq))
            .unwrap_or(self.entries.len());
        if self
            .entries
            .get(position)
            .is_some_and(|entry| entry.seq == seq)
        {
            trace!(%seq, "rejecting duplicate packet");
            self.stats.rejected += 1;
            return AddResult::Rejected;
        }

        self.entries.insert(
            position,
            ReorderEntry {
                seq,
                arrival: now,
                item,
            },
        );
        self.stats.queued += 1;

        if self.entries.len() > self.config.max_size {
            self.stats.size_evictions += 1;
            self.skip_to_lowest("size");
        } else {
            self.expire(now);
        }

        if self.front_is_ready() {
            AddResult::Ready
        } else {
            AddResult::Queued
        }
    }

    /// Apply the time bound, returning true if packets became ready
    ///
    /// The age is that of the longest-held entry, which need not be the
    /// lowest sequence number. Call again after draining: an aged entry
    /// behind a new gap is released by the next call.
    pub fn expire(&mut self, now: Instant) -> bool {
        let Some(oldest) = self.entries.iter().map(|entry| entry.arrival).min() else {
            return false;
        };
        if now.saturating_duration_since(oldest) <= self.config.max_queue_time {
            return self.front_is_ready();
        }

        self.stats.time_evictions += 1;
        self.skip_to_lowest("time");
        true
    }

    /// Take the next in-order packet, if it is held
    pub fn pop_ready(&mut self) -> Option<T> {
        if !self.front_is_ready() {
            return None;
        }
        let entry = self.entries.pop_front()?;
        self.next_expected = Some(entry.seq.next());
        Some(entry.item)
    }

    fn front_is_ready(&self) -> bool {
        match (self.entries.front(), self.next_expected) {
            (Some(front), Some(expected)) => front.seq == expected,
            _ => false,
        }
    }

    /// Move the expected sequence number to the lowest held entry
    fn skip_to_lowest(&mut self, bound: &str) {
        let (Some(front), Some(expected)) = (self.entries.front(), self.next_expected) else {
            return;
        };
        let skipped = expected.distance_to(front.seq).max(0) as u64;
        if skipped > 0 {
            debug!(
                bound,
                %expected,
                lowest = %front.seq,
                skipped,
                "reorder bound exceeded, skipping missing packets"
            );
        }
        self.stats.skipped += skipped;
        self.next_expected = Some(front.seq);
    }

    /// Seed the next expected sequence number
    pub fn set_next_expected(&mut self, seq: SeqNumber) {
        self.next_expected = Some(seq);
    }

    /// Next expected sequence number
    pub fn next_expected(&self) -> Option<SeqNumber> {
        self.next_expected
    }

    /// Number of held entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if nothing is held
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every held entry
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Get statistics
    pub fn stats(&self) -> &ReorderStats {
        &self.stats
    }

    /// Configured bounds
    pub fn config(&self) -> &ReorderConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queue_from(start: u16, max_size: usize) -> ReorderQueue<u16> {
        let mut queue = ReorderQueue::new(ReorderConfig {
            max_size,
            max_queue_time: Duration::from_millis(10),
        });
        queue.set_next_expected(SeqNumber::new(start));
        queue
    }

    /// Feed values and collect everything delivered, in delivery order
    fn deliver(queue: &mut ReorderQueue<u16>, seqs: &[u16], now: Instant) -> Vec<u16> {
        let mut out = Vec::new();
        for &seq in seqs {
            match queue.add_at(SeqNumber::new(seq), seq, now) {
                AddResult::HandleNow(item) => out.push(item),
                AddResult::Ready => {
                    while let Some(item) = queue.pop_ready() {
                        out.push(item);
                    }
                }
                AddResult::Queued | AddResult::Rejected => {}
            }
        }
        out
    }

    #[test]
    fn test_reorder_delivers_in_order() {
        let mut queue = queue_from(3, 16);
        let out = deliver(&mut queue, &[5, 3, 4, 6], Instant::now());
        assert_eq!(out, vec![3, 4, 5, 6]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_first_packet_seeds_queue() {
        let mut queue = ReorderQueue::new(ReorderConfig::audio());
        assert!(matches!(
            queue.add(SeqNumber::new(900), 900u16),
            AddResult::HandleNow(900)
        ));
        assert_eq!(queue.next_expected(), Some(SeqNumber::new(901)));
    }

    #[test]
    fn test_stale_and_duplicate_rejected() {
        let mut queue = queue_from(10, 16);
        let now = Instant::now();
        assert!(matches!(
            queue.add_at(SeqNumber::new(9), 9, now),
            AddResult::Rejected
        ));
        assert!(matches!(
            queue.add_at(SeqNumber::new(12), 12, now),
            AddResult::Queued
        ));
        assert!(matches!(
            queue.add_at(SeqNumber::new(12), 12, now),
            AddResult::Rejected
        ));
        assert_eq!(queue.stats().rejected, 2);
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_size_bound_forces_lowest() {
        let mut queue = queue_from(0, 4);
        let now = Instant::now();
        for seq in [2u16, 4, 6, 8] {
            assert!(matches!(
                queue.add_at(SeqNumber::new(seq), seq, now),
                AddResult::Queued
            ));
        }

        // Fifth entry exceeds the bound: 2 becomes deliverable, 0 and 1 skipped
        assert!(matches!(
            queue.add_at(SeqNumber::new(10), 10, now),
            AddResult::Ready
        ));
        assert_eq!(queue.pop_ready(), Some(2));
        assert_eq!(queue.pop_ready(), None);
        assert_eq!(queue.stats().size_evictions, 1);
        assert_eq!(queue.stats().skipped, 2);
    }

    #[test]
    fn test_time_bound_forces_delivery() {
        let mut queue = queue_from(3, 16);
        let start = Instant::now();
        assert!(matches!(
            queue.add_at(SeqNumber::new(5), 5, start),
            AddResult::Queued
        ));

        assert!(!queue.expire(start + Duration::from_millis(5)));
        assert!(queue.expire(start + Duration::from_millis(11)));
        assert_eq!(queue.pop_ready(), Some(5));
        assert_eq!(queue.next_expected(), Some(SeqNumber::new(6)));
        assert_eq!(queue.stats().time_evictions, 1);
    }

    #[test]
    fn test_time_bound_applied_on_add() {
        let mut queue = queue_from(0, 16);
        let start = Instant::now();
        queue.add_at(SeqNumber::new(3), 3, start);

        // A later arrival notices the oldest entry has aged out
        let result = queue.add_at(SeqNumber::new(7), 7, start + Duration::from_millis(20));
        assert!(matches!(result, AddResult::Ready));
        assert_eq!(queue.pop_ready(), Some(3));
        assert_eq!(queue.pop_ready(), None);
    }

    #[test]
    fn test_time_bound_uses_longest_held_entry() {
        let mut queue = queue_from(0, 16);
        let start = Instant::now();
        queue.add_at(SeqNumber::new(10), 10, start);
        queue.add_at(SeqNumber::new(5), 5, start + Duration::from_millis(8));

        assert!(!queue.expire(start + Duration::from_millis(9)));

        // 10 has waited past the bound even though 5 is younger
        assert!(queue.expire(start + Duration::from_millis(15)));
        assert_eq!(queue.pop_ready(), Some(5));
        assert_eq!(queue.pop_ready(), None);

        assert!(queue.expire(start + Duration::from_millis(15)));
        assert_eq!(queue.pop_ready(), Some(10));
        assert!(queue.is_empty());
        assert_eq!(queue.stats().time_evictions, 2);
        assert_eq!(queue.stats().skipped, 5 + 4);
    }

    #[test]
    fn test_wraparound_ordering() {
        let mut queue = queue_from(0xFFFE, 16);
        let out = deliver(&mut queue, &[0x0000, 0xFFFF, 0x0001, 0xFFFE], Instant::now());
        assert_eq!(out, vec![0xFFFE, 0xFFFF, 0x0000, 0x0001]);
    }
}
