//! Shared stream counters
//!
//! The receive and assembly state is owned by one thread per stream. Other
//! threads (loss feedback, telemetry, the CLI) only read these atomic
//! counters or a `CounterSnapshot` of them.

use std::sync::atomic::{AtomicU64, Ordering};

/// Atomic counters for one stream
#[derive(Debug, Default)]
pub struct StreamCounters {
    packets_received: AtomicU64,
    packets_lost: AtomicU64,
    frames_completed: AtomicU64,
    frames_dropped: AtomicU64,
}

impl StreamCounters {
    /// Create zeroed counters
    pub fn new() -> Self {
        Self::default()
    }

    /// Count a received datagram
    #[inline]
    pub fn record_packet(&self) {
        self.packets_received.fetch_add(1, Ordering::Relaxed);
    }

    /// Count datagrams known to be lost
    #[inline]
    pub fn record_lost(&self, count: u64) {
        if count > 0 {
            self.packets_lost.fetch_add(count, Ordering::Relaxed);
        }
    }

    /// Count a completed frame
    #[inline]
    pub fn record_frame(&self) {
        self.frames_completed.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a dropped frame
    #[inline]
    pub fn record_drop(&self) {
        self.frames_dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Frames completed so far
    pub fn frames_completed(&self) -> u64 {
        self.frames_completed.load(Ordering::Relaxed)
    }

    /// Read every counter
    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            packets_received: self.packets_received.load(Ordering::Relaxed),
            packets_lost: self.packets_lost.load(Ordering::Relaxed),
            frames_completed: self.frames_completed.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of `StreamCounters`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CounterSnapshot {
    /// Datagrams received
    pub packets_received: u64,
    /// Datagrams known to be lost
    pub packets_lost: u64,
    /// Frames completed
    pub frames_completed: u64,
    /// Frames dropped
    pub frames_dropped: u64,
}

impl CounterSnapshot {
    /// Counts accumulated since an earlier snapshot
    pub fn since(&self, earlier: &CounterSnapshot) -> CounterSnapshot {
        CounterSnapshot {
            packets_received: self.packets_received.saturating_sub(earlier.packets_received),
            packets_lost: self.packets_lost.saturating_sub(earlier.packets_lost),
            frames_completed: self.frames_completed.saturating_sub(earlier.frames_completed),
            frames_dropped: self.frames_dropped.saturating_sub(earlier.frames_dropped),
        }
    }

    /// Packet loss rate (0.0 to 1.0)
    pub fn loss_rate(&self) -> f64 {
        let total = self.packets_received + self.packets_lost;
        if total == 0 {
            0.0
        } else {
            self.packets_lost as f64 / total as f64
        }
    }
}

/// Connection quality reported to the user
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Okay,
    Poor,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_delta() {
        let counters = StreamCounters::new();
        counters.record_packet();
        counters.record_packet();
        let first = counters.snapshot();

        counters.record_packet();
        counters.record_lost(3);
        counters.record_frame();
        let delta = counters.snapshot().since(&first);

        assert_eq!(delta.packets_received, 1);
        assert_eq!(delta.packets_lost, 3);
        assert_eq!(delta.frames_completed, 1);
        assert_eq!(delta.frames_dropped, 0);
        assert!((delta.loss_rate() - 0.75).abs() < 1e-9);
    }

    #[test]
    fn test_loss_rate_empty() {
        assert_eq!(CounterSnapshot::default().loss_rate(), 0.0);
    }
}
