//! Loss events and their coalescing
//!
//! The assemblers report loss as `LossEvent`s on a bounded channel. The
//! single consumer drains everything queued at once and coalesces it into one
//! `FeedbackAction` for the host: either invalidate a range of frames or
//! request a full resync. A full resync anywhere in the batch wins.

use crate::sequence::is_before32;
use crossbeam::channel::{self, Receiver, Sender, TrySendError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Inclusive range of frame numbers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameRange {
    /// First frame in range
    pub first: u32,
    /// Last frame in range (inclusive)
    pub last: u32,
}

impl FrameRange {
    /// Create a new frame range
    pub fn new(first: u32, last: u32) -> Self {
        FrameRange { first, last }
    }

    /// Create a single-frame range
    pub fn single(frame: u32) -> Self {
        FrameRange {
            first: frame,
            last: frame,
        }
    }

    /// Number of frames in the range
    pub fn len(&self) -> u32 {
        self.last.wrapping_sub(self.first).wrapping_add(1)
    }

    /// Check if the range contains a frame number
    pub fn contains(&self, frame: u32) -> bool {
        !is_before32(frame, self.first) && !is_before32(self.last, frame)
    }

    /// Smallest range covering both
    pub fn union(&self, other: &FrameRange) -> FrameRange {
        FrameRange {
            first: if is_before32(other.first, self.first) {
                other.first
            } else {
                self.first
            },
            last: if is_before32(self.last, other.last) {
                other.last
            } else {
                self.last
            },
        }
    }
}

/// Loss reported by an assembler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LossEvent {
    /// The listed frames were lost; the host should stop referencing them
    Invalidate { first: u32, last: u32 },
    /// The decoder needs a fresh sync frame
    FullResync,
}

impl LossEvent {
    /// Invalidation event for a frame range
    pub fn invalidate(range: FrameRange) -> Self {
        LossEvent::Invalidate {
            first: range.first,
            last: range.last,
        }
    }
}

/// What to ask of the host after draining the loss queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedbackAction {
    /// Ask for a new sync frame
    FullResync,
    /// Ask the host to stop referencing these frames
    Invalidate(FrameRange),
}

/// Coalesce a batch of loss events into one action
///
/// Returns `None` for an empty batch.
pub fn coalesce<I>(events: I) -> Option<FeedbackAction>
where
    I: IntoIterator<Item = LossEvent>,
{
    let mut range: Option<FrameRange> = None;
    for event in events {
        match event {
            LossEvent::FullResync => return Some(FeedbackAction::FullResync),
            LossEvent::Invalidate { first, last } => {
                let incoming = FrameRange::new(first, last);
                range = Some(match range {
                    Some(current) => current.union(&incoming),
                    None => incoming,
                });
            }
        }
    }
    range.map(FeedbackAction::Invalidate)
}

/// Create a bounded loss channel
pub fn loss_channel(capacity: usize) -> (LossReporter, LossEvents) {
    let (tx, rx) = channel::bounded(capacity.max(1));
    let overflow = Arc::new(AtomicBool::new(false));
    (
        LossReporter {
            tx,
            overflow: Arc::clone(&overflow),
        },
        LossEvents { rx, overflow },
    )
}

/// Producer side of the loss channel
///
/// Never blocks. When the queue is full an overflow flag is latched instead,
/// and the consumer treats it as a full resync.
#[derive(Debug, Clone)]
pub struct LossReporter {
    tx: Sender<LossEvent>,
    overflow: Arc<AtomicBool>,
}

impl LossReporter {
    /// Report a loss event
    pub fn report(&self, event: LossEvent) {
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                warn!(?event, "loss queue full, escalating to full resync");
                self.overflow.store(true, Ordering::Release);
            }
            Err(TrySendError::Disconnected(_)) => {
                debug!(?event, "loss consumer gone, dropping event");
            }
        }
    }

    /// Report lost frames
    pub fn invalidate(&self, first: u32, last: u32) {
        self.report(LossEvent::Invalidate { first, last });
    }

    /// Request a full resync
    pub fn full_resync(&self) {
        self.report(LossEvent::FullResync);
    }
}

/// Consumer side of the loss channel
#[derive(Debug)]
pub struct LossEvents {
    rx: Receiver<LossEvent>,
    overflow: Arc<AtomicBool>,
}

impl LossEvents {
    /// Underlying receiver, for use in `select!`
    pub fn receiver(&self) -> &Receiver<LossEvent> {
        &self.rx
    }

    /// Drain everything currently queued, starting with `first` if given,
    /// and coalesce it into one action
    pub fn drain(&self, first: Option<LossEvent>) -> Option<FeedbackAction> {
        let overflowed = self.overflow.swap(false, Ordering::AcqRel);
        let events: Vec<LossEvent> = first.into_iter().chain(self.rx.try_iter()).collect();
        if overflowed {
            return Some(FeedbackAction::FullResync);
        }
        coalesce(events)
    }

    /// Number of queued events
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    /// Check if nothing is queued
    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}
