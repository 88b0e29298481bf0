//! Timing utilities
//!
//! `Timer` drives periodic work such as keep-alives; `EventWindow` counts
//! events inside a trailing time window for rate limiting.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Timer for periodic operations
pub struct Timer {
    interval: Duration,
    last_fire: Instant,
}

impl Timer {
    /// Create a timer that first expires one interval from now
    pub fn new(interval: Duration) -> Self {
        Timer {
            interval,
            last_fire: Instant::now(),
        }
    }

    /// Create a timer that is already expired
    pub fn expired_now(interval: Duration) -> Self {
        let now = Instant::now();
        Timer {
            interval,
            last_fire: now.checked_sub(interval).unwrap_or(now),
        }
    }

    /// Timer interval
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Check if the timer has expired
    pub fn expired(&self) -> bool {
        self.last_fire.elapsed() >= self.interval
    }

    /// Reset the timer
    pub fn reset(&mut self) {
        self.last_fire = Instant::now();
    }

    /// Get time until next expiration
    pub fn time_until_expiration(&self) -> Duration {
        self.interval.saturating_sub(self.last_fire.elapsed())
    }

    /// Fire the timer if expired, returning true if it fired
    pub fn try_fire(&mut self) -> bool {
        if self.expired() {
            self.reset();
            true
        } else {
            false
        }
    }
}

/// Counts events that happened within a trailing time window
#[derive(Debug, Clone)]
pub struct EventWindow {
    window: Duration,
    events: VecDeque<Instant>,
}

impl EventWindow {
    /// Create a window of the given length
    pub fn new(window: Duration) -> Self {
        EventWindow {
            window,
            events: VecDeque::new(),
        }
    }

    /// Record an event at `now`, returning the count inside the window
    pub fn record(&mut self, now: Instant) -> usize {
        self.prune(now);
        self.events.push_back(now);
        self.events.len()
    }

    /// Number of events inside the window ending at `now`
    pub fn count(&mut self, now: Instant) -> usize {
        self.prune(now);
        self.events.len()
    }

    /// Forget every recorded event
    pub fn clear(&mut self) {
        self.events.clear();
    }

    fn prune(&mut self, now: Instant) {
        while let Some(&oldest) = self.events.front() {
            if now.saturating_duration_since(oldest) >= self.window {
                self.events.pop_front();
            } else {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_timer() {
        let mut timer = Timer::new(Duration::from_millis(10));
        assert!(!timer.expired());

        thread::sleep(Duration::from_millis(11));
        assert!(timer.expired());

        timer.reset();
        assert!(!timer.expired());
    }

    #[test]
    fn test_timer_try_fire() {
        let mut timer = Timer::new(Duration::from_millis(10));
        assert!(!timer.try_fire());

        thread::sleep(Duration::from_millis(11));
        assert!(timer.try_fire());
        assert!(!timer.try_fire());
    }

    #[test]
    fn test_timer_expired_now() {
        let mut timer = Timer::expired_now(Duration::from_millis(500));
        assert!(timer.try_fire());
        assert!(timer.time_until_expiration() > Duration::from_millis(400));
    }

    #[test]
    fn test_event_window_counts() {
        let mut window = EventWindow::new(Duration::from_secs(60));
        let start = Instant::now();

        assert_eq!(window.record(start), 1);
        assert_eq!(window.record(start + Duration::from_secs(10)), 2);
        assert_eq!(window.record(start + Duration::from_secs(59)), 3);

        // The first event leaves the window
        assert_eq!(window.count(start + Duration::from_secs(60)), 2);
        assert_eq!(window.count(start + Duration::from_secs(200)), 0);
    }
}
