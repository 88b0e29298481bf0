//! Loss feedback loop
//!
//! One thread consumes the loss channel. Each wake-up drains everything
//! queued and sends a single control message. A ticker reports packet loss
//! telemetry and lets the connection quality monitor recover.

use crate::control::{ConnectionListener, ControlChannel};
use crate::error::{ControlError, StreamError};
use crossbeam::channel::{self, select, Receiver};
use gamestream_io::EventWindow;
use gamestream_protocol::{
    ConnectionStatus, CounterSnapshot, FeedbackAction, LossEvents, StreamCounters,
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Feedback loop settings
#[derive(Debug, Clone)]
pub struct FeedbackConfig {
    /// Turn every action into a full resync
    pub force_full_resync_only: bool,
    /// Packet loss telemetry interval
    pub report_interval: Duration,
    /// Escalations within the window that mark the connection poor
    pub poor_threshold: usize,
    /// Window for counting escalations
    pub poor_window: Duration,
    /// Frames to receive before connection quality is judged
    pub grace_frames: u64,
}

impl Default for FeedbackConfig {
    fn default() -> Self {
        FeedbackConfig {
            force_full_resync_only: false,
            report_interval: Duration::from_millis(50),
            poor_threshold: 5,
            poor_window: Duration::from_secs(60),
            grace_frames: 150,
        }
    }
}

/// Rate limiter for the "poor connection" warning
pub struct QualityMonitor {
    escalations: EventWindow,
    threshold: usize,
    grace_frames: u64,
    status: ConnectionStatus,
}

impl QualityMonitor {
    /// Create a monitor in the okay state
    pub fn new(threshold: usize, window: Duration, grace_frames: u64) -> Self {
        QualityMonitor {
            escalations: EventWindow::new(window),
            threshold: threshold.max(1),
            grace_frames,
            status: ConnectionStatus::Okay,
        }
    }

    /// Record a loss escalation, returning the new status if it changed
    pub fn record_escalation(&mut self, now: Instant, frames_seen: u64) -> Option<ConnectionStatus> {
        if frames_seen < self.grace_frames {
            return None;
        }

        let count = self.escalations.record(now);
        if count >= self.threshold && self.status == ConnectionStatus::Okay {
            self.status = ConnectionStatus::Poor;
            return Some(ConnectionStatus::Poor);
        }
        None
    }

    /// Clear the warning once the window holds no escalations
    pub fn poll(&mut self, now: Instant) -> Option<ConnectionStatus> {
        if self.status == ConnectionStatus::Poor && self.escalations.count(now) == 0 {
            self.status = ConnectionStatus::Okay;
            return Some(ConnectionStatus::Okay);
        }
        None
    }

    /// Current status
    pub fn status(&self) -> ConnectionStatus {
        self.status
    }
}

/// State of the feedback thread
pub struct FeedbackLoop {
    events: LossEvents,
    control: Arc<dyn ControlChannel>,
    listener: Arc<dyn ConnectionListener>,
    video: Arc<StreamCounters>,
    audio: Arc<StreamCounters>,
    config: FeedbackConfig,
    monitor: QualityMonitor,
    last_report: CounterSnapshot,
}

impl FeedbackLoop {
    /// Create the loop
    pub fn new(
        events: LossEvents,
        control: Arc<dyn ControlChannel>,
        listener: Arc<dyn ConnectionListener>,
        video: Arc<StreamCounters>,
        audio: Arc<StreamCounters>,
        config: FeedbackConfig,
    ) -> Self {
        let monitor = QualityMonitor::new(
            config.poor_threshold,
            config.poor_window,
            config.grace_frames,
        );
        FeedbackLoop {
            events,
            control,
            listener,
            video,
            audio,
            config,
            monitor,
            last_report: CounterSnapshot::default(),
        }
    }

    /// Run until `shutdown` disconnects or every loss reporter is dropped
    ///
    /// Fails once the control channel reports that it is closed.
    pub fn run(mut self, shutdown: Receiver<()>) -> Result<(), StreamError> {
        let ticker = channel::tick(self.config.report_interval);
        let events = self.events.receiver().clone();
        info!("loss feedback started");

        loop {
            select! {
                recv(events) -> event => match event {
                    Ok(event) => {
                        if let Some(action) = self.events.drain(Some(event)) {
                            self.send(action)?;
                        }
                    }
                    Err(_) => break,
                },
                recv(ticker) -> _ => self.tick()?,
                recv(shutdown) -> _ => break,
            }
        }

        info!("loss feedback stopped");
        Ok(())
    }

    /// Send one coalesced action to the host
    pub fn send(&mut self, action: FeedbackAction) -> Result<(), StreamError> {
        let action = if self.config.force_full_resync_only {
            FeedbackAction::FullResync
        } else {
            action
        };

        let result = match action {
            FeedbackAction::FullResync => {
                info!("requesting full resync");
                self.control.request_full_resync()
            }
            FeedbackAction::Invalidate(range) => {
                debug!(first = range.first, last = range.last, "invalidating reference frames");
                self.control
                    .invalidate_reference_frames(range.first, range.last)
            }
        };
        match result {
            Ok(()) => {}
            Err(ControlError::Closed) => return Err(ControlError::Closed.into()),
            Err(e) => warn!(error = %e, ?action, "failed to send loss feedback"),
        }

        let frames = self.video.frames_completed();
        if let Some(status) = self.monitor.record_escalation(Instant::now(), frames) {
            warn!("poor connection");
            self.listener.connection_status_update(status);
        }
        Ok(())
    }

    /// Report loss telemetry and update connection status
    pub fn tick(&mut self) -> Result<(), StreamError> {
        let video = self.video.snapshot();
        let audio = self.audio.snapshot();
        let total = CounterSnapshot {
            packets_received: video.packets_received + audio.packets_received,
            packets_lost: video.packets_lost + audio.packets_lost,
            frames_completed: video.frames_completed,
            frames_dropped: video.frames_dropped,
        };

        let delta = total.since(&self.last_report);
        self.last_report = total;
        if delta.packets_received > 0 || delta.packets_lost > 0 {
            match self
                .control
                .report_packet_loss(delta.packets_lost, delta.packets_received)
            {
                Ok(()) => {}
                Err(ControlError::Closed) => return Err(ControlError::Closed.into()),
                Err(e) => debug!(error = %e, "failed to send loss telemetry"),
            }
        }

        if let Some(status) = self.monitor.poll(Instant::now()) {
            info!("connection quality recovered");
            self.listener.connection_status_update(status);
        }
        Ok(())
    }

    /// Current connection status
    pub fn status(&self) -> ConnectionStatus {
        self.monitor.status()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gamestream_protocol::{loss_channel, FrameRange};
    use parking_lot::Mutex;
    use std::thread;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Sent {
        Resync,
        Invalidate(u32, u32),
        Loss(u64, u64),
    }

    #[derive(Default)]
    struct Recorder {
        sent: Mutex<Vec<Sent>>,
        statuses: Mutex<Vec<ConnectionStatus>>,
    }

    impl ControlChannel for Recorder {
        fn request_full_resync(&self) -> Result<(), ControlError> {
            self.sent.lock().push(Sent::Resync);
            Ok(())
        }

        fn invalidate_reference_frames(&self, first: u32, last: u32) -> Result<(), ControlError> {
            self.sent.lock().push(Sent::Invalidate(first, last));
            Ok(())
        }

        fn report_packet_loss(&self, lost: u64, received: u64) -> Result<(), ControlError> {
            self.sent.lock().push(Sent::Loss(lost, received));
            Ok(())
        }
    }

    impl ConnectionListener for Recorder {
        fn connection_status_update(&self, status: ConnectionStatus) {
            self.statuses.lock().push(status);
        }

        fn connection_terminated(&self, _error: &StreamError) {}
    }

    fn feedback(config: FeedbackConfig) -> (FeedbackLoop, Arc<Recorder>, Arc<StreamCounters>) {
        let recorder = Arc::new(Recorder::default());
        let video = Arc::new(StreamCounters::new());
        let (_reporter, events) = loss_channel(8);
        let feedback = FeedbackLoop::new(
            events,
            recorder.clone(),
            recorder.clone(),
            Arc::clone(&video),
            Arc::new(StreamCounters::new()),
            config,
        );
        (feedback, recorder, video)
    }

    #[test]
    fn test_invalidate_sent() {
        let (mut feedback, recorder, _) = feedback(FeedbackConfig::default());
        feedback
            .send(FeedbackAction::Invalidate(FrameRange::new(4, 9)))
            .unwrap();
        assert_eq!(*recorder.sent.lock(), vec![Sent::Invalidate(4, 9)]);
    }

    #[test]
    fn test_force_full_resync_only() {
        let (mut feedback, recorder, _) = feedback(FeedbackConfig {
            force_full_resync_only: true,
            ..Default::default()
        });
        feedback
            .send(FeedbackAction::Invalidate(FrameRange::new(4, 9)))
            .unwrap();
        assert_eq!(*recorder.sent.lock(), vec![Sent::Resync]);
    }

    #[test]
    fn test_tick_reports_loss_delta() {
        let (mut feedback, recorder, video) = feedback(FeedbackConfig::default());
        video.record_packet();
        video.record_packet();
        video.record_lost(1);
        feedback.tick().unwrap();
        // Nothing new since the last tick
        feedback.tick().unwrap();
        assert_eq!(*recorder.sent.lock(), vec![Sent::Loss(1, 2)]);
    }

    #[test]
    fn test_quality_monitor_grace_period() {
        let mut monitor = QualityMonitor::new(5, Duration::from_secs(60), 150);
        let now = Instant::now();
        for _ in 0..10 {
            assert_eq!(monitor.record_escalation(now, 100), None);
        }
        assert_eq!(monitor.status(), ConnectionStatus::Okay);
    }

    #[test]
    fn test_quality_monitor_window() {
        let mut monitor = QualityMonitor::new(5, Duration::from_secs(60), 150);
        let start = Instant::now();

        for i in 0..4 {
            let at = start + Duration::from_secs(i * 10);
            assert_eq!(monitor.record_escalation(at, 200), None);
        }
        // Fifth escalation inside 60 s
        assert_eq!(
            monitor.record_escalation(start + Duration::from_secs(45), 200),
            Some(ConnectionStatus::Poor)
        );
        assert_eq!(monitor.record_escalation(start + Duration::from_secs(46), 200), None);

        assert_eq!(monitor.poll(start + Duration::from_secs(100)), None);
        assert_eq!(
            monitor.poll(start + Duration::from_secs(107)),
            Some(ConnectionStatus::Okay)
        );
    }

    #[test]
    fn test_spread_escalations_stay_okay() {
        let mut monitor = QualityMonitor::new(5, Duration::from_secs(60), 0);
        let start = Instant::now();
        for i in 0..20 {
            let at = start + Duration::from_secs(i * 20);
            assert_eq!(monitor.record_escalation(at, 0), None);
        }
    }

    #[test]
    fn test_run_coalesces_and_stops() {
        let recorder = Arc::new(Recorder::default());
        let (reporter, events) = loss_channel(8);
        let (shutdown_tx, shutdown_rx) = channel::bounded::<()>(0);

        // Queue before the loop starts so one drain sees all of them
        reporter.invalidate(3, 3);
        reporter.invalidate(7, 8);

        let feedback = FeedbackLoop::new(
            events,
            recorder.clone(),
            recorder.clone(),
            Arc::new(StreamCounters::new()),
            Arc::new(StreamCounters::new()),
            FeedbackConfig::default(),
        );
        let handle = thread::spawn(move || feedback.run(shutdown_rx));

        thread::sleep(Duration::from_millis(100));
        drop(shutdown_tx);
        handle.join().unwrap().unwrap();

        assert_eq!(*recorder.sent.lock(), vec![Sent::Invalidate(3, 8)]);
    }

    struct ClosedControl;

    impl ControlChannel for ClosedControl {
        fn request_full_resync(&self) -> Result<(), ControlError> {
            Err(ControlError::Closed)
        }

        fn invalidate_reference_frames(&self, _first: u32, _last: u32) -> Result<(), ControlError> {
            Err(ControlError::Send("host unreachable".to_string()))
        }

        fn report_packet_loss(&self, _lost: u64, _received: u64) -> Result<(), ControlError> {
            Ok(())
        }
    }

    #[test]
    fn test_closed_control_channel_ends_loop() {
        let listener = Arc::new(Recorder::default());
        let (reporter, events) = loss_channel(8);
        let (_shutdown_tx, shutdown_rx) = channel::bounded::<()>(0);

        // A failed send is logged and the loop keeps going
        reporter.invalidate(1, 2);
        let mut feedback = FeedbackLoop::new(
            events,
            Arc::new(ClosedControl),
            listener,
            Arc::new(StreamCounters::new()),
            Arc::new(StreamCounters::new()),
            FeedbackConfig::default(),
        );
        assert!(feedback
            .send(FeedbackAction::Invalidate(FrameRange::new(1, 2)))
            .is_ok());

        reporter.full_resync();
        let result = feedback.run(shutdown_rx);
        assert!(matches!(
            result,
            Err(StreamError::Control(ControlError::Closed))
        ));
    }
}
