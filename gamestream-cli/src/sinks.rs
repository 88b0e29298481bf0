//! Collaborators used by the receiver tool
//!
//! The tool has no real decoder or control connection: video is written out
//! as an Annex-B elementary stream, audio is counted, and control messages
//! are logged.

use gamestream::{
    AccessUnit, AudioDecoder, Capabilities, ConnectionListener, ConnectionStatus, ControlChannel,
    ControlError, DecodeStatus, StreamError, VideoDecoder,
};
use std::io::Write;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Bytes written by an `AnnexBWriter`, shared with the stats display
#[derive(Debug, Default)]
pub struct WriteCounter {
    bytes: AtomicU64,
    units: AtomicU64,
    sync_frames: AtomicU64,
}

impl WriteCounter {
    /// Bytes written
    pub fn bytes(&self) -> u64 {
        self.bytes.load(Ordering::Relaxed)
    }

    /// Access units written
    pub fn units(&self) -> u64 {
        self.units.load(Ordering::Relaxed)
    }

    /// Units written that start with a parameter set or sync picture
    pub fn sync_frames(&self) -> u64 {
        self.sync_frames.load(Ordering::Relaxed)
    }
}

/// Video "decoder" that writes every access unit to an output
pub struct AnnexBWriter {
    output: Box<dyn Write + Send>,
    capabilities: Capabilities,
    counter: Arc<WriteCounter>,
    failed: bool,
}

impl AnnexBWriter {
    /// Write to `output`, declaring `capabilities` to the session
    pub fn new(output: Box<dyn Write + Send>, capabilities: Capabilities) -> Self {
        AnnexBWriter {
            output,
            capabilities,
            counter: Arc::new(WriteCounter::default()),
            failed: false,
        }
    }

    /// Shared write counter
    pub fn counter(&self) -> Arc<WriteCounter> {
        Arc::clone(&self.counter)
    }

    fn write_unit(&mut self, unit: &AccessUnit) -> std::io::Result<()> {
        for data in unit.iter() {
            self.output.write_all(data)?;
        }
        // Flush at every resync point
        if !unit.flags().is_empty() {
            self.output.flush()?;
        }
        Ok(())
    }
}

impl VideoDecoder for AnnexBWriter {
    fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    fn submit(&mut self, unit: &AccessUnit) -> DecodeStatus {
        if self.failed {
            return DecodeStatus::Ok;
        }

        match self.write_unit(unit) {
            Ok(()) => {
                self.counter
                    .bytes
                    .fetch_add(unit.len() as u64, Ordering::Relaxed);
                self.counter.units.fetch_add(1, Ordering::Relaxed);
                if !unit.flags().is_empty() {
                    self.counter.sync_frames.fetch_add(1, Ordering::Relaxed);
                }
            }
            Err(e) => {
                // Keep the stream running; only the output is gone
                error!(error = %e, "failed to write access unit, discarding video");
                self.failed = true;
            }
        }
        DecodeStatus::Ok
    }
}

/// Audio "decoder" that only counts its input
#[derive(Debug, Default)]
pub struct CountingAudioDecoder {
    capabilities: Capabilities,
    payloads: Arc<AtomicU64>,
    concealments: Arc<AtomicU64>,
}

impl CountingAudioDecoder {
    /// Create a decoder declaring `capabilities`
    pub fn new(capabilities: Capabilities) -> Self {
        CountingAudioDecoder {
            capabilities,
            ..Default::default()
        }
    }

    /// Shared payload and concealment counts
    pub fn counts(&self) -> (Arc<AtomicU64>, Arc<AtomicU64>) {
        (Arc::clone(&self.payloads), Arc::clone(&self.concealments))
    }
}

impl AudioDecoder for CountingAudioDecoder {
    fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    fn decode(&mut self, payload: Option<&[u8]>) {
        match payload {
            Some(_) => self.payloads.fetch_add(1, Ordering::Relaxed),
            None => self.concealments.fetch_add(1, Ordering::Relaxed),
        };
    }
}

/// Control channel that logs what it would send
#[derive(Debug, Default)]
pub struct LoggingControl {
    resyncs: AtomicU64,
    invalidations: AtomicU64,
}

impl LoggingControl {
    /// Full resyncs requested
    pub fn resyncs(&self) -> u64 {
        self.resyncs.load(Ordering::Relaxed)
    }

    /// Invalidation ranges requested
    pub fn invalidations(&self) -> u64 {
        self.invalidations.load(Ordering::Relaxed)
    }
}

impl ControlChannel for LoggingControl {
    fn request_full_resync(&self) -> Result<(), ControlError> {
        self.resyncs.fetch_add(1, Ordering::Relaxed);
        info!("control: request full resync");
        Ok(())
    }

    fn invalidate_reference_frames(&self, first: u32, last: u32) -> Result<(), ControlError> {
        self.invalidations.fetch_add(1, Ordering::Relaxed);
        info!(first, last, "control: invalidate reference frames");
        Ok(())
    }

    fn report_packet_loss(&self, lost: u64, received: u64) -> Result<(), ControlError> {
        debug!(lost, received, "control: loss report");
        Ok(())
    }
}

/// Listener that logs status changes and remembers termination
#[derive(Debug, Default)]
pub struct LogListener {
    terminated: AtomicBool,
}

impl LogListener {
    /// Check if the session reported a transport failure
    pub fn terminated(&self) -> bool {
        self.terminated.load(Ordering::Acquire)
    }
}

impl ConnectionListener for LogListener {
    fn connection_status_update(&self, status: ConnectionStatus) {
        match status {
            ConnectionStatus::Poor => warn!("connection quality is poor"),
            ConnectionStatus::Okay => info!("connection quality is okay"),
        }
    }

    fn connection_terminated(&self, error: &StreamError) {
        error!(error = %error, "connection terminated");
        self.terminated.store(true, Ordering::Release);
    }
}
