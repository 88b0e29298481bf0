//! Game Stream Receiver
//!
//! High-level API for receiving a game stream: a `StreamSession` owns the
//! video and audio sockets and runs the receive, decode, loss feedback and
//! keep-alive threads on top of the protocol core.

pub use gamestream_io as io;
pub use gamestream_protocol as protocol;

pub mod audio;
pub mod config;
pub mod control;
pub mod decoder;
pub mod error;
pub mod feedback;
pub mod keepalive;
pub mod session;
pub mod video;

pub use config::{StreamConfig, DEFAULT_AUDIO_PORT, DEFAULT_VIDEO_PORT};
pub use control::{ConnectionListener, ControlChannel};
pub use decoder::{AudioDecoder, DecodeStatus, DirectAudioSink, VideoDecoder};
pub use error::{ControlError, StreamError};
pub use feedback::{FeedbackConfig, FeedbackLoop, QualityMonitor};
pub use session::{Collaborators, ShutdownSignal, StreamSession};

// Re-export commonly used types
pub use protocol::{AccessUnit, Capabilities, ConnectionStatus, SeqNumber, UnitFlags};
