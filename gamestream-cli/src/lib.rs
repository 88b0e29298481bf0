//! Game Stream CLI Library
//!
//! Shared functionality for the game stream command-line tools.

pub mod config;
pub mod simhost;
pub mod sinks;
pub mod stats;

pub use config::{Codec, ConfigError, Generation, ReceiverFileConfig};
pub use simhost::{synthetic_frame, DropPattern, HostStats, SimulatedHost};
pub use sinks::{AnnexBWriter, CountingAudioDecoder, LogListener, LoggingControl, WriteCounter};
pub use stats::{display_compact_stats, format_bytes, format_duration, summarize};
