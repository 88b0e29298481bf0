//! Control channel and connection listener collaborators

use crate::error::{ControlError, StreamError};
use gamestream_protocol::ConnectionStatus;

/// Outbound control messages to the host
///
/// Implemented by the session's control connection, which lives outside
/// this crate.
pub trait ControlChannel: Send + Sync {
    /// Ask the host for a new sync frame
    fn request_full_resync(&self) -> Result<(), ControlError>;

    /// Ask the host to stop referencing frames `first..=last`
    fn invalidate_reference_frames(&self, first: u32, last: u32) -> Result<(), ControlError>;

    /// Periodic loss telemetry
    fn report_packet_loss(&self, lost: u64, received: u64) -> Result<(), ControlError>;
}

/// Receives session-level notifications
pub trait ConnectionListener: Send + Sync {
    /// Connection quality changed
    fn connection_status_update(&self, status: ConnectionStatus);

    /// The session stopped because of a transport failure
    fn connection_terminated(&self, error: &StreamError);
}
