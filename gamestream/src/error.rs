//! Session errors

use gamestream_io::SocketError;
use std::io;
use thiserror::Error;

/// Errors returned by the control channel collaborator
#[derive(Error, Debug)]
pub enum ControlError {
    #[error("Control channel closed")]
    Closed,

    #[error("Control message failed: {0}")]
    Send(String),
}

/// Stream session errors
#[derive(Error, Debug)]
pub enum StreamError {
    #[error("Socket error: {0}")]
    Socket(#[from] SocketError),

    #[error("{stream} stream transport failed: {source}")]
    Transport {
        stream: &'static str,
        #[source]
        source: SocketError,
    },

    #[error("Failed to spawn {name} thread: {source}")]
    Spawn {
        name: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("Control error: {0}")]
    Control(#[from] ControlError),
}
