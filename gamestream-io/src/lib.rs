//! Game Stream I/O
//!
//! This crate provides the network and timing pieces of the receive
//! pipeline: the UDP stream socket wrapper and the timers used by the
//! keep-alive and loss-feedback loops.

pub mod socket;
pub mod time;

pub use socket::{SocketError, StreamSocket};
pub use time::{EventWindow, Timer};
