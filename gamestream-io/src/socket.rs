//! UDP socket wrapper for the media streams
//!
//! Each stream uses one blocking UDP socket connected to the host's stream
//! port. Reads use a short timeout so the receive loop can apply the reorder
//! time bound and notice shutdown; `shutdown` unblocks a pending read.

use socket2::{Domain, Protocol, Socket, Type};
use std::io::{self, ErrorKind, Read};
use std::mem::MaybeUninit;
use std::net::{Shutdown, SocketAddr};
use std::time::Duration;
use thiserror::Error;

/// Socket errors
#[derive(Error, Debug)]
pub enum SocketError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Invalid socket address")]
    InvalidAddress,
}

impl SocketError {
    /// Check if this is a read timeout rather than a transport failure
    pub fn is_timeout(&self) -> bool {
        match self {
            SocketError::Io(e) => matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut),
            SocketError::InvalidAddress => false,
        }
    }

    /// Check if the peer reported its port unreachable
    ///
    /// Connected UDP sockets surface ICMP errors on the next call; the host
    /// may simply not be listening yet.
    pub fn is_connection_refused(&self) -> bool {
        matches!(self, SocketError::Io(e) if e.kind() == ErrorKind::ConnectionRefused)
    }
}

/// Stream socket wrapper
pub struct StreamSocket {
    inner: Socket,
}

impl StreamSocket {
    /// Create a blocking UDP socket bound to the given address
    pub fn bind(addr: SocketAddr) -> Result<Self, SocketError> {
        let domain = if addr.is_ipv4() {
            Domain::IPV4
        } else {
            Domain::IPV6
        };

        let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_reuse_address(true)?;
        socket.bind(&addr.into())?;

        Ok(StreamSocket { inner: socket })
    }

    /// Restrict the socket to one peer
    pub fn connect(&self, peer: SocketAddr) -> Result<(), SocketError> {
        self.inner.connect(&peer.into())?;
        Ok(())
    }

    /// Set the read timeout
    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> Result<(), SocketError> {
        self.inner.set_read_timeout(timeout)?;
        Ok(())
    }

    /// Set the receive buffer size
    pub fn set_recv_buffer_size(&self, size: usize) -> Result<(), SocketError> {
        self.inner.set_recv_buffer_size(size)?;
        Ok(())
    }

    /// Get the receive buffer size
    pub fn recv_buffer_size(&self) -> Result<usize, SocketError> {
        Ok(self.inner.recv_buffer_size()?)
    }

    /// Get the local address this socket is bound to
    pub fn local_addr(&self) -> Result<SocketAddr, SocketError> {
        self.inner
            .local_addr()?
            .as_socket()
            .ok_or(SocketError::InvalidAddress)
    }

    /// Get the connected peer address
    pub fn peer_addr(&self) -> Result<SocketAddr, SocketError> {
        self.inner
            .peer_addr()?
            .as_socket()
            .ok_or(SocketError::InvalidAddress)
    }

    /// Read one datagram from the connected peer
    ///
    /// Fails with a timeout error (see `SocketError::is_timeout`) when no
    /// datagram arrives within the read timeout.
    pub fn recv(&self, buf: &mut [u8]) -> Result<usize, SocketError> {
        Ok((&self.inner).read(buf)?)
    }

    /// Read one datagram and its source address
    pub fn recv_from(&self, buf: &mut [u8]) -> Result<(usize, SocketAddr), SocketError> {
        // SAFETY: the buffer is initialized and recv_from only writes bytes into it
        let uninit = unsafe {
            std::slice::from_raw_parts_mut(buf.as_mut_ptr() as *mut MaybeUninit<u8>, buf.len())
        };

        let (n, addr) = self.inner.recv_from(uninit)?;
        Ok((n, addr.as_socket().ok_or(SocketError::InvalidAddress)?))
    }

    /// Send one datagram to the connected peer
    pub fn send(&self, buf: &[u8]) -> Result<usize, SocketError> {
        Ok(self.inner.send(buf)?)
    }

    /// Send one datagram to the given address
    pub fn send_to(&self, buf: &[u8], target: SocketAddr) -> Result<usize, SocketError> {
        Ok(self.inner.send_to(buf, &target.into())?)
    }

    /// Unblock pending reads and stop further traffic
    pub fn shutdown(&self) -> Result<(), SocketError> {
        match self.inner.shutdown(Shutdown::Both) {
            Ok(()) => Ok(()),
            // Never connected, nothing to unblock
            Err(e) if e.kind() == ErrorKind::NotConnected => Ok(()),
            Err(e) => Err(SocketError::Io(e)),
        }
    }

    /// Try to clone the socket
    pub fn try_clone(&self) -> Result<Self, SocketError> {
        Ok(StreamSocket {
            inner: self.inner.try_clone()?,
        })
    }
}
