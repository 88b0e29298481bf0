//! Keep-alive pings
//!
//! The host only starts sending a stream once it has seen traffic from the
//! client's port, and forgets the client when the pings stop.

use crossbeam::channel::{Receiver, RecvTimeoutError};
use gamestream_io::{StreamSocket, Timer};
use gamestream_protocol::packet::KEEPALIVE_PAYLOAD;
use std::time::Duration;
use tracing::{debug, trace};

/// Ping the host through `socket` every `interval` until `shutdown` fires
pub fn run_keepalive(
    socket: StreamSocket,
    interval: Duration,
    shutdown: Receiver<()>,
    stream: &'static str,
) {
    let mut timer = Timer::expired_now(interval);
    debug!(stream, "keep-alive started");

    loop {
        if timer.try_fire() {
            match socket.send(KEEPALIVE_PAYLOAD) {
                Ok(_) => trace!(stream, "keep-alive sent"),
                // Host not listening yet
                Err(e) if e.is_connection_refused() => {}
                Err(e) => debug!(stream, error = %e, "keep-alive send failed"),
            }
        }

        match shutdown.recv_timeout(timer.time_until_expiration()) {
            Err(RecvTimeoutError::Timeout) => continue,
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    debug!(stream, "keep-alive stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam::channel;
    use std::thread;

    #[test]
    fn test_pings_until_shutdown() {
        let host = StreamSocket::bind("127.0.0.1:0".parse().unwrap()).unwrap();
        host.set_read_timeout(Some(Duration::from_secs(1))).unwrap();
        let client = StreamSocket::bind("127.0.0.1:0".parse().unwrap()).unwrap();
        client.connect(host.local_addr().unwrap()).unwrap();

        let (tx, rx) = channel::bounded::<()>(0);
        let handle =
            thread::spawn(move || run_keepalive(client, Duration::from_millis(10), rx, "video"));

        let mut buf = [0u8; 16];
        for _ in 0..3 {
            let n = host.recv(&mut buf).unwrap();
            assert_eq!(&buf[..n], KEEPALIVE_PAYLOAD);
        }

        drop(tx);
        handle.join().unwrap();
    }
}
