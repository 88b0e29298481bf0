//! Simulated streaming host
//!
//! Produces a synthetic H.264 stream for exercising a receiver: each sync
//! frame carries SPS and PPS ahead of an IDR slice, other frames carry one
//! non-IDR slice. The host learns the client's addresses from its keep-alive
//! pings, as a real host does.

use bytes::Bytes;
use gamestream_io::{SocketError, StreamSocket};
use gamestream_protocol::packet::{encode_audio_packet, KEEPALIVE_PAYLOAD};
use gamestream_protocol::{HostGeneration, SeqNumber, VideoPacketizer};
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tracing::{debug, info};

const START_CODE: [u8; 4] = [0, 0, 0, 1];

/// Build the Annex-B bytes of one synthetic frame
pub fn synthetic_frame(frame_index: u32, sync: bool, slice_len: usize) -> Vec<u8> {
    let mut frame = Vec::with_capacity(slice_len + 32);
    if sync {
        frame.extend_from_slice(&START_CODE);
        frame.extend_from_slice(&[0x67, 0x42, 0x00, 0x1f, 0xe9]);
        frame.extend_from_slice(&START_CODE);
        frame.extend_from_slice(&[0x68, 0xce, 0x3c, 0x80]);
        frame.extend_from_slice(&START_CODE);
        frame.push(0x65);
    } else {
        frame.extend_from_slice(&START_CODE);
        frame.push(0x41);
    }

    // Body avoids zero bytes so it never contains a start code
    frame.extend((0..slice_len).map(|i| 1 + ((i as u32 + frame_index) % 255) as u8));
    frame
}

/// Drops every `n`th video datagram
#[derive(Debug, Clone, Copy)]
pub struct DropPattern {
    every: Option<u64>,
    sent: u64,
}

impl DropPattern {
    /// Drop every `every`th datagram; 0 disables dropping
    pub fn every(every: u64) -> Self {
        DropPattern {
            every: (every > 0).then_some(every),
            sent: 0,
        }
    }

    /// Decide whether the next datagram is dropped
    pub fn should_drop(&mut self) -> bool {
        self.sent += 1;
        matches!(self.every, Some(n) if self.sent % n == 0)
    }
}

/// Stream counts of a simulated host
#[derive(Debug, Clone, Copy, Default)]
pub struct HostStats {
    /// Video datagrams sent
    pub video_sent: u64,
    /// Video datagrams dropped on purpose
    pub video_dropped: u64,
    /// Audio datagrams sent
    pub audio_sent: u64,
}

/// Simulated host for one video and one audio stream
pub struct SimulatedHost {
    video: StreamSocket,
    audio: StreamSocket,
    video_client: Option<SocketAddr>,
    audio_client: Option<SocketAddr>,
    packetizer: VideoPacketizer,
    audio_seq: SeqNumber,
    drops: DropPattern,
    stats: HostStats,
}

impl SimulatedHost {
    /// Bind the host's stream sockets
    pub fn bind(
        video_addr: SocketAddr,
        audio_addr: SocketAddr,
        packet_size: usize,
        generation: HostGeneration,
    ) -> Result<Self, SocketError> {
        let video = StreamSocket::bind(video_addr)?;
        let audio = StreamSocket::bind(audio_addr)?;
        info!(
            video = %video.local_addr()?,
            audio = %audio.local_addr()?,
            "simulated host listening"
        );

        Ok(SimulatedHost {
            video,
            audio,
            video_client: None,
            audio_client: None,
            packetizer: VideoPacketizer::new(packet_size, generation),
            audio_seq: SeqNumber::new(0),
            drops: DropPattern::every(0),
            stats: HostStats::default(),
        })
    }

    /// Drop video datagrams according to `drops`
    pub fn with_drops(mut self, drops: DropPattern) -> Self {
        self.drops = drops;
        self
    }

    /// Local video address
    pub fn video_addr(&self) -> Result<SocketAddr, SocketError> {
        self.video.local_addr()
    }

    /// Local audio address
    pub fn audio_addr(&self) -> Result<SocketAddr, SocketError> {
        self.audio.local_addr()
    }

    /// Wait for a keep-alive on both sockets
    ///
    /// Returns false if `timeout` passes first.
    pub fn wait_for_client(&mut self, timeout: Duration) -> Result<bool, SocketError> {
        let deadline = Instant::now() + timeout;
        while self.video_client.is_none() || self.audio_client.is_none() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(false);
            }
            let poll = remaining.min(Duration::from_millis(50));

            if self.video_client.is_none() {
                self.video_client = Self::poll_ping(&self.video, poll)?;
            }
            if self.audio_client.is_none() {
                self.audio_client = Self::poll_ping(&self.audio, poll)?;
            }
        }

        info!(
            video = ?self.video_client,
            audio = ?self.audio_client,
            "client connected"
        );
        Ok(true)
    }

    fn poll_ping(
        socket: &StreamSocket,
        timeout: Duration,
    ) -> Result<Option<SocketAddr>, SocketError> {
        socket.set_read_timeout(Some(timeout))?;
        let mut buf = [0u8; 64];
        match socket.recv_from(&mut buf) {
            Ok((n, from)) if &buf[..n] == KEEPALIVE_PAYLOAD => Ok(Some(from)),
            Ok((n, from)) => {
                debug!(len = n, %from, "ignoring datagram");
                Ok(None)
            }
            Err(e) if e.is_timeout() || e.is_connection_refused() => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Packetize and send one frame
    pub fn send_frame(&mut self, frame_index: u32, frame: &[u8]) -> Result<(), SocketError> {
        let Some(client) = self.video_client else {
            return Ok(());
        };

        let packets = self.packetizer.packetize(frame_index, frame);
        self.send_video(&packets, client)
    }

    /// Send prepared video datagrams in the given order
    pub fn send_video(&mut self, packets: &[Bytes], client: SocketAddr) -> Result<(), SocketError> {
        for packet in packets {
            if self.drops.should_drop() {
                self.stats.video_dropped += 1;
                continue;
            }
            self.video.send_to(packet, client)?;
            self.stats.video_sent += 1;
        }
        Ok(())
    }

    /// Send one audio datagram
    pub fn send_audio(&mut self, timestamp: u32, payload: &[u8]) -> Result<(), SocketError> {
        let Some(client) = self.audio_client else {
            return Ok(());
        };

        let packet = encode_audio_packet(self.audio_seq, timestamp, payload);
        self.audio_seq = self.audio_seq.next();
        self.audio.send_to(&packet, client)?;
        self.stats.audio_sent += 1;
        Ok(())
    }

    /// Client video address, once known
    pub fn video_client(&self) -> Option<SocketAddr> {
        self.video_client
    }

    /// Stream counts
    pub fn stats(&self) -> HostStats {
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gamestream_protocol::nal::{NalScanner, VideoFormat};
    use gamestream_protocol::NalClass;

    #[test]
    fn test_sync_frame_layout() {
        let frame = synthetic_frame(0, true, 64);
        let classes: Vec<NalClass> = NalScanner::new(&frame)
            .filter_map(|nal| nal.header_byte(&frame))
            .map(|header| VideoFormat::H264.classify(header))
            .collect();
        assert_eq!(
            classes,
            vec![NalClass::ParameterSet, NalClass::ParameterSet, NalClass::SyncPicture]
        );
    }

    #[test]
    fn test_delta_frame_layout() {
        let frame = synthetic_frame(7, false, 64);
        assert_eq!(NalScanner::new(&frame).count(), 1);
        assert_eq!(frame.len(), 5 + 64);
    }

    #[test]
    fn test_drop_pattern() {
        let mut drops = DropPattern::every(3);
        let dropped: Vec<bool> = (0..6).map(|_| drops.should_drop()).collect();
        assert_eq!(dropped, vec![false, false, true, false, false, true]);

        let mut never = DropPattern::every(0);
        assert!((0..10).all(|_| !never.should_drop()));
    }
}
