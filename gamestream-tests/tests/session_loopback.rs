//! Loopback tests for a full stream session
//!
//! A fake host on 127.0.0.1 learns the session's addresses from its
//! keep-alives and then streams video and audio back to it.

use crossbeam::channel::{unbounded, Receiver, Sender};
use gamestream_io::StreamSocket;
use gamestream::protocol::packet::{encode_audio_packet, KEEPALIVE_PAYLOAD};
use gamestream::protocol::{HostGeneration, VideoPacketizer};
use gamestream::{
    AccessUnit, AudioDecoder, Capabilities, Collaborators, ConnectionListener, ConnectionStatus,
    ControlChannel, ControlError, DecodeStatus, SeqNumber, StreamConfig, StreamError,
    StreamSession, VideoDecoder,
};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(5);

struct Recorder {
    capabilities: Capabilities,
    units: Sender<Vec<u8>>,
}

impl VideoDecoder for Recorder {
    fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    fn submit(&mut self, unit: &AccessUnit) -> DecodeStatus {
        let _ = self.units.send(unit.to_bytes().to_vec());
        DecodeStatus::Ok
    }
}

struct AudioRecorder {
    capabilities: Capabilities,
    payloads: Sender<Option<Vec<u8>>>,
}

impl AudioDecoder for AudioRecorder {
    fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    fn decode(&mut self, payload: Option<&[u8]>) {
        let _ = self.payloads.send(payload.map(<[u8]>::to_vec));
    }
}

#[derive(Default)]
struct Control {
    resyncs: AtomicU64,
}

impl ControlChannel for Control {
    fn request_full_resync(&self) -> Result<(), ControlError> {
        self.resyncs.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn invalidate_reference_frames(&self, _first: u32, _last: u32) -> Result<(), ControlError> {
        Ok(())
    }

    fn report_packet_loss(&self, _lost: u64, _received: u64) -> Result<(), ControlError> {
        Ok(())
    }
}

#[derive(Default)]
struct Listener {
    terminated: AtomicBool,
}

impl ConnectionListener for Listener {
    fn connection_status_update(&self, _status: ConnectionStatus) {}

    fn connection_terminated(&self, _error: &StreamError) {
        self.terminated.store(true, Ordering::Release);
    }
}

struct FakeHost {
    video: StreamSocket,
    audio: StreamSocket,
}

impl FakeHost {
    fn bind() -> Self {
        let any = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0);
        let video = StreamSocket::bind(any).unwrap();
        let audio = StreamSocket::bind(any).unwrap();
        video.set_read_timeout(Some(WAIT)).unwrap();
        audio.set_read_timeout(Some(WAIT)).unwrap();
        FakeHost { video, audio }
    }

    fn config(&self) -> StreamConfig {
        StreamConfig {
            video_port: self.video.local_addr().unwrap().port(),
            audio_port: self.audio.local_addr().unwrap().port(),
            ..StreamConfig::for_host(IpAddr::V4(Ipv4Addr::LOCALHOST))
        }
    }

    /// Wait for a keep-alive and return its source
    fn await_ping(socket: &StreamSocket) -> SocketAddr {
        let mut buf = [0u8; 64];
        loop {
            let (n, from) = socket.recv_from(&mut buf).unwrap();
            if &buf[..n] == KEEPALIVE_PAYLOAD {
                return from;
            }
        }
    }
}

struct Harness {
    session: StreamSession,
    units: Receiver<Vec<u8>>,
    audio: Receiver<Option<Vec<u8>>>,
    control: Arc<Control>,
    listener: Arc<Listener>,
}

fn start(host: &FakeHost, capabilities: Capabilities) -> Harness {
    let (unit_tx, units) = unbounded();
    let (audio_tx, audio) = unbounded();
    let control = Arc::new(Control::default());
    let listener = Arc::new(Listener::default());

    let session = StreamSession::start(
        host.config(),
        Collaborators {
            video_decoder: Box::new(Recorder {
                capabilities,
                units: unit_tx,
            }),
            audio_decoder: Box::new(AudioRecorder {
                capabilities,
                payloads: audio_tx,
            }),
            control: control.clone(),
            listener: listener.clone(),
        },
    )
    .unwrap();

    Harness {
        session,
        units,
        audio,
        control,
        listener,
    }
}

fn idr_frame() -> Vec<u8> {
    let mut frame = vec![0, 0, 0, 1, 0x67, 0x42, 0x00, 0x1F, 0, 0, 0, 1, 0x65];
    frame.extend((0..3000u32).map(|i| 1 + (i % 200) as u8));
    frame
}

fn p_frame(index: u32) -> Vec<u8> {
    let mut frame = vec![0, 0, 0, 1, 0x41];
    frame.extend((0..700u32).map(|i| 1 + ((i + index) % 250) as u8));
    frame
}

fn stream_video(capabilities: Capabilities) {
    let host = FakeHost::bind();
    let mut harness = start(&host, capabilities);

    let client = FakeHost::await_ping(&host.video);
    assert_eq!(client.port(), harness.session.local_video_addr().port());

    let mut packetizer = VideoPacketizer::new(1024, HostGeneration::Gen7);
    let frames = [idr_frame(), p_frame(2), p_frame(3)];
    for (index, frame) in frames.iter().enumerate() {
        for datagram in packetizer.packetize(index as u32 + 1, frame) {
            host.video.send_to(&datagram, client).unwrap();
        }
    }

    for frame in &frames {
        assert_eq!(&harness.units.recv_timeout(WAIT).unwrap(), frame);
    }
    assert_eq!(harness.session.video_stats().frames_completed, 3);
    assert_eq!(harness.control.resyncs.load(Ordering::Relaxed), 0);

    harness.session.stop();
    assert!(!harness.session.is_running());
    assert!(!harness.listener.terminated.load(Ordering::Acquire));
}

#[test]
fn test_video_through_decode_thread() {
    stream_video(Capabilities::empty());
}

#[test]
fn test_video_direct_submit() {
    stream_video(Capabilities::DIRECT_SUBMIT);
}

#[test]
fn test_audio_gap_is_concealed() {
    let host = FakeHost::bind();
    let mut harness = start(&host, Capabilities::empty());
    let client = FakeHost::await_ping(&host.audio);

    for seq in [0u16, 1, 3] {
        let packet = encode_audio_packet(SeqNumber::new(seq), seq as u32 * 240, &[seq as u8; 20]);
        host.audio.send_to(&packet, client).unwrap();
    }

    // seq 2 never arrives; the reorder time bound releases seq 3
    let received: Vec<Option<Vec<u8>>> = (0..4)
        .map(|_| harness.audio.recv_timeout(WAIT).unwrap())
        .collect();
    assert_eq!(
        received,
        vec![Some(vec![0; 20]), Some(vec![1; 20]), None, Some(vec![3; 20])]
    );

    harness.session.stop();
}

#[test]
fn test_stop_is_idempotent() {
    let host = FakeHost::bind();
    let mut harness = start(&host, Capabilities::empty());
    assert!(harness.session.is_running());

    harness.session.stop();
    harness.session.stop();
    assert!(!harness.session.is_running());
    assert!(!harness.listener.terminated.load(Ordering::Acquire));

    // Decoder threads have exited and released their senders
    assert!(harness.units.recv_timeout(WAIT).is_err());
    drop(harness.session);
}
