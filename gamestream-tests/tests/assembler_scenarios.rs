//! End-to-end scenarios for video frame assembly
//!
//! Packets are built with the host-side packetizer, received through a
//! packet ring, ordered by the reorder queue and assembled into access units.

use gamestream_protocol::{
    loss_channel, AccessUnit, AddResult, AssemblerConfig, BufferPool, FrameAssembler,
    HostGeneration, LossEvent, LossEvents, Packet, PacketRing, Pooled, QueueProfile,
    ReorderConfig, ReorderQueue, SeqNumber, StreamCounters, UnitFlags, VideoFlags, VideoPacket,
    VideoPacketizer,
};
use std::convert::Infallible;
use std::sync::Arc;
use std::time::{Duration, Instant};

const IDR: &[u8] = &[0, 0, 0, 1, 0x65, 0x88, 0x84, 0x21];
const P_SLICE: &[u8] = &[0, 0, 0, 1, 0x41, 0x9A, 0x02, 0x07];
const PICTURE: VideoFlags = VideoFlags::CONTAINS_PICTURE_DATA;

/// Receive side of one video stream, minus the socket
struct Receiver {
    ring: PacketRing,
    reorder: ReorderQueue<VideoPacket>,
    assembler: FrameAssembler,
    events: LossEvents,
    counters: Arc<StreamCounters>,
}

impl Receiver {
    fn new(config: AssemblerConfig) -> Self {
        let pool = BufferPool::new_with_cleanup(
            8,
            QueueProfile::SingleThreaded,
            AccessUnit::default,
            AccessUnit::clear,
        );
        let (reporter, events) = loss_channel(64);
        let counters = Arc::new(StreamCounters::new());
        Receiver {
            ring: PacketRing::new(64, 2048),
            reorder: ReorderQueue::new(ReorderConfig::video()),
            assembler: FrameAssembler::new(config, pool, reporter, Arc::clone(&counters)),
            events,
            counters,
        }
    }

    fn receive(&mut self, datagram: &[u8]) -> Packet {
        self.ring
            .receive(|buf| {
                buf[..datagram.len()].copy_from_slice(datagram);
                Ok::<_, Infallible>(datagram.len())
            })
            .unwrap()
    }

    /// Push one datagram through the reorder queue and the assembler
    fn push_at(&mut self, datagram: &[u8], now: Instant) -> Vec<Pooled<AccessUnit>> {
        let packet = VideoPacket::parse(self.receive(datagram)).unwrap();
        match self.reorder.add_at(packet.seq(), packet, now) {
            AddResult::HandleNow(packet) => self.assembler.process(packet).into_iter().collect(),
            AddResult::Ready => self.drain(),
            AddResult::Queued | AddResult::Rejected => Vec::new(),
        }
    }

    fn push(&mut self, datagrams: &[impl AsRef<[u8]>]) -> Vec<Pooled<AccessUnit>> {
        let now = Instant::now();
        datagrams
            .iter()
            .flat_map(|d| self.push_at(d.as_ref(), now))
            .collect()
    }

    fn drain(&mut self) -> Vec<Pooled<AccessUnit>> {
        let mut units = Vec::new();
        while let Some(packet) = self.reorder.pop_ready() {
            units.extend(self.assembler.process(packet));
        }
        units
    }

    fn events(&self) -> Vec<LossEvent> {
        self.events.receiver().try_iter().collect()
    }
}

fn legacy_config() -> AssemblerConfig {
    AssemblerConfig {
        host_generation: HostGeneration::Legacy,
        packet_size: 16,
        ..Default::default()
    }
}

#[test]
fn test_two_packet_frame_without_flags() {
    let mut rx = Receiver::new(AssemblerConfig {
        require_initial_sync_frame: false,
        ..legacy_config()
    });
    let mut host = VideoPacketizer::new(16, HostGeneration::Legacy)
        .with_initial_seq(SeqNumber::new(100));

    let first = host.encode(10, PICTURE | VideoFlags::START_OF_FRAME, &[0xAB; 16]);
    let second = host.encode(10, PICTURE | VideoFlags::END_OF_FRAME, &[0xCD; 5]);

    let units = rx.push(&[first, second]);
    assert_eq!(units.len(), 1);
    let unit = &units[0];
    assert_eq!(unit.frame_number(), 10);
    assert!(unit.flags().is_empty());
    assert_eq!(unit.len(), 21);
    assert_eq!(&unit.to_bytes()[..16], &[0xAB; 16]);
    assert!(rx.events().is_empty());
}

#[test]
fn test_codec_config_frame_then_loss() {
    let mut rx = Receiver::new(legacy_config());
    let mut host = VideoPacketizer::new(64, HostGeneration::Legacy)
        .with_initial_seq(SeqNumber::new(100));
    let t0 = Instant::now();

    let sps_frame = [&[0, 0, 0, 1, 0x67, 0x42, 0x00, 0x1F][..], IDR].concat();
    let frame10 = host.packetize(10, &sps_frame);
    let frame11 = host.packetize(11, P_SLICE);
    let frame12 = host.packetize(12, &[P_SLICE, &[0x5A; 80][..]].concat());
    assert_eq!(frame10.len(), 1);
    assert_eq!(frame11.len(), 1);
    assert_eq!(frame12.len(), 2);

    let units = rx.push_at(&frame10[0], t0);
    assert_eq!(units.len(), 1);
    assert_eq!(units[0].frame_number(), 10);
    assert!(units[0].flags().contains(UnitFlags::CODEC_CONFIG));
    assert_eq!(&units[0].to_bytes()[..], &sps_frame[..]);

    // seq 101 (frame 11) is lost; frame 12 waits in the reorder queue
    assert!(rx.push_at(&frame12[0], t0).is_empty());
    assert!(rx.push_at(&frame12[1], t0).is_empty());
    assert!(rx.events().is_empty());

    assert!(rx.reorder.expire(t0 + Duration::from_millis(11)));
    let units = rx.drain();

    // Without reference frame invalidation the P-frame cannot be decoded
    assert!(units.is_empty());
    assert_eq!(rx.events(), vec![LossEvent::Invalidate { first: 11, last: 11 }]);
    assert_eq!(rx.reorder.stats().skipped, 1);
    assert!(rx.assembler.is_waiting_for_sync());
}

#[test]
fn test_clean_frames_reassemble_exactly() {
    let mut rx = Receiver::new(AssemblerConfig {
        packet_size: 32,
        ..Default::default()
    });
    let mut host = VideoPacketizer::new(32, HostGeneration::Gen7);

    let frame1 = [IDR, &[0x11; 100][..]].concat();
    let frame2 = [P_SLICE, &[0x22; 70][..]].concat();
    let mut datagrams = host.packetize(1, &frame1);
    datagrams.extend(host.packetize(2, &frame2));

    let units = rx.push(&datagrams);
    assert_eq!(units.len(), 2);
    assert_eq!(units[0].frame_number(), 1);
    assert_eq!(units[1].frame_number(), 2);
    assert_eq!(&units[0].to_bytes()[..], &frame1[..]);
    assert_eq!(&units[1].to_bytes()[..], &frame2[..]);

    let concatenated: Vec<u8> = units[1].iter().flatten().copied().collect();
    assert_eq!(concatenated, frame2);
    assert_eq!(rx.counters.snapshot().frames_completed, 2);
}

#[test]
fn test_reordered_packets_assemble() {
    let mut rx = Receiver::new(AssemblerConfig {
        packet_size: 16,
        ..Default::default()
    });
    let mut host = VideoPacketizer::new(16, HostGeneration::Gen7);

    let frame = [IDR, &[0x33; 60][..]].concat();
    let mut datagrams = host.packetize(1, &frame);
    assert!(datagrams.len() >= 4);
    datagrams.swap(1, 3);

    let units = rx.push(&datagrams);
    assert_eq!(units.len(), 1);
    assert_eq!(&units[0].to_bytes()[..], &frame[..]);
    assert_eq!(rx.reorder.stats().queued, 3);
}

#[test]
fn test_escalation_then_sync_frame_resumes() {
    let mut rx = Receiver::new(AssemblerConfig::default());
    let mut host = VideoPacketizer::new(1024, HostGeneration::Gen7);

    // No sync frame yet, so every frame is discarded
    for frame in 0..120 {
        assert!(rx.push(&host.packetize(frame, P_SLICE)).is_empty());
    }
    assert_eq!(rx.events(), vec![LossEvent::FullResync]);
    assert_eq!(rx.assembler.consecutive_drops(), 0);

    let units = rx.push(&host.packetize(120, IDR));
    assert_eq!(units.len(), 1);
    assert!(units[0].flags().contains(UnitFlags::SYNC_FRAME));

    for frame in 121..126 {
        assert_eq!(rx.push(&host.packetize(frame, P_SLICE)).len(), 1);
    }
    assert!(rx.events().is_empty());
    assert_eq!(rx.counters.snapshot().frames_dropped, 120);
}

#[test]
fn test_access_unit_references_ring_slots() {
    let mut rx = Receiver::new(legacy_config());
    let mut host = VideoPacketizer::new(16, HostGeneration::Legacy);
    let datagrams = host.packetize(1, &[IDR, &[0x44; 10][..]].concat());
    assert_eq!(datagrams.len(), 2);

    let p1 = rx.receive(&datagrams[0]);
    let p2 = rx.receive(&datagrams[1]);
    let (k1, k2) = (p1.clone(), p2.clone());

    assert!(rx.assembler.process(VideoPacket::parse(p1).unwrap()).is_none());
    let unit = rx
        .assembler
        .process(VideoPacket::parse(p2).unwrap())
        .unwrap();

    // One reference each from the unit, one from the test
    assert_eq!(k1.ref_count(), 2);
    assert_eq!(k2.ref_count(), 2);

    drop(unit);
    assert_eq!(k1.ref_count(), 1);
    assert_eq!(k2.ref_count(), 1);

    drop((k1, k2));
    assert_eq!(rx.ring.in_use(), 0);
}
