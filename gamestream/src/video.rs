//! Video stream pump and decode thread

use crate::decoder::{DecodeStatus, VideoDecoder};
use crate::error::StreamError;
use crate::session::ShutdownSignal;
use gamestream_io::StreamSocket;
use gamestream_protocol::{
    AccessUnit, AddResult, BufferPool, FrameAssembler, LossReporter, PacketRing, ReorderQueue,
    StreamCounters, VideoPacket,
};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, trace};

/// Where sealed access units go
pub enum VideoOutput {
    /// Submit from the receive thread
    Direct(Box<dyn VideoDecoder>),
    /// Publish to the ready pool for the decode thread
    Pooled(BufferPool<AccessUnit>),
}

/// Receive loop of the video stream
pub struct VideoPump {
    socket: StreamSocket,
    ring: PacketRing,
    reorder: ReorderQueue<VideoPacket>,
    assembler: FrameAssembler,
    output: VideoOutput,
    loss: LossReporter,
    counters: Arc<StreamCounters>,
    shutdown: Arc<ShutdownSignal>,
    skipped: u64,
}

impl VideoPump {
    /// Create a pump
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        socket: StreamSocket,
        ring: PacketRing,
        reorder: ReorderQueue<VideoPacket>,
        assembler: FrameAssembler,
        output: VideoOutput,
        loss: LossReporter,
        counters: Arc<StreamCounters>,
        shutdown: Arc<ShutdownSignal>,
    ) -> Self {
        VideoPump {
            socket,
            ring,
            reorder,
            assembler,
            output,
            loss,
            counters,
            shutdown,
            skipped: 0,
        }
    }

    /// Receive until shutdown or a transport failure
    pub fn run(mut self) -> Result<(), StreamError> {
        info!("video receive started");

        while self.shutdown.is_running() {
            let socket = &self.socket;
            match self.ring.receive(|buf| socket.recv(buf)) {
                Ok(packet) if packet.is_empty() => continue,
                Ok(packet) => {
                    self.counters.record_packet();
                    match VideoPacket::parse(packet) {
                        Ok(packet) => self.submit(packet),
                        Err(e) => trace!(error = %e, "dropping malformed video packet"),
                    }
                }
                Err(e) if e.is_timeout() => {
                    let now = Instant::now();
                    while self.reorder.expire(now) {
                        self.drain();
                    }
                }
                Err(e) if e.is_connection_refused() => {
                    debug!("video host port unreachable");
                }
                Err(e) => {
                    if !self.shutdown.is_running() {
                        break;
                    }
                    return Err(StreamError::Transport {
                        stream: "video",
                        source: e,
                    });
                }
            }
        }

        let ring = self.ring.stats();
        info!(
            packets = ring.packets_received,
            reallocations = ring.reallocations,
            frames = self.assembler.stats().frames_completed,
            dropped = self.assembler.stats().frames_dropped,
            "video receive stopped"
        );
        Ok(())
    }

    fn submit(&mut self, packet: VideoPacket) {
        match self.reorder.add(packet.seq(), packet) {
            AddResult::HandleNow(packet) => self.assemble(packet),
            AddResult::Ready => self.drain(),
            AddResult::Queued | AddResult::Rejected => {}
        }
    }

    fn drain(&mut self) {
        self.account_skipped();
        while let Some(packet) = self.reorder.pop_ready() {
            self.assemble(packet);
        }
    }

    /// Count sequence numbers the reorder queue gave up on as lost
    fn account_skipped(&mut self) {
        let skipped = self.reorder.stats().skipped;
        self.counters.record_lost(skipped - self.skipped);
        self.skipped = skipped;
    }

    fn assemble(&mut self, packet: VideoPacket) {
        let Some(unit) = self.assembler.process(packet) else {
            return;
        };

        match &mut self.output {
            VideoOutput::Direct(decoder) => {
                if decoder.submit(&unit) == DecodeStatus::NeedSyncFrame {
                    debug!(frame = unit.frame_number(), "decoder needs a sync frame");
                    self.loss.full_resync();
                    self.assembler.request_sync_frame();
                }
            }
            VideoOutput::Pooled(pool) => pool.publish(unit),
        }
    }
}

/// Decode thread body: submit ready access units until the pool is interrupted
pub fn run_video_decoder(
    pool: BufferPool<AccessUnit>,
    mut decoder: Box<dyn VideoDecoder>,
    loss: LossReporter,
) {
    info!("video decode started");
    while let Some(unit) = pool.take_ready_blocking() {
        if decoder.submit(&unit) == DecodeStatus::NeedSyncFrame {
            debug!(frame = unit.frame_number(), "decoder needs a sync frame");
            loss.full_resync();
        }
    }
    info!("video decode stopped");
}
