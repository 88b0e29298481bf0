//! Audio stream pump and decode thread

use crate::decoder::AudioDecoder;
use crate::error::StreamError;
use crate::session::ShutdownSignal;
use gamestream_io::StreamSocket;
use gamestream_protocol::{
    AddResult, AudioAssembler, AudioFrame, AudioPacket, AudioSink, BufferPool, PacketRing,
    ReorderQueue, StreamCounters,
};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, trace};

/// Receive loop of the audio stream
pub struct AudioPump {
    socket: StreamSocket,
    ring: PacketRing,
    reorder: ReorderQueue<AudioPacket>,
    assembler: AudioAssembler,
    sink: Box<dyn AudioSink + Send>,
    counters: Arc<StreamCounters>,
    shutdown: Arc<ShutdownSignal>,
}

impl AudioPump {
    /// Create a pump delivering into `sink`
    pub fn new(
        socket: StreamSocket,
        ring: PacketRing,
        reorder: ReorderQueue<AudioPacket>,
        sink: Box<dyn AudioSink + Send>,
        counters: Arc<StreamCounters>,
        shutdown: Arc<ShutdownSignal>,
    ) -> Self {
        AudioPump {
            socket,
            ring,
            reorder,
            assembler: AudioAssembler::new(Arc::clone(&counters)),
            sink,
            counters,
            shutdown,
        }
    }

    /// Receive until shutdown or a transport failure
    pub fn run(mut self) -> Result<(), StreamError> {
        info!("audio receive started");

        while self.shutdown.is_running() {
            let socket = &self.socket;
            match self.ring.receive(|buf| socket.recv(buf)) {
                Ok(packet) if packet.is_empty() => continue,
                Ok(packet) => {
                    self.counters.record_packet();
                    // Wrong packet type is discarded before queueing
                    match AudioPacket::parse(packet) {
                        Ok(packet) => self.submit(packet),
                        Err(e) => trace!(error = %e, "dropping audio packet"),
                    }
                }
                Err(e) if e.is_timeout() => {
                    let now = Instant::now();
                    while self.reorder.expire(now) {
                        self.drain();
                    }
                }
                Err(e) if e.is_connection_refused() => {
                    debug!("audio host port unreachable");
                }
                Err(e) => {
                    if !self.shutdown.is_running() {
                        break;
                    }
                    return Err(StreamError::Transport {
                        stream: "audio",
                        source: e,
                    });
                }
            }
        }

        let stats = self.assembler.stats();
        info!(
            accepted = stats.packets_accepted,
            concealed = stats.concealments,
            "audio receive stopped"
        );
        Ok(())
    }

    fn submit(&mut self, packet: AudioPacket) {
        match self.reorder.add(packet.seq(), packet) {
            AddResult::HandleNow(packet) => {
                self.assembler.process(&packet, self.sink.as_mut());
            }
            AddResult::Ready => self.drain(),
            AddResult::Queued | AddResult::Rejected => {}
        }
    }

    // Skipped packets are counted by the assembler's gap detection
    fn drain(&mut self) {
        while let Some(packet) = self.reorder.pop_ready() {
            self.assembler.process(&packet, self.sink.as_mut());
        }
    }
}

/// Decode thread body: decode ready audio frames until the pool is interrupted
pub fn run_audio_decoder(pool: BufferPool<AudioFrame>, mut decoder: Box<dyn AudioDecoder>) {
    info!("audio decode started");
    while let Some(frame) = pool.take_ready_blocking() {
        if frame.conceal {
            decoder.decode(None);
        } else {
            decoder.decode(Some(&frame.data));
        }
    }
    info!("audio decode stopped");
}
