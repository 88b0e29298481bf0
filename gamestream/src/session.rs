//! Stream session
//!
//! Wires sockets, pools, pumps and the feedback loop together and owns the
//! threads that run them:
//!
//! ```text
//! video socket -> ring -> reorder -> FrameAssembler -> ready pool -> decode thread
//! audio socket -> ring -> reorder -> AudioAssembler -> ready pool -> decode thread
//!                         loss events -> feedback thread -> ControlChannel
//! ```
//!
//! With `Capabilities::DIRECT_SUBMIT` the decode thread of that stream is
//! skipped and the receive thread hands units to the decoder itself.

use crate::audio::{run_audio_decoder, AudioPump};
use crate::config::StreamConfig;
use crate::control::{ConnectionListener, ControlChannel};
use crate::decoder::{AudioDecoder, DirectAudioSink, VideoDecoder};
use crate::error::StreamError;
use crate::feedback::{FeedbackConfig, FeedbackLoop};
use crate::keepalive::run_keepalive;
use crate::video::{run_video_decoder, VideoOutput, VideoPump};
use crossbeam::channel::{self, Receiver, Sender};
use gamestream_io::StreamSocket;
use gamestream_protocol::{
    loss_channel, AccessUnit, AudioFrame, AudioSink, BufferPool, Capabilities, CounterSnapshot,
    FrameAssembler, PacketRing, PooledAudioSink, QueueProfile, ReorderQueue, StreamCounters,
};
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info};

/// Shared shutdown state of a session
///
/// Triggering it stops every loop: receive loops see the flag (and their
/// sockets shut down), decode threads see the interrupted pools, and the
/// feedback and keep-alive loops see the closed channel.
pub struct ShutdownSignal {
    running: AtomicBool,
    sockets: Vec<StreamSocket>,
    video_pool: BufferPool<AccessUnit>,
    audio_pool: BufferPool<AudioFrame>,
    close: Mutex<Option<Sender<()>>>,
    closed: Receiver<()>,
}

impl ShutdownSignal {
    /// Create a signal that will shut `sockets` and interrupt both pools
    pub fn new(
        sockets: Vec<StreamSocket>,
        video_pool: BufferPool<AccessUnit>,
        audio_pool: BufferPool<AudioFrame>,
    ) -> Self {
        let (close, closed) = channel::bounded(0);
        ShutdownSignal {
            running: AtomicBool::new(true),
            sockets,
            video_pool,
            audio_pool,
            close: Mutex::new(Some(close)),
            closed,
        }
    }

    /// Check if the session is still running
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Receiver that disconnects when the signal triggers
    pub fn subscribe(&self) -> Receiver<()> {
        self.closed.clone()
    }

    /// Stop everything; later calls do nothing
    pub fn trigger(&self) {
        if !self.running.swap(false, Ordering::AcqRel) {
            return;
        }

        for socket in &self.sockets {
            if let Err(e) = socket.shutdown() {
                debug!(error = %e, "socket shutdown failed");
            }
        }
        self.video_pool.interrupt();
        self.audio_pool.interrupt();
        self.close.lock().take();
    }
}

/// External collaborators of a session
pub struct Collaborators {
    /// Video decode consumer
    pub video_decoder: Box<dyn VideoDecoder>,
    /// Audio decode consumer
    pub audio_decoder: Box<dyn AudioDecoder>,
    /// Outbound control messages
    pub control: Arc<dyn ControlChannel>,
    /// Session notifications
    pub listener: Arc<dyn ConnectionListener>,
}

/// Running receive pipeline for one video and one audio stream
pub struct StreamSession {
    shutdown: Arc<ShutdownSignal>,
    threads: Vec<JoinHandle<()>>,
    video_counters: Arc<StreamCounters>,
    audio_counters: Arc<StreamCounters>,
    local_video_addr: SocketAddr,
    local_audio_addr: SocketAddr,
}

fn open_socket(
    config: &StreamConfig,
    local_port: u16,
    peer: SocketAddr,
) -> Result<StreamSocket, StreamError> {
    let socket = StreamSocket::bind(config.bind_addr(local_port))?;
    socket.connect(peer)?;
    socket.set_read_timeout(Some(config.read_timeout))?;
    socket.set_recv_buffer_size(config.recv_buffer_size)?;
    Ok(socket)
}

impl StreamSession {
    /// Open both streams and start every thread
    pub fn start(config: StreamConfig, collaborators: Collaborators) -> Result<Self, StreamError> {
        let Collaborators {
            video_decoder,
            audio_decoder,
            control,
            listener,
        } = collaborators;

        let video_socket = open_socket(&config, config.local_video_port, config.video_addr())?;
        let audio_socket = open_socket(&config, config.local_audio_port, config.audio_addr())?;
        let local_video_addr = video_socket.local_addr()?;
        let local_audio_addr = audio_socket.local_addr()?;

        let video_caps = video_decoder.capabilities();
        let audio_caps = audio_decoder.capabilities();
        info!(
            host = %config.host,
            video = %local_video_addr,
            audio = %local_audio_addr,
            video_caps = ?video_caps,
            audio_caps = ?audio_caps,
            "starting stream session"
        );

        let video_pool = BufferPool::new_with_cleanup(
            config.video_pool_size,
            QueueProfile::for_capabilities(video_caps),
            AccessUnit::default,
            AccessUnit::clear,
        );
        let audio_pool = BufferPool::new_with_cleanup(
            config.audio_pool_size,
            QueueProfile::for_capabilities(audio_caps),
            || AudioFrame::with_capacity(config.slot_size),
            AudioFrame::clear,
        );

        let shutdown = Arc::new(ShutdownSignal::new(
            vec![video_socket.try_clone()?, audio_socket.try_clone()?],
            video_pool.clone(),
            audio_pool.clone(),
        ));
        let video_keepalive = video_socket.try_clone()?;
        let audio_keepalive = audio_socket.try_clone()?;

        let video_counters = Arc::new(StreamCounters::new());
        let audio_counters = Arc::new(StreamCounters::new());
        let (loss, events) = loss_channel(config.loss_queue_capacity);

        // Dropping the session on a failed spawn stops what already runs
        let mut session = StreamSession {
            shutdown: Arc::clone(&shutdown),
            threads: Vec::new(),
            video_counters: Arc::clone(&video_counters),
            audio_counters: Arc::clone(&audio_counters),
            local_video_addr,
            local_audio_addr,
        };

        // Video
        let assembler = FrameAssembler::new(
            config.assembler_config(video_caps),
            video_pool.clone(),
            loss.clone(),
            Arc::clone(&video_counters),
        );
        let output = if video_caps.contains(Capabilities::DIRECT_SUBMIT) {
            VideoOutput::Direct(video_decoder)
        } else {
            let pool = video_pool.clone();
            let loss = loss.clone();
            session.spawn("gs-video-decode", move || {
                run_video_decoder(pool, video_decoder, loss)
            })?;
            VideoOutput::Pooled(video_pool)
        };
        let pump = VideoPump::new(
            video_socket,
            PacketRing::new(config.video_ring_slots, config.slot_size),
            ReorderQueue::new(config.video_reorder),
            assembler,
            output,
            loss.clone(),
            Arc::clone(&video_counters),
            Arc::clone(&shutdown),
        );
        session.spawn_receive("gs-video-recv", Arc::clone(&listener), move || pump.run())?;

        // Audio
        let sink: Box<dyn AudioSink + Send> = if audio_caps.contains(Capabilities::DIRECT_SUBMIT) {
            Box::new(DirectAudioSink::new(audio_decoder))
        } else {
            let pool = audio_pool.clone();
            session.spawn("gs-audio-decode", move || {
                run_audio_decoder(pool, audio_decoder)
            })?;
            Box::new(PooledAudioSink::new(audio_pool))
        };
        let pump = AudioPump::new(
            audio_socket,
            PacketRing::new(config.audio_ring_slots, config.slot_size),
            ReorderQueue::new(config.audio_reorder),
            sink,
            Arc::clone(&audio_counters),
            Arc::clone(&shutdown),
        );
        session.spawn_receive("gs-audio-recv", Arc::clone(&listener), move || pump.run())?;

        // Feedback
        let feedback = FeedbackLoop::new(
            events,
            control,
            Arc::clone(&listener),
            video_counters,
            audio_counters,
            FeedbackConfig {
                force_full_resync_only: !video_caps
                    .contains(Capabilities::REFERENCE_FRAME_INVALIDATION),
                report_interval: config.loss_report_interval,
                poor_threshold: config.poor_connection_threshold,
                poor_window: config.poor_connection_window,
                grace_frames: config.poor_connection_grace_frames,
            },
        );
        let closed = shutdown.subscribe();
        session.spawn_receive("gs-feedback", listener, move || feedback.run(closed))?;
        drop(loss);

        // Keep-alives
        let interval = config.keepalive_interval;
        let closed = shutdown.subscribe();
        session.spawn("gs-video-ping", move || {
            run_keepalive(video_keepalive, interval, closed, "video")
        })?;
        let closed = shutdown.subscribe();
        session.spawn("gs-audio-ping", move || {
            run_keepalive(audio_keepalive, interval, closed, "audio")
        })?;

        info!(threads = session.threads.len(), "stream session started");
        Ok(session)
    }

    fn spawn<F>(&mut self, name: &'static str, body: F) -> Result<(), StreamError>
    where
        F: FnOnce() + Send + 'static,
    {
        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(body)
            .map_err(|source| StreamError::Spawn { name, source })?;
        self.threads.push(handle);
        Ok(())
    }

    /// Spawn a loop whose failure terminates the session
    fn spawn_receive<F>(
        &mut self,
        name: &'static str,
        listener: Arc<dyn ConnectionListener>,
        body: F,
    ) -> Result<(), StreamError>
    where
        F: FnOnce() -> Result<(), StreamError> + Send + 'static,
    {
        let shutdown = Arc::clone(&self.shutdown);
        self.spawn(name, move || {
            if let Err(e) = body() {
                error!(thread = name, error = %e, "stream terminated");
                shutdown.trigger();
                listener.connection_terminated(&e);
            }
        })
    }

    /// Check if the session is still running
    ///
    /// Turns false after `stop` or after a transport failure.
    pub fn is_running(&self) -> bool {
        self.shutdown.is_running()
    }

    /// Stop every thread and wait for them; later calls do nothing
    pub fn stop(&mut self) {
        self.shutdown.trigger();
        if self.threads.is_empty() {
            return;
        }

        for handle in self.threads.drain(..) {
            let name = handle.thread().name().unwrap_or("unnamed").to_string();
            if handle.join().is_err() {
                error!(thread = %name, "thread panicked");
            }
        }
        info!("stream session stopped");
    }

    /// Video receive counters
    pub fn video_stats(&self) -> CounterSnapshot {
        self.video_counters.snapshot()
    }

    /// Audio receive counters
    pub fn audio_stats(&self) -> CounterSnapshot {
        self.audio_counters.snapshot()
    }

    /// Local address of the video socket
    pub fn local_video_addr(&self) -> SocketAddr {
        self.local_video_addr
    }

    /// Local address of the audio socket
    pub fn local_audio_addr(&self) -> SocketAddr {
        self.local_audio_addr
    }
}

impl Drop for StreamSession {
    fn drop(&mut self) {
        self.stop();
    }
}
