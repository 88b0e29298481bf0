//! Game Stream Receive Pipeline Core
//!
//! This crate implements the thread-agnostic core of the game-streaming
//! receive path: wraparound-aware sequence comparison, the video and audio
//! wire formats, the receive packet ring, the free/ready buffer pool, the
//! reorder queue, Annex-B NAL scanning, video frame and audio assembly, and
//! loss event coalescing.

pub mod access_unit;
pub mod audio;
pub mod capability;
pub mod loss;
pub mod nal;
pub mod packet;
pub mod pool;
pub mod reorder;
pub mod ring;
pub mod sequence;
pub mod stats;
pub mod video;

pub use access_unit::{AccessUnit, Fragment, UnitFlags};
pub use audio::{AudioAssembler, AudioFrame, AudioOutcome, AudioSink, PooledAudioSink};
pub use capability::Capabilities;
pub use loss::{coalesce, loss_channel, FeedbackAction, FrameRange, LossEvent, LossEvents, LossReporter};
pub use nal::{NalClass, NalScanner, VideoFormat};
pub use packet::{
    AudioPacket, HostGeneration, PacketError, RtpHeader, VideoFlags, VideoHeader, VideoPacket,
    VideoPacketizer,
};
pub use pool::{BufferPool, PoolQueue, Pooled, QueueProfile};
pub use reorder::{AddResult, ReorderConfig, ReorderQueue, ReorderStats};
pub use ring::{Packet, PacketRing, RingStats};
pub use sequence::{is_before, SeqNumber};
pub use stats::{ConnectionStatus, CounterSnapshot, StreamCounters};
pub use video::{AssemblerConfig, AssemblerStats, FrameAssembler};
