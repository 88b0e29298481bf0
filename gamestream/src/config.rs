//! Session configuration

use gamestream_protocol::{
    AssemblerConfig, Capabilities, HostGeneration, ReorderConfig, VideoFormat,
};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;

/// Default host port of the video stream
pub const DEFAULT_VIDEO_PORT: u16 = 47998;

/// Default host port of the audio stream
pub const DEFAULT_AUDIO_PORT: u16 = 48000;

/// Stream session configuration
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// Host address
    pub host: IpAddr,
    /// Host video port
    pub video_port: u16,
    /// Host audio port
    pub audio_port: u16,
    /// Local video port (0 picks an ephemeral port)
    pub local_video_port: u16,
    /// Local audio port (0 picks an ephemeral port)
    pub local_audio_port: u16,

    /// Video codec
    pub format: VideoFormat,
    /// Host generation, which sets the video frame header length
    pub host_generation: HostGeneration,
    /// Nominal video payload bytes per packet
    pub packet_size: usize,
    /// Wait for a sync frame before emitting the first access unit
    pub require_initial_sync_frame: bool,

    /// Video receive ring slots
    pub video_ring_slots: usize,
    /// Audio receive ring slots
    pub audio_ring_slots: usize,
    /// Bytes per receive ring slot
    pub slot_size: usize,
    /// Access units in the video pool
    pub video_pool_size: usize,
    /// Frames in the audio pool
    pub audio_pool_size: usize,
    /// Video reorder bounds
    pub video_reorder: ReorderConfig,
    /// Audio reorder bounds
    pub audio_reorder: ReorderConfig,

    /// Socket read timeout; bounds how late the reorder time bound is applied
    pub read_timeout: Duration,
    /// Socket receive buffer size
    pub recv_buffer_size: usize,
    /// Keep-alive interval
    pub keepalive_interval: Duration,

    /// Loss event queue capacity
    pub loss_queue_capacity: usize,
    /// Packet loss telemetry interval
    pub loss_report_interval: Duration,
    /// Escalations within the window that mark the connection poor
    pub poor_connection_threshold: usize,
    /// Window for counting escalations
    pub poor_connection_window: Duration,
    /// Frames to receive before connection quality is judged
    pub poor_connection_grace_frames: u64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        StreamConfig {
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            video_port: DEFAULT_VIDEO_PORT,
            audio_port: DEFAULT_AUDIO_PORT,
            local_video_port: 0,
            local_audio_port: 0,
            format: VideoFormat::H264,
            host_generation: HostGeneration::Gen7,
            packet_size: 1024,
            require_initial_sync_frame: true,
            video_ring_slots: 2048,
            audio_ring_slots: 64,
            slot_size: 2048,
            video_pool_size: 15,
            audio_pool_size: 30,
            video_reorder: ReorderConfig::video(),
            audio_reorder: ReorderConfig::audio(),
            read_timeout: Duration::from_millis(5),
            recv_buffer_size: 1024 * 1024,
            keepalive_interval: Duration::from_millis(500),
            loss_queue_capacity: 32,
            loss_report_interval: Duration::from_millis(50),
            poor_connection_threshold: 5,
            poor_connection_window: Duration::from_secs(60),
            poor_connection_grace_frames: 150,
        }
    }
}

impl StreamConfig {
    /// Config for a host at `host`, with every other setting defaulted
    pub fn for_host(host: IpAddr) -> Self {
        StreamConfig {
            host,
            ..Default::default()
        }
    }

    /// Host video address
    pub fn video_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.video_port)
    }

    /// Host audio address
    pub fn audio_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.audio_port)
    }

    /// Local bind address for a stream, in the host's address family
    pub fn bind_addr(&self, port: u16) -> SocketAddr {
        let ip = match self.host {
            IpAddr::V4(_) => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            IpAddr::V6(_) => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
        };
        SocketAddr::new(ip, port)
    }

    /// Assembler settings for a decoder with the given capabilities
    pub fn assembler_config(&self, capabilities: Capabilities) -> AssemblerConfig {
        AssemblerConfig {
            format: self.format,
            host_generation: self.host_generation,
            packet_size: self.packet_size,
            capabilities,
            require_initial_sync_frame: self.require_initial_sync_frame,
            ..Default::default()
        }
    }
}
