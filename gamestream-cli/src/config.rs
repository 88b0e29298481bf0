//! Configuration file support for the game stream tools

use gamestream::StreamConfig;
use gamestream_protocol::{HostGeneration, VideoFormat};
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::{IpAddr, Ipv4Addr};
use std::path::Path;
use std::time::Duration;

/// Video codec
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Codec {
    H264,
    H265,
}

impl From<Codec> for VideoFormat {
    fn from(codec: Codec) -> Self {
        match codec {
            Codec::H264 => VideoFormat::H264,
            Codec::H265 => VideoFormat::H265,
        }
    }
}

/// Host server generation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Generation {
    /// No per-frame header
    Legacy,
    /// 8-byte frame header
    Gen5,
    /// 12-byte frame header
    Gen7,
}

impl From<Generation> for HostGeneration {
    fn from(generation: Generation) -> Self {
        match generation {
            Generation::Legacy => HostGeneration::Legacy,
            Generation::Gen5 => HostGeneration::Gen5,
            Generation::Gen7 => HostGeneration::Gen7,
        }
    }
}

/// Receiver configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReceiverFileConfig {
    /// Host address
    pub host: IpAddr,
    /// Host video port
    #[serde(default = "default_video_port")]
    pub video_port: u16,
    /// Host audio port
    #[serde(default = "default_audio_port")]
    pub audio_port: u16,
    /// Video codec
    #[serde(default = "default_codec")]
    pub codec: Codec,
    /// Host server generation
    #[serde(default = "default_generation")]
    pub generation: Generation,
    /// Nominal video payload bytes per packet
    #[serde(default = "default_packet_size")]
    pub packet_size: usize,
    /// Decode on the receive thread
    #[serde(default)]
    pub direct_submit: bool,
    /// Ask the host to invalidate reference frames instead of resyncing
    #[serde(default)]
    pub reference_frame_invalidation: bool,
    /// Annex-B output file ("-" for stdout)
    pub output: String,
    /// Statistics interval in seconds
    #[serde(default = "default_stats_interval")]
    pub stats_interval_secs: u64,
}

fn default_video_port() -> u16 {
    gamestream::DEFAULT_VIDEO_PORT
}

fn default_audio_port() -> u16 {
    gamestream::DEFAULT_AUDIO_PORT
}

fn default_codec() -> Codec {
    Codec::H264
}

fn default_generation() -> Generation {
    Generation::Gen7
}

fn default_packet_size() -> usize {
    1024
}

fn default_stats_interval() -> u64 {
    1
}

impl ReceiverFileConfig {
    /// Load configuration from TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        let config: ReceiverFileConfig = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let contents = toml::to_string_pretty(self)?;
        fs::write(path, contents)?;
        Ok(())
    }

    /// Create example configuration
    pub fn example() -> Self {
        ReceiverFileConfig {
            host: IpAddr::V4(Ipv4Addr::new(192, 168, 1, 20)),
            video_port: default_video_port(),
            audio_port: default_audio_port(),
            codec: Codec::H264,
            generation: Generation::Gen7,
            packet_size: 1024,
            direct_submit: false,
            reference_frame_invalidation: true,
            output: "stream.h264".to_string(),
            stats_interval_secs: 1,
        }
    }

    /// Check values a session cannot start with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.packet_size == 0 {
            return Err(ConfigError::Invalid("packet_size must be non-zero".into()));
        }
        if self.video_port == 0 || self.audio_port == 0 {
            return Err(ConfigError::Invalid("host ports must be non-zero".into()));
        }
        Ok(())
    }

    /// Get statistics interval as Duration
    pub fn stats_interval(&self) -> Duration {
        Duration::from_secs(self.stats_interval_secs)
    }

    /// Session configuration for these settings
    pub fn stream_config(&self) -> StreamConfig {
        StreamConfig {
            video_port: self.video_port,
            audio_port: self.audio_port,
            format: self.codec.into(),
            host_generation: self.generation.into(),
            packet_size: self.packet_size,
            ..StreamConfig::for_host(self.host)
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serialize_deserialize() {
        let config = ReceiverFileConfig::example();
        let toml = toml::to_string(&config).unwrap();
        let parsed: ReceiverFileConfig = toml::from_str(&toml).unwrap();

        assert_eq!(parsed.host, config.host);
        assert_eq!(parsed.codec, Codec::H264);
        assert!(parsed.reference_frame_invalidation);
    }

    #[test]
    fn test_defaults_fill_missing_fields() {
        let parsed: ReceiverFileConfig = toml::from_str(
            r#"
            host = "10.0.0.5"
            output = "-"
            codec = "h265"
            "#,
        )
        .unwrap();

        let stream = parsed.stream_config();
        assert_eq!(stream.video_port, gamestream::DEFAULT_VIDEO_PORT);
        assert_eq!(stream.format, VideoFormat::H265);
        assert_eq!(stream.host_generation, HostGeneration::Gen7);
        assert_eq!(parsed.stats_interval(), Duration::from_secs(1));
    }

    #[test]
    fn test_validate_rejects_zero_packet_size() {
        let config = ReceiverFileConfig {
            packet_size: 0,
            ..ReceiverFileConfig::example()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }
}
