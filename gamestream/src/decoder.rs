//! Decoder collaborators
//!
//! Decoding itself happens outside this crate. The session hands finished
//! access units and audio payloads to these traits, either from its own
//! decode threads or, with `Capabilities::DIRECT_SUBMIT`, straight from the
//! receive thread.

use gamestream_protocol::{AccessUnit, AudioSink, Capabilities};

/// Result of submitting an access unit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeStatus {
    /// Decoded
    Ok,
    /// The decoder lost its references and needs a sync frame
    NeedSyncFrame,
}

/// Video decode consumer
pub trait VideoDecoder: Send {
    /// Capabilities of this decoder
    fn capabilities(&self) -> Capabilities;

    /// Decode one access unit
    fn submit(&mut self, unit: &AccessUnit) -> DecodeStatus;
}

/// Audio decode consumer
pub trait AudioDecoder: Send {
    /// Capabilities of this decoder
    fn capabilities(&self) -> Capabilities;

    /// Decode one Opus payload, or conceal lost audio when `payload` is `None`
    fn decode(&mut self, payload: Option<&[u8]>);
}

/// Sink that feeds an audio decoder synchronously
pub struct DirectAudioSink {
    decoder: Box<dyn AudioDecoder>,
}

impl DirectAudioSink {
    /// Wrap a decoder
    pub fn new(decoder: Box<dyn AudioDecoder>) -> Self {
        DirectAudioSink { decoder }
    }
}

impl AudioSink for DirectAudioSink {
    fn conceal(&mut self) {
        self.decoder.decode(None);
    }

    fn payload(&mut self, data: &[u8]) {
        self.decoder.decode(Some(data));
    }
}
