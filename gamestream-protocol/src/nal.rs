//! Annex-B NAL unit scanning
//!
//! Only the first packet of a frame is scanned, to find and classify the NAL
//! units that lead the frame. All other packets are appended without looking
//! at their bytes.

use std::fmt;

/// Byte sequence recognized by the scanner
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpecialSequence {
    /// Start code of the given length (3 or 4 bytes)
    StartCode(usize),
    /// Zero padding between NAL units; the scanner skips one byte
    Padding,
}

/// Identify a start code or padding at the start of `data`
///
/// - `00 00 00 01` is a 4-byte start code
/// - `00 00 00` followed by anything else is padding
/// - `00 00 01` is a 3-byte start code
/// - `00 00 03 xx` is an emulation prevention sequence when `xx` is `00..=03`
///   and is otherwise taken as a 3-byte start code prefix
pub fn special_sequence(data: &[u8]) -> Option<SpecialSequence> {
    if data.len() < 3 || data[0] != 0 || data[1] != 0 {
        return None;
    }

    match data[2] {
        0 => {
            if data.len() >= 4 && data[3] == 1 {
                Some(SpecialSequence::StartCode(4))
            } else {
                Some(SpecialSequence::Padding)
            }
        }
        1 => Some(SpecialSequence::StartCode(3)),
        3 => match data.get(3) {
            Some(&next) if next > 3 => Some(SpecialSequence::StartCode(3)),
            _ => None,
        },
        _ => None,
    }
}

/// Video codec of the stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VideoFormat {
    #[default]
    H264,
    H265,
}

/// What a NAL unit carries, as far as frame assembly cares
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NalClass {
    /// Sequence, picture or video parameter set
    ParameterSet,
    /// Picture that can be decoded without earlier frames
    SyncPicture,
    /// Anything else
    Picture,
}

impl VideoFormat {
    /// NAL unit type from the first header byte
    pub fn nal_type(self, header: u8) -> u8 {
        match self {
            VideoFormat::H264 => header & 0x1F,
            VideoFormat::H265 => (header >> 1) & 0x3F,
        }
    }

    /// Classify a NAL unit from its first header byte
    pub fn classify(self, header: u8) -> NalClass {
        let nal_type = self.nal_type(header);
        match self {
            VideoFormat::H264 => match nal_type {
                // SPS, PPS
                7 | 8 => NalClass::ParameterSet,
                // IDR slice
                5 => NalClass::SyncPicture,
                _ => NalClass::Picture,
            },
            VideoFormat::H265 => match nal_type {
                // VPS, SPS, PPS
                32..=34 => NalClass::ParameterSet,
                // IDR_W_RADL, IDR_N_LP, CRA
                19..=21 => NalClass::SyncPicture,
                _ => NalClass::Picture,
            },
        }
    }
}

impl fmt::Display for VideoFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VideoFormat::H264 => write!(f, "H.264"),
            VideoFormat::H265 => write!(f, "H.265"),
        }
    }
}

/// Location of one NAL unit within a buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NalUnit {
    /// Offset of the start code
    pub start: usize,
    /// Offset of the NAL header byte
    pub header: usize,
    /// Offset one past the last byte (next start code, padding or end of data)
    pub end: usize,
}

impl NalUnit {
    /// Bytes of the NAL unit including its start code
    pub fn bytes<'a>(&self, data: &'a [u8]) -> &'a [u8] {
        &data[self.start..self.end]
    }

    /// First header byte, if the unit is not empty
    pub fn header_byte(&self, data: &[u8]) -> Option<u8> {
        if self.header < self.end {
            data.get(self.header).copied()
        } else {
            None
        }
    }
}

/// Iterator over the NAL units of an Annex-B buffer
///
/// Bytes before the first start code and padding between units are skipped.
pub struct NalScanner<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> NalScanner<'a> {
    /// Scan `data` from the beginning
    pub fn new(data: &'a [u8]) -> Self {
        NalScanner { data, pos: 0 }
    }
}

impl<'a> Iterator for NalScanner<'a> {
    type Item = NalUnit;

    fn next(&mut self) -> Option<NalUnit> {
        let data = self.data;

        // Find the next start code
        let (start, header) = loop {
            if self.pos >= data.len() {
                return None;
            }
            match special_sequence(&data[self.pos..]) {
                Some(SpecialSequence::StartCode(len)) => break (self.pos, self.pos + len),
                _ => self.pos += 1,
            }
        };

        // The unit runs until the next special sequence
        let mut end = header;
        while end < data.len() && special_sequence(&data[end..]).is_none() {
            end += 1;
        }

        self.pos = end;
        Some(NalUnit { start, header, end })
    }
}

/// Check if `data` begins with a start code
pub fn starts_with_start_code(data: &[u8]) -> bool {
    matches!(special_sequence(data), Some(SpecialSequence::StartCode(_)))
}
