//! Audio format descriptions
//!
//! An [`AudioFormat`] describes one side of a bridge: what the network stream
//! carries, or what the device renders. A format that is not valid disables
//! the bridge that holds it.

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ByteOrder {
    #[default]
    LittleEndian,
    BigEndian,
}

/// Sample encoding of a stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum AudioEncoding {
    #[default]
    Undefined,
    PcmS8,
    PcmU8,
    PcmS16,
    PcmS24,
    PcmS32,
    PcmF32,
    PcmF64,
}

impl AudioEncoding {
    /// Size of one sample in bytes (0 for undefined)
    pub fn bytes_per_sample(self) -> usize {
        match self {
            AudioEncoding::Undefined => 0,
            AudioEncoding::PcmS8 | AudioEncoding::PcmU8 => 1,
            AudioEncoding::PcmS16 => 2,
            AudioEncoding::PcmS24 => 3,
            AudioEncoding::PcmS32 | AudioEncoding::PcmF32 => 4,
            AudioEncoding::PcmF64 => 8,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            AudioEncoding::Undefined => "undefined",
            AudioEncoding::PcmS8 => "pcm_s8",
            AudioEncoding::PcmU8 => "pcm_u8",
            AudioEncoding::PcmS16 => "pcm_s16",
            AudioEncoding::PcmS24 => "pcm_s24",
            AudioEncoding::PcmS32 => "pcm_s32",
            AudioEncoding::PcmF32 => "pcm_f32",
            AudioEncoding::PcmF64 => "pcm_f64",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ChannelOrdering {
    #[default]
    Interleaved,
    NonInterleaved,
}

/// Complete description of an audio stream's sample layout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct AudioFormat {
    pub byte_order: ByteOrder,
    pub encoding: AudioEncoding,
    pub ordering: ChannelOrdering,
    pub sample_rate: u32,
    pub num_channels: u32,
}

impl AudioFormat {
    /// Format used on the device side: native-endian non-interleaved f32
    pub fn device_f32(sample_rate: u32, num_channels: u32) -> Self {
        Self {
            byte_order: ByteOrder::LittleEndian,
            encoding: AudioEncoding::PcmF32,
            ordering: ChannelOrdering::NonInterleaved,
            sample_rate,
            num_channels,
        }
    }

    /// Typical AES67 stream format: big-endian interleaved PCM
    pub fn network(encoding: AudioEncoding, sample_rate: u32, num_channels: u32) -> Self {
        Self {
            byte_order: ByteOrder::BigEndian,
            encoding,
            ordering: ChannelOrdering::Interleaved,
            sample_rate,
            num_channels,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.encoding != AudioEncoding::Undefined && self.sample_rate > 0 && self.num_channels > 0
    }

    /// Size of one frame (all channels) in bytes
    pub fn bytes_per_frame(&self) -> usize {
        self.encoding.bytes_per_sample() * self.num_channels as usize
    }

    pub fn with_sample_rate(mut self, sample_rate: u32) -> Self {
        self.sample_rate = sample_rate;
        self
    }
}

impl fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}Hz/{}ch/{}/{}",
            self.encoding.name(),
            self.sample_rate,
            self.num_channels,
            match self.byte_order {
                ByteOrder::LittleEndian => "le",
                ByteOrder::BigEndian => "be",
            },
            match self.ordering {
                ChannelOrdering::Interleaved => "interleaved",
                ChannelOrdering::NonInterleaved => "noninterleaved",
            }
        )
    }
}

/// Device-side configuration threaded through `prepare_output`
///
/// Replaces ambient "current device format" state: everything a bridge needs
/// to know about the device arrives through this value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceFormat {
    pub format: AudioFormat,
    pub max_frames_per_block: usize,
}

impl DeviceFormat {
    pub fn new(sample_rate: u32, num_channels: u32, max_frames_per_block: usize) -> Self {
        Self {
            format: AudioFormat::device_f32(sample_rate, num_channels),
            max_frames_per_block,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.format.is_valid()
            && self.max_frames_per_block > 0
            && self.max_frames_per_block <= crate::types::MAX_BLOCK_FRAMES
    }

    pub fn sample_rate(&self) -> u32 {
        self.format.sample_rate
    }

    pub fn num_channels(&self) -> usize {
        self.format.num_channels as usize
    }
}
