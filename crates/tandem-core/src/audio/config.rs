//! Audio backend configuration
//!
//! Device selection and buffer settings for the receiver (output) and
//! sender (input) streams.

use serde::{Deserialize, Serialize};

use crate::types::MAX_BLOCK_FRAMES;

/// Default buffer size when no preference is specified (frames)
pub const DEFAULT_BUFFER_SIZE: u32 = 256;

/// Smallest buffer size accepted from configuration (frames)
pub const MIN_BUFFER_SIZE: u32 = 32;

/// Default sample rate for the audio system (48kHz, the AES67 default)
pub const DEFAULT_SAMPLE_RATE: u32 = 48000;

/// Preferred buffer size for audio streams
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BufferSize {
    /// Use [`DEFAULT_BUFFER_SIZE`]
    #[default]
    Default,
    /// Request a specific buffer size in frames (may be adjusted by the system)
    Fixed(u32),
}

impl BufferSize {
    /// Requested frames, clamped to what the bridges can pre-allocate
    pub fn frames(&self) -> u32 {
        match self {
            BufferSize::Default => DEFAULT_BUFFER_SIZE,
            BufferSize::Fixed(frames) => (*frames).clamp(MIN_BUFFER_SIZE, MAX_BLOCK_FRAMES as u32),
        }
    }

    pub fn latency_ms(&self, sample_rate: u32) -> f32 {
        (self.frames() as f32 / sample_rate as f32) * 1000.0
    }
}

/// Audio device identifier
///
/// Includes both the device name and the host backend (ALSA, CoreAudio, ..)
/// so a device can be picked from a specific host when several are present.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceId {
    pub name: String,
    /// Audio host identifier; `None` searches all hosts
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
}

impl DeviceId {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            host: None,
        }
    }

    pub fn with_host(name: &str, host: &str) -> Self {
        Self {
            name: name.to_string(),
            host: Some(host.to_string()),
        }
    }

    /// Display label that includes the host if available
    pub fn display_label(&self) -> String {
        match &self.host {
            Some(host) => format!("[{}] {}", host, self.name),
            None => self.name.clone(),
        }
    }
}

/// Configuration for the audio backend
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Device receivers play on (None = system default)
    pub output_device: Option<DeviceId>,
    /// Device senders capture from (None = system default)
    pub input_device: Option<DeviceId>,
    pub buffer_size: BufferSize,
    /// Preferred sample rate (None = [`DEFAULT_SAMPLE_RATE`])
    pub sample_rate: Option<u32>,
}

impl AudioConfig {
    pub fn with_output_device(mut self, device: DeviceId) -> Self {
        self.output_device = Some(device);
        self
    }

    pub fn with_input_device(mut self, device: DeviceId) -> Self {
        self.input_device = Some(device);
        self
    }

    pub fn with_buffer_frames(mut self, frames: u32) -> Self {
        self.buffer_size = BufferSize::Fixed(frames);
        self
    }

    pub fn with_sample_rate(mut self, rate: u32) -> Self {
        self.sample_rate = Some(rate);
        self
    }

    pub fn target_sample_rate(&self) -> u32 {
        self.sample_rate.unwrap_or(DEFAULT_SAMPLE_RATE)
    }
}
