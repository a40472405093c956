//! Host configuration
//!
//! Stored as YAML in the user's config directory.
//! Default location: ~/.config/tandem/host.yaml

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use tandem_core::audio::AudioConfig;
use tandem_core::config::{default_config_path, BridgeConfig};
use tandem_core::format::{AudioEncoding, AudioFormat};
use tandem_core::StreamId;

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    pub bridge: BridgeConfig,
    pub audio: AudioConfig,
    pub loopback: LoopbackConfig,
}

/// Simulated network side used when no real stream layer is attached
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopbackConfig {
    /// Tone receivers to play, one per entry (Hz)
    pub tones_hz: Vec<f32>,
    /// Sample rate of the simulated network streams
    pub stream_rate: u32,
    pub stream_channels: u32,
    /// Receiver playout delay (frames at the stream rate)
    pub delay_frames: u32,
    /// Capture the input device into a sender as well
    pub enable_sender: bool,
    /// Simulated clock error against the host clock (ppm)
    pub clock_ppm: f64,
    /// How long to run before shutting down
    pub run_seconds: u64,
}

impl Default for LoopbackConfig {
    fn default() -> Self {
        Self {
            tones_hz: vec![440.0],
            stream_rate: 48000,
            stream_channels: 2,
            delay_frames: 0,
            enable_sender: false,
            clock_ppm: 0.0,
            run_seconds: 10,
        }
    }
}

impl LoopbackConfig {
    pub fn stream_format(&self) -> AudioFormat {
        AudioFormat::network(AudioEncoding::PcmS24, self.stream_rate, self.stream_channels)
    }

    /// Receiver stream IDs with their tone frequency
    pub fn receivers(&self) -> impl Iterator<Item = (StreamId, f32)> + '_ {
        self.tones_hz
            .iter()
            .enumerate()
            .map(|(i, &hz)| (StreamId(i as u64 + 1), hz))
    }

    /// Sender stream ID (after all receivers)
    pub fn sender_id(&self) -> StreamId {
        StreamId(self.tones_hz.len() as u64 + 1)
    }
}

/// Get the default config file path
pub fn default_host_config_path() -> PathBuf {
    default_config_path("host.yaml")
}
