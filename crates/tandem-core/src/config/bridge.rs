//! Bridge tuning configuration
//!
//! Every value here has a working default; a config file only needs to name
//! what it changes.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::drift::{DEFAULT_CONFIDENCE, DEFAULT_STEP_FACTOR, MIN_CONFIDENCE};
use crate::error::{BridgeError, BridgeResult};
use crate::types::JND_PITCH;

/// Drift filter and re-alignment settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriftConfig {
    /// Starting half-width of the filter's acceptance band
    /// Default: 0.0001 (100 ppm)
    pub initial_confidence: f64,

    /// Geometric factor the band widens/narrows by per block (> 1.0)
    /// Default: 1.00001
    pub confidence_step_factor: f64,

    /// Floor the band never narrows below
    /// Default: 1e-9
    pub min_confidence: f64,

    /// Hard limit on the correction ratio's distance from 1.0
    /// Default: 0.006 (just noticeable pitch difference)
    pub max_correction: f64,

    /// Re-align when measured drift exceeds this many blocks
    /// Default: 2
    pub realign_threshold_blocks: u32,
}

impl Default for DriftConfig {
    fn default() -> Self {
        Self {
            initial_confidence: DEFAULT_CONFIDENCE,
            confidence_step_factor: DEFAULT_STEP_FACTOR,
            min_confidence: MIN_CONFIDENCE,
            max_correction: JND_PITCH,
            realign_threshold_blocks: 2,
        }
    }
}

impl DriftConfig {
    /// Clamp a damped ratio to the allowed correction range
    ///
    /// An out-of-range `max_correction` falls back to the nearest usable
    /// limit so a config that skipped [`Self::validate`] cannot panic here.
    #[inline]
    pub fn clamp_ratio(&self, ratio: f64) -> f64 {
        let limit = if self.max_correction.is_nan() {
            JND_PITCH
        } else {
            self.max_correction.abs().min(JND_PITCH)
        };
        if ratio.is_nan() {
            return 1.0;
        }
        ratio.clamp(1.0 - limit, 1.0 + limit)
    }

    /// Reject values the drift loop cannot run with
    pub fn validate(&self) -> BridgeResult<()> {
        let invalid = |what: &str, value: f64| {
            Err(BridgeError::InvalidConfig(format!("drift.{} {}", what, value)))
        };
        if self.max_correction.is_nan() || self.max_correction <= 0.0 || self.max_correction > JND_PITCH {
            return invalid("max_correction must be in (0, 0.006], got", self.max_correction);
        }
        if !self.confidence_step_factor.is_finite() || self.confidence_step_factor <= 1.0 {
            return invalid("confidence_step_factor must be > 1, got", self.confidence_step_factor);
        }
        if !self.min_confidence.is_finite() || self.min_confidence <= 0.0 {
            return invalid("min_confidence must be > 0, got", self.min_confidence);
        }
        if !self.initial_confidence.is_finite() || self.initial_confidence <= 0.0 {
            return invalid("initial_confidence must be > 0, got", self.initial_confidence);
        }
        if self.realign_threshold_blocks == 0 {
            return invalid("realign_threshold_blocks must be at least 1, got", 0.0);
        }
        Ok(())
    }

    /// Drift (in frames) beyond which the dispatcher re-aligns
    pub fn realign_threshold_frames(&self, block_frames: usize) -> i64 {
        self.realign_threshold_blocks as i64 * block_frames as i64
    }
}

/// Converter quality
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResamplerQuality {
    /// Polynomial interpolation, lowest CPU
    Fast,
    /// Windowed-sinc interpolation
    #[default]
    Sinc,
}

/// Resampler settings for the per-stream fixed-ratio converters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResamplerConfig {
    pub quality: ResamplerQuality,

    /// Sinc filter length (taps), used with `Sinc` quality
    /// Default: 128
    pub sinc_len: usize,

    /// Sinc table oversampling factor
    /// Default: 256
    pub oversampling_factor: usize,

    /// Normalized cutoff frequency of the anti-aliasing filter
    /// Default: 0.95
    pub f_cutoff: f32,
}

impl Default for ResamplerConfig {
    fn default() -> Self {
        Self {
            quality: ResamplerQuality::Sinc,
            sinc_len: 128,
            oversampling_factor: 256,
            f_cutoff: 0.95,
        }
    }
}

/// Top-level bridge configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub drift: DriftConfig,
    pub resampler: ResamplerConfig,

    /// Delay applied to newly added receivers (frames at the stream rate)
    /// Default: 0
    pub default_delay_frames: u32,

    /// Capacity of the audio-to-control status event ring
    /// Default: 256
    pub status_queue_capacity: usize,

    /// Minimum number of blocks between two status events of the same kind
    /// Default: 500 (about five seconds at 48kHz / 480 frames)
    pub status_interval_blocks: u32,

    /// Upper bound on control-side waits for the audio thread
    /// Default: 500ms
    pub sync_timeout_ms: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            drift: DriftConfig::default(),
            resampler: ResamplerConfig::default(),
            default_delay_frames: 0,
            status_queue_capacity: 256,
            status_interval_blocks: 500,
            sync_timeout_ms: 500,
        }
    }
}

impl BridgeConfig {
    pub fn sync_timeout(&self) -> Duration {
        Duration::from_millis(self.sync_timeout_ms)
    }

    /// Check a loaded config before any bridge runs with it
    pub fn validate(&self) -> BridgeResult<()> {
        self.drift.validate()
    }
}
