//! Adaptive deadband filter for drift correction ratios
//!
//! The raw ratio measured once per block is noisy: packet jitter and callback
//! scheduling jitter show up as isolated spikes. Feeding those straight into
//! the resampler would be heard as pitch stepping. The filter clamps anything
//! outside a confidence band around the target and widens the band
//! geometrically for as long as the measurement keeps landing outside it, so
//! sustained drift still gets through. Inside the band the value passes
//! unchanged and the band narrows back toward a small floor.

use crate::config::DriftConfig;

/// Smallest confidence band the filter narrows down to
pub const MIN_CONFIDENCE: f64 = 0.000_000_001;

/// Default starting confidence band (100 ppm)
pub const DEFAULT_CONFIDENCE: f64 = 0.0001;

/// Default geometric step for widening and narrowing the band
pub const DEFAULT_STEP_FACTOR: f64 = 1.00001;

#[derive(Debug, Clone, PartialEq)]
pub struct DriftFilter {
    target: f64,
    confidence: f64,
    confidence_step_factor: f64,
    min_confidence: f64,
    initial_confidence: f64,
}

impl DriftFilter {
    /// Create a filter around `target` with explicit band parameters
    pub fn new(target: f64, confidence: f64, confidence_step_factor: f64, min_confidence: f64) -> Self {
        debug_assert!(
            confidence_step_factor > 1.0,
            "Confidence step factor must be greater than one"
        );
        let min_confidence = min_confidence.max(f64::MIN_POSITIVE);
        let confidence = confidence.max(min_confidence);
        Self {
            target,
            confidence,
            confidence_step_factor,
            min_confidence,
            initial_confidence: confidence,
        }
    }

    /// Create a filter around 1.0 from configuration
    pub fn from_config(config: &DriftConfig) -> Self {
        Self::new(
            1.0,
            config.initial_confidence,
            config.confidence_step_factor,
            config.min_confidence,
        )
    }

    /// Filter one raw ratio sample and return the damped ratio
    pub fn update(&mut self, value: f64) -> f64 {
        if value > self.target + self.confidence {
            let clamped = self.target + self.confidence;
            self.confidence *= self.confidence_step_factor;
            clamped
        } else if value < self.target - self.confidence {
            let clamped = self.target - self.confidence;
            self.confidence *= self.confidence_step_factor;
            clamped
        } else {
            self.confidence = (self.confidence / self.confidence_step_factor).max(self.min_confidence);
            value
        }
    }

    /// Restore the starting band (used after a re-alignment)
    pub fn reset(&mut self) {
        self.confidence = self.initial_confidence;
    }

    pub fn target(&self) -> f64 {
        self.target
    }

    /// Current half-width of the acceptance band
    pub fn confidence(&self) -> f64 {
        self.confidence
    }

    pub fn confidence_step_factor(&self) -> f64 {
        self.confidence_step_factor
    }
}

impl Default for DriftFilter {
    fn default() -> Self {
        Self::new(1.0, DEFAULT_CONFIDENCE, DEFAULT_STEP_FACTOR, MIN_CONFIDENCE)
    }
}
