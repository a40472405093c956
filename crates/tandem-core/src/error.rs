//! Control-side error types

use thiserror::Error;

use crate::format::AudioFormat;
use crate::resample::AsrcError;
use crate::rt::PublishError;
use crate::types::StreamId;

/// Errors returned to the control context
///
/// The audio thread never produces these; real-time failures are reported
/// as [`crate::diagnostics::StatusEvent`]s instead.
#[derive(Error, Debug)]
pub enum BridgeError {
    /// Format rejected; the bridge keeps its previous state
    #[error("Invalid audio format: {0}")]
    InvalidFormat(AudioFormat),

    #[error("Unknown stream: {0}")]
    UnknownStream(StreamId),

    #[error("Stream already exists: {0}")]
    DuplicateStream(StreamId),

    /// Publishing new state to the audio thread failed (retryable)
    #[error("Failed to publish state: {0}")]
    Publish(#[from] PublishError),

    #[error("Failed to create resampler: {0}")]
    Resampler(#[from] AsrcError),

    /// The audio thread did not pick up published state in time
    #[error("Timed out after {0:?} waiting for the audio thread")]
    Timeout(std::time::Duration),

    /// Configuration value outside its valid range
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// An operation needed the device format before the device was started
    #[error("Device format not known yet")]
    DeviceNotPrepared,
}

/// Result type for control-side bridge operations
pub type BridgeResult<T> = Result<T, BridgeError>;
