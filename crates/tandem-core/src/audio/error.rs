//! Audio backend error types

use thiserror::Error;

use crate::error::BridgeError;

/// Errors that can occur while opening or running a device
#[derive(Error, Debug)]
pub enum AudioError {
    #[error("No audio {0} devices found")]
    NoDevices(&'static str),

    #[error("Failed to get default audio device: {0}")]
    NoDefaultDevice(String),

    #[error("Audio device not found: {0}")]
    DeviceNotFound(String),

    #[error("Failed to get device config: {0}")]
    ConfigError(String),

    #[error("Failed to build audio stream: {0}")]
    StreamBuildError(String),

    #[error("Failed to start audio stream: {0}")]
    StreamPlayError(String),

    /// The engines refused the device format
    #[error("Failed to prepare bridges for device: {0}")]
    Bridge(#[from] BridgeError),
}

/// Result type for audio operations
pub type AudioResult<T> = Result<T, AudioError>;
