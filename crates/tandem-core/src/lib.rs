//! Tandem Core - clock-domain bridge between a PTP network clock and a local audio device

pub mod audio;
pub mod bridge;
pub mod clock;
pub mod config;
pub mod diagnostics;
pub mod dispatch;
pub mod drift;
pub mod engine;
pub mod error;
pub mod events;
pub mod format;
pub mod resample;
pub mod rt;
pub mod stream;
pub mod timestamp;
pub mod types;

#[cfg(test)]
mod testing;

pub use error::{BridgeError, BridgeResult};
pub use types::*;
