//! Configuration for the clock-domain bridges
//!
//! This module provides:
//!
//! - Generic YAML config loading/saving
//! - Standard config file locations
//! - Bridge tuning: drift filter, re-alignment, resampler quality, status
//!   reporting
//!
//! # Usage
//!
//! ```ignore
//! use tandem_core::config::{load_config, save_config, default_config_path, BridgeConfig};
//!
//! let path = default_config_path("bridge.yaml");
//! let config: BridgeConfig = load_config(&path);
//! save_config(&config, &path)?;
//! ```

mod bridge;
mod io;
mod paths;

pub use bridge::{BridgeConfig, DriftConfig, ResamplerConfig, ResamplerQuality};
pub use io::{load_config, save_config};
pub use paths::{default_config_dir, default_config_path};
