//! Path utilities for Tandem configuration files

use std::path::PathBuf;

/// Directory holding Tandem's configuration files
///
/// Returns: `<config_dir>/tandem` (e.g. `~/.config/tandem` on Linux), or
/// `./tandem` when the platform has no config directory.
pub fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("tandem")
}

/// Get the default path for a config file
///
/// # Arguments
/// * `filename` - Config file name (e.g., "bridge.yaml", "host.yaml")
pub fn default_config_path(filename: &str) -> PathBuf {
    default_config_dir().join(filename)
}
