//! Generic YAML configuration I/O

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;

/// Load configuration from a YAML file
///
/// A missing file yields the default config. A file that cannot be read or
/// parsed logs a warning and also yields the default config, so a broken
/// file never keeps the bridges from starting.
pub fn load_config<T>(path: &Path) -> T
where
    T: DeserializeOwned + Default,
{
    if !path.exists() {
        log::info!("load_config: {:?} doesn't exist, using defaults", path);
        return T::default();
    }

    match std::fs::read_to_string(path) {
        Ok(contents) => match serde_yaml::from_str::<T>(&contents) {
            Ok(config) => {
                log::info!("load_config: Loaded {:?}", path);
                config
            }
            Err(e) => {
                log::warn!("load_config: Failed to parse {:?}: {}, using defaults", path, e);
                T::default()
            }
        },
        Err(e) => {
            log::warn!("load_config: Failed to read {:?}: {}, using defaults", path, e);
            T::default()
        }
    }
}

/// Save configuration to a YAML file, creating parent directories as needed
pub fn save_config<T>(config: &T, path: &Path) -> Result<()>
where
    T: Serialize,
{
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
    }

    let yaml = serde_yaml::to_string(config).context("Failed to serialize config to YAML")?;
    std::fs::write(path, yaml).with_context(|| format!("Failed to write config file: {:?}", path))?;

    log::info!("save_config: Saved {:?}", path);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BridgeConfig, ResamplerQuality};

    #[test]
    fn test_load_nonexistent_returns_default() {
        let config: BridgeConfig = load_config(Path::new("/nonexistent/tandem/bridge.yaml"));
        assert_eq!(config, BridgeConfig::default());
    }

    #[test]
    fn test_bridge_config_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("bridge.yaml");

        let mut config = BridgeConfig::default();
        config.default_delay_frames = 96;
        config.drift.realign_threshold_blocks = 4;
        config.resampler.quality = ResamplerQuality::Fast;

        save_config(&config, &path).unwrap();
        let loaded: BridgeConfig = load_config(&path);
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_invalid_yaml_falls_back_to_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bridge.yaml");
        std::fs::write(&path, "drift: [this is not a map").unwrap();

        let loaded: BridgeConfig = load_config(&path);
        assert_eq!(loaded, BridgeConfig::default());
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bridge.yaml");
        std::fs::write(&path, "default_delay_frames: 48\ndrift:\n  max_correction: 0.001\n").unwrap();

        let loaded: BridgeConfig = load_config(&path);
        assert_eq!(loaded.default_delay_frames, 48);
        assert_eq!(loaded.drift.max_correction, 0.001);
        assert_eq!(loaded.drift.realign_threshold_blocks, 2);
        assert_eq!(loaded.status_interval_blocks, BridgeConfig::default().status_interval_blocks);
    }
}
