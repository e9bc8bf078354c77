//! Persisted device settings.
//!
//! The operator-facing settings (bias voltage, gain, offset, channel, signal
//! type) survive restarts in a JSON file under the platform config
//! directory, so a session can be restored onto the hardware in one call.

use std::path::{Path, PathBuf};

use log::info;
use serde::{Deserialize, Serialize};

use crate::device::ArgusBoard;
use crate::error::{DetectorError, Result};
use crate::protocol::commands::Channel;

const APP_NAME: &str = "argus";
const CONFIG_FILE: &str = "config.json";

/// Get the configuration directory path.
/// - Linux: ~/.config/argus/
/// - Windows: %APPDATA%\argus\
pub fn config_dir() -> Result<PathBuf> {
    dirs::config_dir()
        .map(|p| p.join(APP_NAME))
        .ok_or_else(|| DetectorError::InvalidArgument("no config directory on this platform".into()))
}

/// Get the full path to the config file.
pub fn config_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE))
}

/// Saved operator settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeviceConfig {
    #[serde(default)]
    pub voltage: f64,
    #[serde(default = "default_gain")]
    pub gain: f64,
    #[serde(default)]
    pub offset: f64,
    #[serde(default = "default_channel")]
    pub channel: String,
    #[serde(default = "default_single_ended")]
    pub single_ended: bool,
}

fn default_gain() -> f64 {
    50.0
}

fn default_channel() -> String {
    "red".to_string()
}

fn default_single_ended() -> bool {
    true
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            voltage: 0.0,
            gain: default_gain(),
            offset: 0.0,
            channel: default_channel(),
            single_ended: default_single_ended(),
        }
    }
}

impl DeviceConfig {
    /// Load from an explicit path; missing file yields the defaults.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content)
            .map_err(|e| DetectorError::InvalidArgument(format!("failed to parse config: {e}")))
    }

    /// Load from the default location.
    pub fn load() -> Result<Self> {
        Self::load_from(&config_path()?)
    }

    /// Save to an explicit path, creating parent directories.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| DetectorError::InvalidArgument(format!("failed to serialize config: {e}")))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Save to the default location.
    pub fn save(&self) -> Result<()> {
        self.save_to(&config_path()?)
    }

    /// Read the current device settings into a config.
    pub fn capture(board: &ArgusBoard) -> Result<Self> {
        Ok(Self {
            voltage: board.get_voltage()?,
            gain: board.get_gain()?,
            offset: board.get_offset()?,
            channel: board.get_channel()?.to_string().to_lowercase(),
            single_ended: true,
        })
    }

    /// Push these settings onto the device.
    pub fn apply(&self, board: &ArgusBoard) -> Result<()> {
        info!(
            "applying saved settings: {:.2} V, gain {:.1}, offset {:.1}, channel {}",
            self.voltage, self.gain, self.offset, self.channel
        );
        board.set_signal_type(self.single_ended)?;
        board.set_channel(Channel::from_name(&self.channel)?)?;
        board.set_gain(self.gain)?;
        board.set_offset(self.offset)?;
        board.set_voltage(self.voltage)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::ArgusSimulator;

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = DeviceConfig::load_from(&dir.path().join("absent.json")).unwrap();
        assert_eq!(config, DeviceConfig::default());
    }

    #[test]
    fn test_save_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sub").join("config.json");
        let config = DeviceConfig {
            voltage: 30.5,
            gain: 80.0,
            offset: 12.5,
            channel: "green".into(),
            single_ended: false,
        };
        config.save_to(&path).unwrap();
        assert_eq!(DeviceConfig::load_from(&path).unwrap(), config);
    }

    #[test]
    fn test_apply_and_capture() {
        let board = ArgusBoard::with_simulator(ArgusSimulator::noiseless()).unwrap();
        let config = DeviceConfig {
            voltage: 20.0,
            gain: 75.0,
            offset: 10.0,
            channel: "green".into(),
            single_ended: true,
        };
        config.apply(&board).unwrap();

        let captured = DeviceConfig::capture(&board).unwrap();
        assert!((captured.voltage - 20.0).abs() < 1e-6);
        assert!((captured.gain - 75.0).abs() < 1e-4);
        assert_eq!(captured.channel, "green");
    }
}
