//! Platform configuration
//!
//! Loaded once at device-open from a TOML file (or defaulted), then treated
//! as read-only. Carries the feature toggles consumed by the device
//! selector, the speaker-calibration settings, and sound-device table
//! overrides.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::info;

use super::device::{SoundDevice, SoundDeviceTable};

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Errors that can occur during configuration loading
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("Unknown sound device in override: {0}")]
    UnknownDevice(String),
}

/// TTY accessibility mode for voice calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TtyMode {
    #[default]
    Off,
    Full,
    Vco,
    Hco,
}

/// Multi-mic noise-cancellation (fluence) configuration.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FluenceConfig {
    pub in_voice_call: bool,
    pub in_voice_rec: bool,
    pub in_voice_comm: bool,
    pub in_speaker_mode: bool,
    pub dual_mic: bool,
}

/// Boolean feature toggles read by the device selector.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureFlags {
    pub anc_enabled: bool,
    pub fluence: FluenceConfig,
    pub bt_wb_speech: bool,
    pub bt_nrec: bool,
    pub speaker_lr_swap: bool,
    pub rec_play_concurrency: bool,
}

/// Speaker-protection calibration settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    /// Master switch; disabled platforms never run calibration
    pub enabled: bool,
    /// Minimum seconds the speaker must have been idle before calibrating
    pub min_speaker_idle_secs: u64,
    /// Delay between issuing the start command and the first status poll
    pub start_delay_ms: u64,
    /// Wait between status polls
    pub poll_interval_ms: u64,
    /// Polls before the attempt is abandoned as retryable
    pub max_polls: u32,
    /// Calibration file location; `None` disables persistence
    pub file_path: Option<PathBuf>,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_speaker_idle_secs: 30,
            start_delay_ms: 3000,
            poll_interval_ms: 200,
            max_polls: 25,
            file_path: None,
        }
    }
}

impl CalibrationConfig {
    pub fn min_speaker_idle(&self) -> Duration {
        Duration::from_secs(self.min_speaker_idle_secs)
    }

    pub fn start_delay(&self) -> Duration {
        Duration::from_millis(self.start_delay_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// One sound-device table patch from configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceOverrideConfig {
    /// Route name of the device being patched
    pub device: String,
    pub acdb_id: Option<u32>,
    pub backend: Option<String>,
    pub bit_width: Option<u16>,
}

/// Top-level platform configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PlatformConfig {
    /// Platform uses an external codec topology
    pub external_codec: bool,
    pub features: FeatureFlags,
    pub speaker_calibration: CalibrationConfig,
    pub device_overrides: Vec<DeviceOverrideConfig>,
}

impl PlatformConfig {
    /// Load from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config: PlatformConfig = toml::from_str(&raw)?;
        info!("loaded platform config from {}", path.display());
        Ok(config)
    }

    /// Build the sound-device table with this configuration's overrides
    /// applied. Called once at platform init.
    pub fn build_device_table(&self) -> Result<SoundDeviceTable> {
        let mut table = SoundDeviceTable::new();
        for ov in &self.device_overrides {
            let device = SoundDevice::from_route(&ov.device)
                .ok_or_else(|| ConfigError::UnknownDevice(ov.device.clone()))?;
            if let Some(id) = ov.acdb_id {
                table.set_acdb_id(device, id).expect("not the sentinel");
            }
            if let Some(backend) = &ov.backend {
                table.set_backend(device, backend).expect("not the sentinel");
            }
            if let Some(bits) = ov.bit_width {
                table.set_bit_width(device, bits).expect("not the sentinel");
            }
        }
        Ok(table)
    }
}
