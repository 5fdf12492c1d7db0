use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Environment variable naming an alternative config file.
pub const CONFIG_ENV: &str = "HYPERSPEC_CONFIG";
/// Config file looked up in the working directory.
pub const CONFIG_FILE: &str = "hyperspec.json";

// ---------------------------------------------------------------------------
// Application configuration
// ---------------------------------------------------------------------------

/// Everything the operator may want to change without rebuilding.
/// Every field has a default, so a partial file is fine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub capture: CaptureDefaults,
    pub power: PowerDefaults,
    pub devices: DeviceConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureDefaults {
    pub min_wavelength: u32,
    pub max_wavelength: u32,
    pub exposure_s: f64,
    pub poll_timeout_ms: u64,
    /// Added to the exposure time before every filter step.
    pub settle_margin_ms: u64,
    pub output_dir: PathBuf,
    pub file_name: String,
    pub calibration_file: Option<PathBuf>,
}

impl Default for CaptureDefaults {
    fn default() -> Self {
        Self {
            min_wavelength: 550,
            max_wavelength: 570,
            exposure_s: 5.0,
            poll_timeout_ms: 20_000,
            settle_margin_ms: 300,
            output_dir: PathBuf::from("."),
            file_name: "capture".to_string(),
            calibration_file: None,
        }
    }
}

impl CaptureDefaults {
    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    pub fn settle_margin(&self) -> Duration {
        Duration::from_millis(self.settle_margin_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PowerDefaults {
    /// Readings averaged per wavelength.
    pub samples: usize,
    pub settle_ms: u64,
    pub folder: PathBuf,
    pub file_name: String,
}

impl Default for PowerDefaults {
    fn default() -> Self {
        Self {
            samples: 100,
            settle_ms: 100,
            folder: PathBuf::from("PowerCalibrationFiles"),
            file_name: "Calib.csv".to_string(),
        }
    }
}

/// Which device backend opens the filter, camera and power meter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DeviceBackend {
    #[default]
    Simulated,
    None,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    pub backend: DeviceBackend,
    pub frame_width: usize,
    pub frame_height: usize,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            backend: DeviceBackend::Simulated,
            frame_width: 320,
            frame_height: 240,
        }
    }
}

impl AppConfig {
    /// Path from `HYPERSPEC_CONFIG`, else `hyperspec.json`.
    pub fn default_path() -> PathBuf {
        std::env::var_os(CONFIG_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(CONFIG_FILE))
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        serde_json::from_str(&text).with_context(|| format!("parsing config {}", path.display()))
    }

    /// Load the config, falling back to defaults when the file is absent or
    /// malformed.  Problems are logged, never fatal.
    pub fn load_or_default(path: &Path) -> Self {
        if !path.exists() {
            log::debug!("no config at {}, using defaults", path.display());
            return Self::default();
        }
        match Self::from_file(path) {
            Ok(config) => {
                log::info!("loaded config from {}", path.display());
                config
            }
            Err(e) => {
                log::warn!("ignoring config: {e:#}");
                Self::default()
            }
        }
    }
}
