//! Daemon configuration
//!
//! Read from `/etc/handheld-control/config.json`. Every field has a default,
//! so an absent file or a partial one is fine.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::constants::{daemon, paths, telemetry};
use crate::ec::EcTiming;
use crate::fan::CalibrationTuning;
use crate::Result;
use hc_error::HcError;
use hc_gpu::FeedbackTuning;

/// Sampler timing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub tick_ms: u64,
    pub window: usize,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self { tick_ms: telemetry::TICK_MS, window: telemetry::WINDOW }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Extra device table merged ahead of the built-in one
    pub device_table: Option<PathBuf>,
    /// Settings file; defaults to [`paths::default_settings_path`]
    pub settings_path: Option<PathBuf>,
    pub telemetry: TelemetryConfig,
    pub gpu: FeedbackTuning,
    /// Watch the GPU clock files and undo external changes
    pub gpu_watcher: bool,
    pub calibration: CalibrationTuning,
    pub ec: EcTiming,
    pub fan_poll_interval_ms: u64,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            device_table: None,
            settings_path: None,
            telemetry: TelemetryConfig::default(),
            gpu: FeedbackTuning::default(),
            gpu_watcher: true,
            calibration: CalibrationTuning::default(),
            ec: EcTiming::default(),
            fan_poll_interval_ms: daemon::FAN_POLL_INTERVAL_MS,
        }
    }
}

impl DaemonConfig {
    /// Load `path`, falling back to defaults when it does not exist
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!(path = %path.display(), "No config file, using defaults");
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path).map_err(|e| HcError::transient(path, e))?;
        let config: Self = serde_json::from_str(&content)
            .map_err(|e| HcError::config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        info!(path = %path.display(), "Loaded configuration");
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.telemetry.window < 2 {
            return Err(HcError::invalid("telemetry window", self.telemetry.window));
        }
        if self.telemetry.tick_ms == 0 {
            return Err(HcError::invalid("telemetry tick", self.telemetry.tick_ms));
        }
        if self.gpu.gpu_busy_low >= self.gpu.gpu_busy_high {
            return Err(HcError::config("gpu_busy_low must be below gpu_busy_high"));
        }
        Ok(())
    }

    pub fn settings_path(&self) -> PathBuf {
        self.settings_path.clone().unwrap_or_else(paths::default_settings_path)
    }
}
