//! Self-calibration of vendor RPM limits
//!
//! Vendor tables often understate the fan's real top speed, which skews the
//! percentage readings derived from it. While the CPU runs hot the fan is
//! near full duty, so a plausible reading above the stored maximum replaces it.

use serde::{Deserialize, Serialize};

use crate::constants::calibration;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationTuning {
    /// Required relative gain over the current maximum
    pub min_gain_ratio: f32,
    /// Readings at or above `current * max_growth_factor` are rejected
    pub max_growth_factor: f32,
    /// CPU temperature that must be exceeded, °C
    pub min_cpu_temp_c: f32,
}

impl Default for CalibrationTuning {
    fn default() -> Self {
        Self {
            min_gain_ratio: calibration::MIN_GAIN_RATIO,
            max_growth_factor: calibration::MAX_GROWTH_FACTOR,
            min_cpu_temp_c: calibration::MIN_CPU_TEMP_C,
        }
    }
}

impl CalibrationTuning {
    /// Whether `observed` should replace `current` as the fan's maximum
    pub fn accepts(&self, observed: u32, current: u32, cpu_temp: f32) -> bool {
        if current == 0 || observed <= current {
            return false;
        }
        let observed = observed as f32;
        let current = current as f32;
        (observed - current) / current > self.min_gain_ratio
            && observed < current * self.max_growth_factor
            && cpu_temp > self.min_cpu_temp_c
    }
}
