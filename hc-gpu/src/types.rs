//! GPU clock data types

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::constants::feedback;

/// A GPU shader clock window in MHz.
///
/// `(0, 0)` is the sentinel for "no override": the driver is handed back to
/// firmware-automatic clocking.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
pub struct FreqWindow {
    pub min: u32,
    pub max: u32,
}

impl FreqWindow {
    /// Hardware-automatic sentinel
    pub const AUTO: FreqWindow = FreqWindow { min: 0, max: 0 };

    pub const fn new(min: u32, max: u32) -> Self {
        Self { min, max }
    }

    /// Single-frequency window
    pub const fn fixed(mhz: u32) -> Self {
        Self { min: mhz, max: mhz }
    }

    pub fn is_auto(&self) -> bool {
        *self == Self::AUTO
    }

    pub fn is_ordered(&self) -> bool {
        self.min <= self.max
    }

    /// True if `other` lies entirely inside this window
    pub fn contains(&self, other: FreqWindow) -> bool {
        other.is_ordered() && other.min >= self.min && other.max <= self.max
    }

    /// Clamp a single frequency into this window
    pub fn clamp_value(&self, mhz: u32) -> u32 {
        mhz.clamp(self.min, self.max.max(self.min))
    }

    /// Clamp both ends of `self` into `bounds`, keeping `min <= max`
    pub fn clamp_into(self, bounds: FreqWindow) -> FreqWindow {
        let min = bounds.clamp_value(self.min);
        let max = bounds.clamp_value(self.max).max(min);
        FreqWindow { min, max }
    }
}

impl fmt::Display for FreqWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_auto() {
            write!(f, "auto")
        } else {
            write!(f, "{}-{} MHz", self.min, self.max)
        }
    }
}

/// Active control mode of the GPU controller
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum GpuMode {
    /// One frequency pinned as both min and max
    Fixed(u32),
    /// Explicit min/max window (includes the `(0,0)` sentinel)
    Range,
    /// Utilization-driven feedback loop
    Auto,
}

/// Tunables for the feedback loop. Defaults are empirical.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct FeedbackTuning {
    pub step_mhz: u32,
    pub cpu_busy_high: f32,
    pub gpu_busy_high: f32,
    pub gpu_busy_saturated: f32,
    pub gpu_busy_low: f32,
    pub tick_ms: u64,
    pub decision_ticks: u32,
}

impl Default for FeedbackTuning {
    fn default() -> Self {
        Self {
            step_mhz: feedback::STEP_MHZ,
            cpu_busy_high: feedback::CPU_BUSY_HIGH,
            gpu_busy_high: feedback::GPU_BUSY_HIGH,
            gpu_busy_saturated: feedback::GPU_BUSY_SATURATED,
            gpu_busy_low: feedback::GPU_BUSY_LOW,
            tick_ms: feedback::TICK_MS,
            decision_ticks: feedback::DECISION_TICKS,
        }
    }
}
