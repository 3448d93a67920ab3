//! GPU-related constants

use std::time::Duration;

/// PCI vendor ID for AMD GPUs
pub const AMD_VENDOR_ID: &str = "0x1002";

/// Path to DRM (Direct Rendering Manager) devices
pub const DRM_PATH: &str = "/sys/class/drm";

/// Overdrive clock table, read for limits and written with `s`/`c` commands
pub const OD_CLK_FILE: &str = "pp_od_clk_voltage";

/// Forced performance level (`auto`, `manual`, ...)
pub const PERF_LEVEL_FILE: &str = "power_dpm_force_performance_level";

/// Instantaneous GPU busy percentage exposed by amdgpu
pub const GPU_BUSY_FILE: &str = "gpu_busy_percent";

/// Performance level values
pub mod level {
    pub const AUTO: &str = "auto";
    pub const MANUAL: &str = "manual";
}

/// OD table commands
pub mod od {
    /// Commit the pending table
    pub const COMMIT: &str = "c";

    /// Set SCLK level `index` to `mhz`
    #[inline]
    pub fn set_sclk(index: u8, mhz: u32) -> String {
        format!("s {} {}", index, mhz)
    }
}

/// Feedback loop defaults. These are empirical values from handheld APUs,
/// overridable through `FeedbackTuning`.
pub mod feedback {
    /// Clock step per decision
    pub const STEP_MHZ: u32 = 50;

    /// CPU busy at or above this is treated as the GPU starving the CPU
    pub const CPU_BUSY_HIGH: f32 = 80.0;

    /// GPU busy at or above this raises the clock
    pub const GPU_BUSY_HIGH: f32 = 90.0;

    /// GPU busy at or above this raises the clock by two steps
    pub const GPU_BUSY_SATURATED: f32 = 99.0;

    /// GPU busy at or below this lowers the clock
    pub const GPU_BUSY_LOW: f32 = 75.0;

    /// Sampling tick of the feedback loop
    pub const TICK_MS: u64 = 5;

    /// Ticks between decisions (40 x 5 ms = 0.2 s)
    pub const DECISION_TICKS: u32 = 40;
}

/// Quiet period after the last change event before the watcher reconciles
pub const WATCH_DEBOUNCE: Duration = Duration::from_millis(500);
