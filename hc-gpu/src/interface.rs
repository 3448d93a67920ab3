//! Seams between the controller and the outside world

use std::path::PathBuf;

use crate::Result;

/// Access to a GPU's clock control files.
///
/// Writes are issued one command per call, in the order the driver expects.
pub trait GpuClockInterface: Send + Sync {
    /// Raw overdrive table text
    fn read_od_table(&self) -> Result<String>;

    /// Current forced performance level, trimmed
    fn read_performance_level(&self) -> Result<String>;

    fn write_performance_level(&self, level: &str) -> Result<()>;

    /// Write one overdrive command (`s 0 <mhz>`, `s 1 <mhz>`, `c`)
    fn write_od_command(&self, command: &str) -> Result<()>;

    /// Files whose external modification should trigger reconciliation
    fn watch_paths(&self) -> Vec<PathBuf>;
}

/// Smoothed CPU and GPU utilization consumed by the feedback loop
pub trait Utilization: Send + Sync {
    fn set_cpu_sampling(&self, enabled: bool);

    fn set_gpu_sampling(&self, enabled: bool);

    /// CPU busy percentage over the sampling window
    fn cpu_busy(&self) -> f32;

    /// GPU busy percentage over the sampling window
    fn gpu_busy(&self) -> f32;

    /// False once GPU readings have failed persistently
    fn has_gpu_data(&self) -> bool;
}
