//! GPU clock control for handheld-control
//!
//! Drives the amdgpu shader clock window through the overdrive table:
//! - explicit fixed or ranged windows, with `(0,0)` handing control back to firmware
//! - a utilization feedback loop that moves the window's upper edge
//! - a corrective watcher that re-applies the window when something else changes it

pub mod amd;
pub mod constants;
pub mod controller;
pub mod feedback;
pub mod interface;
pub mod od;
mod types;
mod watcher;

#[cfg(test)]
mod test_support;

pub use amd::AmdGpuSysfs;
pub use constants as gpu_const;
pub use controller::{GpuController, GpuFreqState};
pub use interface::{GpuClockInterface, Utilization};
pub use od::{parse_od_table, OdTable};
pub use types::*;

use hc_error::HcError;

pub type Result<T> = std::result::Result<T, HcError>;
