//! handheld-control core library
//!
//! Hardware control for handheld gaming PCs.
//!
//! # Module Structure
//!
//! - `ec/` - embedded controller port protocol (direct registers and indirect RAM)
//! - `fan/` - device table, fan resolution and per-fan control
//! - `telemetry` - CPU/GPU utilization sampler feeding the GPU controller
//! - `settings` - persistent key-value store for calibrated limits
//! - `system` - DMI identity and hwmon chip discovery
//! - `config` - daemon configuration
//!
//! GPU clock control lives in `hc-gpu` and is re-exported as [`gpu`].
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//! use std::sync::Arc;
//! use hc_core::{discover_hwmon_chips, CalibrationTuning, DeviceTable, FanEngine, MemorySettings, ProductInfo};
//!
//! let table = DeviceTable::builtin().unwrap();
//! let chips = discover_hwmon_chips(Path::new("/sys/class/hwmon"));
//! let fans = FanEngine::resolve(
//!     &table,
//!     &chips,
//!     &ProductInfo::detect(),
//!     None,
//!     Arc::new(MemorySettings::new()),
//!     CalibrationTuning::default(),
//! );
//! fans.set_fan_percent(0, 60.0);
//! ```

pub mod config;
pub mod constants;
pub mod ec;
pub mod fan;
pub mod settings;
pub mod system;
pub mod telemetry;

pub use hc_gpu as gpu;

pub use config::{DaemonConfig, TelemetryConfig};
pub use ec::{DevPort, EcChannel, EcTiming, PortIo};
pub use fan::{CalibrationTuning, DeviceTable, FanEngine, FanInfo};
pub use settings::{JsonSettings, MemorySettings, SettingsStore};
pub use system::{discover_hwmon_chips, HwmonChipMap, ProductInfo};
pub use telemetry::{TelemetrySampler, TelemetrySources};

pub use hc_error::{HcError, Result};
