//! Fan control
//!
//! - `table/` - vendor device table (JSON)
//! - `descriptor/` - resolved per-fan backends
//! - `engine/` - resolution and per-fan operations
//! - `calibration/` - RPM limit self-calibration

mod calibration;
mod descriptor;
mod engine;
mod sysfs;
mod table;

pub use calibration::CalibrationTuning;
pub use descriptor::{Backend, CurvePoint, FanDescriptor, FanInfo, HwmonMode};
pub use engine::{FanEngine, TempInputs};
pub use sysfs::read_temperature;
pub use table::{
    CurvePointSpec, CurveSpec, DeviceTable, EcBackendSpec, EcDeviceSpec, EcFanSpec, FanLimits,
    HwmonDeviceSpec, HwmonFanSpec, TempSource,
};
