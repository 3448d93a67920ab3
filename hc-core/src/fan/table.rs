//! Vendor device table
//!
//! Which fans exist on which device, and how to reach them. A built-in table
//! ships with the crate; an override file can add entries that take
//! precedence over it.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::{debug, info};

use crate::system::ProductInfo;
use crate::Result;
use hc_error::HcError;

const BUILTIN_TABLE: &str = include_str!("../../data/devices.json");

/// Where a fan's temperature comes from
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TempSource {
    #[default]
    Cpu,
    Gpu,
}

fn default_manual_value() -> u32 {
    1
}

fn default_pwm_write_max() -> u32 {
    255
}

/// Values shared by every fan entry regardless of backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FanLimits {
    #[serde(default)]
    pub auto_value: u32,
    #[serde(default = "default_manual_value")]
    pub manual_value: u32,
    #[serde(default = "default_pwm_write_max")]
    pub pwm_write_max: u32,
    /// Vendor RPM at full duty; raised by calibration
    #[serde(default)]
    pub rpm_value_max: u32,
    #[serde(default)]
    pub temp_source: TempSource,
    /// Product names on which this fan must not be driven
    #[serde(default)]
    pub blacklist: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurvePointSpec {
    pub temp_path: String,
    pub pwm_path: String,
}

/// Firmware fan curve driven as a flat line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurveSpec {
    pub points: Vec<CurvePointSpec>,
    /// Temperature of the last point, in the units the driver expects
    pub temp_max: u32,
}

/// Fan reached through hwmon files, relative to the chip directory
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HwmonFanSpec {
    pub name: String,
    #[serde(default)]
    pub enable_path: Option<String>,
    #[serde(default)]
    pub enable_path_fallback: Option<String>,
    #[serde(default)]
    pub pwm_path: Option<String>,
    #[serde(default)]
    pub input_path: Option<String>,
    #[serde(default)]
    pub curve: Option<CurveSpec>,
    #[serde(flatten)]
    pub limits: FanLimits,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HwmonDeviceSpec {
    pub hwmon_name: String,
    pub fans: Vec<HwmonFanSpec>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EcBackendSpec {
    /// Direct EC registers
    EcIo {
        manual_offset: Option<u8>,
        write_offset: Option<u8>,
        read_offset: Option<u8>,
    },
    /// EC RAM behind an index/data port pair
    EcRam {
        reg_addr: u16,
        reg_data: u16,
        manual_offset: Option<u16>,
        write_offset: Option<u16>,
        read_offset: Option<u16>,
        /// Bytes of RPM at `read_offset`; 0 means the byte holds a duty value
        #[serde(default)]
        read_length: u8,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EcFanSpec {
    pub name: String,
    pub backend: EcBackendSpec,
    #[serde(flatten)]
    pub limits: FanLimits,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EcDeviceSpec {
    pub product_names: Vec<String>,
    /// Empty means any version
    #[serde(default)]
    pub product_versions: Vec<String>,
    pub fans: Vec<EcFanSpec>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceTable {
    #[serde(default)]
    pub hwmon: Vec<HwmonDeviceSpec>,
    #[serde(default)]
    pub ec: Vec<EcDeviceSpec>,
}

impl DeviceTable {
    pub fn builtin() -> Result<Self> {
        Self::from_json(BUILTIN_TABLE)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|e| HcError::transient(path, e))?;
        Self::from_json(&text).map_err(|e| HcError::config(format!("{}: {}", path.display(), e)))
    }

    /// Built-in table, with entries from `override_path` searched first
    pub fn load(override_path: Option<&Path>) -> Result<Self> {
        let builtin = Self::builtin()?;
        match override_path {
            Some(path) if path.exists() => {
                let extra = Self::from_file(path)?;
                info!(
                    path = %path.display(),
                    hwmon = extra.hwmon.len(),
                    ec = extra.ec.len(),
                    "Loaded device table override"
                );
                Ok(extra.then(builtin))
            }
            Some(path) => {
                debug!(path = %path.display(), "Device table override not present");
                Ok(builtin)
            }
            None => Ok(builtin),
        }
    }

    fn then(mut self, fallback: DeviceTable) -> DeviceTable {
        self.hwmon.extend(fallback.hwmon);
        self.ec.extend(fallback.ec);
        self
    }

    /// EC entry for this product: an entry listing the running version wins
    /// over a version-agnostic one
    pub fn ec_device_for(&self, product: &ProductInfo) -> Option<&EcDeviceSpec> {
        let mut agnostic = None;
        for device in self.ec.iter().filter(|d| d.product_names.contains(&product.name)) {
            if device.product_versions.contains(&product.version) {
                return Some(device);
            }
            if device.product_versions.is_empty() && agnostic.is_none() {
                agnostic = Some(device);
            }
        }
        agnostic
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_builtin_parses() {
        let table = DeviceTable::builtin().unwrap();
        assert!(!table.hwmon.is_empty());
        assert!(!table.ec.is_empty());

        let asus = table.hwmon.iter().find(|d| d.hwmon_name == "asus_custom_fan_curve").unwrap();
        let curve = asus.fans[0].curve.as_ref().unwrap();
        assert_eq!(curve.points.len(), 8);
        assert_eq!(asus.fans[1].limits.temp_source, TempSource::Gpu);
    }

    #[test]
    fn test_defaults_for_limits() {
        let table = DeviceTable::from_json(
            r#"{"hwmon": [{"hwmon_name": "x", "fans": [{"name": "f", "pwm_path": "pwm1"}]}]}"#,
        )
        .unwrap();
        let limits = &table.hwmon[0].fans[0].limits;
        assert_eq!(limits.auto_value, 0);
        assert_eq!(limits.manual_value, 1);
        assert_eq!(limits.pwm_write_max, 255);
        assert_eq!(limits.temp_source, TempSource::Cpu);
        assert!(table.ec.is_empty());
    }

    #[test]
    fn test_version_specific_entry_preferred() {
        let table = DeviceTable::builtin().unwrap();

        let exact = ProductInfo::new("G1617-01", "Default string", "GPD");
        let device = table.ec_device_for(&exact).unwrap();
        assert_eq!(device.product_versions, vec!["Default string".to_string()]);

        let other = ProductInfo::new("G1617-01", "1.02", "GPD");
        let device = table.ec_device_for(&other).unwrap();
        assert!(device.product_versions.is_empty());

        assert!(table.ec_device_for(&ProductInfo::new("Unknown", "", "")).is_none());
    }

    #[test]
    fn test_override_searched_first() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("devices.json");
        fs::write(
            &path,
            r#"{"ec": [{"product_names": ["AIR"], "fans": [{"name": "patched",
                "backend": {"type": "ec_io", "write_offset": 1}}]}]}"#,
        )
        .unwrap();

        let table = DeviceTable::load(Some(&path)).unwrap();
        let device = table.ec_device_for(&ProductInfo::new("AIR", "", "AYANEO")).unwrap();
        assert_eq!(device.fans[0].name, "patched");
        assert!(table.hwmon.len() >= 3);
    }

    #[test]
    fn test_missing_override_uses_builtin() {
        let table = DeviceTable::load(Some(Path::new("/nonexistent/devices.json"))).unwrap();
        assert_eq!(table, DeviceTable::builtin().unwrap());
    }

    #[test]
    fn test_bad_override_is_config_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("devices.json");
        fs::write(&path, r#"{"ec": [{"fans": 3}]}"#).unwrap();
        assert!(matches!(DeviceTable::load(Some(&path)), Err(HcError::Configuration(_))));
    }
}
