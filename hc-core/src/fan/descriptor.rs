//! Resolved per-fan control descriptors

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};

use super::table::{EcBackendSpec, EcFanSpec, FanLimits, HwmonFanSpec, TempSource};
use crate::constants::fan as fan_const;
use crate::Result;
use hc_error::HcError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CurvePoint {
    pub temp_path: PathBuf,
    pub pwm_path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HwmonMode {
    Single,
    Curve { points: Vec<CurvePoint>, temp_max: u32 },
}

/// How a fan is driven
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Backend {
    Hwmon {
        enable_path: Option<PathBuf>,
        enable_path_fallback: Option<PathBuf>,
        pwm_path: PathBuf,
        input_path: Option<PathBuf>,
        mode: HwmonMode,
    },
    EcIo {
        manual_offset: Option<u8>,
        write_offset: u8,
        read_offset: Option<u8>,
    },
    EcRam {
        reg_addr: u16,
        reg_data: u16,
        manual_offset: Option<u16>,
        write_offset: u16,
        read_offset: Option<u16>,
        read_length: u8,
    },
    /// Rejected during resolution; never driven
    Unconfigured { reason: String },
}

impl Backend {
    pub fn mode_name(&self) -> &'static str {
        match self {
            Backend::Hwmon { mode: HwmonMode::Single, .. } => "hwmon",
            Backend::Hwmon { mode: HwmonMode::Curve { .. }, .. } => "hwmon_curve",
            Backend::EcIo { .. } => "ec_io",
            Backend::EcRam { .. } => "ec_ram",
            Backend::Unconfigured { .. } => "unconfigured",
        }
    }

    pub fn is_ec(&self) -> bool {
        matches!(self, Backend::EcIo { .. } | Backend::EcRam { .. })
    }

    fn hwmon(spec: &HwmonFanSpec, chip_dir: &Path) -> Result<Backend> {
        let pwm_path = spec
            .pwm_path
            .as_ref()
            .ok_or_else(|| HcError::config("missing pwm_path"))?;
        let mode = match &spec.curve {
            Some(curve) if curve.points.is_empty() => {
                return Err(HcError::config("curve has no points"));
            }
            Some(curve) => HwmonMode::Curve {
                points: curve
                    .points
                    .iter()
                    .map(|p| CurvePoint {
                        temp_path: chip_dir.join(&p.temp_path),
                        pwm_path: chip_dir.join(&p.pwm_path),
                    })
                    .collect(),
                temp_max: curve.temp_max,
            },
            None => HwmonMode::Single,
        };
        Ok(Backend::Hwmon {
            enable_path: spec.enable_path.as_ref().map(|p| chip_dir.join(p)),
            enable_path_fallback: spec.enable_path_fallback.as_ref().map(|p| chip_dir.join(p)),
            pwm_path: chip_dir.join(pwm_path),
            input_path: spec.input_path.as_ref().map(|p| chip_dir.join(p)),
            mode,
        })
    }

    fn ec(spec: &EcFanSpec) -> Result<Backend> {
        if spec.limits.pwm_write_max > fan_const::EC_PWM_LIMIT {
            return Err(HcError::config(format!(
                "pwm_write_max {} does not fit an EC register",
                spec.limits.pwm_write_max
            )));
        }
        match spec.backend {
            EcBackendSpec::EcIo { manual_offset, write_offset, read_offset } => Ok(Backend::EcIo {
                manual_offset,
                write_offset: write_offset.ok_or_else(|| HcError::config("no EC write offset"))?,
                read_offset,
            }),
            EcBackendSpec::EcRam {
                reg_addr,
                reg_data,
                manual_offset,
                write_offset,
                read_offset,
                read_length,
            } => {
                if read_length > 4 {
                    return Err(HcError::config(format!("read_length {} exceeds 4 bytes", read_length)));
                }
                Ok(Backend::EcRam {
                    reg_addr,
                    reg_data,
                    manual_offset,
                    write_offset: write_offset.ok_or_else(|| HcError::config("no EC write offset"))?,
                    read_offset,
                    read_length,
                })
            }
        }
    }
}

/// One physical fan
#[derive(Debug)]
pub struct FanDescriptor {
    pub name: String,
    /// Stable identity used for persisted settings: `<chip or "ec">.<name>`
    pub key: String,
    pub backend: Backend,
    pub auto_value: u32,
    pub manual_value: u32,
    pub pwm_write_max: u32,
    pub temp_source: TempSource,
    rpm_value_max: AtomicU32,
}

impl FanDescriptor {
    fn build(name: &str, limits: &FanLimits, backend: Result<Backend>) -> Self {
        let backend = match backend {
            Ok(_) if limits.pwm_write_max == 0 => Backend::Unconfigured {
                reason: HcError::config("pwm_write_max is 0").to_string(),
            },
            Ok(backend) => backend,
            Err(e) => Backend::Unconfigured { reason: e.to_string() },
        };
        Self {
            name: name.to_string(),
            key: name.to_string(),
            backend,
            auto_value: limits.auto_value,
            manual_value: limits.manual_value,
            pwm_write_max: limits.pwm_write_max,
            temp_source: limits.temp_source,
            rpm_value_max: AtomicU32::new(limits.rpm_value_max),
        }
    }

    pub fn from_hwmon(spec: &HwmonFanSpec, chip_dir: &Path) -> Self {
        Self::build(&spec.name, &spec.limits, Backend::hwmon(spec, chip_dir))
    }

    pub fn from_ec(spec: &EcFanSpec) -> Self {
        Self::build(&spec.name, &spec.limits, Backend::ec(spec))
    }

    /// Prefix the settings key with the chip (or `ec`) the fan belongs to
    pub(crate) fn scoped(mut self, scope: &str) -> Self {
        self.key = format!("{}.{}", scope, self.name);
        self
    }

    pub fn unconfigured_reason(&self) -> Option<&str> {
        match &self.backend {
            Backend::Unconfigured { reason } => Some(reason),
            _ => None,
        }
    }

    pub(crate) fn mark_unconfigured(&mut self, reason: impl Into<String>) {
        self.backend = Backend::Unconfigured { reason: reason.into() };
    }

    pub fn rpm_max(&self) -> u32 {
        self.rpm_value_max.load(Ordering::SeqCst)
    }

    /// Raise the stored maximum; lower values are ignored.
    /// Returns true if the maximum changed.
    pub fn raise_rpm_max(&self, rpm: u32) -> bool {
        self.rpm_value_max.fetch_max(rpm, Ordering::SeqCst) < rpm
    }

    /// Duty for a percentage, rounded and clamped to `[0, pwm_write_max]`
    pub fn target_duty(&self, percent: f32) -> u32 {
        let raw = (percent / 100.0 * self.pwm_write_max as f32).round();
        (raw.max(0.0) as u32).min(self.pwm_write_max)
    }
}

/// Summary row for `get_fan_config_list`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FanInfo {
    pub name: String,
    pub max_rpm: u32,
    pub mode: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fan::table::DeviceTable;

    fn hwmon_spec(json: &str) -> HwmonFanSpec {
        serde_json::from_str(json).unwrap()
    }

    fn ec_spec(json: &str) -> EcFanSpec {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_hwmon_paths_joined() {
        let spec = hwmon_spec(
            r#"{"name": "f", "enable_path": "pwm1_enable", "pwm_path": "pwm1", "input_path": "fan1_input"}"#,
        );
        let fan = FanDescriptor::from_hwmon(&spec, Path::new("/sys/class/hwmon/hwmon3"));
        assert_eq!(
            fan.backend,
            Backend::Hwmon {
                enable_path: Some(PathBuf::from("/sys/class/hwmon/hwmon3/pwm1_enable")),
                enable_path_fallback: None,
                pwm_path: PathBuf::from("/sys/class/hwmon/hwmon3/pwm1"),
                input_path: Some(PathBuf::from("/sys/class/hwmon/hwmon3/fan1_input")),
                mode: HwmonMode::Single,
            }
        );
        assert_eq!(fan.backend.mode_name(), "hwmon");
    }

    #[test]
    fn test_validation_failures_unconfigured() {
        let no_pwm = FanDescriptor::from_hwmon(&hwmon_spec(r#"{"name": "f"}"#), Path::new("/x"));
        assert!(no_pwm.unconfigured_reason().unwrap().contains("pwm_path"));

        let zero = FanDescriptor::from_hwmon(
            &hwmon_spec(r#"{"name": "f", "pwm_path": "pwm1", "pwm_write_max": 0}"#),
            Path::new("/x"),
        );
        assert!(zero.unconfigured_reason().is_some());

        let no_offsets = FanDescriptor::from_ec(&ec_spec(r#"{"name": "f", "backend": {"type": "ec_io"}}"#));
        assert!(no_offsets.unconfigured_reason().unwrap().contains("write offset"));

        let too_wide = FanDescriptor::from_ec(&ec_spec(
            r#"{"name": "f", "pwm_write_max": 256, "backend": {"type": "ec_io", "write_offset": 1}}"#,
        ));
        assert!(too_wide.unconfigured_reason().is_some());
    }

    #[test]
    fn test_builtin_entries_all_valid() {
        let table = DeviceTable::builtin().unwrap();
        for device in &table.hwmon {
            for spec in &device.fans {
                let fan = FanDescriptor::from_hwmon(spec, Path::new("/x"));
                assert_eq!(fan.unconfigured_reason(), None, "{}", spec.name);
            }
        }
        for device in &table.ec {
            for spec in &device.fans {
                let fan = FanDescriptor::from_ec(spec);
                assert_eq!(fan.unconfigured_reason(), None, "{}", spec.name);
                assert!(fan.backend.is_ec());
            }
        }
    }

    #[test]
    fn test_rpm_max_only_rises() {
        let fan = FanDescriptor::from_ec(&ec_spec(
            r#"{"name": "f", "rpm_value_max": 5000, "backend": {"type": "ec_io", "write_offset": 1}}"#,
        ));
        assert!(!fan.raise_rpm_max(4000));
        assert_eq!(fan.rpm_max(), 5000);
        assert!(fan.raise_rpm_max(5500));
        assert_eq!(fan.rpm_max(), 5500);
        assert!(!fan.raise_rpm_max(5500));
    }

    #[test]
    fn test_target_duty_bounds_and_monotone() {
        let fan = FanDescriptor::from_ec(&ec_spec(
            r#"{"name": "f", "pwm_write_max": 184, "backend": {"type": "ec_io", "write_offset": 1}}"#,
        ));
        assert_eq!(fan.target_duty(0.0), 0);
        assert_eq!(fan.target_duty(50.0), 92);
        assert_eq!(fan.target_duty(100.0), 184);

        let mut last = 0;
        for p in 0..=100 {
            let duty = fan.target_duty(p as f32);
            assert!(duty >= last && duty <= 184);
            last = duty;
        }
    }
}
