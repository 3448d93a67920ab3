//! Fan control engine
//!
//! Fans are resolved once at startup and addressed by index afterwards. Every
//! public operation isolates failures to the fan it touches: the error is
//! logged with the fan and backend, and the caller sees `false` or `0`.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::calibration::CalibrationTuning;
use super::descriptor::{Backend, FanDescriptor, FanInfo, HwmonMode};
use super::sysfs;
use super::table::{DeviceTable, TempSource};
use crate::constants::{fan as fan_const, temperature};
use crate::ec::EcChannel;
use crate::settings::SettingsStore;
use crate::system::{HwmonChipMap, ProductInfo};
use crate::Result;
use hc_error::HcError;

/// Temperature inputs shared by all fans
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TempInputs {
    pub cpu: Option<PathBuf>,
    pub gpu: Option<PathBuf>,
}

impl TempInputs {
    /// Pick the first known CPU and GPU chips present in `chips`
    pub fn from_chips(chips: &HwmonChipMap) -> Self {
        let find = |names: &[&str]| {
            names
                .iter()
                .find_map(|name| chips.get(*name))
                .map(|dir| dir.join(temperature::INPUT_FILE))
        };
        Self { cpu: find(temperature::CPU_CHIPS), gpu: find(temperature::GPU_CHIPS) }
    }

    fn path(&self, source: TempSource) -> Option<&Path> {
        match source {
            TempSource::Cpu => self.cpu.as_deref(),
            TempSource::Gpu => self.gpu.as_deref(),
        }
    }
}

type Candidate<'a> = (FanDescriptor, &'a [String]);

/// Drop fans that failed validation, with a warning each
fn drop_unconfigured(candidates: Vec<Candidate<'_>>) -> Vec<Candidate<'_>> {
    candidates
        .into_iter()
        .filter(|(fan, _)| match fan.unconfigured_reason() {
            Some(reason) => {
                warn!(fan = %fan.name, reason, "Fan excluded: configuration error");
                false
            }
            None => true,
        })
        .collect()
}

/// Owner of every resolved fan
pub struct FanEngine {
    fans: Vec<FanDescriptor>,
    ec: Option<Arc<EcChannel>>,
    settings: Arc<dyn SettingsStore>,
    temps: TempInputs,
    calibration: CalibrationTuning,
}

impl FanEngine {
    /// Resolve the fans of the running device.
    ///
    /// hwmon entries whose chip is present come first; EC entries are only
    /// consulted when no valid hwmon fan resolved. Blacklisted fans are then
    /// dropped and persisted RPM limits restored by fan key.
    pub fn resolve(
        table: &DeviceTable,
        chips: &HwmonChipMap,
        product: &ProductInfo,
        ec: Option<Arc<EcChannel>>,
        settings: Arc<dyn SettingsStore>,
        calibration: CalibrationTuning,
    ) -> Self {
        let mut hwmon: Vec<Candidate> = Vec::new();
        for device in &table.hwmon {
            let Some(chip_dir) = chips.get(&device.hwmon_name) else {
                continue;
            };
            debug!(chip = %device.hwmon_name, path = %chip_dir.display(), "hwmon fan chip present");
            for spec in &device.fans {
                let fan = FanDescriptor::from_hwmon(spec, chip_dir).scoped(&device.hwmon_name);
                hwmon.push((fan, spec.limits.blacklist.as_slice()));
            }
        }

        let mut candidates = drop_unconfigured(hwmon);
        if candidates.is_empty() {
            if let Some(device) = table.ec_device_for(product) {
                debug!(product = %product.name, "Using EC fan entry");
                let mut from_ec = Vec::new();
                for spec in &device.fans {
                    let mut fan = FanDescriptor::from_ec(spec).scoped(fan_const::EC_SCOPE);
                    if ec.is_none() && fan.unconfigured_reason().is_none() {
                        fan.mark_unconfigured("EC channel unavailable");
                    }
                    from_ec.push((fan, spec.limits.blacklist.as_slice()));
                }
                candidates = drop_unconfigured(from_ec);
            }
        }

        let mut fans = Vec::new();
        for (fan, blacklist) in candidates {
            if blacklist.contains(&product.name) {
                info!(fan = %fan.name, product = %product.name, "Fan blacklisted on this product");
                continue;
            }
            fans.push(fan);
        }

        for fan in &fans {
            if let Some(saved) = settings.get_u32(&fan_const::rpm_max_key(&fan.key)) {
                if fan.raise_rpm_max(saved) {
                    debug!(fan = %fan.key, rpm_max = saved, "Restored calibrated RPM limit");
                }
            }
        }

        info!(count = fans.len(), product = %product.name, "Fans resolved");
        Self {
            fans,
            ec,
            settings,
            temps: TempInputs::from_chips(chips),
            calibration,
        }
    }

    pub fn fan_count(&self) -> usize {
        self.fans.len()
    }

    pub fn fans(&self) -> &[FanDescriptor] {
        &self.fans
    }

    fn fan(&self, index: usize) -> Result<&FanDescriptor> {
        self.fans.get(index).ok_or_else(|| HcError::invalid("fan index", index))
    }

    fn ec(&self) -> Result<&EcChannel> {
        self.ec
            .as_deref()
            .ok_or_else(|| HcError::unavailable("EC channel not open"))
    }

    fn log_failure(&self, op: &str, index: usize, e: &HcError) {
        match (self.fans.get(index), e) {
            (Some(fan), HcError::EcWrite { offset, value, .. }) => warn!(
                op,
                fan = %fan.name,
                backend = fan.backend.mode_name(),
                offset = *offset,
                value = *value,
                error = %e,
                "Fan operation failed"
            ),
            (Some(fan), _) => warn!(op, fan = %fan.name, backend = fan.backend.mode_name(), error = %e, "Fan operation failed"),
            (None, _) => warn!(op, index, error = %e, "Fan operation failed"),
        }
    }

    // ========================================================================
    // Public per-fan operations
    // ========================================================================

    /// Current speed; 0 when the fan has no speed source or the read fails
    pub fn get_fan_rpm(&self, index: usize) -> u32 {
        match self.fan(index).and_then(|fan| self.read_rpm(fan)) {
            Ok(rpm) => rpm,
            Err(e) => {
                self.log_failure("get_fan_rpm", index, &e);
                0
            }
        }
    }

    /// Set the duty as a percentage of the fan's maximum
    pub fn set_fan_percent(&self, index: usize, value: f32) -> bool {
        let result = if (0.0..=100.0).contains(&value) {
            self.fan(index).and_then(|fan| self.write_percent(fan, value))
        } else {
            Err(HcError::invalid("fan percent", value))
        };
        self.report("set_fan_percent", index, result)
    }

    /// Hand the fan to firmware (`true`) or take manual control (`false`)
    pub fn set_fan_auto(&self, index: usize, auto: bool) -> bool {
        let result = self.fan(index).and_then(|fan| self.write_auto(fan, auto));
        self.report("set_fan_auto", index, result)
    }

    pub fn get_fan_is_auto(&self, index: usize) -> bool {
        match self.fan(index).and_then(|fan| self.read_enable(fan).map(|v| v == fan.auto_value)) {
            Ok(auto) => auto,
            Err(e) => {
                self.log_failure("get_fan_is_auto", index, &e);
                false
            }
        }
    }

    pub fn get_fan_config_list(&self) -> Vec<FanInfo> {
        self.fans
            .iter()
            .map(|fan| FanInfo {
                name: fan.name.clone(),
                max_rpm: fan.rpm_max(),
                mode: fan.backend.mode_name().to_string(),
            })
            .collect()
    }

    /// Temperature of the fan's source in °C. A CPU reading also feeds calibration.
    pub fn get_fan_temp(&self, index: usize) -> Option<f32> {
        let fan = self.fan(index).ok()?;
        let path = self.temps.path(fan.temp_source)?;
        match sysfs::read_temperature(path) {
            Ok(temp) => {
                if fan.temp_source == TempSource::Cpu {
                    self.update_fan_max(temp);
                }
                Some(temp)
            }
            Err(e) => {
                self.log_failure("get_fan_temp", index, &e);
                None
            }
        }
    }

    /// Raise and persist the RPM limit of every fan spinning plausibly faster
    /// than its stored maximum. Returns the number of fans raised.
    pub fn update_fan_max(&self, cpu_temp: f32) -> usize {
        let mut raised = 0;
        for (index, fan) in self.fans.iter().enumerate() {
            let current = fan.rpm_max();
            let observed = self.get_fan_rpm(index);
            if !self.calibration.accepts(observed, current, cpu_temp) {
                continue;
            }
            if fan.raise_rpm_max(observed) {
                raised += 1;
                info!(fan = %fan.name, from = current, to = observed, cpu_temp, "Calibrated fan RPM limit");
                let key = fan_const::rpm_max_key(&fan.key);
                if let Err(e) = self.settings.set_u32(&key, fan.rpm_max()) {
                    warn!(fan = %fan.name, error = %e, "Failed to persist calibrated RPM limit");
                }
            }
        }
        raised
    }

    fn report(&self, op: &str, index: usize, result: Result<()>) -> bool {
        match result {
            Ok(()) => true,
            Err(e) => {
                self.log_failure(op, index, &e);
                false
            }
        }
    }

    // ========================================================================
    // Backend dispatch
    // ========================================================================

    fn read_rpm(&self, fan: &FanDescriptor) -> Result<u32> {
        match &fan.backend {
            Backend::Hwmon { input_path: Some(path), .. } => sysfs::read_u32(path),
            Backend::EcIo { read_offset: Some(offset), .. } => self.ec()?.read_long(*offset, 2),
            Backend::EcRam {
                reg_addr,
                reg_data,
                read_offset: Some(offset),
                read_length,
                ..
            } => {
                let ec = self.ec()?;
                if *read_length > 0 {
                    ec.ram_read_long(*reg_addr, *reg_data, *offset, *read_length)
                } else {
                    // Only a duty byte is exposed; scale it linearly onto the RPM range
                    let raw = u64::from(ec.ram_read(*reg_addr, *reg_data, *offset)?);
                    let rpm = raw * u64::from(fan.rpm_max()) / u64::from(fan.pwm_write_max.max(1));
                    Ok(u32::try_from(rpm).unwrap_or(u32::MAX))
                }
            }
            Backend::Unconfigured { reason } => Err(HcError::config(reason.clone())),
            _ => Ok(0),
        }
    }

    fn write_percent(&self, fan: &FanDescriptor, percent: f32) -> Result<()> {
        let target = fan.target_duty(percent);
        match &fan.backend {
            Backend::Hwmon { pwm_path, mode: HwmonMode::Single, .. } => {
                match sysfs::read_u32(pwm_path) {
                    Ok(current) if within_skip_band(current, target) => {
                        debug!(fan = %fan.name, current, target, "PWM already at target, skipping write");
                        return Ok(());
                    }
                    Ok(_) => {}
                    Err(e) => debug!(fan = %fan.name, error = %e, "Current PWM unreadable, writing anyway"),
                }
                sysfs::write_u32(pwm_path, target)
            }
            Backend::Hwmon {
                enable_path,
                enable_path_fallback,
                mode: HwmonMode::Curve { points, temp_max },
                ..
            } => {
                let n = u32::try_from(points.len()).unwrap_or(u32::MAX).max(1);
                for (i, point) in (1u32..).zip(points) {
                    sysfs::write_u32(&point.temp_path, temp_max.saturating_mul(i) / n)?;
                    sysfs::write_u32(&point.pwm_path, target)?;
                }
                write_enable(enable_path.as_deref(), enable_path_fallback.as_deref(), fan.manual_value)
            }
            Backend::EcIo { write_offset, .. } => {
                let value = ec_byte(target)?;
                self.ec()?
                    .write(*write_offset, value)
                    .map_err(|e| HcError::ec_write(*write_offset, value, e))
            }
            Backend::EcRam { reg_addr, reg_data, write_offset, .. } => {
                let value = ec_byte(target)?;
                self.ec()?
                    .ram_write(*reg_addr, *reg_data, *write_offset, value)
                    .map_err(|e| HcError::ec_write(*write_offset, value, e))
            }
            Backend::Unconfigured { reason } => Err(HcError::config(reason.clone())),
        }
    }

    fn write_auto(&self, fan: &FanDescriptor, auto: bool) -> Result<()> {
        let value = if auto { fan.auto_value } else { fan.manual_value };
        // Some firmware uses the duty register as the mode switch: writing the
        // manual value there would set a duty instead.
        match &fan.backend {
            Backend::Hwmon { enable_path, enable_path_fallback, pwm_path, .. } => {
                if !auto && enable_path.as_deref() == Some(pwm_path.as_path()) {
                    debug!(fan = %fan.name, "Enable register is the PWM register, skipping manual write");
                    return Ok(());
                }
                write_enable(enable_path.as_deref(), enable_path_fallback.as_deref(), value)
            }
            Backend::EcIo { manual_offset, write_offset, .. } => {
                let offset = manual_offset.ok_or_else(|| HcError::unavailable("fan has no EC mode register"))?;
                if !auto && offset == *write_offset {
                    debug!(fan = %fan.name, "Mode register is the duty register, skipping manual write");
                    return Ok(());
                }
                let value = ec_byte(value)?;
                self.ec()?
                    .write(offset, value)
                    .map_err(|e| HcError::ec_write(offset, value, e))
            }
            Backend::EcRam { reg_addr, reg_data, manual_offset, write_offset, .. } => {
                let offset = manual_offset.ok_or_else(|| HcError::unavailable("fan has no EC mode register"))?;
                if !auto && offset == *write_offset {
                    debug!(fan = %fan.name, "Mode register is the duty register, skipping manual write");
                    return Ok(());
                }
                let value = ec_byte(value)?;
                self.ec()?
                    .ram_write(*reg_addr, *reg_data, offset, value)
                    .map_err(|e| HcError::ec_write(offset, value, e))
            }
            Backend::Unconfigured { reason } => Err(HcError::config(reason.clone())),
        }
    }

    fn read_enable(&self, fan: &FanDescriptor) -> Result<u32> {
        match &fan.backend {
            Backend::Hwmon { enable_path, enable_path_fallback, .. } => {
                let mut last_err = None;
                for path in [enable_path.as_deref(), enable_path_fallback.as_deref()].into_iter().flatten() {
                    match sysfs::read_u32(path) {
                        Ok(v) => return Ok(v),
                        Err(e) => last_err = Some(e),
                    }
                }
                Err(last_err.unwrap_or_else(|| HcError::unavailable("fan has no enable path")))
            }
            Backend::EcIo { manual_offset, .. } => {
                let offset = manual_offset.ok_or_else(|| HcError::unavailable("fan has no EC mode register"))?;
                Ok(u32::from(self.ec()?.read(offset)?))
            }
            Backend::EcRam { reg_addr, reg_data, manual_offset, .. } => {
                let offset = manual_offset.ok_or_else(|| HcError::unavailable("fan has no EC mode register"))?;
                Ok(u32::from(self.ec()?.ram_read(*reg_addr, *reg_data, offset)?))
            }
            Backend::Unconfigured { reason } => Err(HcError::config(reason.clone())),
        }
    }
}

/// `|current - target| <= 5% of target`
fn within_skip_band(current: u32, target: u32) -> bool {
    (current as f32 - target as f32).abs() <= fan_const::WRITE_SKIP_RATIO * target as f32
}

fn ec_byte(value: u32) -> Result<u8> {
    u8::try_from(value).map_err(|_| HcError::invalid("EC register value", value))
}

/// Write the primary enable path, falling back to the secondary one
fn write_enable(primary: Option<&Path>, fallback: Option<&Path>, value: u32) -> Result<()> {
    let mut last_err = None;
    for path in [primary, fallback].into_iter().flatten() {
        match sysfs::write_u32(path, value) {
            Ok(()) => return Ok(()),
            Err(e) => {
                debug!(path = %path.display(), error = %e, "Enable write failed");
                last_err = Some(e);
            }
        }
    }
    Err(last_err.unwrap_or_else(|| HcError::unavailable("fan has no enable path")))
}
