//! amdgpu sysfs clock control
//!
//! Discovery via `/sys/class/drm/card*/device` (vendor `0x1002`), control via
//! `pp_od_clk_voltage` and `power_dpm_force_performance_level`. Both files
//! require root to write.

use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, trace};

use crate::{gpu_const, GpuClockInterface, Result};
use hc_error::HcError;

/// Clock control files of one amdgpu device
#[derive(Debug, Clone)]
pub struct AmdGpuSysfs {
    device_path: PathBuf,
    od_path: PathBuf,
    level_path: PathBuf,
}

impl AmdGpuSysfs {
    /// Use the control files under an explicit device directory
    pub fn from_device_dir(device_path: impl Into<PathBuf>) -> Self {
        let device_path = device_path.into();
        Self {
            od_path: device_path.join(gpu_const::OD_CLK_FILE),
            level_path: device_path.join(gpu_const::PERF_LEVEL_FILE),
            device_path,
        }
    }

    /// Find the first AMD card exposing an overdrive table
    pub fn discover() -> Result<Self> {
        Self::discover_in(Path::new(gpu_const::DRM_PATH))
    }

    /// Same as [`discover`](Self::discover) with a custom DRM root
    pub fn discover_in(drm_path: &Path) -> Result<Self> {
        if !drm_path.exists() {
            return Err(HcError::unavailable(format!("DRM path {} not found", drm_path.display())));
        }

        let mut cards: Vec<PathBuf> = fs::read_dir(drm_path)?
            .flatten()
            .filter(|e| {
                let name = e.file_name();
                let name = name.to_string_lossy();
                name.starts_with("card") && !name.contains('-')
            })
            .map(|e| e.path())
            .collect();
        cards.sort();

        for card in cards {
            let device_path = card.join("device");
            if !is_amd_gpu(&device_path) {
                trace!("Skipping non-AMD card {:?}", card);
                continue;
            }
            let sysfs = Self::from_device_dir(&device_path);
            if sysfs.od_path.exists() {
                info!(device = %device_path.display(), "Found amdgpu clock control");
                return Ok(sysfs);
            }
            debug!("AMD card {:?} has no {}", card, gpu_const::OD_CLK_FILE);
        }

        Err(HcError::unavailable("no amdgpu device with an overdrive table"))
    }

    pub fn device_path(&self) -> &Path {
        &self.device_path
    }

    /// Path of the busy-percent counter sampled by telemetry
    pub fn gpu_busy_path(&self) -> PathBuf {
        self.device_path.join(gpu_const::GPU_BUSY_FILE)
    }
}

impl GpuClockInterface for AmdGpuSysfs {
    fn read_od_table(&self) -> Result<String> {
        fs::read_to_string(&self.od_path).map_err(|e| HcError::transient(&self.od_path, e))
    }

    fn read_performance_level(&self) -> Result<String> {
        fs::read_to_string(&self.level_path)
            .map(|s| s.trim().to_string())
            .map_err(|e| HcError::transient(&self.level_path, e))
    }

    fn write_performance_level(&self, level: &str) -> Result<()> {
        trace!(level, "Writing performance level");
        fs::write(&self.level_path, level).map_err(|e| HcError::transient(&self.level_path, e))
    }

    fn write_od_command(&self, command: &str) -> Result<()> {
        trace!(command, "Writing OD command");
        fs::write(&self.od_path, command).map_err(|e| HcError::transient(&self.od_path, e))
    }

    fn watch_paths(&self) -> Vec<PathBuf> {
        vec![self.od_path.clone(), self.level_path.clone()]
    }
}

fn is_amd_gpu(device_path: &Path) -> bool {
    fs::read_to_string(device_path.join("vendor"))
        .map(|v| v.trim() == gpu_const::AMD_VENDOR_ID)
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn make_card(root: &Path, card: &str, vendor: &str, with_od: bool) -> PathBuf {
        let device = root.join(card).join("device");
        fs::create_dir_all(&device).unwrap();
        fs::write(device.join("vendor"), format!("{}\n", vendor)).unwrap();
        if with_od {
            fs::write(device.join(gpu_const::OD_CLK_FILE), "OD_SCLK:\n0: 200Mhz\n1: 1600Mhz\n").unwrap();
        }
        device
    }

    #[test]
    fn test_discover_skips_other_vendors_and_connectors() {
        let tmp = TempDir::new().unwrap();
        make_card(tmp.path(), "card0", "0x8086", true);
        fs::create_dir_all(tmp.path().join("card1-eDP-1")).unwrap();
        let amd = make_card(tmp.path(), "card1", "0x1002", true);

        let sysfs = AmdGpuSysfs::discover_in(tmp.path()).unwrap();
        assert_eq!(sysfs.device_path(), amd.as_path());
        assert_eq!(sysfs.gpu_busy_path(), amd.join("gpu_busy_percent"));
    }

    #[test]
    fn test_discover_requires_od_table() {
        let tmp = TempDir::new().unwrap();
        make_card(tmp.path(), "card0", "0x1002", false);
        assert!(matches!(
            AmdGpuSysfs::discover_in(tmp.path()),
            Err(HcError::HardwareUnavailable(_))
        ));
    }

    #[test]
    fn test_level_roundtrip_trims() {
        let tmp = TempDir::new().unwrap();
        let device = make_card(tmp.path(), "card0", "0x1002", true);
        let sysfs = AmdGpuSysfs::from_device_dir(&device);
        sysfs.write_performance_level("manual\n").unwrap();
        assert_eq!(sysfs.read_performance_level().unwrap(), "manual");
        assert_eq!(sysfs.watch_paths().len(), 2);
    }
}
