//! GPU and utilization fakes shared by the unit tests

use parking_lot::Mutex;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::amd::AmdGpuSysfs;
use crate::{gpu_const, parse_od_table, FreqWindow, GpuClockInterface, Result, Utilization};
use hc_error::HcError;

pub fn render_table(sclk: FreqWindow, range: FreqWindow) -> String {
    format!(
        "OD_SCLK:\n0:        {}Mhz\n1:       {}Mhz\nOD_RANGE:\nSCLK:     {}Mhz       {}Mhz\n",
        sclk.min, sclk.max, range.min, range.max
    )
}

/// Write an amdgpu-looking device directory and return its path
pub fn write_fake_card(root: &Path, card: &str, hardware: FreqWindow) -> PathBuf {
    let device = root.join(card).join("device");
    fs::create_dir_all(&device).unwrap();
    fs::write(device.join("vendor"), "0x1002\n").unwrap();
    fs::write(device.join(gpu_const::OD_CLK_FILE), render_table(hardware, hardware)).unwrap();
    fs::write(device.join(gpu_const::PERF_LEVEL_FILE), "auto\n").unwrap();
    fs::write(device.join(gpu_const::GPU_BUSY_FILE), "0\n").unwrap();
    device
}

/// An on-disk card whose OD file is re-rendered on every commit the way the
/// driver does, so readers see a table instead of the last command written.
#[derive(Debug)]
pub struct FakeCard {
    sysfs: AmdGpuSysfs,
    od_path: PathBuf,
    hardware: FreqWindow,
    pending: Mutex<FreqWindow>,
}

impl FakeCard {
    pub fn new(root: &Path, card: &str, hardware: FreqWindow) -> Arc<Self> {
        let device = write_fake_card(root, card, hardware);
        Arc::new(Self {
            sysfs: AmdGpuSysfs::from_device_dir(&device),
            od_path: device.join(gpu_const::OD_CLK_FILE),
            hardware,
            pending: Mutex::new(hardware),
        })
    }

    pub fn device_path(&self) -> &Path {
        self.sysfs.device_path()
    }

    /// Window currently shown in the OD file
    pub fn sclk_on_disk(&self) -> Option<FreqWindow> {
        fs::read_to_string(&self.od_path)
            .ok()
            .and_then(|text| parse_od_table(&text).sclk)
    }
}

impl GpuClockInterface for FakeCard {
    fn read_od_table(&self) -> Result<String> {
        self.sysfs.read_od_table()
    }

    fn read_performance_level(&self) -> Result<String> {
        self.sysfs.read_performance_level()
    }

    fn write_performance_level(&self, level: &str) -> Result<()> {
        self.sysfs.write_performance_level(level)
    }

    fn write_od_command(&self, command: &str) -> Result<()> {
        let mut pending = self.pending.lock();
        let parts: Vec<&str> = command.split_whitespace().collect();
        match parts.as_slice() {
            ["c"] => fs::write(&self.od_path, render_table(*pending, self.hardware))
                .map_err(|e| HcError::transient(&self.od_path, e)),
            ["s", "0", mhz] => {
                pending.min = mhz.parse().map_err(|_| FakeGpu::rejected(command))?;
                Ok(())
            }
            ["s", "1", mhz] => {
                pending.max = mhz.parse().map_err(|_| FakeGpu::rejected(command))?;
                Ok(())
            }
            _ => Err(FakeGpu::rejected(command)),
        }
    }

    fn watch_paths(&self) -> Vec<PathBuf> {
        self.sysfs.watch_paths()
    }
}

#[derive(Debug)]
struct FakeGpuState {
    level: String,
    pending: FreqWindow,
    committed: FreqWindow,
    log: Vec<String>,
    table_override: Option<String>,
}

/// Behaves like the amdgpu OD interface: `s` commands only land in a pending
/// table, `c` commits it, and OD writes fail unless the level is `manual`.
#[derive(Debug)]
pub struct FakeGpu {
    hardware: FreqWindow,
    state: Mutex<FakeGpuState>,
}

impl FakeGpu {
    pub fn new(hardware: FreqWindow) -> Arc<Self> {
        Arc::new(Self {
            hardware,
            state: Mutex::new(FakeGpuState {
                level: gpu_const::level::AUTO.to_string(),
                pending: hardware,
                committed: hardware,
                log: Vec::new(),
                table_override: None,
            }),
        })
    }

    pub fn log(&self) -> Vec<String> {
        self.state.lock().log.clone()
    }

    pub fn clear_log(&self) {
        self.state.lock().log.clear();
    }

    pub fn level(&self) -> String {
        self.state.lock().level.clone()
    }

    pub fn committed(&self) -> FreqWindow {
        self.state.lock().committed
    }

    pub fn set_table_override(&self, table: Option<String>) {
        self.state.lock().table_override = table;
    }

    /// Someone else changes the level
    pub fn external_level(&self, level: &str) {
        self.state.lock().level = level.to_string();
    }

    /// Someone else commits a window
    pub fn external_commit(&self, window: FreqWindow) {
        let mut state = self.state.lock();
        state.pending = window;
        state.committed = window;
    }

    fn rejected(command: &str) -> HcError {
        HcError::transient(
            gpu_const::OD_CLK_FILE,
            io::Error::new(io::ErrorKind::InvalidInput, format!("rejected: {}", command)),
        )
    }
}

impl GpuClockInterface for FakeGpu {
    fn read_od_table(&self) -> Result<String> {
        let state = self.state.lock();
        Ok(state
            .table_override
            .clone()
            .unwrap_or_else(|| render_table(state.committed, self.hardware)))
    }

    fn read_performance_level(&self) -> Result<String> {
        Ok(self.level())
    }

    fn write_performance_level(&self, level: &str) -> Result<()> {
        let mut state = self.state.lock();
        state.level = level.to_string();
        state.log.push(format!("level {}", level));
        Ok(())
    }

    fn write_od_command(&self, command: &str) -> Result<()> {
        let mut state = self.state.lock();
        if state.level != gpu_const::level::MANUAL {
            return Err(Self::rejected(command));
        }
        let parts: Vec<&str> = command.split_whitespace().collect();
        match parts.as_slice() {
            ["c"] => state.committed = state.pending,
            ["s", index, mhz] => {
                let mhz: u32 = mhz.parse().map_err(|_| Self::rejected(command))?;
                if !self.hardware.contains(FreqWindow::fixed(mhz)) {
                    return Err(Self::rejected(command));
                }
                match *index {
                    "0" => state.pending.min = mhz,
                    "1" => state.pending.max = mhz,
                    _ => return Err(Self::rejected(command)),
                }
            }
            _ => return Err(Self::rejected(command)),
        }
        state.log.push(command.to_string());
        Ok(())
    }

    fn watch_paths(&self) -> Vec<PathBuf> {
        Vec::new()
    }
}

/// Utilization source with settable readings
#[derive(Debug)]
pub struct FakeUtilization {
    busy: Mutex<(f32, f32)>,
    has_gpu_data: AtomicBool,
    cpu_enabled: AtomicBool,
    gpu_enabled: AtomicBool,
}

impl FakeUtilization {
    pub fn new(cpu_busy: f32, gpu_busy: f32) -> Arc<Self> {
        Arc::new(Self {
            busy: Mutex::new((cpu_busy, gpu_busy)),
            has_gpu_data: AtomicBool::new(true),
            cpu_enabled: AtomicBool::new(false),
            gpu_enabled: AtomicBool::new(false),
        })
    }

    pub fn set_busy(&self, cpu_busy: f32, gpu_busy: f32) {
        *self.busy.lock() = (cpu_busy, gpu_busy);
    }

    pub fn set_has_gpu_data(&self, has: bool) {
        self.has_gpu_data.store(has, Ordering::SeqCst);
    }

    pub fn cpu_enabled(&self) -> bool {
        self.cpu_enabled.load(Ordering::SeqCst)
    }

    pub fn gpu_enabled(&self) -> bool {
        self.gpu_enabled.load(Ordering::SeqCst)
    }
}

impl Utilization for FakeUtilization {
    fn set_cpu_sampling(&self, enabled: bool) {
        self.cpu_enabled.store(enabled, Ordering::SeqCst);
    }

    fn set_gpu_sampling(&self, enabled: bool) {
        self.gpu_enabled.store(enabled, Ordering::SeqCst);
    }

    fn cpu_busy(&self) -> f32 {
        self.busy.lock().0
    }

    fn gpu_busy(&self) -> f32 {
        self.busy.lock().1
    }

    fn has_gpu_data(&self) -> bool {
        self.has_gpu_data.load(Ordering::SeqCst)
    }
}
