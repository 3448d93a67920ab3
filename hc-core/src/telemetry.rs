//! CPU and GPU utilization sampler
//!
//! A background thread samples `/proc/stat` and the amdgpu busy counter every
//! tick and keeps the last `window` readings. The GPU feedback loop reads the
//! smoothed values through [`Utilization`].
//!
//! CPU busy over the window is `100 - 100 * ΣΔidle / ΣΔtotal` where idle is
//! `idle + iowait` and total is `user..steal`. GPU busy is the mean of the raw
//! readings.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::config::TelemetryConfig;
use crate::constants::paths;
use crate::Result;
use hc_gpu::Utilization;

/// Cumulative jiffies from the aggregate `cpu` line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CpuTimes {
    pub idle: u64,
    pub total: u64,
}

/// Parse the aggregate line of `/proc/stat`
pub fn parse_cpu_times(stat: &str) -> Option<CpuTimes> {
    let line = stat.lines().find(|l| l.starts_with("cpu "))?;
    let fields: Vec<u64> = line
        .split_whitespace()
        .skip(1)
        .take(8)
        .map(|f| f.parse().ok())
        .collect::<Option<Vec<u64>>>()?;
    if fields.len() < 5 {
        return None;
    }
    // user nice system idle iowait irq softirq steal
    let idle = fields[3] + fields[4];
    let total = fields.iter().sum();
    Some(CpuTimes { idle, total })
}

/// Files the sampler reads
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetrySources {
    pub proc_stat: PathBuf,
    /// `gpu_busy_percent`; `None` when no GPU was found
    pub gpu_busy: Option<PathBuf>,
}

impl TelemetrySources {
    pub fn new(gpu_busy: Option<PathBuf>) -> Self {
        Self { proc_stat: PathBuf::from(paths::PROC_STAT), gpu_busy }
    }
}

#[derive(Debug)]
struct Window {
    capacity: usize,
    cpu: VecDeque<(u64, u64)>,
    gpu: VecDeque<f32>,
    prev_cpu: Option<CpuTimes>,
    cpu_failures: usize,
    gpu_failures: usize,
}

impl Window {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            cpu: VecDeque::with_capacity(capacity),
            gpu: VecDeque::with_capacity(capacity),
            prev_cpu: None,
            cpu_failures: 0,
            gpu_failures: 0,
        }
    }

    fn failure_limit(&self) -> usize {
        (self.capacity / 2).max(1)
    }

    fn push_cpu(&mut self, delta: (u64, u64)) {
        if self.cpu.len() == self.capacity {
            self.cpu.pop_front();
        }
        self.cpu.push_back(delta);
    }

    fn push_gpu(&mut self, busy: f32) {
        if self.gpu.len() == self.capacity {
            self.gpu.pop_front();
        }
        self.gpu.push_back(busy);
    }
}

struct SamplerShared {
    sources: TelemetrySources,
    tick: Duration,
    window: Mutex<Window>,
    cpu_enabled: AtomicBool,
    gpu_enabled: AtomicBool,
    has_cpu: AtomicBool,
    has_gpu: AtomicBool,
    running: AtomicBool,
}

impl SamplerShared {
    fn tick(&self) {
        let cpu = self.cpu_enabled.load(Ordering::SeqCst);
        let gpu = self.gpu_enabled.load(Ordering::SeqCst);
        if !cpu && !gpu {
            return;
        }

        let cpu_reading = if cpu { Some(self.read_cpu()) } else { None };
        let gpu_reading = if gpu { Some(self.read_gpu()) } else { None };

        let mut w = self.window.lock();
        if let Some(reading) = cpu_reading {
            match reading {
                Some(times) => {
                    if let Some(prev) = w.prev_cpu {
                        let d_idle = times.idle.saturating_sub(prev.idle);
                        let d_total = times.total.saturating_sub(prev.total);
                        w.push_cpu((d_idle, d_total));
                    }
                    w.prev_cpu = Some(times);
                    w.cpu_failures = 0;
                    self.has_cpu.store(true, Ordering::SeqCst);
                }
                None => {
                    w.cpu_failures += 1;
                    if w.cpu_failures >= w.failure_limit() && self.has_cpu.swap(false, Ordering::SeqCst) {
                        warn!("CPU utilization unavailable");
                    }
                }
            }
        }
        if let Some(reading) = gpu_reading {
            match reading {
                Some(busy) => {
                    w.push_gpu(busy);
                    w.gpu_failures = 0;
                    self.has_gpu.store(true, Ordering::SeqCst);
                }
                None => {
                    w.gpu_failures += 1;
                    if w.gpu_failures >= w.failure_limit() && self.has_gpu.swap(false, Ordering::SeqCst) {
                        warn!("GPU utilization unavailable");
                    }
                }
            }
        }
    }

    fn read_cpu(&self) -> Option<CpuTimes> {
        let content = fs::read_to_string(&self.sources.proc_stat).ok()?;
        parse_cpu_times(&content)
    }

    fn read_gpu(&self) -> Option<f32> {
        let path = self.sources.gpu_busy.as_ref()?;
        let content = fs::read_to_string(path).ok()?;
        content.trim().parse::<f32>().ok()
    }
}

/// Sliding-window utilization sampler
pub struct TelemetrySampler {
    shared: Arc<SamplerShared>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl TelemetrySampler {
    pub fn new(sources: TelemetrySources, config: TelemetryConfig) -> Self {
        let capacity = config.window.max(2);
        Self {
            shared: Arc::new(SamplerShared {
                sources,
                tick: Duration::from_millis(config.tick_ms.max(1)),
                window: Mutex::new(Window::new(capacity)),
                cpu_enabled: AtomicBool::new(false),
                gpu_enabled: AtomicBool::new(false),
                has_cpu: AtomicBool::new(true),
                has_gpu: AtomicBool::new(true),
                running: AtomicBool::new(false),
            }),
            thread: Mutex::new(None),
        }
    }

    /// Start the sampling thread; a no-op if it is already running
    pub fn start(&self) -> Result<()> {
        let mut thread = self.thread.lock();
        if thread.is_some() {
            return Ok(());
        }
        self.shared.running.store(true, Ordering::SeqCst);
        let shared = self.shared.clone();
        let handle = thread::Builder::new()
            .name("telemetry".into())
            .spawn(move || {
                while shared.running.load(Ordering::SeqCst) {
                    shared.tick();
                    thread::sleep(shared.tick);
                }
                debug!("Telemetry loop stopped");
            })?;
        *thread = Some(handle);
        info!(tick_ms = self.shared.tick.as_millis() as u64, "Telemetry sampler started");
        Ok(())
    }

    /// Stop and join the sampling thread
    pub fn stop(&self) {
        self.shared.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread.lock().take() {
            if handle.join().is_err() {
                error!("Telemetry thread panicked");
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.thread.lock().is_some()
    }

    /// Take one sample on the calling thread
    pub fn sample_once(&self) {
        self.shared.tick();
    }

    pub fn has_cpu_data(&self) -> bool {
        self.shared.has_cpu.load(Ordering::SeqCst)
    }

    fn set_sampling(&self, flag: &AtomicBool, enabled: bool, cpu: bool) {
        let was = flag.swap(enabled, Ordering::SeqCst);
        if was == enabled {
            return;
        }
        if enabled {
            // Start a fresh window so stale readings do not leak into decisions
            let mut w = self.shared.window.lock();
            if cpu {
                w.cpu.clear();
                w.prev_cpu = None;
                w.cpu_failures = 0;
            } else {
                w.gpu.clear();
                w.gpu_failures = 0;
            }
        }
        debug!(cpu, enabled, "Telemetry sampling toggled");
    }
}

impl Utilization for TelemetrySampler {
    fn set_cpu_sampling(&self, enabled: bool) {
        self.set_sampling(&self.shared.cpu_enabled, enabled, true);
    }

    fn set_gpu_sampling(&self, enabled: bool) {
        self.set_sampling(&self.shared.gpu_enabled, enabled, false);
    }

    fn cpu_busy(&self) -> f32 {
        let w = self.shared.window.lock();
        if w.cpu.is_empty() {
            return 0.0;
        }
        let (idle, total) = w
            .cpu
            .iter()
            .fold((0u64, 0u64), |(i, t), (di, dt)| (i + di, t + dt));
        100.0 - 100.0 * idle as f32 / total.max(1) as f32
    }

    fn gpu_busy(&self) -> f32 {
        let w = self.shared.window.lock();
        if w.gpu.is_empty() {
            return 0.0;
        }
        w.gpu.iter().sum::<f32>() / w.gpu.len() as f32
    }

    fn has_gpu_data(&self) -> bool {
        self.shared.has_gpu.load(Ordering::SeqCst)
    }
}

impl Drop for TelemetrySampler {
    fn drop(&mut self) {
        self.stop();
    }
}
