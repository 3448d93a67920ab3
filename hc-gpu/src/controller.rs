//! GPU frequency feedback controller
//!
//! Owns the intended clock window and pushes it to the driver. Three actors
//! touch the state: policy calls from the host, the auto-tune thread, and the
//! corrective watcher. All of them go through the one `state` mutex, and the
//! lock is held across every multi-step write so a reconcile never observes a
//! half-applied window.
//!
//! # Modes
//!
//! - `Fixed(v)`: min = max = v
//! - `Range`: explicit window, or the `(0,0)` sentinel for firmware control
//! - `Auto`: window `(auto_tune.min, target)` with `target` moved by the
//!   feedback loop every `decision_ticks` ticks

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::constants::{level, od as od_cmd, WATCH_DEBOUNCE};
use crate::feedback;
use crate::od::parse_od_table;
use crate::watcher::CorrectiveWatcher;
use crate::{FeedbackTuning, FreqWindow, GpuClockInterface, GpuMode, Result, Utilization};
use hc_error::HcError;

/// Snapshot of the controller's clock state
#[derive(Debug, Clone, PartialEq)]
pub struct GpuFreqState {
    pub mode: GpuMode,
    /// Intended window; `(0,0)` means firmware-automatic
    pub current: FreqWindow,
    /// Hardware SCLK limits, read once at construction
    pub hardware: FreqWindow,
    /// Bounds for the feedback loop, always inside `hardware`
    pub auto_tune: FreqWindow,
    /// Upper edge of the auto window
    pub auto_target: u32,
}

pub(crate) struct Shared {
    iface: Arc<dyn GpuClockInterface>,
    util: Arc<dyn Utilization>,
    tuning: FeedbackTuning,
    state: Mutex<GpuFreqState>,
}

impl Shared {
    /// Record `window` as intended and write it out. The caller holds the lock.
    fn apply_locked(&self, state: &mut GpuFreqState, window: FreqWindow) -> Result<()> {
        state.current = window;
        if window.is_auto() {
            self.write_window(state.hardware)?;
            self.iface.write_performance_level(level::AUTO)?;
            info!(hardware = %state.hardware, "GPU clocks handed back to firmware");
        } else {
            self.write_window(window)?;
            debug!(%window, "GPU clock window applied");
        }
        Ok(())
    }

    fn write_window(&self, window: FreqWindow) -> Result<()> {
        self.iface.write_performance_level(level::MANUAL)?;
        self.iface.write_od_command(&od_cmd::set_sclk(0, window.min))?;
        self.iface.write_od_command(&od_cmd::set_sclk(1, window.max))?;
        self.iface.write_od_command(od_cmd::COMMIT)
    }

    /// Compare what is on disk with the intended window and re-issue it if
    /// someone else changed it. Returns true when a corrective write was made.
    pub(crate) fn reconcile(&self) -> Result<bool> {
        let mut state = self.state.lock();
        let intended = state.current;
        let expected = if intended.is_auto() { state.hardware } else { intended };
        let mut reissue = false;

        match self.iface.read_od_table() {
            Ok(text) => match parse_od_table(&text).sclk {
                Some(on_disk) if on_disk != expected => {
                    info!(%on_disk, %expected, "GPU clock window changed externally");
                    reissue = true;
                }
                Some(_) => {}
                None => debug!("OD table not parseable, skipping window comparison"),
            },
            Err(e) => warn!(error = %e, "Failed to read OD table during reconcile"),
        }

        if !intended.is_auto() {
            match self.iface.read_performance_level() {
                Ok(current_level) if current_level != level::MANUAL => {
                    info!(level = %current_level, %intended, "Performance level forced away from manual");
                    reissue = true;
                }
                Ok(_) => {}
                Err(e) => warn!(error = %e, "Failed to read performance level during reconcile"),
            }
        }

        if reissue {
            self.apply_locked(&mut state, intended)?;
        }
        Ok(reissue)
    }

    /// One feedback decision. Returns false when the loop should exit.
    fn feedback_step(&self) -> bool {
        if !self.util.has_gpu_data() {
            warn!("GPU utilization unavailable, leaving auto mode");
            self.util.set_cpu_sampling(false);
            self.util.set_gpu_sampling(false);
            let mut state = self.state.lock();
            if state.mode == GpuMode::Auto {
                state.mode = GpuMode::Range;
                let window = state.auto_tune;
                if let Err(e) = self.apply_locked(&mut state, window) {
                    warn!(error = %e, %window, "Failed to apply auto-tune range after leaving auto mode");
                }
            }
            return false;
        }

        let cpu_busy = self.util.cpu_busy();
        let gpu_busy = self.util.gpu_busy();

        let mut state = self.state.lock();
        if state.mode != GpuMode::Auto {
            return false;
        }
        let target = feedback::next_target(state.auto_target, state.auto_tune, cpu_busy, gpu_busy, &self.tuning);
        let window = FreqWindow::new(state.auto_tune.min, target);
        if target != state.auto_target || state.current != window {
            debug!(cpu_busy, gpu_busy, from = state.auto_target, to = target, "Auto-tune step");
            state.auto_target = target;
            if let Err(e) = self.apply_locked(&mut state, window) {
                warn!(error = %e, %window, "Auto-tune write failed");
            }
        }
        true
    }
}

fn run_auto_tune(shared: Arc<Shared>, running: Arc<AtomicBool>) {
    let tick = Duration::from_millis(shared.tuning.tick_ms.max(1));
    let decision_ticks = shared.tuning.decision_ticks.max(1);
    let mut ticks = 0u32;

    debug!("GPU auto-tune loop started");
    while running.load(Ordering::SeqCst) {
        thread::sleep(tick);
        ticks += 1;
        if ticks < decision_ticks {
            continue;
        }
        ticks = 0;
        if !running.load(Ordering::SeqCst) || !shared.feedback_step() {
            break;
        }
    }
    running.store(false, Ordering::SeqCst);
    debug!("GPU auto-tune loop stopped");
}

struct AutoTuneThread {
    running: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

impl AutoTuneThread {
    fn spawn(shared: Arc<Shared>) -> std::io::Result<Self> {
        let running = Arc::new(AtomicBool::new(true));
        let flag = running.clone();
        let handle = thread::Builder::new()
            .name("gpu-auto-tune".into())
            .spawn(move || run_auto_tune(shared, flag))?;
        Ok(Self { running, handle })
    }

    /// Returns within one tick of the loop
    fn stop(self) {
        self.running.store(false, Ordering::SeqCst);
        if self.handle.join().is_err() {
            error!("GPU auto-tune thread panicked");
        }
    }
}

/// Closed-loop GPU clock controller for one device
pub struct GpuController {
    shared: Arc<Shared>,
    auto: Mutex<Option<AutoTuneThread>>,
    watcher: Mutex<Option<CorrectiveWatcher>>,
}

impl GpuController {
    /// Read the hardware range from the OD table and start in firmware-automatic state.
    /// Construction writes nothing. Once the watcher runs, a reconcile of the
    /// automatic state may restore the full hardware window and level `auto`.
    pub fn new(
        iface: Arc<dyn GpuClockInterface>,
        util: Arc<dyn Utilization>,
        tuning: FeedbackTuning,
    ) -> Result<Self> {
        let table = parse_od_table(&iface.read_od_table()?);
        let hardware = table
            .range
            .filter(|r| r.is_ordered() && !r.is_auto())
            .ok_or_else(|| HcError::unavailable("OD table has no SCLK range"))?;
        info!(%hardware, "GPU clock range discovered");

        let state = GpuFreqState {
            mode: GpuMode::Range,
            current: FreqWindow::AUTO,
            hardware,
            auto_tune: hardware,
            auto_target: hardware.max,
        };

        Ok(Self {
            shared: Arc::new(Shared { iface, util, tuning, state: Mutex::new(state) }),
            auto: Mutex::new(None),
            watcher: Mutex::new(None),
        })
    }

    /// Hardware SCLK limits
    pub fn get_gpu_freq_range(&self) -> FreqWindow {
        self.shared.state.lock().hardware
    }

    pub fn current_window(&self) -> FreqWindow {
        self.shared.state.lock().current
    }

    pub fn auto_tune_range(&self) -> FreqWindow {
        self.shared.state.lock().auto_tune
    }

    pub fn mode(&self) -> GpuMode {
        self.shared.state.lock().mode
    }

    pub fn state(&self) -> GpuFreqState {
        self.shared.state.lock().clone()
    }

    pub fn is_auto_running(&self) -> bool {
        self.auto
            .lock()
            .as_ref()
            .map(|t| t.running.load(Ordering::SeqCst))
            .unwrap_or(false)
    }

    /// Enable or disable the feedback loop
    pub fn set_gpu_auto(&self, enabled: bool) -> bool {
        self.stop_auto();

        if !enabled {
            let mut state = self.shared.state.lock();
            if state.mode == GpuMode::Auto {
                state.mode = GpuMode::Range;
            }
            info!("GPU auto-tune disabled");
            return true;
        }

        {
            let mut state = self.shared.state.lock();
            state.mode = GpuMode::Auto;
            state.auto_target = state.auto_tune.max;
            let window = FreqWindow::new(state.auto_tune.min, state.auto_target);
            if let Err(e) = self.shared.apply_locked(&mut state, window) {
                warn!(error = %e, %window, "Initial auto-tune window not applied");
            }
        }

        self.shared.util.set_cpu_sampling(true);
        self.shared.util.set_gpu_sampling(true);

        match AutoTuneThread::spawn(self.shared.clone()) {
            Ok(thread) => {
                *self.auto.lock() = Some(thread);
                info!(range = %self.auto_tune_range(), "GPU auto-tune enabled");
                true
            }
            Err(e) => {
                error!(error = %e, "Failed to spawn GPU auto-tune thread");
                self.shared.util.set_cpu_sampling(false);
                self.shared.util.set_gpu_sampling(false);
                self.shared.state.lock().mode = GpuMode::Range;
                false
            }
        }
    }

    /// Set the bounds used by auto mode. `(0,0)` resets them to the hardware range.
    pub fn set_gpu_auto_freq_range(&self, min: u32, max: u32) -> bool {
        let requested = FreqWindow::new(min, max);
        if !requested.is_ordered() {
            return report("set_gpu_auto_freq_range", Err(HcError::invalid("auto-tune range", requested)));
        }

        let mut state = self.shared.state.lock();
        let bounds = if requested.is_auto() { state.hardware } else { requested.clamp_into(state.hardware) };
        state.auto_tune = bounds;
        state.auto_target = bounds.clamp_value(state.auto_target);
        debug!(%bounds, "Auto-tune range updated");

        if state.mode == GpuMode::Auto {
            let window = FreqWindow::new(bounds.min, state.auto_target);
            let result = self.shared.apply_locked(&mut state, window);
            return report("set_gpu_auto_freq_range", result);
        }
        true
    }

    /// Pin the clock to one frequency; 0 hands control back to firmware
    pub fn set_gpu_freq_fixed(&self, mhz: u32) -> bool {
        let window = if mhz == 0 { FreqWindow::AUTO } else { FreqWindow::fixed(mhz) };
        let mode = if mhz == 0 { GpuMode::Range } else { GpuMode::Fixed(mhz) };
        self.set_window("set_gpu_freq_fixed", window, mode)
    }

    /// Apply an explicit window; `(0,0)` hands control back to firmware
    pub fn set_gpu_freq_range(&self, min: u32, max: u32) -> bool {
        self.set_window("set_gpu_freq_range", FreqWindow::new(min, max), GpuMode::Range)
    }

    fn set_window(&self, op: &str, window: FreqWindow, mode: GpuMode) -> bool {
        if let Err(e) = self.validate(window) {
            return report(op, Err(e));
        }
        self.stop_auto();

        let mut state = self.shared.state.lock();
        state.mode = mode;
        let result = self.shared.apply_locked(&mut state, window);
        report(op, result)
    }

    fn validate(&self, window: FreqWindow) -> Result<()> {
        if window.is_auto() {
            return Ok(());
        }
        let hardware = self.shared.state.lock().hardware;
        if hardware.contains(window) {
            Ok(())
        } else {
            Err(HcError::invalid("GPU clock window", format!("{} (hardware {})", window, hardware)))
        }
    }

    fn stop_auto(&self) {
        let thread = self.auto.lock().take();
        if let Some(thread) = thread {
            thread.stop();
            self.shared.util.set_cpu_sampling(false);
            self.shared.util.set_gpu_sampling(false);
        }
    }

    /// Start watching the clock files for external changes
    pub fn start_watcher(&self) -> bool {
        let mut watcher = self.watcher.lock();
        if watcher.is_some() {
            return true;
        }
        let paths = self.shared.iface.watch_paths();
        match CorrectiveWatcher::spawn(self.shared.clone(), paths, WATCH_DEBOUNCE) {
            Ok(w) => {
                *watcher = Some(w);
                true
            }
            Err(e) => {
                warn!(error = %e, "GPU corrective watcher not started");
                false
            }
        }
    }

    /// Run one reconcile pass immediately
    pub fn reconcile(&self) -> bool {
        match self.shared.reconcile() {
            Ok(corrected) => corrected,
            Err(e) => {
                warn!(error = %e, "GPU reconcile failed");
                false
            }
        }
    }

    /// Stop auto-tune and the watcher. Hardware bounds are left as they are.
    pub fn unload(&self) {
        self.stop_auto();
        if self.watcher.lock().take().is_some() {
            debug!("GPU corrective watcher stopped");
        }
    }
}

impl Drop for GpuController {
    fn drop(&mut self) {
        self.unload();
    }
}

fn report(op: &str, result: Result<()>) -> bool {
    match result {
        Ok(()) => true,
        Err(e) => {
            warn!(op, error = %e, "GPU clock operation failed");
            false
        }
    }
}
