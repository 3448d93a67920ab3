//! Hardware services owned by the daemon
//!
//! Built once at startup from the configuration. Every service is optional
//! except the fan engine, which may simply hold zero fans.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use hc_core::constants::{daemon, paths};
use hc_core::{
    discover_hwmon_chips, DaemonConfig, DeviceTable, EcChannel, FanEngine, JsonSettings,
    MemorySettings, ProductInfo, SettingsStore, TelemetrySampler, TelemetrySources,
};
use hc_gpu::{AmdGpuSysfs, GpuController};

pub struct Services {
    pub fans: FanEngine,
    pub gpu: Option<GpuController>,
    pub sampler: Arc<TelemetrySampler>,
}

impl Services {
    pub fn start(config: &DaemonConfig) -> anyhow::Result<Self> {
        let product = ProductInfo::detect();
        info!(product = %product.name, version = %product.version, vendor = %product.vendor, "Detected device");

        let table = DeviceTable::load(config.device_table.as_deref())?;
        let chips = discover_hwmon_chips(Path::new(paths::HWMON_BASE));
        debug!(chips = chips.len(), "hwmon chips discovered");

        let ec = if table.ec_device_for(&product).is_some() {
            match EcChannel::open(config.ec) {
                Ok(channel) => Some(Arc::new(channel)),
                Err(e) => {
                    warn!(error = %e, "EC channel unavailable, EC fans disabled");
                    None
                }
            }
        } else {
            None
        };

        let fans = FanEngine::resolve(
            &table,
            &chips,
            &product,
            ec,
            open_settings(&config.settings_path()),
            config.calibration,
        );
        for (index, fan) in fans.get_fan_config_list().iter().enumerate() {
            info!(index, name = %fan.name, mode = %fan.mode, max_rpm = fan.max_rpm, "Fan ready");
        }

        let card = match AmdGpuSysfs::discover() {
            Ok(card) => Some(Arc::new(card)),
            Err(e) => {
                info!(error = %e, "No controllable GPU, clock control disabled");
                None
            }
        };

        let sources = TelemetrySources::new(card.as_ref().map(|c| c.gpu_busy_path()));
        let sampler = Arc::new(TelemetrySampler::new(sources, config.telemetry));
        sampler.start()?;

        let gpu = card.and_then(|card| {
            match GpuController::new(card, sampler.clone(), config.gpu.clone()) {
                Ok(controller) => {
                    if config.gpu_watcher && !controller.start_watcher() {
                        warn!("GPU corrective watcher not started");
                    }
                    Some(controller)
                }
                Err(e) => {
                    warn!(error = %e, "GPU clock control disabled");
                    None
                }
            }
        });

        Ok(Self { fans, gpu, sampler })
    }

    /// Poll every fan's temperature until `shutdown` is set.
    ///
    /// A CPU reading also drives RPM limit calibration.
    pub fn run(&self, shutdown: &AtomicBool, interval: Duration) {
        let check = Duration::from_millis(daemon::SHUTDOWN_CHECK_MS);
        while !shutdown.load(Ordering::SeqCst) {
            for index in 0..self.fans.fan_count() {
                if let Some(temp) = self.fans.get_fan_temp(index) {
                    debug!(index, temp, rpm = self.fans.get_fan_rpm(index), "Fan poll");
                }
            }

            let deadline = Instant::now() + interval;
            while !shutdown.load(Ordering::SeqCst) && Instant::now() < deadline {
                thread::sleep(check);
            }
        }
    }

    /// Return the hardware to firmware control
    pub fn shutdown(&self) {
        if let Some(gpu) = &self.gpu {
            gpu.unload();
            if !gpu.set_gpu_freq_range(0, 0) {
                error!("Failed to restore the GPU clock range");
            }
        }
        for index in 0..self.fans.fan_count() {
            if !self.fans.set_fan_auto(index, true) {
                warn!(index, "Fan left in manual mode");
            }
        }
        self.sampler.stop();
        info!("Hardware returned to firmware control");
    }
}

fn open_settings(path: &Path) -> Arc<dyn SettingsStore> {
    match JsonSettings::load(path) {
        Ok(settings) => {
            debug!(path = %settings.path().display(), "Settings loaded");
            Arc::new(settings)
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Settings unreadable, calibration will not persist");
            Arc::new(MemorySettings::new())
        }
    }
}
