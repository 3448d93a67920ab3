//! Constants and defaults for handheld-control
//!
//! Paths, EC protocol bytes and empirical thresholds live here. Anything
//! tunable at runtime has a matching field in `DaemonConfig`.

/// System paths
pub mod paths {
    use std::path::PathBuf;

    /// Base path for hwmon devices
    pub const HWMON_BASE: &str = "/sys/class/hwmon";

    /// DMI identity files (`product_name`, `product_version`, `sys_vendor`)
    pub const DMI_ID: &str = "/sys/devices/virtual/dmi/id";

    pub const PROC_STAT: &str = "/proc/stat";

    /// Raw x86 I/O port access, offset = port number
    pub const DEV_PORT: &str = "/dev/port";

    /// Daemon configuration file
    pub const CONFIG_FILE: &str = "/etc/handheld-control/config.json";

    /// State directory used when running as root
    pub const STATE_DIR: &str = "/var/lib/handheld-control";

    pub const SETTINGS_FILE: &str = "settings.json";

    /// Settings location: the state dir for root, the user's config dir otherwise
    pub fn default_settings_path() -> PathBuf {
        // SAFETY: geteuid has no preconditions and cannot fail
        let is_root = unsafe { libc::geteuid() } == 0;
        if !is_root {
            if let Some(dir) = dirs::config_dir() {
                return dir.join("handheld-control").join(SETTINGS_FILE);
            }
        }
        PathBuf::from(STATE_DIR).join(SETTINGS_FILE)
    }
}

/// Embedded controller protocol
pub mod ec {
    /// Status (read) / command (write) port
    pub const CMD_PORT: u16 = 0x66;

    /// Data port
    pub const DATA_PORT: u16 = 0x62;

    /// Input buffer full: EC has not consumed the last byte yet
    pub const STATUS_IBF: u8 = 0x02;

    /// Output buffer full: a byte is ready on the data port
    pub const STATUS_OBF: u8 = 0x01;

    pub const CMD_READ: u8 = 0x80;
    pub const CMD_WRITE: u8 = 0x81;

    /// Handshake poll interval
    pub const POLL_INTERVAL_MS: u64 = 1;

    /// Handshake polls before giving up on a flag
    pub const POLL_RETRIES: u32 = 100;

    /// Indirect RAM access through a Super-I/O style index/data pair
    pub mod ram {
        /// Written to the index port before a sub-index
        pub const SELECT_INDEX: u8 = 0x2E;

        /// Written to the index port before the value
        pub const SELECT_DATA: u8 = 0x2F;

        pub const ADDR_HIGH: u8 = 0x11;
        pub const ADDR_LOW: u8 = 0x10;
        pub const DATA: u8 = 0x12;
    }
}

/// Fan control
pub mod fan {
    /// Writes are skipped when the current duty is within this fraction of the target
    pub const WRITE_SKIP_RATIO: f32 = 0.05;

    /// Largest duty an EC register can hold
    pub const EC_PWM_LIMIT: u32 = 255;

    /// Scope of EC fans in settings keys
    pub const EC_SCOPE: &str = "ec";

    /// Settings key holding a fan's calibrated maximum RPM
    pub fn rpm_max_key(fan_key: &str) -> String {
        format!("{}.rpm_value_max", fan_key)
    }
}

/// Calibration of vendor-supplied RPM limits
pub mod calibration {
    /// Observed RPM must exceed the current max by more than this fraction
    pub const MIN_GAIN_RATIO: f32 = 0.05;

    /// Readings at or above this multiple of the current max are treated as glitches
    pub const MAX_GROWTH_FACTOR: f32 = 2.0;

    /// Only calibrate while the CPU is hot enough for the fan to be near full speed
    pub const MIN_CPU_TEMP_C: f32 = 75.0;
}

/// Temperature sources
pub mod temperature {
    /// Linux hwmon reports millidegrees Celsius
    pub const MILLIDEGREE_DIVISOR: f32 = 1000.0;

    /// hwmon chips that report the CPU package temperature, in priority order
    pub const CPU_CHIPS: &[&str] = &["k10temp", "coretemp", "acpitz"];

    pub const GPU_CHIPS: &[&str] = &["amdgpu"];

    pub const INPUT_FILE: &str = "temp1_input";
}

/// Telemetry sampler
pub mod telemetry {
    pub const TICK_MS: u64 = 5;

    /// Samples kept for smoothing
    pub const WINDOW: usize = 100;
}

/// Daemon loop
pub mod daemon {
    /// Fan temperature poll interval (drives calibration)
    pub const FAN_POLL_INTERVAL_MS: u64 = 2000;

    /// Granularity of the shutdown check while sleeping
    pub const SHUTDOWN_CHECK_MS: u64 = 100;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rpm_max_key() {
        assert_eq!(fan::rpm_max_key("oxpec.cpu"), "oxpec.cpu.rpm_value_max");
        assert_eq!(fan::rpm_max_key("ec.fan"), "ec.fan.rpm_value_max");
    }

    #[test]
    fn test_ec_flags_distinct() {
        assert_eq!(ec::STATUS_IBF & ec::STATUS_OBF, 0);
        assert_ne!(ec::CMD_PORT, ec::DATA_PORT);
    }
}
