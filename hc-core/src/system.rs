//! Device identity from DMI and hwmon chip discovery

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, trace};

use crate::constants::paths;

/// hwmon chip name → chip directory
pub type HwmonChipMap = HashMap<String, PathBuf>;

/// Identity of the running device as reported by firmware
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductInfo {
    pub name: String,
    pub version: String,
    pub vendor: String,
}

impl ProductInfo {
    pub fn new(name: impl Into<String>, version: impl Into<String>, vendor: impl Into<String>) -> Self {
        Self { name: name.into(), version: version.into(), vendor: vendor.into() }
    }

    /// Read from `/sys/devices/virtual/dmi/id`
    pub fn detect() -> Self {
        Self::from_dmi_dir(Path::new(paths::DMI_ID))
    }

    /// Missing files read as empty strings
    pub fn from_dmi_dir(dir: &Path) -> Self {
        let info = Self {
            name: read_dmi(dir, "product_name"),
            version: read_dmi(dir, "product_version"),
            vendor: read_dmi(dir, "sys_vendor"),
        };
        info!(product = %info.name, version = %info.version, vendor = %info.vendor, "Detected device");
        info
    }
}

fn read_dmi(dir: &Path, field: &str) -> String {
    match fs::read_to_string(dir.join(field)) {
        Ok(s) => s.trim().to_string(),
        Err(e) => {
            debug!(field, error = %e, "DMI field unavailable");
            String::new()
        }
    }
}

/// Map every hwmon chip under `base` by its `name`. When two chips share a
/// name the lowest-numbered one wins.
pub fn discover_hwmon_chips(base: &Path) -> HwmonChipMap {
    let mut chips = HwmonChipMap::new();
    let entries = match fs::read_dir(base) {
        Ok(entries) => entries,
        Err(e) => {
            debug!(path = %base.display(), error = %e, "hwmon base not readable");
            return chips;
        }
    };

    let mut dirs: Vec<PathBuf> = entries.flatten().map(|e| e.path()).collect();
    dirs.sort();

    for dir in dirs {
        let Ok(name) = fs::read_to_string(dir.join("name")) else {
            trace!("Skipping {:?} (no name)", dir);
            continue;
        };
        let name = name.trim().to_string();
        if name.is_empty() {
            continue;
        }
        trace!(chip = %name, path = %dir.display(), "Found hwmon chip");
        chips.entry(name).or_insert(dir);
    }

    debug!("hwmon chips found: {}", chips.len());
    chips
}
