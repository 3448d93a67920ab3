//! Persistent key-value settings
//!
//! The fan engine keeps calibrated limits here (`fan{N}_rpm_value_max`). The
//! file store writes atomically (temp file + rename) on every change.

use parking_lot::RwLock;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::Result;
use hc_error::HcError;

/// Minimal typed key-value store
pub trait SettingsStore: Send + Sync {
    fn get_u32(&self, key: &str) -> Option<u32>;

    /// Store and persist a value
    fn set_u32(&self, key: &str, value: u32) -> Result<()>;
}

/// JSON object on disk
#[derive(Debug)]
pub struct JsonSettings {
    path: PathBuf,
    values: RwLock<BTreeMap<String, Value>>,
}

impl JsonSettings {
    /// Load `path`; a missing file is an empty store
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let values = if path.exists() {
            let content = fs::read_to_string(&path).map_err(|e| HcError::transient(&path, e))?;
            if content.trim().is_empty() {
                BTreeMap::new()
            } else {
                serde_json::from_str(&content)?
            }
        } else {
            debug!(path = %path.display(), "No settings file yet");
            BTreeMap::new()
        };
        Ok(Self { path, values: RwLock::new(values) })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn save(&self, values: &BTreeMap<String, Value>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| HcError::transient(parent, e))?;
        }
        let json = serde_json::to_string_pretty(values)?;

        let temp_path = self.path.with_extension("json.tmp");
        let mut file = fs::File::create(&temp_path).map_err(|e| HcError::transient(&temp_path, e))?;
        file.write_all(json.as_bytes()).map_err(|e| HcError::transient(&temp_path, e))?;
        file.sync_all().map_err(|e| HcError::transient(&temp_path, e))?;
        drop(file);

        fs::rename(&temp_path, &self.path).map_err(|e| HcError::transient(&self.path, e))
    }
}

impl SettingsStore for JsonSettings {
    fn get_u32(&self, key: &str) -> Option<u32> {
        let values = self.values.read();
        let value = values.get(key)?;
        match value.as_u64().and_then(|v| u32::try_from(v).ok()) {
            Some(v) => Some(v),
            None => {
                warn!(key, %value, "Ignoring non-integer setting");
                None
            }
        }
    }

    fn set_u32(&self, key: &str, value: u32) -> Result<()> {
        let mut values = self.values.write();
        values.insert(key.to_string(), Value::from(value));
        self.save(&values)
    }
}

/// Non-persistent store, used when the settings file cannot be opened
#[derive(Debug, Default)]
pub struct MemorySettings {
    values: RwLock<BTreeMap<String, u32>>,
}

impl MemorySettings {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SettingsStore for MemorySettings {
    fn get_u32(&self, key: &str) -> Option<u32> {
        self.values.read().get(key).copied()
    }

    fn set_u32(&self, key: &str, value: u32) -> Result<()> {
        self.values.write().insert(key.to_string(), value);
        Ok(())
    }
}
