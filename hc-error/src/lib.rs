//! Unified error handling for handheld-control
//!
//! A single error type shared by the EC channel, the fan engine, the telemetry
//! sampler and the GPU frequency controller. Engines use it internally; the
//! public per-fan and per-GPU operations log it and turn it into a
//! success flag or a sentinel value.

use std::io;
use std::path::PathBuf;

/// Result type alias using HcError
pub type Result<T> = std::result::Result<T, HcError>;

/// Unified error type for all handheld-control operations
#[derive(thiserror::Error, Debug)]
pub enum HcError {
    // ============================================================================
    // Hardware Access Errors
    // ============================================================================
    #[error("Hardware unavailable: {0}")]
    HardwareUnavailable(String),

    #[error("EC handshake timed out on port 0x{port:02X} waiting for {condition}")]
    ProtocolTimeout {
        port: u16,
        condition: &'static str,
    },

    #[error("Transient I/O failure on {path}: {source}")]
    TransientIo {
        path: PathBuf,
        source: io::Error,
    },

    #[error("EC write of 0x{value:02X} at offset 0x{offset:04X} failed: {source}")]
    EcWrite {
        offset: u16,
        value: u8,
        source: Box<HcError>,
    },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    // ============================================================================
    // Validation Errors
    // ============================================================================
    #[error("Invalid {what}: {value}")]
    InvalidRange {
        what: &'static str,
        value: String,
    },

    // ============================================================================
    // Configuration Errors
    // ============================================================================
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Failed to parse JSON: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("File watch error: {0}")]
    Watch(String),
}

impl HcError {
    /// Create a hardware-unavailable error from a string
    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::HardwareUnavailable(msg.into())
    }

    /// Create a configuration error from a string
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Create an out-of-domain error for a named quantity
    pub fn invalid(what: &'static str, value: impl ToString) -> Self {
        Self::InvalidRange {
            what,
            value: value.to_string(),
        }
    }

    /// Attach the EC register and value to a failed write
    pub fn ec_write(offset: impl Into<u16>, value: u8, source: HcError) -> Self {
        Self::EcWrite {
            offset: offset.into(),
            value,
            source: Box::new(source),
        }
    }

    /// Wrap an I/O error with the sysfs or device path it happened on
    pub fn transient(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::TransientIo {
            path: path.into(),
            source,
        }
    }
}
