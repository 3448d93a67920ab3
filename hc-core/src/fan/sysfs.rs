//! hwmon file helpers
//!
//! hwmon attributes are single ASCII integers. Temperatures are millidegrees
//! Celsius; PWM files take a raw duty in the driver's range.

use std::fs;
use std::io;
use std::path::Path;

use crate::constants::temperature;
use crate::Result;
use hc_error::HcError;

fn parse_error(path: &Path, content: &str) -> HcError {
    HcError::transient(
        path,
        io::Error::new(io::ErrorKind::InvalidData, format!("not an integer: '{}'", content.trim())),
    )
}

pub fn read_u32(path: &Path) -> Result<u32> {
    let content = fs::read_to_string(path).map_err(|e| HcError::transient(path, e))?;
    content.trim().parse::<u32>().map_err(|_| parse_error(path, &content))
}

pub fn write_u32(path: &Path, value: u32) -> Result<()> {
    fs::write(path, value.to_string()).map_err(|e| HcError::transient(path, e))
}

/// Read a `tempN_input` file in degrees Celsius
pub fn read_temperature(path: &Path) -> Result<f32> {
    let content = fs::read_to_string(path).map_err(|e| HcError::transient(path, e))?;
    let millidegrees = content
        .trim()
        .parse::<i32>()
        .map_err(|_| parse_error(path, &content))?;
    Ok(millidegrees as f32 / temperature::MILLIDEGREE_DIVISOR)
}
