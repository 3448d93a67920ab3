//! amdgpu overdrive table parsing
//!
//! `pp_od_clk_voltage` looks like:
//!
//! ```text
//! OD_SCLK:
//! 0:        200Mhz
//! 1:       1600Mhz
//! OD_RANGE:
//! SCLK:     200Mhz       1600Mhz
//! CCLK:    1400Mhz       3500Mhz
//! ```
//!
//! Only the shader clock lines are of interest here.

use regex::Regex;
use std::sync::OnceLock;

use crate::FreqWindow;

static OD_SCLK_RE: OnceLock<Option<Regex>> = OnceLock::new();
static OD_RANGE_RE: OnceLock<Option<Regex>> = OnceLock::new();

fn od_sclk_re() -> Option<&'static Regex> {
    OD_SCLK_RE
        .get_or_init(|| Regex::new(r"(?i)OD_SCLK:\s*0:\s*(\d+)\s*mhz\s*1:\s*(\d+)\s*mhz").ok())
        .as_ref()
}

fn od_range_re() -> Option<&'static Regex> {
    OD_RANGE_RE
        .get_or_init(|| Regex::new(r"(?i)OD_RANGE:\s*SCLK:\s*(\d+)\s*mhz\s*(\d+)\s*mhz").ok())
        .as_ref()
}

/// Shader clock information extracted from an OD table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OdTable {
    /// Currently programmed SCLK window
    pub sclk: Option<FreqWindow>,
    /// Hardware SCLK limits
    pub range: Option<FreqWindow>,
}

fn capture_window(re: Option<&Regex>, text: &str) -> Option<FreqWindow> {
    let caps = re?.captures(text)?;
    let min = caps.get(1)?.as_str().parse::<u32>().ok()?;
    let max = caps.get(2)?.as_str().parse::<u32>().ok()?;
    Some(FreqWindow::new(min, max))
}

/// Parse the SCLK window and range from OD table text. Missing sections are `None`.
pub fn parse_od_table(text: &str) -> OdTable {
    OdTable {
        sclk: capture_window(od_sclk_re(), text),
        range: capture_window(od_range_re(), text),
    }
}
