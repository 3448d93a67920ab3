//! Feedback decisions for the auto-tune loop
//!
//! Checks run in a fixed priority: CPU starvation first, then GPU load. The
//! CPU check must stay first so a busy CPU is never out-voted by a busy GPU.

use crate::{FeedbackTuning, FreqWindow};

/// What one decision cycle does to the clock target
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Decrease(u32),
    Increase(u32),
    Hold,
}

/// Decide from smoothed busy percentages
pub fn decide(cpu_busy: f32, gpu_busy: f32, tuning: &FeedbackTuning) -> Decision {
    if cpu_busy >= tuning.cpu_busy_high {
        Decision::Decrease(tuning.step_mhz)
    } else if gpu_busy >= tuning.gpu_busy_high {
        if gpu_busy >= tuning.gpu_busy_saturated {
            Decision::Increase(tuning.step_mhz * 2)
        } else {
            Decision::Increase(tuning.step_mhz)
        }
    } else if gpu_busy <= tuning.gpu_busy_low {
        Decision::Decrease(tuning.step_mhz)
    } else {
        Decision::Hold
    }
}

/// Apply a decision to `target`, bounded by the auto-tune window
pub fn next_target(
    target: u32,
    bounds: FreqWindow,
    cpu_busy: f32,
    gpu_busy: f32,
    tuning: &FeedbackTuning,
) -> u32 {
    let moved = match decide(cpu_busy, gpu_busy, tuning) {
        Decision::Decrease(step) => target.saturating_sub(step),
        Decision::Increase(step) => target.saturating_add(step),
        Decision::Hold => target,
    };
    bounds.clamp_value(moved)
}
