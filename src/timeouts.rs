//! Timeouts for the baseline and per-mutant test runs.

use std::cmp::max;
use std::time::Duration;

/// Fixed ceiling for the baseline run; if a clean suite takes longer than
/// this, mutation testing is not going to be practical anyway.
pub const BASELINE_TIMEOUT: Duration = Duration::from_secs(600);

/// Floor for the per-mutant timeout, so very fast suites still get room for
/// build noise.
pub const MINIMUM_MUTANT_TIMEOUT: Duration = Duration::from_secs(30);

/// The measured duration of a passing baseline, and the per-mutant timeout
/// derived from it.
///
/// Invariant: `timeout == max(30s, duration * multiplier)`.
#[derive(Debug, Clone, Copy)]
pub struct BaselineResult {
    pub duration: Duration,
    pub timeout: Duration,
}

impl BaselineResult {
    pub fn new(duration: Duration, timeout_multiplier: f64) -> BaselineResult {
        let scaled = Duration::from_secs_f64(duration.as_secs_f64() * timeout_multiplier);
        BaselineResult {
            duration,
            timeout: max(MINIMUM_MUTANT_TIMEOUT, scaled),
        }
    }
}
