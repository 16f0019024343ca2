//! Variable rewards for time based achievements.

use serde::{Deserialize, Serialize};

/// Reward bounds for a best-completion-time achievement.
///
/// `fast` and `slow` are durations in the same unit as the measured time;
/// `0 < fast < slow` is required for interpolation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRewardScale {
    pub fast: i64,
    pub slow: i64,
    pub min: u32,
    pub max: u32,
    pub perfect: u32,
}

/// Reward for a completion time `t`:
/// - `perfect` when `t <= fast`
/// - `0` when `t > slow`
/// - otherwise linear between `(log10 slow, min)` and `(log10 fast, max)`
///   evaluated at `log10 t`
pub fn time_reward(t: i64, scale: &TimeRewardScale) -> u32 {
    if t <= scale.fast {
        return scale.perfect;
    }
    if t > scale.slow || scale.fast <= 0 {
        return 0;
    }
    let log_fast = (scale.fast as f64).log10();
    let log_slow = (scale.slow as f64).log10();
    let log_t = (t as f64).log10();
    let span = log_slow - log_fast;
    if span <= f64::EPSILON {
        return scale.min;
    }
    let fraction = (log_slow - log_t) / span;
    let min = f64::from(scale.min);
    let max = f64::from(scale.max);
    (min + fraction * (max - min)).round().clamp(0.0, f64::from(u32::MAX)) as u32
}
