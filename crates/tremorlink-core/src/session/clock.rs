//! Session clock
//!
//! Turns a sampling rate into a timer cadence. When the source rate is higher
//! than a UI/network tick can carry one sample at a time, several samples
//! are sent per tick; the tick interval never drops below ~60 fps.

use std::time::Duration;

/// Target tick interval when streaming to a device
pub const DEVICE_TARGET_INTERVAL: Duration = Duration::from_millis(50);

/// Target tick interval for plot-only simulation
pub const SIMULATION_TARGET_INTERVAL: Duration = Duration::from_millis(100);

/// Floor on the tick interval
pub const MIN_TICK_INTERVAL_MS: u64 = 16;

/// Timer cadence derived from a sampling rate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cadence {
    /// Samples drawn per tick
    pub points_per_batch: usize,
    /// Time between ticks
    pub interval: Duration,
}

impl Cadence {
    /// `points_per_batch = max(1, floor(rate * target / 1000))`,
    /// `interval = max(16, floor(1000 * points_per_batch / rate))` ms
    pub fn for_rate(sampling_rate_hz: u32, target_interval: Duration) -> Self {
        let rate = u64::from(sampling_rate_hz.max(1));
        let target_ms = target_interval.as_millis() as u64;

        let points_per_batch = (rate * target_ms / 1000).max(1);
        let interval_ms = (1000 * points_per_batch / rate).max(MIN_TICK_INTERVAL_MS);

        Self {
            points_per_batch: points_per_batch as usize,
            interval: Duration::from_millis(interval_ms),
        }
    }

    /// Samples per second this cadence delivers
    pub fn effective_rate(&self) -> f64 {
        self.points_per_batch as f64 * 1000.0 / self.interval.as_millis() as f64
    }
}
