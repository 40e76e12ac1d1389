//! Outbound message rate

use std::time::Duration;
use tokio::time::Instant;

const RATE_WINDOW: Duration = Duration::from_secs(1);

/// Counts data frames sent and recomputes a messages-per-second figure once
/// per second
#[derive(Debug, Clone)]
pub struct MessageRate {
    window_start: Option<Instant>,
    in_window: u64,
    per_second: u64,
    total: u64,
}

impl Default for MessageRate {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageRate {
    pub fn new() -> Self {
        Self {
            window_start: None,
            in_window: 0,
            per_second: 0,
            total: 0,
        }
    }

    /// Account for `sent` frames at `now`
    pub fn record(&mut self, sent: u64, now: Instant) {
        let start = *self.window_start.get_or_insert(now);
        self.in_window += sent;
        self.total += sent;

        let elapsed = now.saturating_duration_since(start);
        if elapsed >= RATE_WINDOW {
            self.per_second = (self.in_window as f64 / elapsed.as_secs_f64()).round() as u64;
            self.in_window = 0;
            self.window_start = Some(now);
        }
    }

    /// Last computed rate
    pub fn per_second(&self) -> u64 {
        self.per_second
    }

    /// Frames sent since the last reset
    pub fn total(&self) -> u64 {
        self.total
    }

    /// Start a new measurement; the total is kept
    pub fn restart(&mut self) {
        self.window_start = None;
        self.in_window = 0;
        self.per_second = 0;
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_updates_after_one_second() {
        let start = Instant::now();
        let mut rate = MessageRate::new();

        for tick in 0..20u64 {
            rate.record(5, start + Duration::from_millis(tick * 50));
        }
        assert_eq!(rate.per_second(), 0);

        rate.record(5, start + Duration::from_millis(1000));
        assert_eq!(rate.per_second(), 105);
        assert_eq!(rate.total(), 105);
    }

    #[test]
    fn test_restart_keeps_total() {
        let start = Instant::now();
        let mut rate = MessageRate::new();
        rate.record(10, start);
        rate.record(10, start + Duration::from_secs(2));
        assert_eq!(rate.per_second(), 10);

        rate.restart();
        assert_eq!(rate.per_second(), 0);
        assert_eq!(rate.total(), 20);

        rate.reset();
        assert_eq!(rate.total(), 0);
    }
}
