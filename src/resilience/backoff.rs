//! Exponential reconnect backoff.

use std::time::Duration;

/// Growth factor between consecutive attempts.
pub const BACKOFF_FACTOR: f64 = 1.5;

/// Upper bound on any single delay.
pub const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Delay before reconnect attempt `attempt` (1-based).
///
/// `delay = min(base * 1.5^(attempt-1), 30s)`; attempt 0 means "now".
pub fn reconnect_delay(attempt: u32, base: Duration) -> Duration {
    if attempt == 0 {
        return Duration::ZERO;
    }

    let exponent = i32::try_from(attempt - 1).unwrap_or(i32::MAX);
    let delay_ms = base.as_millis() as f64 * BACKOFF_FACTOR.powi(exponent);
    let capped_ms = delay_ms.min(MAX_BACKOFF.as_millis() as f64);

    Duration::from_millis(capped_ms as u64)
}

/// Tracks attempts against a cap and hands out successive delays.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    max_attempts: u32,
    attempts: u32,
}

impl Backoff {
    pub fn new(base: Duration, max_attempts: u32) -> Self {
        Self {
            base,
            max_attempts,
            attempts: 0,
        }
    }

    /// Attempts handed out since the last reset.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Next (attempt, delay), or `None` once the cap is reached.
    pub fn next_delay(&mut self) -> Option<(u32, Duration)> {
        if self.attempts >= self.max_attempts {
            return None;
        }
        self.attempts += 1;
        Some((self.attempts, reconnect_delay(self.attempts, self.base)))
    }

    pub fn reset(&mut self) {
        self.attempts = 0;
    }
}
