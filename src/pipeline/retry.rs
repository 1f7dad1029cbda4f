//! Retry policy for transient stage failures.

use std::time::Duration;

/// Bounded attempts with exponential backoff between them.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum attempts per stage (including the first try)
    pub max_attempts: u32,

    /// Delay before the first retry
    pub initial_delay: Duration,

    /// Ceiling on the backoff
    pub max_delay: Duration,

    /// Delay multiplier after each retry
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Whether another attempt is allowed after `failures` failed ones
    pub fn should_retry(&self, failures: u32) -> bool {
        failures < self.max_attempts
    }

    /// Backoff before retry number `failures` (1-indexed)
    pub fn delay_for_attempt(&self, failures: u32) -> Duration {
        if failures <= 1 {
            return self.initial_delay;
        }

        let scaled =
            self.initial_delay.as_millis() as f64 * self.multiplier.powi((failures - 1) as i32);
        let capped = scaled.min(self.max_delay.as_millis() as f64) as u64;

        Duration::from_millis(capped)
    }
}
