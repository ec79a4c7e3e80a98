use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Exponential retry schedule applied by a supervising unit runner
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub initial_interval: Duration,
    pub max_interval: Duration,
    pub backoff_coefficient: f64,
    /// Total attempts, including the first one
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_secs(1),
            max_interval: Duration::from_secs(60),
            backoff_coefficient: 2.0,
            max_attempts: 3,
        }
    }
}

impl RetryPolicy {
    pub fn new(
        initial_interval: Duration,
        max_interval: Duration,
        backoff_coefficient: f64,
        max_attempts: u32,
    ) -> Self {
        Self {
            initial_interval,
            max_interval,
            backoff_coefficient,
            max_attempts,
        }
    }

    /// Single attempt, no retries
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Delay to wait after the given 1-based attempt failed:
    /// `min(initial * coefficient^(attempt - 1), max)`
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let delay = self.initial_interval.as_secs_f64() * self.backoff_coefficient.powi(exponent);
        let capped = delay.min(self.max_interval.as_secs_f64());
        if capped.is_finite() && capped > 0.0 {
            Duration::from_secs_f64(capped)
        } else {
            Duration::ZERO
        }
    }

    pub fn has_attempts_remaining(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}
