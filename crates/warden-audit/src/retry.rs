//! Retry schedule for sink delivery.

use std::time::Duration;
use warden_core::config::SinkConfig;

/// Exponential backoff: after failed attempt `n` (1-based) the forwarder waits
/// `min(backoff_base^n, backoff_cap)` seconds before attempt `n + 1`.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_base: f64,
    pub backoff_cap: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base: 2.0,
            backoff_cap: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    pub fn from_sink(config: &SinkConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            backoff_base: config.backoff_base,
            backoff_cap: Duration::try_from_secs_f64(config.backoff_cap)
                .unwrap_or(Duration::from_secs(60)),
        }
    }

    /// Delay after failed attempt `attempt`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let secs = self.backoff_base.powi(exponent);
        Duration::try_from_secs_f64(secs)
            .map(|delay| delay.min(self.backoff_cap))
            .unwrap_or(self.backoff_cap)
    }
}
