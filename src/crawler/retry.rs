//! Retry policy for transient fetch failures

use crate::config::RetryConfig;
use std::time::Duration;

/// Exponential backoff with jitter
///
/// `max_retries` counts retries after the first attempt, so a URL gets at
/// most `max_retries + 1` attempts.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub multiplier: f64,
    /// Random spread as a fraction of the delay (0.0-1.0)
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            initial_backoff: Duration::from_millis(config.initial_backoff_ms),
            max_backoff: Duration::from_millis(config.max_backoff_ms),
            multiplier: config.multiplier,
            jitter: config.jitter,
        }
    }

    /// Total attempts allowed for one URL
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Whether another attempt may follow `attempts` failed ones
    pub fn should_retry(&self, attempts: u32) -> bool {
        attempts <= self.max_retries
    }

    /// Delay before retry number `retry` (1-based)
    ///
    /// `initial * multiplier^(retry-1)`, capped at `max_backoff`, then
    /// spread by ±`jitter`.
    pub fn backoff(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(63) as i32;
        // Work in microseconds so whole-millisecond delays stay exact
        let initial = self.initial_backoff.as_micros() as f64;
        let max = self.max_backoff.as_micros() as f64;
        let capped = (initial * self.multiplier.powi(exponent)).min(max);

        let jitter_range = capped * self.jitter;
        let delay = if jitter_range > 0.0 {
            capped + rand::random_range(-jitter_range..jitter_range)
        } else {
            capped
        };

        Duration::from_micros(delay.max(0.0).round() as u64)
    }
}
