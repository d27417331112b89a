//! Retry schedule for transient failures

use std::time::Duration;

use rand::Rng;

use crate::config::RetryConfig;
use crate::error::ErrorKind;

/// Jittered exponential retry schedule
///
/// The n-th retry (0-based) waits `base * multiplier^n`, where `base` is
/// drawn uniformly from `[base_min, base_max]` and the result is capped at
/// `max_delay`.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_min: Duration,
    base_max: Duration,
    multiplier: f64,
    max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

impl RetryPolicy {
    /// Build a policy from configuration
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_min: Duration::from_millis(config.base_delay_min_ms),
            base_max: Duration::from_millis(config.base_delay_max_ms.max(config.base_delay_min_ms)),
            multiplier: config.multiplier.max(1.0),
            max_delay: Duration::from_millis(config.max_delay_ms),
        }
    }

    /// A policy that never retries
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Attempt ceiling, including the first attempt
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Whether attempt number `attempt` (1-based), failing with `kind`,
    /// gets another try
    pub fn should_retry(&self, kind: ErrorKind, attempt: u32) -> bool {
        kind.is_retryable() && attempt < self.max_attempts
    }

    /// Whether a failure of `kind` on `attempt` used up the attempt ceiling
    pub fn is_exhausted(&self, kind: ErrorKind, attempt: u32) -> bool {
        kind.is_retryable() && attempt >= self.max_attempts
    }

    /// Delay before retry number `retry_index` (0 = first retry)
    pub fn delay_for(&self, retry_index: u32) -> Duration {
        let base = if self.base_max > self.base_min {
            rand::thread_rng().gen_range(self.base_min..=self.base_max)
        } else {
            self.base_min
        };
        let exponent = i32::try_from(retry_index).unwrap_or(i32::MAX);
        let scaled = base.as_secs_f64() * self.multiplier.powi(exponent);
        if scaled.is_finite() && scaled < self.max_delay.as_secs_f64() {
            Duration::from_secs_f64(scaled)
        } else {
            self.max_delay
        }
    }

    /// Delay before a retry, honouring a provider's retry-after hint
    pub fn delay_with_hint(&self, retry_index: u32, hint: Option<Duration>) -> Duration {
        let delay = self.delay_for(retry_index);
        match hint {
            Some(hint) => delay.max(hint).min(self.max_delay),
            None => delay,
        }
    }
}
