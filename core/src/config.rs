//! Run configuration types
//!
//! Defines how a run is throttled, retried, checkpointed and sharded.
//! Every section has defaults and a `validate()` step.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Whether a shard's throttle adapts to observed outcomes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThrottleMode {
    /// Workers and QPS stay at their initial values
    Fixed,
    /// Workers and QPS follow the backoff / increase state machine
    #[default]
    Adaptive,
}

impl std::str::FromStr for ThrottleMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "fixed" => Ok(ThrottleMode::Fixed),
            "adaptive" => Ok(ThrottleMode::Adaptive),
            other => Err(format!("unknown throttle mode: {} (expected fixed|adaptive)", other)),
        }
    }
}

/// Per-shard admission control settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThrottleConfig {
    /// Fixed or adaptive
    pub mode: ThrottleMode,
    /// Worker count a shard starts with
    pub initial_workers: usize,
    /// Requests per second a shard starts with
    pub initial_qps: f64,
    /// Worker floor
    pub min_workers: usize,
    /// Worker ceiling
    pub max_workers: usize,
    /// QPS floor
    pub min_qps: f64,
    /// QPS ceiling
    pub max_qps: f64,
    /// Consecutive clean completions needed before an increase
    pub increase_after: u32,
    /// Multiplicative QPS increase applied on each step up
    pub increase_factor: f64,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            mode: ThrottleMode::Adaptive,
            initial_workers: 2,
            initial_qps: 2.0,
            min_workers: 1,
            max_workers: 8,
            min_qps: 1.0,
            max_qps: 10.0,
            increase_after: 5,
            increase_factor: 1.2,
        }
    }
}

impl ThrottleConfig {
    /// Set the mode
    pub fn with_mode(mut self, mode: ThrottleMode) -> Self {
        self.mode = mode;
        self
    }

    /// Set the starting point
    pub fn with_initial(mut self, workers: usize, qps: f64) -> Self {
        self.initial_workers = workers;
        self.initial_qps = qps;
        self
    }

    /// Narrow the ceilings to a slot's declared limits
    ///
    /// Floors win over ceilings if a slot declares less than the floor,
    /// and the starting point is clamped into the resulting range.
    pub fn capped_to(&self, max_workers: usize, max_qps: f64) -> Self {
        let mut capped = self.clone();
        capped.max_workers = self.max_workers.min(max_workers).max(self.min_workers);
        capped.max_qps = self.max_qps.min(max_qps).max(self.min_qps);
        capped.initial_workers = self
            .initial_workers
            .clamp(capped.min_workers, capped.max_workers);
        capped.initial_qps = self.initial_qps.clamp(capped.min_qps, capped.max_qps);
        capped
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.min_workers == 0 {
            return Err(ConfigError::InvalidWorkers(
                "min_workers must be at least 1".into(),
            ));
        }
        if self.min_workers > self.max_workers {
            return Err(ConfigError::InvalidWorkers(format!(
                "min_workers ({}) exceeds max_workers ({})",
                self.min_workers, self.max_workers
            )));
        }
        if !(self.min_workers..=self.max_workers).contains(&self.initial_workers) {
            return Err(ConfigError::InvalidWorkers(format!(
                "initial_workers ({}) outside [{}, {}]",
                self.initial_workers, self.min_workers, self.max_workers
            )));
        }
        if !self.min_qps.is_finite() || self.min_qps <= 0.0 {
            return Err(ConfigError::InvalidQps("min_qps must be positive".into()));
        }
        if !self.max_qps.is_finite() || self.min_qps > self.max_qps {
            return Err(ConfigError::InvalidQps(format!(
                "min_qps ({}) exceeds max_qps ({})",
                self.min_qps, self.max_qps
            )));
        }
        if self.initial_qps < self.min_qps || self.initial_qps > self.max_qps {
            return Err(ConfigError::InvalidQps(format!(
                "initial_qps ({}) outside [{}, {}]",
                self.initial_qps, self.min_qps, self.max_qps
            )));
        }
        if self.increase_after == 0 {
            return Err(ConfigError::InvalidQps(
                "increase_after must be at least 1".into(),
            ));
        }
        if !self.increase_factor.is_finite() || self.increase_factor <= 1.0 {
            return Err(ConfigError::InvalidQps(
                "increase_factor must be greater than 1".into(),
            ));
        }
        Ok(())
    }
}

/// Retry schedule for retryable failures
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Attempt ceiling, including the first attempt
    pub max_attempts: u32,
    /// Lower bound of the jittered base delay
    pub base_delay_min_ms: u64,
    /// Upper bound of the jittered base delay
    pub base_delay_max_ms: u64,
    /// Growth factor per retry
    pub multiplier: f64,
    /// Cap on any single delay
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_min_ms: 500,
            base_delay_max_ms: 1_500,
            multiplier: 1.5,
            max_delay_ms: 10_000,
        }
    }
}

impl RetryConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::InvalidRetry(
                "max_attempts must be at least 1".into(),
            ));
        }
        if self.base_delay_min_ms > self.base_delay_max_ms {
            return Err(ConfigError::InvalidRetry(format!(
                "base_delay_min_ms ({}) exceeds base_delay_max_ms ({})",
                self.base_delay_min_ms, self.base_delay_max_ms
            )));
        }
        if !self.multiplier.is_finite() || self.multiplier < 1.0 {
            return Err(ConfigError::InvalidRetry(
                "multiplier must be at least 1".into(),
            ));
        }
        if self.max_delay_ms < self.base_delay_min_ms {
            return Err(ConfigError::InvalidRetry(
                "max_delay_ms must not be below base_delay_min_ms".into(),
            ));
        }
        Ok(())
    }
}

/// When the checkpoint coordinator flushes its buffer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckpointConfig {
    /// Flush once this many results are buffered
    pub flush_threshold: usize,
    /// Flush at least this often while results are buffered
    pub flush_interval_secs: u64,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            flush_threshold: 10,
            flush_interval_secs: 60,
        }
    }
}

impl CheckpointConfig {
    /// Flush interval as a `Duration`
    pub fn flush_interval(&self) -> Duration {
        Duration::from_secs(self.flush_interval_secs)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.flush_threshold == 0 {
            return Err(ConfigError::InvalidCheckpoint(
                "flush_threshold must be at least 1".into(),
            ));
        }
        if self.flush_interval_secs == 0 {
            return Err(ConfigError::InvalidCheckpoint(
                "flush_interval_secs must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// How tasks of one provider are distributed over its credential slots
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShardingPolicy {
    /// Even split across all slots: sizes differ by at most one
    #[default]
    EvenSplit,
    /// Every prompting strategy gets its own slot (round-robin when there
    /// are more strategies than slots)
    PinByStrategy,
}

/// Complete run configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Admission control defaults for every shard
    pub throttle: ThrottleConfig,
    /// Retry schedule
    pub retry: RetryConfig,
    /// Flush thresholds
    pub checkpoint: CheckpointConfig,
    /// Sharding policy
    pub sharding: ShardingPolicy,
}

impl RunConfig {
    /// Validate every section
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.throttle.validate()?;
        self.retry.validate()?;
        self.checkpoint.validate()?;
        Ok(())
    }
}
