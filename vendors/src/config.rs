//! Simulation configuration
//!
//! Knobs for the simulated endpoint. Rates are per attempt and independent:
//! a hang is rolled first, then a rate limit, then a structural failure,
//! then a partial result.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration validation error.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigValidationError {
    /// A probability is outside `[0, 1]`.
    #[error("{field} must be within [0, 1], got {value}")]
    InvalidRate {
        /// Offending field
        field: String,
        /// Its value
        value: f64,
    },

    /// The latency range is empty.
    #[error("latency_ms_min ({min}) exceeds latency_ms_max ({max})")]
    InvalidLatency {
        /// Lower bound
        min: u64,
        /// Upper bound
        max: u64,
    },

    /// A per-slot capacity is not positive.
    #[error("capacity for slot {slot} must be positive, got {value}")]
    InvalidCapacity {
        /// Slot id
        slot: String,
        /// Its value
        value: f64,
    },
}

/// Behaviour of the simulated endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Seed for every random draw; the same seed gives the same outcome for
    /// the same task and attempt
    pub seed: u64,

    /// Shortest simulated call
    pub latency_ms_min: u64,

    /// Longest simulated call
    pub latency_ms_max: u64,

    /// Chance an attempt is answered with HTTP 429
    pub rate_limit_rate: f64,

    /// Per-slot override of `rate_limit_rate`
    pub slot_rate_limit_rates: BTreeMap<String, f64>,

    /// Requests per second a slot serves before answering 429
    pub slot_capacity_qps: BTreeMap<String, f64>,

    /// Chance an attempt fails structurally (wrong tool, bad parameters, ...)
    pub failure_rate: f64,

    /// Chance a completed attempt is only partially correct
    pub partial_rate: f64,

    /// Chance an attempt never answers
    pub hang_rate: f64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            latency_ms_min: 50,
            latency_ms_max: 250,
            rate_limit_rate: 0.0,
            slot_rate_limit_rates: BTreeMap::new(),
            slot_capacity_qps: BTreeMap::new(),
            failure_rate: 0.05,
            partial_rate: 0.1,
            hang_rate: 0.0,
        }
    }
}

impl SimulationConfig {
    /// Instant, always-successful endpoint
    pub fn perfect() -> Self {
        Self {
            latency_ms_min: 0,
            latency_ms_max: 0,
            failure_rate: 0.0,
            partial_rate: 0.0,
            ..Default::default()
        }
    }

    /// Set the seed.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Set the latency range.
    pub fn with_latency_ms(mut self, min: u64, max: u64) -> Self {
        self.latency_ms_min = min;
        self.latency_ms_max = max;
        self
    }

    /// Rate-limit one slot with its own probability.
    pub fn with_slot_rate_limit(mut self, slot: impl Into<String>, rate: f64) -> Self {
        self.slot_rate_limit_rates.insert(slot.into(), rate);
        self
    }

    /// Cap one slot's served request rate.
    pub fn with_slot_capacity(mut self, slot: impl Into<String>, qps: f64) -> Self {
        self.slot_capacity_qps.insert(slot.into(), qps);
        self
    }

    /// Rate-limit probability for a slot
    pub fn rate_limit_rate_for(&self, slot: &str) -> f64 {
        self.slot_rate_limit_rates
            .get(slot)
            .copied()
            .unwrap_or(self.rate_limit_rate)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        let rates = [
            ("rate_limit_rate".to_string(), self.rate_limit_rate),
            ("failure_rate".to_string(), self.failure_rate),
            ("partial_rate".to_string(), self.partial_rate),
            ("hang_rate".to_string(), self.hang_rate),
        ]
        .into_iter()
        .chain(
            self.slot_rate_limit_rates
                .iter()
                .map(|(slot, rate)| (format!("slot_rate_limit_rates.{}", slot), *rate)),
        );
        for (field, value) in rates {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigValidationError::InvalidRate { field, value });
            }
        }

        if self.latency_ms_min > self.latency_ms_max {
            return Err(ConfigValidationError::InvalidLatency {
                min: self.latency_ms_min,
                max: self.latency_ms_max,
            });
        }

        for (slot, qps) in &self.slot_capacity_qps {
            if !qps.is_finite() || *qps <= 0.0 {
                return Err(ConfigValidationError::InvalidCapacity {
                    slot: slot.clone(),
                    value: *qps,
                });
            }
        }
        Ok(())
    }
}
