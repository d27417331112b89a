//! Layered configuration
//!
//! Precedence (lowest to highest):
//! 1. Programmatic defaults
//! 2. `fleetbench.yaml` in the working directory, or the `--config` file
//! 3. Environment variables (`FLEETBENCH_*`, nested with `__`)
//! 4. CLI flags, applied by the command after loading

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use fleetbench_auth::{CredentialRegistry, CredentialSlot, CredentialSource};
use fleetbench_core::{
    CheckpointConfig, ResumeMode, RetryConfig, RunConfig, ShardingPolicy, ThrottleConfig,
};
use fleetbench_samplers::GridConfig;
use fleetbench_vendors::SimulationConfig;
use serde::{Deserialize, Serialize};

/// Default config file, looked up in the working directory
pub const DEFAULT_CONFIG_FILE: &str = "fleetbench.yaml";

/// One credential slot as written in the config file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlotConfig {
    /// Slot id, unique within its provider
    pub id: String,
    /// Endpoint the slot talks to
    pub endpoint: String,
    /// Environment variable holding the slot's API key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,
    /// Concurrency ceiling
    #[serde(default = "default_slot_workers")]
    pub max_workers: usize,
    /// Requests-per-second ceiling
    #[serde(default = "default_slot_qps")]
    pub max_qps: f64,
}

fn default_slot_workers() -> usize {
    4
}

fn default_slot_qps() -> f64 {
    2.0
}

impl SlotConfig {
    fn to_slot(&self) -> CredentialSlot {
        let credential = match &self.api_key_env {
            Some(var) => CredentialSource::Env(var.clone()),
            None => CredentialSource::None,
        };
        CredentialSlot::new(self.id.as_str(), self.endpoint.as_str())
            .with_credential(credential)
            .with_ceiling(self.max_workers, self.max_qps)
    }
}

/// A provider whose slots are discovered from `PREFIX`, `PREFIX_2`, ...
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyPoolConfig {
    /// Environment variable prefix
    pub prefix: String,
    /// Endpoint shared by every key
    pub endpoint: String,
    /// Per-key concurrency ceiling
    #[serde(default = "default_slot_workers")]
    pub max_workers: usize,
    /// Per-key requests-per-second ceiling
    #[serde(default = "default_slot_qps")]
    pub max_qps: f64,
}

/// Full application configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Directory holding segments, snapshot and cursor
    pub state_dir: PathBuf,
    /// Providers with explicitly listed slots
    pub providers: BTreeMap<String, Vec<SlotConfig>>,
    /// Providers whose slots come from environment key pools
    pub key_pools: BTreeMap<String, KeyPoolConfig>,
    /// Throttle defaults for every shard
    pub throttle: ThrottleConfig,
    /// Retry policy
    pub retry: RetryConfig,
    /// Flush thresholds
    pub checkpoint: CheckpointConfig,
    /// How a provider's tasks are spread over its slots
    pub sharding: ShardingPolicy,
    /// What counts as done when resuming
    pub resume: ResumeMode,
    /// Simulated endpoint behaviour
    pub simulation: SimulationConfig,
    /// Task grid
    pub grid: GridConfig,
    /// Seconds between background merges while a run is in progress
    pub progress_interval_secs: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        let simulated = (1..=3)
            .map(|i| SlotConfig {
                id: format!("key-{}", i),
                endpoint: "sim://local".to_string(),
                api_key_env: None,
                max_workers: 8,
                max_qps: 20.0,
            })
            .collect();
        let mut providers = BTreeMap::new();
        providers.insert("simulated".to_string(), simulated);

        Self {
            state_dir: PathBuf::from(".fleetbench"),
            providers,
            key_pools: BTreeMap::new(),
            throttle: ThrottleConfig::default(),
            retry: RetryConfig::default(),
            checkpoint: CheckpointConfig::default(),
            sharding: ShardingPolicy::default(),
            resume: ResumeMode::default(),
            simulation: SimulationConfig::default(),
            grid: GridConfig::default(),
            progress_interval_secs: 2,
        }
    }
}

impl AppConfig {
    /// Load configuration with hierarchical merging
    ///
    /// `path` replaces the default `fleetbench.yaml`; unlike the default it
    /// must exist.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = match path {
            Some(path) => {
                anyhow::ensure!(path.exists(), "config file {} not found", path.display());
                path.to_path_buf()
            }
            None => PathBuf::from(DEFAULT_CONFIG_FILE),
        };

        let config: AppConfig = Self::figment(&file)
            .extract()
            .with_context(|| format!("Failed to load configuration (file: {})", file.display()))?;
        config.validate()?;
        Ok(config)
    }

    fn figment(file: &Path) -> Figment {
        Figment::new()
            .merge(Serialized::defaults(AppConfig::default()))
            .merge(Yaml::file(file))
            .merge(Env::prefixed("FLEETBENCH_").split("__"))
    }

    /// Validate every section
    pub fn validate(&self) -> Result<()> {
        self.run_config().validate().context("invalid run configuration")?;
        self.simulation
            .validate()
            .context("invalid simulation configuration")?;
        self.grid.validate().context("invalid task grid")?;
        anyhow::ensure!(
            self.progress_interval_secs > 0,
            "progress_interval_secs must be at least 1"
        );
        Ok(())
    }

    /// Scheduling-related sections as one run configuration
    pub fn run_config(&self) -> RunConfig {
        RunConfig {
            throttle: self.throttle.clone(),
            retry: self.retry.clone(),
            checkpoint: self.checkpoint.clone(),
            sharding: self.sharding,
        }
    }

    /// Build the credential registry
    ///
    /// Key pools with no keys in the environment are skipped with a warning.
    pub fn registry(&self) -> Result<CredentialRegistry> {
        let mut registry = CredentialRegistry::new();
        for (provider, slots) in &self.providers {
            let slots = slots.iter().map(SlotConfig::to_slot).collect();
            registry = registry
                .with_provider(provider.as_str(), slots)
                .with_context(|| format!("invalid provider '{}'", provider))?;
        }
        for (provider, pool) in &self.key_pools {
            let slots = CredentialRegistry::discover_key_pool(
                &pool.prefix,
                &pool.endpoint,
                pool.max_workers,
                pool.max_qps,
            );
            if slots.is_empty() {
                tracing::warn!(provider = %provider, prefix = %pool.prefix, "No keys found for key pool");
                continue;
            }
            registry = registry
                .with_provider(provider.as_str(), slots)
                .with_context(|| format!("invalid key pool '{}'", provider))?;
        }
        Ok(registry)
    }
}
