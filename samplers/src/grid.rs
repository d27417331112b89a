//! Configuration grid sampler

use std::time::Duration;

use fleetbench_auth::ProviderId;
use fleetbench_core::{Configuration, TestTask};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Grid validation error
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GridError {
    /// A dimension has no values
    #[error("grid dimension '{0}' is empty")]
    EmptyDimension(&'static str),

    /// A dimension lists the same value twice
    #[error("grid dimension '{dimension}' repeats '{value}'")]
    DuplicateValue {
        /// Dimension name
        dimension: &'static str,
        /// Repeated value
        value: String,
    },

    /// Task timeout is zero
    #[error("task timeout must be positive")]
    ZeroTimeout,
}

/// Dimensions of the configuration grid
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GridConfig {
    /// Prompting strategies
    pub strategies: Vec<String>,
    /// Target reliability buckets
    pub reliabilities: Vec<String>,
    /// Difficulty levels
    pub difficulties: Vec<String>,
    /// Task categories
    pub categories: Vec<String>,
    /// Per-attempt wall-clock budget, seconds
    pub task_timeout_secs: u64,
}

impl Default for GridConfig {
    fn default() -> Self {
        let owned = |values: &[&str]| values.iter().map(|v| v.to_string()).collect();
        Self {
            strategies: owned(&["react", "chain_of_thought", "plan_and_execute"]),
            reliabilities: owned(&["standard", "high"]),
            difficulties: owned(&["easy", "medium", "hard"]),
            categories: owned(&["travel", "finance", "retail"]),
            task_timeout_secs: 120,
        }
    }
}

impl GridConfig {
    /// Number of distinct configurations
    pub fn cells(&self) -> usize {
        self.strategies.len() * self.reliabilities.len() * self.difficulties.len() * self.categories.len()
    }

    /// Per-attempt timeout
    pub fn task_timeout(&self) -> Duration {
        Duration::from_secs(self.task_timeout_secs)
    }

    /// Validate the grid
    pub fn validate(&self) -> Result<(), GridError> {
        let dimensions: [(&'static str, &Vec<String>); 4] = [
            ("strategies", &self.strategies),
            ("reliabilities", &self.reliabilities),
            ("difficulties", &self.difficulties),
            ("categories", &self.categories),
        ];
        for (dimension, values) in dimensions {
            if values.is_empty() {
                return Err(GridError::EmptyDimension(dimension));
            }
            let mut seen = std::collections::BTreeSet::new();
            for value in values {
                if !seen.insert(value) {
                    return Err(GridError::DuplicateValue {
                        dimension,
                        value: value.clone(),
                    });
                }
            }
        }
        if self.task_timeout_secs == 0 {
            return Err(GridError::ZeroTimeout);
        }
        Ok(())
    }
}

/// Expands a grid into tasks
///
/// Task `i` of a provider is named `<provider>-<i>` and gets configuration
/// `i mod cells`, walking the grid with the category changing fastest. The
/// same grid and count always yield the same tasks, which is what resume
/// planning relies on.
#[derive(Debug, Clone)]
pub struct TaskGrid {
    config: GridConfig,
}

impl TaskGrid {
    /// Create a sampler over a validated grid
    pub fn new(config: GridConfig) -> Result<Self, GridError> {
        config.validate()?;
        Ok(Self { config })
    }

    /// The grid in use
    pub fn config(&self) -> &GridConfig {
        &self.config
    }

    /// Configuration of cell `index`
    pub fn configuration(&self, index: usize) -> Configuration {
        let c = &self.config;
        let mut rest = index % c.cells();
        let category = &c.categories[rest % c.categories.len()];
        rest /= c.categories.len();
        let difficulty = &c.difficulties[rest % c.difficulties.len()];
        rest /= c.difficulties.len();
        let reliability = &c.reliabilities[rest % c.reliabilities.len()];
        rest /= c.reliabilities.len();
        let strategy = &c.strategies[rest % c.strategies.len()];
        Configuration::new(
            strategy.as_str(),
            reliability.as_str(),
            difficulty.as_str(),
            category.as_str(),
        )
    }

    /// `count` tasks for one provider
    pub fn tasks(&self, provider: &ProviderId, count: usize) -> Vec<TestTask> {
        let timeout = self.config.task_timeout();
        let tasks: Vec<TestTask> = (0..count)
            .map(|i| {
                TestTask::new(
                    format!("{}-{}", provider, i),
                    provider.clone(),
                    self.configuration(i),
                )
                .with_timeout(timeout)
            })
            .collect();
        tracing::debug!(
            provider = %provider,
            tasks = tasks.len(),
            cells = self.config.cells(),
            "Generated task set"
        );
        tasks
    }

    /// `count` tasks for each provider, providers in the given order
    pub fn tasks_for<'a>(
        &self,
        providers: impl IntoIterator<Item = &'a ProviderId>,
        count: usize,
    ) -> Vec<TestTask> {
        providers
            .into_iter()
            .flat_map(|provider| self.tasks(provider, count))
            .collect()
    }
}
