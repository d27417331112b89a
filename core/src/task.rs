//! Task types: the unit of work handed to an execution collaborator

use fleetbench_auth::{ProviderId, SlotId};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Unique task identifier
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub String);

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TaskId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for TaskId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Caller-supplied bucketing key
///
/// The scheduler never interprets these values; they only select the
/// aggregate leaf a result is folded into.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Configuration {
    /// Prompting strategy
    pub strategy: String,
    /// Target reliability bucket
    pub reliability: String,
    /// Difficulty level
    pub difficulty: String,
    /// Task category
    pub category: String,
}

impl Configuration {
    /// Create a configuration tuple
    pub fn new(
        strategy: impl Into<String>,
        reliability: impl Into<String>,
        difficulty: impl Into<String>,
        category: impl Into<String>,
    ) -> Self {
        Self {
            strategy: strategy.into(),
            reliability: reliability.into(),
            difficulty: difficulty.into(),
            category: category.into(),
        }
    }
}

impl std::fmt::Display for Configuration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}/{}/{}/{}",
            self.strategy, self.reliability, self.difficulty, self.category
        )
    }
}

/// One unit of work. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestTask {
    /// Unique task identifier
    pub task_id: TaskId,

    /// Provider the task must run against
    pub provider: ProviderId,

    /// Pin the task to one credential slot of a key pool
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential_hint: Option<SlotId>,

    /// Aggregation key
    pub configuration: Configuration,

    /// Wall-clock budget for a single attempt
    pub timeout_budget: Duration,
}

impl TestTask {
    /// Create a task with the default 120s budget and no slot pin
    pub fn new(
        task_id: impl Into<TaskId>,
        provider: impl Into<ProviderId>,
        configuration: Configuration,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            provider: provider.into(),
            credential_hint: None,
            configuration,
            timeout_budget: Duration::from_secs(120),
        }
    }

    /// Pin the task to a credential slot
    pub fn with_credential_hint(mut self, slot: impl Into<SlotId>) -> Self {
        self.credential_hint = Some(slot.into());
        self
    }

    /// Set the per-attempt timeout budget
    pub fn with_timeout(mut self, budget: Duration) -> Self {
        self.timeout_budget = budget;
        self
    }
}
