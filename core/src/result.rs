//! Result types produced by the executor pool

use std::collections::BTreeMap;
use std::time::Duration;

use fleetbench_auth::{ProviderId, SlotId};
use serde::{Deserialize, Serialize};

use crate::error::ErrorKind;
use crate::task::{Configuration, TaskId, TestTask};

/// Final outcome of one task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// Task completed as intended
    Success,
    /// Task completed with part of the workflow satisfied
    Partial,
    /// Task failed; `error_kind` says why
    Failure,
}

impl Outcome {
    /// Check if this outcome counts as completed work (success or partial)
    pub fn is_completed(&self) -> bool {
        !matches!(self, Outcome::Failure)
    }
}

/// Outcome of one task. Created exactly once, immutable afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestResult {
    /// Task this result belongs to
    pub task_id: TaskId,

    /// Provider the task ran against
    pub provider: ProviderId,

    /// Credential slot the final attempt used
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slot: Option<SlotId>,

    /// Aggregation key copied from the task
    pub configuration: Configuration,

    /// Final outcome
    pub outcome: Outcome,

    /// Latency of the final attempt
    pub latency: Duration,

    /// Failure classification, set only for failures
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,

    /// Number of attempts made, including the final one
    pub attempts: u32,

    /// Provider-reported counters (turns used, tool calls made, ...)
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, u64>,

    /// Set when shutdown cut the task short: its last attempt was cancelled
    /// or a pending retry was abandoned. Resume planning schedules such
    /// tasks again.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub interrupted: bool,

    /// When the final attempt finished
    pub completed_at: chrono::DateTime<chrono::Utc>,
}

impl TestResult {
    fn from_task(task: &TestTask, outcome: Outcome, latency: Duration) -> Self {
        Self {
            task_id: task.task_id.clone(),
            provider: task.provider.clone(),
            slot: None,
            configuration: task.configuration.clone(),
            outcome,
            latency,
            error_kind: None,
            attempts: 1,
            metadata: BTreeMap::new(),
            interrupted: false,
            completed_at: chrono::Utc::now(),
        }
    }

    /// Successful result
    pub fn success(task: &TestTask, latency: Duration) -> Self {
        Self::from_task(task, Outcome::Success, latency)
    }

    /// Partially successful result
    pub fn partial(task: &TestTask, latency: Duration) -> Self {
        Self::from_task(task, Outcome::Partial, latency)
    }

    /// Failed result
    pub fn failure(task: &TestTask, kind: ErrorKind, latency: Duration) -> Self {
        let mut result = Self::from_task(task, Outcome::Failure, latency);
        result.error_kind = Some(kind);
        result
    }

    /// Record which slot served the task
    pub fn with_slot(mut self, slot: SlotId) -> Self {
        self.slot = Some(slot);
        self
    }

    /// Record the attempt count
    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }

    /// Attach provider-reported counters
    pub fn with_metadata(mut self, metadata: BTreeMap<String, u64>) -> Self {
        self.metadata = metadata;
        self
    }

    /// Mark the result as cut short by shutdown
    pub fn mark_interrupted(mut self) -> Self {
        self.interrupted = true;
        self
    }

    /// Latency in whole microseconds, the unit aggregate sums use
    pub fn latency_us(&self) -> u64 {
        u64::try_from(self.latency.as_micros()).unwrap_or(u64::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task() -> TestTask {
        TestTask::new("t-1", "p", Configuration::new("s", "r", "d", "c"))
    }

    #[test]
    fn test_failure_carries_kind() {
        let result = TestResult::failure(&task(), ErrorKind::RateLimited, Duration::from_millis(5));
        assert_eq!(result.outcome, Outcome::Failure);
        assert_eq!(result.error_kind, Some(ErrorKind::RateLimited));
    }

    #[test]
    fn test_success_has_no_kind() {
        let result = TestResult::success(&task(), Duration::from_millis(5));
        assert!(result.error_kind.is_none());
        assert!(result.outcome.is_completed());
        assert_eq!(result.latency_us(), 5_000);
    }

    #[test]
    fn test_result_json_shape() {
        let mut metadata = BTreeMap::new();
        metadata.insert("turns".to_string(), 3);
        let result = TestResult::partial(&task(), Duration::from_millis(1))
            .with_slot(SlotId::from("key-1"))
            .with_attempts(2)
            .with_metadata(metadata);

        let json = serde_json::to_string(&result).unwrap();
        assert!(json.contains("\"outcome\":\"partial\""));
        assert!(json.contains("\"slot\":\"key-1\""));
        assert!(json.contains("\"turns\":3"));
        assert!(!json.contains("error_kind"));
        assert!(!json.contains("interrupted"));

        let back: TestResult = serde_json::from_str(&json).unwrap();
        assert_eq!(back, result);
    }

    #[test]
    fn test_interrupted_marker_survives_json() {
        let result = TestResult::failure(&task(), ErrorKind::Timeout, Duration::from_millis(5)).mark_interrupted();
        let json = serde_json::to_string(&result).unwrap();
        assert!(json.contains("\"interrupted\":true"));

        let back: TestResult = serde_json::from_str(&json).unwrap();
        assert!(back.interrupted);
    }
}
