//! Core traits for execution collaborators and durable result sinks
//!
//! These traits are defined in core to avoid circular dependencies.
//! Implementations live in their respective crates (vendors/, storage/).

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use fleetbench_auth::CredentialSlot;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::BenchResult;
use crate::result::TestResult;
use crate::task::TestTask;

// ============================================================================
// Execution collaborator
// ============================================================================

/// Everything an executor needs for one attempt besides the task itself
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    /// Cancelled when the attempt's deadline passes or the run shuts down.
    /// Cancelling it never affects any other attempt.
    pub cancel: CancellationToken,

    /// Credential slot the attempt must use
    pub slot: Arc<CredentialSlot>,

    /// 1-based attempt number
    pub attempt: u32,
}

/// Executes a single task against a provider
///
/// Implementations talk to the model once, interpret its reply and report
/// either a completion or a failure signal. They must return promptly once
/// `ctx.cancel` fires.
#[async_trait]
pub trait Executor: Send + Sync {
    /// Collaborator name for logs
    fn name(&self) -> &str;

    /// Run one attempt of `task`
    async fn execute(
        &self,
        ctx: ExecutionContext,
        task: &TestTask,
    ) -> Result<ExecutionReport, ExecutionError>;
}

/// How a non-failing attempt ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Completion {
    /// Fully successful
    Success,
    /// Partially successful
    Partial,
}

/// Report of a non-failing attempt
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionReport {
    /// Success or partial
    pub completion: Completion,
    /// Provider-reported counters
    pub metadata: BTreeMap<String, u64>,
}

impl ExecutionReport {
    /// Successful attempt without counters
    pub fn success() -> Self {
        Self {
            completion: Completion::Success,
            metadata: BTreeMap::new(),
        }
    }

    /// Partial attempt without counters
    pub fn partial() -> Self {
        Self {
            completion: Completion::Partial,
            metadata: BTreeMap::new(),
        }
    }

    /// Attach one counter
    pub fn with_counter(mut self, name: impl Into<String>, value: u64) -> Self {
        self.metadata.insert(name.into(), value);
        self
    }
}

/// Raw failure information reported by an executor
///
/// Any combination of fields may be present; the classifier decides which
/// taxonomy bucket it belongs to.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FailureSignal {
    /// HTTP-like status code
    pub status: Option<u16>,
    /// Structured reason code (e.g. "rate_limited", "tool_selection")
    pub reason: Option<String>,
    /// Free-form message
    pub message: String,
    /// Provider's suggested retry delay
    pub retry_after: Option<Duration>,
}

impl FailureSignal {
    /// Signal carrying only a message
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Default::default()
        }
    }

    /// Signal carrying a status code
    pub fn status(status: u16, message: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            message: message.into(),
            ..Default::default()
        }
    }

    /// Signal carrying a structured reason code
    pub fn reason(reason: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            reason: Some(reason.into()),
            message: message.into(),
            ..Default::default()
        }
    }

    /// Attach a retry-after hint
    pub fn with_retry_after(mut self, delay: Duration) -> Self {
        self.retry_after = Some(delay);
        self
    }
}

/// Errors an executor may return
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum ExecutionError {
    /// The attempt failed; the signal is classified by the pool
    #[error("execution failed: {}", .0.message)]
    Failed(FailureSignal),

    /// The attempt observed cancellation and stopped
    #[error("execution cancelled")]
    Cancelled,
}

// ============================================================================
// Durable result sink
// ============================================================================

/// Identity of one segment writer (process and/or shard)
///
/// Underscores are replaced so the id can be separated from the timestamp
/// in `{writer}_{timestamp}.seg` file names.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WriterId(String);

impl WriterId {
    /// Create a writer id, keeping only `[A-Za-z0-9-]`
    pub fn new(id: impl AsRef<str>) -> Self {
        let cleaned: String = id
            .as_ref()
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '-' })
            .collect();
        if cleaned.is_empty() {
            Self("writer".to_string())
        } else {
            Self(cleaned)
        }
    }

    /// Writer id for this process: `p<pid>-<random>`
    pub fn for_process() -> Self {
        let nonce: u32 = rand::random();
        Self::new(format!("p{}-{:08x}", std::process::id(), nonce))
    }

    /// Borrow as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for WriterId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of a durable segment (its file stem)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SegmentId(pub String);

impl std::fmt::Display for SegmentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Durable destination for flushed result batches
///
/// Each call must produce a new, uniquely named, immutable segment.
pub trait SegmentSink: Send + Sync {
    /// Persist `results` as one segment
    fn write_segment(&self, writer: &WriterId, results: &[TestResult]) -> BenchResult<SegmentId>;
}
