//! Error types for fleetbench-core

use fleetbench_auth::RegistryError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Core error type
#[derive(Error, Debug)]
pub enum BenchError {
    /// Configuration error (missing builder field, invalid value)
    #[error("configuration error: {0}")]
    Config(String),

    /// Provider or credential lookup failed
    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),

    /// Shard planning failed
    #[error("planning error: {0}")]
    Plan(String),

    /// Durable storage failed
    #[error("storage error: {0}")]
    Storage(String),

    /// A shard runner failed outside of task execution
    #[error("worker error: {0}")]
    Worker(String),

    /// Run-level failure
    #[error("orchestration error: {0}")]
    Orchestration(String),

    /// Work was abandoned because shutdown was requested
    #[error("shutdown requested")]
    Shutdown,

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl BenchError {
    /// A required builder field was not provided
    pub fn missing_config(field: &str) -> Self {
        BenchError::Config(format!("missing required field: {}", field))
    }

    /// Invalid configuration
    pub fn config(message: impl Into<String>) -> Self {
        BenchError::Config(message.into())
    }

    /// Run-level failure
    pub fn orchestration(message: impl Into<String>) -> Self {
        BenchError::Orchestration(message.into())
    }

    /// Storage failure
    pub fn storage(message: impl Into<String>) -> Self {
        BenchError::Storage(message.into())
    }

    /// Shard runner failure
    pub fn worker(message: impl Into<String>) -> Self {
        BenchError::Worker(message.into())
    }

    /// Shutdown marker
    pub fn shutdown() -> Self {
        BenchError::Shutdown
    }
}

/// Result type alias
pub type BenchResult<T> = std::result::Result<T, BenchError>;

/// Fixed taxonomy of task failures
///
/// Every failed attempt maps to exactly one kind. The first three are
/// infrastructure faults and retryable; the rest describe model behaviour
/// and are recorded after a single attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Attempt exceeded its wall-clock budget or was cancelled in flight
    Timeout,
    /// Provider signalled throttling (HTTP 429 and friends)
    RateLimited,
    /// Credential rejected
    AuthFailure,
    /// Reply could not be parsed
    MalformedResponse,
    /// Model called the wrong tool
    ToolSelectionError,
    /// Model passed invalid tool parameters
    ParameterError,
    /// Model called tools in the wrong order
    SequenceOrderError,
    /// A required upstream step's output was missing
    DependencyError,
    /// Conversation ran out of turns
    MaxTurnsExceeded,
    /// Anything that could not be classified
    Other,
}

impl ErrorKind {
    /// All kinds, in declaration order
    pub const ALL: [ErrorKind; 10] = [
        ErrorKind::Timeout,
        ErrorKind::RateLimited,
        ErrorKind::AuthFailure,
        ErrorKind::MalformedResponse,
        ErrorKind::ToolSelectionError,
        ErrorKind::ParameterError,
        ErrorKind::SequenceOrderError,
        ErrorKind::DependencyError,
        ErrorKind::MaxTurnsExceeded,
        ErrorKind::Other,
    ];

    /// Whether the executor pool may retry an attempt that failed this way
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorKind::Timeout | ErrorKind::RateLimited | ErrorKind::AuthFailure
        )
    }

    /// Stable snake_case name, as used in segment files and reports
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Timeout => "timeout",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::AuthFailure => "auth_failure",
            ErrorKind::MalformedResponse => "malformed_response",
            ErrorKind::ToolSelectionError => "tool_selection_error",
            ErrorKind::ParameterError => "parameter_error",
            ErrorKind::SequenceOrderError => "sequence_order_error",
            ErrorKind::DependencyError => "dependency_error",
            ErrorKind::MaxTurnsExceeded => "max_turns_exceeded",
            ErrorKind::Other => "other",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Configuration validation errors
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ConfigError {
    /// Worker bounds are empty or inverted
    #[error("invalid worker bounds: {0}")]
    InvalidWorkers(String),

    /// QPS bounds are empty, inverted or non-positive
    #[error("invalid QPS bounds: {0}")]
    InvalidQps(String),

    /// Retry schedule is inconsistent
    #[error("invalid retry policy: {0}")]
    InvalidRetry(String),

    /// Flush thresholds are unusable
    #[error("invalid checkpoint policy: {0}")]
    InvalidCheckpoint(String),

    /// Task timeout is zero
    #[error("invalid task timeout: {0}")]
    InvalidTimeout(String),
}

impl From<ConfigError> for BenchError {
    fn from(err: ConfigError) -> Self {
        BenchError::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_kinds() {
        let retryable: Vec<_> = ErrorKind::ALL
            .iter()
            .filter(|k| k.is_retryable())
            .copied()
            .collect();
        assert_eq!(
            retryable,
            vec![
                ErrorKind::Timeout,
                ErrorKind::RateLimited,
                ErrorKind::AuthFailure
            ]
        );
    }

    #[test]
    fn test_error_kind_serializes_like_as_str() {
        for kind in ErrorKind::ALL {
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json, format!("\"{}\"", kind.as_str()));
        }
    }

    #[test]
    fn test_missing_config_message() {
        let err = BenchError::missing_config("executor");
        assert!(err.to_string().contains("executor"));
    }
}
