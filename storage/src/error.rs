//! Error types for the result store

use fleetbench_core::BenchError;
use thiserror::Error;

/// Result store error
#[derive(Error, Debug)]
pub enum StoreError {
    /// Filesystem failure
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Snapshot, cursor or segment line could not be (de)serialized
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A segment with this name already exists and is never overwritten
    #[error("segment already exists: {0}")]
    SegmentExists(String),

    /// No segment with this id
    #[error("unknown segment: {0}")]
    UnknownSegment(String),

    /// Segment contents do not match their header
    #[error("corrupt segment {id}: {reason}")]
    CorruptSegment {
        /// Segment id
        id: String,
        /// What was wrong
        reason: String,
    },
}

/// Result type alias
pub type StoreResult<T> = std::result::Result<T, StoreError>;

impl From<StoreError> for BenchError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Io(e) => BenchError::Io(e),
            StoreError::Serialization(e) => BenchError::Serialization(e),
            other => BenchError::storage(other.to_string()),
        }
    }
}
