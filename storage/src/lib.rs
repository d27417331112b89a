//! Durable storage for benchmark results
//!
//! This crate provides the incremental result store:
//!
//! - Append-only segment files, one writer per file name
//! - A merge step that folds new segments into an aggregate snapshot exactly once
//! - A checkpoint cursor recording which segments are merged
//! - Consolidation of merged segments into archive bundles

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod segment;
pub mod snapshot;
pub mod store;

pub use error::{StoreError, StoreResult};
pub use segment::SegmentHeader;
pub use snapshot::{AggregateSnapshot, Cursor};
pub use store::{ConsolidateReport, MergeReport, ResultStore, StoreStatus};
