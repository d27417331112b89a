//! Segment file format
//!
//! A segment is JSON lines: one header line, then one `TestResult` per line.
//!
//! ```text
//! {"writer":"p4242-1a2b3c4d","created_at":"2026-10-18T09:00:00Z","count":2}
//! {"task_id":"openai-0", ...}
//! {"task_id":"openai-1", ...}
//! ```

use chrono::{DateTime, Utc};
use fleetbench_core::{SegmentId, TestResult, WriterId};
use serde::{Deserialize, Serialize};

use crate::error::{StoreError, StoreResult};

/// File extension of segment files
pub const SEGMENT_EXT: &str = "seg";

/// First line of every segment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentHeader {
    /// Writer that produced the segment
    pub writer: WriterId,
    /// When the segment was written
    pub created_at: DateTime<Utc>,
    /// Number of result lines that follow
    pub count: usize,
}

impl SegmentHeader {
    /// Header for `count` results written now
    pub fn new(writer: WriterId, count: usize) -> Self {
        Self {
            writer,
            created_at: Utc::now(),
            count,
        }
    }
}

/// Segment id for `writer` at `stamp` (unix nanoseconds)
pub fn segment_id(writer: &WriterId, stamp: i64) -> SegmentId {
    SegmentId(format!("{}_{:019}", writer, stamp))
}

/// File name of a segment
pub fn file_name(id: &SegmentId) -> String {
    format!("{}.{}", id, SEGMENT_EXT)
}

/// Serialize a segment
pub fn encode(header: &SegmentHeader, results: &[TestResult]) -> StoreResult<Vec<u8>> {
    let mut buf = serde_json::to_vec(header)?;
    buf.push(b'\n');
    for result in results {
        serde_json::to_writer(&mut buf, result)?;
        buf.push(b'\n');
    }
    Ok(buf)
}

/// Parse a segment, checking the result count against the header
pub fn decode(id: &SegmentId, bytes: &[u8]) -> StoreResult<(SegmentHeader, Vec<TestResult>)> {
    let corrupt = |reason: String| StoreError::CorruptSegment {
        id: id.to_string(),
        reason,
    };

    let text = std::str::from_utf8(bytes).map_err(|e| corrupt(e.to_string()))?;
    let mut lines = text.lines().filter(|line| !line.trim().is_empty());

    let header: SegmentHeader = match lines.next() {
        Some(line) => serde_json::from_str(line).map_err(|e| corrupt(format!("header: {}", e)))?,
        None => return Err(corrupt("empty file".into())),
    };

    let results = lines
        .enumerate()
        .map(|(i, line)| {
            serde_json::from_str(line).map_err(|e| corrupt(format!("line {}: {}", i + 2, e)))
        })
        .collect::<StoreResult<Vec<TestResult>>>()?;

    if results.len() != header.count {
        return Err(corrupt(format!(
            "header says {} results, found {}",
            header.count,
            results.len()
        )));
    }
    Ok((header, results))
}
