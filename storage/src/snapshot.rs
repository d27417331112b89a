//! Aggregate snapshot and merge cursor
//!
//! The snapshot is the commit point of a merge: it holds the aggregate and
//! the ids of every segment folded into it. The cursor mirrors the merged
//! set so listing unmerged segments does not need to load the aggregate.

use std::collections::BTreeSet;
use std::fs;
use std::io::Write;
use std::path::Path;

use chrono::{DateTime, Utc};
use fleetbench_core::{HierarchicalAggregator, SegmentId};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::StoreResult;

/// Durable aggregate state
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregateSnapshot {
    /// Bumped on every committed merge
    pub generation: u64,
    /// Segments folded into `aggregate`
    pub merged: BTreeSet<SegmentId>,
    /// Rollup of every merged segment
    pub aggregate: HierarchicalAggregator,
    /// Last commit time
    pub updated_at: Option<DateTime<Utc>>,
}

/// Record of which segments are merged
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Cursor {
    /// Snapshot generation this cursor was written for
    pub generation: u64,
    /// Merged segment ids
    pub merged: BTreeSet<SegmentId>,
    /// Last update time
    pub updated_at: Option<DateTime<Utc>>,
}

impl Cursor {
    /// Cursor matching a snapshot
    pub fn from_snapshot(snapshot: &AggregateSnapshot) -> Self {
        Self {
            generation: snapshot.generation,
            merged: snapshot.merged.clone(),
            updated_at: Some(Utc::now()),
        }
    }
}

/// Read a JSON file, or `T::default()` when it does not exist yet
pub(crate) fn read_json_or_default<T: DeserializeOwned + Default>(path: &Path) -> StoreResult<T> {
    match fs::read(path) {
        Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(T::default()),
        Err(e) => Err(e.into()),
    }
}

/// Replace `path` atomically: write a sibling temp file, fsync, rename
pub(crate) fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> StoreResult<()> {
    let bytes = serde_json::to_vec_pretty(value)?;
    let name = path
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("state");
    let tmp = path.with_file_name(format!(".{}.tmp.{}", name, std::process::id()));

    let mut file = fs::File::create(&tmp)?;
    file.write_all(&bytes)?;
    file.sync_all()?;
    fs::rename(&tmp, path)?;
    sync_dir(path);
    Ok(())
}

/// Best-effort fsync of a file's parent directory
pub(crate) fn sync_dir(path: &Path) {
    if let Some(parent) = path.parent() {
        if let Ok(dir) = fs::File::open(parent) {
            let _ = dir.sync_all();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_reads_as_default() {
        let dir = tempfile::tempdir().unwrap();
        let cursor: Cursor = read_json_or_default(&dir.path().join("checkpoint.json")).unwrap();
        assert_eq!(cursor, Cursor::default());
    }

    #[test]
    fn test_atomic_write_replaces_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("checkpoint.json");

        let mut cursor = Cursor::default();
        write_json_atomic(&path, &cursor).unwrap();
        cursor.generation = 7;
        cursor.merged.insert(SegmentId("p1_1".into()));
        write_json_atomic(&path, &cursor).unwrap();

        let read: Cursor = read_json_or_default(&path).unwrap();
        assert_eq!(read, cursor);
        // No temp files left behind
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }
}
