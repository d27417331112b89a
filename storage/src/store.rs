//! Incremental result store
//!
//! Layout under the state directory:
//!
//! ```text
//! state/
//! ├── segments/        {writer}_{unix_nanos}.seg, immutable once written
//! ├── archive/         consolidated_<ts>.seg
//! ├── tmp/             segment staging (same filesystem as segments/)
//! ├── aggregate.json   AggregateSnapshot, the merge commit point
//! └── checkpoint.json  Cursor
//! ```
//!
//! Writers only ever create new files in `segments/`. The merger is the only
//! code that touches `aggregate.json` and `checkpoint.json`, so writers and
//! the merger never contend on a file.

use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use chrono::Utc;
use fleetbench_core::{
    BenchResult, HierarchicalAggregator, SegmentId, SegmentSink, TestResult, WriterId,
};
use serde::Serialize;

use crate::error::{StoreError, StoreResult};
use crate::segment::{self, SegmentHeader, SEGMENT_EXT};
use crate::snapshot::{read_json_or_default, sync_dir, write_json_atomic, AggregateSnapshot, Cursor};

const SEGMENTS_DIR: &str = "segments";
const ARCHIVE_DIR: &str = "archive";
const TMP_DIR: &str = "tmp";
const SNAPSHOT_FILE: &str = "aggregate.json";
const CURSOR_FILE: &str = "checkpoint.json";

/// Attempts at finding a free segment name before giving up
const NAME_ATTEMPTS: u32 = 4;

/// What one merge folded
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MergeReport {
    /// Segments folded, in id order
    pub merged: Vec<SegmentId>,
    /// Results folded
    pub results: usize,
    /// Snapshot generation after the merge
    pub generation: u64,
}

/// What one consolidation did
#[derive(Debug, Clone, PartialEq)]
pub struct ConsolidateReport {
    /// Archive file written
    pub archive: PathBuf,
    /// Segments bundled and removed
    pub segments: usize,
    /// Results in the archive
    pub results: usize,
}

/// Point-in-time view of the store
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StoreStatus {
    /// Segment files present
    pub segments: usize,
    /// Of which not yet merged
    pub unmerged: usize,
    /// Snapshot generation
    pub generation: u64,
    /// Archive files present
    pub archives: usize,
}

/// Append-only, writer-isolated result store
pub struct ResultStore {
    root: PathBuf,
    /// Last stamp handed out per writer; keeps names strictly increasing
    last_stamp: Mutex<HashMap<WriterId, i64>>,
    /// Serializes merge, consolidate and cursor updates in this process
    merge_lock: Mutex<()>,
}

impl ResultStore {
    /// Open (or create) a store rooted at `root`
    ///
    /// If a merge committed its snapshot but crashed before updating the
    /// cursor, the cursor is rewritten from the snapshot.
    pub fn open(root: impl Into<PathBuf>) -> StoreResult<Self> {
        let root = root.into();
        for dir in [SEGMENTS_DIR, ARCHIVE_DIR, TMP_DIR] {
            fs::create_dir_all(root.join(dir))?;
        }

        let store = Self {
            root,
            last_stamp: Mutex::new(HashMap::new()),
            merge_lock: Mutex::new(()),
        };
        store.reconcile_cursor()?;

        tracing::debug!(root = %store.root.display(), "Opened result store");
        Ok(store)
    }

    /// Root directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn segments_dir(&self) -> PathBuf {
        self.root.join(SEGMENTS_DIR)
    }

    fn segment_path(&self, id: &SegmentId) -> PathBuf {
        self.segments_dir().join(segment::file_name(id))
    }

    fn snapshot_path(&self) -> PathBuf {
        self.root.join(SNAPSHOT_FILE)
    }

    fn cursor_path(&self) -> PathBuf {
        self.root.join(CURSOR_FILE)
    }

    fn reconcile_cursor(&self) -> StoreResult<()> {
        let _guard = self.merge_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let snapshot = self.load_snapshot()?;
        let cursor = self.load_cursor()?;
        if cursor.generation != snapshot.generation {
            tracing::warn!(
                cursor = cursor.generation,
                snapshot = snapshot.generation,
                "Checkpoint cursor disagrees with aggregate snapshot, rewriting"
            );
            write_json_atomic(&self.cursor_path(), &Cursor::from_snapshot(&snapshot))?;
        }
        Ok(())
    }

    fn next_stamp(&self, writer: &WriterId) -> i64 {
        let now = Utc::now().timestamp_nanos_opt().unwrap_or(i64::MAX);
        let mut last = self.last_stamp.lock().unwrap_or_else(PoisonError::into_inner);
        let entry = last.entry(writer.clone()).or_insert(i64::MIN);
        let stamp = now.max(entry.saturating_add(1));
        *entry = stamp;
        stamp
    }

    // ========================================================================
    // Writers
    // ========================================================================

    /// Durably write `results` as a new segment
    ///
    /// The bytes are staged in `tmp/`, fsynced, then hard-linked into
    /// `segments/`. Linking fails if the name is taken, so an existing
    /// segment is never overwritten.
    pub fn write_segment(&self, writer: &WriterId, results: &[TestResult]) -> StoreResult<SegmentId> {
        let header = SegmentHeader::new(writer.clone(), results.len());
        let bytes = segment::encode(&header, results)?;

        for _ in 0..NAME_ATTEMPTS {
            let id = segment::segment_id(writer, self.next_stamp(writer));
            match self.publish(&id, &bytes) {
                Ok(()) => {
                    tracing::debug!(segment = %id, results = results.len(), "Wrote segment");
                    return Ok(id);
                }
                Err(StoreError::SegmentExists(name)) => {
                    tracing::debug!(segment = %name, "Segment name taken, retrying");
                }
                Err(e) => return Err(e),
            }
        }
        Err(StoreError::SegmentExists(format!("{}_*", writer)))
    }

    pub(crate) fn publish(&self, id: &SegmentId, bytes: &[u8]) -> StoreResult<()> {
        let tmp = self.root.join(TMP_DIR).join(segment::file_name(id));
        let target = self.segment_path(id);

        let mut file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&tmp)
            .map_err(|e| exists_or_io(e, id))?;
        let written = file.write_all(bytes).and_then(|()| file.sync_all());
        drop(file);

        let linked = written.and_then(|()| fs::hard_link(&tmp, &target));
        let _ = fs::remove_file(&tmp);
        linked.map_err(|e| exists_or_io(e, id))?;
        sync_dir(&target);
        Ok(())
    }

    // ========================================================================
    // Readers
    // ========================================================================

    /// Every segment present, in id order
    pub fn list_segments(&self) -> StoreResult<Vec<SegmentId>> {
        let mut ids = Vec::new();
        for entry in fs::read_dir(self.segments_dir())? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(SEGMENT_EXT) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                ids.push(SegmentId(stem.to_string()));
            }
        }
        ids.sort();
        Ok(ids)
    }

    /// Segments not yet folded into the snapshot, in id order
    pub fn list_unmerged(&self) -> StoreResult<Vec<SegmentId>> {
        let cursor = self.load_cursor()?;
        Ok(self
            .list_segments()?
            .into_iter()
            .filter(|id| !cursor.merged.contains(id))
            .collect())
    }

    /// Read a segment's results
    pub fn read_segment(&self, id: &SegmentId) -> StoreResult<Vec<TestResult>> {
        let bytes = match fs::read(self.segment_path(id)) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::UnknownSegment(id.to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        let (_, results) = segment::decode(id, &bytes)?;
        Ok(results)
    }

    /// Last committed snapshot
    pub fn load_snapshot(&self) -> StoreResult<AggregateSnapshot> {
        read_json_or_default(&self.snapshot_path())
    }

    fn load_cursor(&self) -> StoreResult<Cursor> {
        read_json_or_default(&self.cursor_path())
    }

    /// Snapshot aggregate plus every pending segment, without committing
    ///
    /// Read-only: safe to call while writers and a merger are active.
    pub fn aggregate(&self) -> StoreResult<HierarchicalAggregator> {
        let snapshot = self.load_snapshot()?;
        let mut aggregate = snapshot.aggregate;
        for id in self.list_segments()? {
            if snapshot.merged.contains(&id) {
                continue;
            }
            match self.read_segment(&id) {
                Ok(results) => aggregate.fold_all(results.iter()),
                // Consolidated away since listing
                Err(StoreError::UnknownSegment(_)) => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(aggregate)
    }

    /// Counts for operators
    pub fn status(&self) -> StoreResult<StoreStatus> {
        let segments = self.list_segments()?.len();
        let unmerged = self.list_unmerged()?.len();
        let archives = fs::read_dir(self.root.join(ARCHIVE_DIR))?.count();
        Ok(StoreStatus {
            segments,
            unmerged,
            generation: self.load_snapshot()?.generation,
            archives,
        })
    }

    // ========================================================================
    // Merger
    // ========================================================================

    /// Record that `id` has been folded by the caller
    ///
    /// Only the cursor changes; [`merge_into`](Self::merge_into) calls this
    /// after committing the snapshot.
    pub fn mark_merged(&self, id: &SegmentId) -> StoreResult<()> {
        let _guard = self.merge_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut cursor = self.load_cursor()?;
        cursor.merged.insert(id.clone());
        cursor.updated_at = Some(Utc::now());
        write_json_atomic(&self.cursor_path(), &cursor)
    }

    /// Fold every unmerged segment into `aggregator` and the snapshot
    ///
    /// Each segment is folded exactly once: the snapshot, written before the
    /// cursor, is the commit point. A crash before it leaves the segments
    /// unmerged; a crash after it is repaired by [`open`](Self::open).
    pub fn merge_into(&self, aggregator: &mut HierarchicalAggregator) -> StoreResult<MergeReport> {
        let _guard = self.merge_lock.lock().unwrap_or_else(PoisonError::into_inner);

        let mut snapshot = self.load_snapshot()?;
        let pending: Vec<SegmentId> = self
            .list_segments()?
            .into_iter()
            .filter(|id| !snapshot.merged.contains(id))
            .collect();

        if pending.is_empty() {
            return Ok(MergeReport {
                generation: snapshot.generation,
                ..Default::default()
            });
        }

        let mut folded = HierarchicalAggregator::new();
        let mut results = 0;
        for id in &pending {
            let segment = self.read_segment(id)?;
            results += segment.len();
            folded.fold_all(segment.iter());
        }

        snapshot.aggregate.merge(&folded);
        snapshot.merged.extend(pending.iter().cloned());
        snapshot.generation += 1;
        snapshot.updated_at = Some(Utc::now());
        write_json_atomic(&self.snapshot_path(), &snapshot)?;

        let mut cursor = Cursor::from_snapshot(&snapshot);
        cursor.merged.extend(self.load_cursor()?.merged);
        write_json_atomic(&self.cursor_path(), &cursor)?;

        aggregator.merge(&folded);

        tracing::info!(
            segments = pending.len(),
            results,
            generation = snapshot.generation,
            "Merged segments"
        );
        Ok(MergeReport {
            merged: pending,
            results,
            generation: snapshot.generation,
        })
    }

    /// Fold pending segments and return the full committed aggregate
    pub fn merge(&self) -> StoreResult<(MergeReport, HierarchicalAggregator)> {
        let mut scratch = HierarchicalAggregator::new();
        let report = self.merge_into(&mut scratch)?;
        Ok((report, self.load_snapshot()?.aggregate))
    }

    /// Bundle every merged segment into one archive file
    ///
    /// Space maintenance only: the snapshot aggregate is unchanged. Returns
    /// `None` when there is nothing merged to bundle.
    pub fn consolidate(&self) -> StoreResult<Option<ConsolidateReport>> {
        let _guard = self.merge_lock.lock().unwrap_or_else(PoisonError::into_inner);

        let snapshot = self.load_snapshot()?;
        let bundle: Vec<SegmentId> = self
            .list_segments()?
            .into_iter()
            .filter(|id| snapshot.merged.contains(id))
            .collect();
        if bundle.is_empty() {
            return Ok(None);
        }

        let mut results = Vec::new();
        for id in &bundle {
            results.extend(self.read_segment(id)?);
        }

        let stamp = Utc::now().format("%Y%m%dT%H%M%S%.fZ");
        let archive = self
            .root
            .join(ARCHIVE_DIR)
            .join(format!("consolidated_{}.{}", stamp, SEGMENT_EXT));
        let header = SegmentHeader::new(WriterId::new("consolidated"), results.len());
        let bytes = segment::encode(&header, &results)?;
        let mut file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&archive)?;
        file.write_all(&bytes)?;
        file.sync_all()?;
        sync_dir(&archive);

        // Originals go before the merged sets are pruned, so a crash in
        // between leaves only stale ids, never a re-foldable segment.
        for id in &bundle {
            fs::remove_file(self.segment_path(id))?;
        }
        sync_dir(&self.segment_path(&bundle[0]));

        let removed: BTreeSet<SegmentId> = bundle.iter().cloned().collect();
        let mut snapshot = snapshot;
        snapshot.merged.retain(|id| !removed.contains(id));
        snapshot.generation += 1;
        snapshot.updated_at = Some(Utc::now());
        write_json_atomic(&self.snapshot_path(), &snapshot)?;
        let mut cursor = self.load_cursor()?;
        cursor.merged.retain(|id| !removed.contains(id));
        cursor.generation = snapshot.generation;
        cursor.updated_at = Some(Utc::now());
        write_json_atomic(&self.cursor_path(), &cursor)?;

        tracing::info!(
            archive = %archive.display(),
            segments = bundle.len(),
            results = results.len(),
            "Consolidated merged segments"
        );
        Ok(Some(ConsolidateReport {
            archive,
            segments: bundle.len(),
            results: results.len(),
        }))
    }
}

fn exists_or_io(err: std::io::Error, id: &SegmentId) -> StoreError {
    if err.kind() == std::io::ErrorKind::AlreadyExists {
        StoreError::SegmentExists(id.to_string())
    } else {
        StoreError::Io(err)
    }
}

impl SegmentSink for ResultStore {
    fn write_segment(&self, writer: &WriterId, results: &[TestResult]) -> BenchResult<SegmentId> {
        Ok(ResultStore::write_segment(self, writer, results)?)
    }
}

impl std::fmt::Debug for ResultStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultStore")
            .field("root", &self.root)
            .finish()
    }
}
