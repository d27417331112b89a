//! Checkpoint coordinator
//!
//! One long-lived coordinator per run buffers completed results and hands
//! them to a [`SegmentSink`] in whole batches. Shard runners share it
//! through an `Arc`; it is never rebuilt mid-run.
//!
//! The buffer is swapped out under the lock and written outside it, so
//! `add` never waits on disk IO performed for another caller and no result
//! can land in a batch that is already being written.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::CheckpointConfig;
use crate::error::BenchResult;
use crate::result::TestResult;
use crate::traits::{SegmentId, SegmentSink, WriterId};

struct Buffer {
    results: Vec<TestResult>,
    last_flush: Instant,
}

/// Counters describing what the coordinator has done so far
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CheckpointStats {
    /// Results accepted by `add`
    pub added: u64,
    /// Results written to segments
    pub flushed: u64,
    /// Segments written
    pub segments: u64,
    /// Flush attempts that failed (their results were re-buffered)
    pub failed_flushes: u64,
    /// Results currently buffered
    pub buffered: usize,
}

/// Buffers results and flushes them at size/time thresholds or on demand
pub struct CheckpointCoordinator {
    sink: Arc<dyn SegmentSink>,
    writer: WriterId,
    config: CheckpointConfig,
    buffer: Mutex<Buffer>,
    added: AtomicU64,
    flushed: AtomicU64,
    segments: AtomicU64,
    failed_flushes: AtomicU64,
}

impl CheckpointCoordinator {
    /// Create a coordinator writing through `sink` as `writer`
    pub fn new(sink: Arc<dyn SegmentSink>, writer: WriterId, config: CheckpointConfig) -> Self {
        Self {
            sink,
            writer,
            config,
            buffer: Mutex::new(Buffer {
                results: Vec::new(),
                last_flush: Instant::now(),
            }),
            added: AtomicU64::new(0),
            flushed: AtomicU64::new(0),
            segments: AtomicU64::new(0),
            failed_flushes: AtomicU64::new(0),
        }
    }

    /// Writer identity used for every segment
    pub fn writer(&self) -> &WriterId {
        &self.writer
    }

    // Critical sections only push or swap a Vec, so a poisoned buffer is
    // still consistent.
    fn lock(&self) -> MutexGuard<'_, Buffer> {
        self.buffer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Buffer one result, flushing if the size threshold is reached
    ///
    /// Returns the segment written, if this call triggered a flush.
    pub fn add(&self, result: TestResult) -> BenchResult<Option<SegmentId>> {
        self.added.fetch_add(1, Ordering::Relaxed);
        let batch = {
            let mut buffer = self.lock();
            buffer.results.push(result);
            if buffer.results.len() >= self.config.flush_threshold {
                Some(Self::take(&mut buffer))
            } else {
                None
            }
        };
        match batch {
            Some(batch) => self.write(batch).map(Some),
            None => Ok(None),
        }
    }

    /// Flush the buffer
    ///
    /// With `force` the whole buffer is written regardless of thresholds.
    /// Without it, a flush happens only if the size or time threshold has
    /// been reached. An empty buffer never produces a segment.
    pub fn flush(&self, force: bool) -> BenchResult<Option<SegmentId>> {
        let batch = {
            let mut buffer = self.lock();
            if buffer.results.is_empty() {
                return Ok(None);
            }
            let due = buffer.results.len() >= self.config.flush_threshold
                || buffer.last_flush.elapsed() >= self.config.flush_interval();
            if !force && !due {
                return Ok(None);
            }
            Self::take(&mut buffer)
        };
        self.write(batch).map(Some)
    }

    /// Flush only if a threshold has been reached
    pub fn flush_if_due(&self) -> BenchResult<Option<SegmentId>> {
        self.flush(false)
    }

    fn take(buffer: &mut Buffer) -> Vec<TestResult> {
        buffer.last_flush = Instant::now();
        std::mem::take(&mut buffer.results)
    }

    fn write(&self, batch: Vec<TestResult>) -> BenchResult<SegmentId> {
        let count = batch.len();
        match self.sink.write_segment(&self.writer, &batch) {
            Ok(id) => {
                self.flushed.fetch_add(count as u64, Ordering::Relaxed);
                self.segments.fetch_add(1, Ordering::Relaxed);
                debug!(segment = %id, results = count, "Flushed segment");
                Ok(id)
            }
            Err(e) => {
                // Put the batch back so the next flush retries it
                self.failed_flushes.fetch_add(1, Ordering::Relaxed);
                error!(results = count, error = %e, "Segment write failed, results re-buffered");
                self.lock().results.extend(batch);
                Err(e)
            }
        }
    }

    /// Current counters
    pub fn stats(&self) -> CheckpointStats {
        CheckpointStats {
            added: self.added.load(Ordering::Relaxed),
            flushed: self.flushed.load(Ordering::Relaxed),
            segments: self.segments.load(Ordering::Relaxed),
            failed_flushes: self.failed_flushes.load(Ordering::Relaxed),
            buffered: self.lock().results.len(),
        }
    }

    /// Run the time-threshold flush on a tokio interval until `cancel` fires
    ///
    /// The final force-flush on shutdown is the caller's job.
    pub fn spawn_interval_flusher(self: &Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        let coordinator = Arc::clone(self);
        let period = coordinator.config.flush_interval();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        debug!("Interval flusher stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        if let Err(e) = coordinator.flush(true) {
                            warn!(error = %e, "Interval flush failed");
                        }
                    }
                }
            }
        })
    }
}

impl Drop for CheckpointCoordinator {
    fn drop(&mut self) {
        let buffered = self.lock().results.len();
        if buffered > 0 {
            warn!(buffered, "Checkpoint coordinator dropped with unflushed results");
        } else {
            info!(segments = self.segments.load(Ordering::Relaxed), "Checkpoint coordinator closed");
        }
    }
}

impl std::fmt::Debug for CheckpointCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CheckpointCoordinator")
            .field("writer", &self.writer)
            .field("config", &self.config)
            .field("stats", &self.stats())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BenchError;
    use crate::task::{Configuration, TestTask};
    use std::time::Duration;

    #[derive(Default)]
    struct MemorySink {
        segments: Mutex<Vec<Vec<TestResult>>>,
        fail_next: AtomicU64,
    }

    impl MemorySink {
        fn segments(&self) -> Vec<Vec<TestResult>> {
            self.segments.lock().unwrap().clone()
        }
    }

    impl SegmentSink for MemorySink {
        fn write_segment(&self, writer: &WriterId, results: &[TestResult]) -> BenchResult<SegmentId> {
            if self.fail_next.load(Ordering::SeqCst) > 0 {
                self.fail_next.fetch_sub(1, Ordering::SeqCst);
                return Err(BenchError::storage("disk full"));
            }
            let mut segments = self.segments.lock().unwrap();
            segments.push(results.to_vec());
            Ok(SegmentId(format!("{}_{}", writer, segments.len())))
        }
    }

    fn result(i: usize) -> TestResult {
        let task = TestTask::new(
            format!("t-{}", i),
            "p",
            Configuration::new("s", "r", "d", "c"),
        );
        TestResult::success(&task, Duration::from_millis(1))
    }

    fn coordinator(sink: Arc<MemorySink>, threshold: usize) -> CheckpointCoordinator {
        CheckpointCoordinator::new(
            sink,
            WriterId::new("test"),
            CheckpointConfig {
                flush_threshold: threshold,
                flush_interval_secs: 3600,
            },
        )
    }

    #[test]
    fn test_size_threshold_flushes_whole_buffer() {
        let sink = Arc::new(MemorySink::default());
        let coord = coordinator(sink.clone(), 3);

        assert!(coord.add(result(0)).unwrap().is_none());
        assert!(coord.add(result(1)).unwrap().is_none());
        assert!(coord.add(result(2)).unwrap().is_some());

        let segments = sink.segments();
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].len(), 3);
        assert_eq!(coord.stats().buffered, 0);
    }

    #[test]
    fn test_flush_without_force_respects_thresholds() {
        let sink = Arc::new(MemorySink::default());
        let coord = coordinator(sink.clone(), 10);
        coord.add(result(0)).unwrap();

        assert!(coord.flush_if_due().unwrap().is_none());
        assert!(coord.flush(true).unwrap().is_some());
        assert!(coord.flush(true).unwrap().is_none());
        assert_eq!(sink.segments().len(), 1);
    }

    #[test]
    fn test_failed_write_rebuffers() {
        let sink = Arc::new(MemorySink::default());
        sink.fail_next.store(1, Ordering::SeqCst);
        let coord = coordinator(sink.clone(), 2);

        coord.add(result(0)).unwrap();
        assert!(coord.add(result(1)).is_err());
        assert_eq!(coord.stats().buffered, 2);
        assert_eq!(coord.stats().failed_flushes, 1);

        coord.flush(true).unwrap();
        let stats = coord.stats();
        assert_eq!(stats.flushed, 2);
        assert_eq!(stats.buffered, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 3)]
    async fn test_concurrent_adds_lose_nothing() {
        let sink = Arc::new(MemorySink::default());
        let coord = Arc::new(coordinator(sink.clone(), 10));

        let mut handles = Vec::new();
        for caller in 0..3usize {
            let coord = Arc::clone(&coord);
            let count = if caller == 0 { 9 } else { 8 };
            handles.push(tokio::spawn(async move {
                for i in 0..count {
                    coord.add(result(caller * 100 + i)).unwrap();
                    if i % 4 == 0 {
                        coord.flush_if_due().unwrap();
                    }
                    tokio::task::yield_now().await;
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        let complete_segments = sink.segments().len();
        coord.flush(true).unwrap();

        let segments = sink.segments();
        assert!(complete_segments >= 2);
        let total: usize = segments.iter().map(Vec::len).sum();
        assert_eq!(total, 25);

        let mut ids: Vec<_> = segments.iter().flatten().map(|r| r.task_id.clone()).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 25);
    }

    #[tokio::test(start_paused = true)]
    async fn test_interval_flusher() {
        let sink = Arc::new(MemorySink::default());
        let coord = Arc::new(CheckpointCoordinator::new(
            sink.clone(),
            WriterId::new("timer"),
            CheckpointConfig {
                flush_threshold: 100,
                flush_interval_secs: 60,
            },
        ));
        let cancel = CancellationToken::new();
        let handle = coord.spawn_interval_flusher(cancel.clone());

        coord.add(result(0)).unwrap();
        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(sink.segments().len(), 1);

        cancel.cancel();
        handle.await.unwrap();
    }
}
