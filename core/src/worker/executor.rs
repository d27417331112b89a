//! Shard runner execution loop

use crate::checkpoint::CheckpointCoordinator;
use crate::classify::classify;
use crate::error::{BenchResult, ErrorKind};
use crate::result::TestResult;
use crate::task::TestTask;
use crate::throttle::ThrottleController;
use crate::traits::{
    Completion, ExecutionContext, ExecutionError, ExecutionReport, Executor, FailureSignal,
};

use super::retry::RetryPolicy;
use super::stats::ShardStats;

use fleetbench_auth::CredentialSlot;
use futures::FutureExt;
use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// A task waiting for its next attempt
struct Pending {
    task: Arc<TestTask>,
    attempt: u32,
}

/// A task whose last attempt failed transiently, waiting out its backoff
struct Delayed {
    due: Instant,
    pending: Pending,
    last_kind: ErrorKind,
    last_latency: Duration,
}

enum AttemptOutcome {
    Completed(ExecutionReport),
    Failed(FailureSignal),
    TimedOut,
    Cancelled,
}

struct AttemptDone {
    pending: Pending,
    outcome: AttemptOutcome,
    latency: Duration,
}

/// Runs the tasks of one shard against one credential slot
///
/// At most `throttle.workers()` attempts are in flight at once and every
/// dispatch goes through `throttle.acquire()`. Each attempt runs under its
/// own deadline and its own child cancellation token, so one attempt timing
/// out never touches another.
pub struct ShardRunner {
    /// Shard name used in logs
    name: String,

    /// Slot every attempt uses
    slot: Arc<CredentialSlot>,

    /// Tasks in dispatch order
    tasks: Vec<TestTask>,

    /// Execution collaborator (shared across shards via Arc)
    executor: Arc<dyn Executor>,

    /// Admission control owned by this shard
    throttle: Arc<ThrottleController>,

    /// Run-wide result buffer (shared across shards via Arc)
    coordinator: Arc<CheckpointCoordinator>,

    /// Retry schedule
    retry: RetryPolicy,
}

impl ShardRunner {
    /// Create a new shard runner
    pub fn new(
        name: impl Into<String>,
        slot: Arc<CredentialSlot>,
        tasks: Vec<TestTask>,
        executor: Arc<dyn Executor>,
        throttle: Arc<ThrottleController>,
        coordinator: Arc<CheckpointCoordinator>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            name: name.into(),
            slot,
            tasks,
            executor,
            throttle,
            coordinator,
            retry,
        }
    }

    /// Run every task to a final result, or until `cancel` fires
    ///
    /// Tasks still queued when the run is cancelled are counted as
    /// `not_started`. Attempts in flight are cut short and recorded as
    /// `Timeout` failures; tasks waiting out a retry backoff keep the
    /// failure of their last attempt. Both kinds of result are marked
    /// interrupted so a resumed run schedules them again.
    pub async fn run(self, cancel: CancellationToken) -> BenchResult<ShardStats> {
        let mut stats = ShardStats::new(self.tasks.len());
        stats.start();

        tracing::debug!(
            shard = %self.name,
            slot = %self.slot.id,
            tasks = self.tasks.len(),
            "Shard runner started"
        );

        let mut ready: VecDeque<Pending> = self
            .tasks
            .iter()
            .cloned()
            .map(|task| Pending {
                task: Arc::new(task),
                attempt: 1,
            })
            .collect();
        let mut delayed: Vec<Delayed> = Vec::new();
        let mut in_flight: JoinSet<AttemptDone> = JoinSet::new();

        loop {
            // Retries whose backoff has passed go to the front of the queue
            let now = Instant::now();
            let mut i = 0;
            while i < delayed.len() {
                if delayed[i].due <= now {
                    ready.push_front(delayed.swap_remove(i).pending);
                } else {
                    i += 1;
                }
            }

            if ready.is_empty() && delayed.is_empty() && in_flight.is_empty() {
                break;
            }

            let can_dispatch = !ready.is_empty() && in_flight.len() < self.throttle.workers();
            let next_due = delayed.iter().map(|d| d.due).min();

            tokio::select! {
                biased;

                // Shutdown has the highest priority
                _ = cancel.cancelled() => {
                    tracing::debug!(shard = %self.name, "Shard runner received shutdown signal");
                    break;
                }

                Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                    match joined {
                        Ok(done) => {
                            if let Some(retry) = self.handle(done, &cancel, &mut stats) {
                                delayed.push(retry);
                            }
                        }
                        // Panics are caught inside the attempt; only runtime
                        // shutdown gets here.
                        Err(e) => tracing::error!(shard = %self.name, error = %e, "Attempt task aborted"),
                    }
                }

                admitted = self.throttle.acquire(&cancel), if can_dispatch => {
                    if admitted.is_none() {
                        break;
                    }
                    if let Some(pending) = ready.pop_front() {
                        in_flight.spawn(run_attempt(
                            Arc::clone(&self.executor),
                            Arc::clone(&self.slot),
                            pending,
                            cancel.child_token(),
                        ));
                    }
                }

                _ = sleep_until_due(next_due), if next_due.is_some() => {}
            }
        }

        // Drain attempts that were in flight at shutdown. Each observes its
        // cancelled token and returns promptly.
        while let Some(joined) = in_flight.join_next().await {
            if let Ok(done) = joined {
                if let Some(retry) = self.handle(done, &cancel, &mut stats) {
                    delayed.push(retry);
                }
            }
        }
        for waiting in delayed.drain(..) {
            stats.abandoned_retries += 1;
            let result = TestResult::failure(&waiting.pending.task, waiting.last_kind, waiting.last_latency)
                .with_slot(self.slot.id.clone())
                .with_attempts(waiting.pending.attempt.saturating_sub(1).max(1))
                .mark_interrupted();
            self.record(result, &mut stats);
        }
        stats.not_started += ready.len();

        stats.stop();
        tracing::debug!(
            shard = %self.name,
            recorded = stats.recorded,
            failure = stats.failure,
            not_started = stats.not_started,
            interrupted = stats.interrupted(),
            elapsed_ms = ?stats.elapsed().map(|d| d.as_millis()),
            "Shard runner finished"
        );

        Ok(stats)
    }

    /// Turn one finished attempt into a result or a scheduled retry
    fn handle(
        &self,
        done: AttemptDone,
        cancel: &CancellationToken,
        stats: &mut ShardStats,
    ) -> Option<Delayed> {
        let AttemptDone {
            pending,
            outcome,
            latency,
        } = done;
        let task = Arc::clone(&pending.task);

        let (kind, retry_after) = match outcome {
            AttemptOutcome::Completed(report) => {
                self.throttle.observe(None);
                let result = match report.completion {
                    Completion::Success => TestResult::success(&task, latency),
                    Completion::Partial => TestResult::partial(&task, latency),
                };
                let result = result
                    .with_slot(self.slot.id.clone())
                    .with_attempts(pending.attempt)
                    .with_metadata(report.metadata);
                self.record(result, stats);
                return None;
            }
            AttemptOutcome::Cancelled if cancel.is_cancelled() => {
                stats.cancelled += 1;
                let result = TestResult::failure(&task, ErrorKind::Timeout, latency)
                    .with_slot(self.slot.id.clone())
                    .with_attempts(pending.attempt)
                    .mark_interrupted();
                self.record(result, stats);
                return None;
            }
            // The collaborator gave up on its own; treat it like a deadline
            AttemptOutcome::Cancelled | AttemptOutcome::TimedOut => (ErrorKind::Timeout, None),
            AttemptOutcome::Failed(signal) => (classify(&signal), signal.retry_after),
        };

        self.throttle.observe(Some(kind));

        let wants_retry = self.retry.should_retry(kind, pending.attempt);
        if wants_retry && cancel.is_cancelled() {
            stats.abandoned_retries += 1;
            let result = TestResult::failure(&task, kind, latency)
                .with_slot(self.slot.id.clone())
                .with_attempts(pending.attempt)
                .mark_interrupted();
            self.record(result, stats);
            return None;
        }
        if wants_retry {
            let delay = self.retry.delay_with_hint(pending.attempt - 1, retry_after);
            tracing::debug!(
                shard = %self.name,
                task_id = %task.task_id,
                attempt = pending.attempt,
                kind = %kind,
                delay_ms = delay.as_millis() as u64,
                "Retrying task"
            );
            return Some(Delayed {
                due: Instant::now() + delay,
                pending: Pending {
                    task,
                    attempt: pending.attempt + 1,
                },
                last_kind: kind,
                last_latency: latency,
            });
        }

        if self.retry.is_exhausted(kind, pending.attempt) {
            stats.exhausted_retries += 1;
            tracing::warn!(
                shard = %self.name,
                task_id = %task.task_id,
                attempts = pending.attempt,
                kind = %kind,
                "Retries exhausted"
            );
        }
        let result = TestResult::failure(&task, kind, latency)
            .with_slot(self.slot.id.clone())
            .with_attempts(pending.attempt);
        self.record(result, stats);
        None
    }

    /// Hand a final result to the coordinator
    fn record(&self, result: TestResult, stats: &mut ShardStats) {
        stats.record(&result);
        // A failed flush keeps the batch buffered; it is retried on the next flush
        if let Err(e) = self.coordinator.add(result) {
            tracing::warn!(shard = %self.name, error = %e, "Checkpoint flush failed");
        }
    }

    /// Shard name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of tasks in the shard
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Check if the shard has no tasks
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

async fn sleep_until_due(due: Option<Instant>) {
    match due {
        Some(due) => tokio::time::sleep_until(due).await,
        None => std::future::pending().await,
    }
}

/// Run one attempt under its deadline and cancellation token
async fn run_attempt(
    executor: Arc<dyn Executor>,
    slot: Arc<CredentialSlot>,
    pending: Pending,
    cancel: CancellationToken,
) -> AttemptDone {
    let start = Instant::now();
    let ctx = ExecutionContext {
        cancel: cancel.clone(),
        slot,
        attempt: pending.attempt,
    };
    let budget = pending.task.timeout_budget;
    let call = AssertUnwindSafe(executor.execute(ctx, &pending.task)).catch_unwind();

    let outcome = tokio::select! {
        biased;
        _ = cancel.cancelled() => AttemptOutcome::Cancelled,
        res = tokio::time::timeout(budget, call) => match res {
            Err(_) => AttemptOutcome::TimedOut,
            Ok(Err(_panic)) => AttemptOutcome::Failed(FailureSignal::reason(
                "other",
                format!("executor {} panicked", executor.name()),
            )),
            Ok(Ok(Ok(report))) => AttemptOutcome::Completed(report),
            Ok(Ok(Err(ExecutionError::Failed(signal)))) => AttemptOutcome::Failed(signal),
            Ok(Ok(Err(ExecutionError::Cancelled))) => AttemptOutcome::Cancelled,
        },
    };
    // Stop anything the collaborator left running for this attempt
    cancel.cancel();

    AttemptDone {
        pending,
        outcome,
        latency: start.elapsed(),
    }
}

impl std::fmt::Debug for ShardRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShardRunner")
            .field("name", &self.name)
            .field("slot", &self.slot.id)
            .field("tasks", &self.tasks.len())
            .field("executor", &self.executor.name())
            .field("throttle", &self.throttle)
            .field("retry", &self.retry)
            .finish()
    }
}
