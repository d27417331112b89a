//! Integration tests for the orchestrator module

use super::*;
use crate::aggregate::{AggregatePath, HierarchicalAggregator};
use crate::config::{CheckpointConfig, RetryConfig, RunConfig, ShardingPolicy, ThrottleConfig};
use crate::error::{BenchError, BenchResult, ErrorKind};
use crate::result::TestResult;
use crate::task::{Configuration, TestTask};
use crate::traits::{
    ExecutionContext, ExecutionError, ExecutionReport, Executor, FailureSignal, SegmentId,
    SegmentSink, WriterId,
};

use async_trait::async_trait;
use fleetbench_auth::{CredentialRegistry, CredentialSlot};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

// ============================================================================
// Test collaborators
// ============================================================================

/// Executor whose behaviour is chosen per slot
#[derive(Default)]
struct ScriptedExecutor {
    /// Slot that answers 429 to its first `rate_limits` attempts
    throttled_slot: Option<String>,
    rate_limits: AtomicUsize,
    /// Every attempt fails with this signal
    always_fail: Option<FailureSignal>,
    /// Attempts block until cancelled
    hang: bool,
    calls: AtomicUsize,
}

impl ScriptedExecutor {
    fn succeeding() -> Self {
        Self::default()
    }

    fn rate_limiting(slot: &str, times: usize) -> Self {
        Self {
            throttled_slot: Some(slot.to_string()),
            rate_limits: AtomicUsize::new(times),
            ..Default::default()
        }
    }

    fn failing(signal: FailureSignal) -> Self {
        Self {
            always_fail: Some(signal),
            ..Default::default()
        }
    }

    fn hanging() -> Self {
        Self {
            hang: true,
            ..Default::default()
        }
    }
}

#[async_trait]
impl Executor for ScriptedExecutor {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn execute(
        &self,
        ctx: ExecutionContext,
        _task: &TestTask,
    ) -> Result<ExecutionReport, ExecutionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if self.hang {
            ctx.cancel.cancelled().await;
            return Err(ExecutionError::Cancelled);
        }
        if let Some(signal) = &self.always_fail {
            return Err(ExecutionError::Failed(signal.clone()));
        }
        if self.throttled_slot.as_deref() == Some(ctx.slot.id.as_str()) {
            let left = self
                .rate_limits
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
            if left.is_ok() {
                return Err(ExecutionError::Failed(FailureSignal::status(
                    429,
                    "Too Many Requests",
                )));
            }
        }
        Ok(ExecutionReport::success().with_counter("turns", 1))
    }
}

#[derive(Default)]
struct MemorySink {
    results: Mutex<Vec<TestResult>>,
    segments: AtomicUsize,
}

impl MemorySink {
    fn results(&self) -> Vec<TestResult> {
        self.results.lock().unwrap().clone()
    }

    fn aggregate(&self) -> HierarchicalAggregator {
        let mut agg = HierarchicalAggregator::new();
        agg.fold_all(self.results().iter());
        agg
    }
}

impl SegmentSink for MemorySink {
    fn write_segment(&self, writer: &WriterId, results: &[TestResult]) -> BenchResult<SegmentId> {
        let n = self.segments.fetch_add(1, Ordering::SeqCst);
        self.results.lock().unwrap().extend_from_slice(results);
        Ok(SegmentId(format!("{}_{}", writer, n)))
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn registry(slots: usize) -> Arc<CredentialRegistry> {
    let slots = (1..=slots)
        .map(|i| {
            CredentialSlot::new(format!("key-{}", i), "https://api.example.com")
                .with_ceiling(8, 400.0)
        })
        .collect();
    Arc::new(
        CredentialRegistry::new()
            .with_provider("openai", slots)
            .unwrap(),
    )
}

fn fast_config() -> RunConfig {
    RunConfig {
        throttle: ThrottleConfig {
            initial_workers: 4,
            initial_qps: 200.0,
            min_workers: 1,
            max_workers: 8,
            min_qps: 20.0,
            max_qps: 400.0,
            ..Default::default()
        },
        retry: RetryConfig {
            max_attempts: 3,
            base_delay_min_ms: 1,
            base_delay_max_ms: 2,
            multiplier: 1.5,
            max_delay_ms: 10,
        },
        checkpoint: CheckpointConfig {
            flush_threshold: 10,
            flush_interval_secs: 60,
        },
        sharding: ShardingPolicy::EvenSplit,
    }
}

fn tasks(n: usize) -> Vec<TestTask> {
    let strategies = ["react", "cot", "direct"];
    (0..n)
        .map(|i| {
            TestTask::new(
                format!("openai-{}", i),
                "openai",
                Configuration::new(strategies[i % strategies.len()], "high", "easy", "travel"),
            )
        })
        .collect()
}

fn orchestrator(
    executor: ScriptedExecutor,
    sink: Arc<MemorySink>,
    slots: usize,
) -> Orchestrator {
    OrchestratorBuilder::new()
        .config(fast_config())
        .registry(registry(slots))
        .executor(Arc::new(executor))
        .sink(sink)
        .writer(WriterId::new("test"))
        .build()
        .unwrap()
}

// ============================================================================
// Builder Tests
// ============================================================================

#[test]
fn test_builder_missing_registry() {
    let result = OrchestratorBuilder::new()
        .executor(Arc::new(ScriptedExecutor::succeeding()))
        .sink(Arc::new(MemorySink::default()))
        .build();
    assert!(matches!(result, Err(BenchError::Config(msg)) if msg.contains("registry")));
}

#[test]
fn test_builder_missing_executor() {
    let result = OrchestratorBuilder::new()
        .registry(registry(1))
        .sink(Arc::new(MemorySink::default()))
        .build();
    assert!(matches!(result, Err(BenchError::Config(msg)) if msg.contains("executor")));
}

#[test]
fn test_builder_missing_sink() {
    let result = OrchestratorBuilder::new()
        .registry(registry(1))
        .executor(Arc::new(ScriptedExecutor::succeeding()))
        .build();
    assert!(matches!(result, Err(BenchError::Config(msg)) if msg.contains("sink")));
}

#[test]
fn test_builder_invalid_config() {
    let mut config = fast_config();
    config.throttle.min_workers = 0;
    let result = OrchestratorBuilder::new()
        .config(config)
        .registry(registry(1))
        .executor(Arc::new(ScriptedExecutor::succeeding()))
        .sink(Arc::new(MemorySink::default()))
        .build();
    assert!(result.is_err());
}

#[test]
fn test_orchestrator_debug_format() {
    let orch = orchestrator(ScriptedExecutor::succeeding(), Arc::new(MemorySink::default()), 1);
    let debug = format!("{:?}", orch);
    assert!(debug.contains("Orchestrator"));
    assert!(debug.contains("scripted"));
}

// ============================================================================
// Planning Tests
// ============================================================================

#[test]
fn test_plan_splits_evenly() {
    let orch = orchestrator(ScriptedExecutor::succeeding(), Arc::new(MemorySink::default()), 3);
    let (resume, shards) = orch.plan(tasks(100)).unwrap();
    assert_eq!(resume.scheduled.len(), 100);
    let sizes: Vec<usize> = shards.iter().map(|s| s.len()).collect();
    assert_eq!(sizes, vec![34, 33, 33]);
}

#[test]
fn test_plan_pin_by_strategy() {
    let mut config = fast_config();
    config.sharding = ShardingPolicy::PinByStrategy;
    let orch = OrchestratorBuilder::new()
        .config(config)
        .registry(registry(3))
        .executor(Arc::new(ScriptedExecutor::succeeding()))
        .sink(Arc::new(MemorySink::default()))
        .build()
        .unwrap();

    let (_, shards) = orch.plan(tasks(30)).unwrap();
    for shard in &shards {
        let first = &shard.tasks[0].configuration.strategy;
        assert!(shard.tasks.iter().all(|t| &t.configuration.strategy == first));
    }
}

// ============================================================================
// Execution Tests
// ============================================================================

#[tokio::test]
async fn test_run_records_every_task() {
    let sink = Arc::new(MemorySink::default());
    let orch = orchestrator(ScriptedExecutor::succeeding(), Arc::clone(&sink), 3);

    let report = orch.run(tasks(30)).await.unwrap();

    assert_eq!(report.scheduled, 30);
    assert!(report.is_complete());
    assert!(!report.interrupted);
    assert_eq!(report.unflushed, 0);
    assert_eq!(sink.results().len(), 30);
    assert_eq!(report.shards.iter().map(|s| s.recorded).sum::<usize>(), 30);
}

#[tokio::test]
async fn test_rate_limit_stays_in_its_shard() {
    let sink = Arc::new(MemorySink::default());
    let orch = orchestrator(ScriptedExecutor::rate_limiting("key-2", 3), Arc::clone(&sink), 3);

    let report = orch.run(tasks(100)).await.unwrap();

    let planned: Vec<usize> = report.shards.iter().map(|s| s.planned).collect();
    assert_eq!(planned, vec![34, 33, 33]);

    let throttled = &report.shards[1];
    assert_eq!(throttled.slot.as_str(), "key-2");
    assert_eq!(throttled.rate_limit_signals, 3);
    assert!(throttled.final_throttle.lowest_qps < 200.0);

    for shard in [&report.shards[0], &report.shards[2]] {
        assert_eq!(shard.rate_limit_signals, 0);
        assert!(shard.final_throttle.lowest_qps >= 200.0);
    }

    // Retries turned the rate limits into successes
    assert!(report.is_complete());
    let results = sink.results();
    assert_eq!(results.len(), 100);
    assert!(results.iter().all(|r| r.outcome.is_completed()));
    assert!(results.iter().any(|r| r.attempts > 1));
}

#[tokio::test]
async fn test_exhausted_retries_are_shortfall() {
    let sink = Arc::new(MemorySink::default());
    let orch = orchestrator(
        ScriptedExecutor::failing(FailureSignal::status(504, "Gateway Timeout")),
        Arc::clone(&sink),
        1,
    );

    let report = orch.run(tasks(4)).await.unwrap();

    assert_eq!(report.shards[0].exhausted_retries, 4);
    assert!(report.shards[0].is_shortfall());
    assert!(!report.is_complete());

    let summary = RunSummary::build(&sink.aggregate(), &report);
    assert_eq!(summary.exit_code(), 1);
    assert_eq!(summary.shortfall.len(), 1);
    assert!(sink.results().iter().all(|r| r.attempts == 3));
}

#[tokio::test]
async fn test_structural_failures_are_recorded_without_retry() {
    let sink = Arc::new(MemorySink::default());
    let executor = ScriptedExecutor::failing(FailureSignal::status(400, "bad parameter"));
    let orch = orchestrator(executor, Arc::clone(&sink), 1);

    let report = orch.run(tasks(3)).await.unwrap();

    assert!(report.is_complete());
    let results = sink.results();
    assert_eq!(results.len(), 3);
    assert!(results
        .iter()
        .all(|r| r.attempts == 1 && r.error_kind == Some(ErrorKind::ParameterError)));
}

#[tokio::test]
async fn test_shutdown_flushes_in_flight_results() {
    let sink = Arc::new(MemorySink::default());
    let orch = orchestrator(ScriptedExecutor::hanging(), Arc::clone(&sink), 1);

    let shutdown = orch.shutdown_token();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        shutdown.cancel();
    });

    let report = orch.run(tasks(10)).await.unwrap();

    assert!(report.interrupted);
    assert!(!report.is_complete());
    let shard = &report.shards[0];
    assert_eq!(shard.recorded + shard.not_started, 10);
    // Every cut-short attempt reached the sink
    let results = sink.results();
    assert_eq!(results.len(), shard.recorded);
    assert!(results
        .iter()
        .all(|r| r.error_kind == Some(ErrorKind::Timeout)));
}

#[tokio::test]
async fn test_shutdown_with_every_task_in_flight_is_shortfall() {
    // Three tasks, four workers: every task is dispatched before shutdown
    let sink = Arc::new(MemorySink::default());
    let orch = orchestrator(ScriptedExecutor::hanging(), Arc::clone(&sink), 1);

    let shutdown = orch.shutdown_token();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        shutdown.cancel();
    });

    let report = orch.run(tasks(3)).await.unwrap();

    let shard = &report.shards[0];
    assert_eq!(shard.recorded, shard.planned);
    assert_eq!(shard.interrupted, 3);
    assert_eq!(shard.status, ShardStatus::Shortfall);
    let summary = RunSummary::build(&sink.aggregate(), &report);
    assert_eq!(summary.shortfall.len(), 1);
    assert_eq!(summary.exit_code(), 1);

    // The cut-short results do not count as done
    let resumed = OrchestratorBuilder::new()
        .config(fast_config())
        .registry(registry(1))
        .executor(Arc::new(ScriptedExecutor::succeeding()))
        .sink(Arc::clone(&sink) as Arc<dyn SegmentSink>)
        .resume_from(sink.aggregate(), ResumeMode::AnyOutcome)
        .build()
        .unwrap();
    let (plan, _) = resumed.plan(tasks(3)).unwrap();
    assert_eq!(plan.scheduled.len(), 3);
}

#[tokio::test]
async fn test_run_with_timeout() {
    let sink = Arc::new(MemorySink::default());
    let orch = orchestrator(ScriptedExecutor::hanging(), Arc::clone(&sink), 2);

    let report = tokio::time::timeout(
        Duration::from_secs(5),
        orch.run_with_timeout(tasks(6), Duration::from_millis(100)),
    )
    .await
    .expect("run should stop after its timeout")
    .unwrap();

    assert!(report.interrupted);
}

// ============================================================================
// Resume Tests
// ============================================================================

#[tokio::test]
async fn test_resume_after_complete_run_is_noop() {
    let sink = Arc::new(MemorySink::default());
    let first = orchestrator(ScriptedExecutor::succeeding(), Arc::clone(&sink), 2);
    first.run(tasks(12)).await.unwrap();

    let executor = Arc::new(ScriptedExecutor::succeeding());
    let second = OrchestratorBuilder::new()
        .config(fast_config())
        .registry(registry(2))
        .executor(executor.clone())
        .sink(Arc::clone(&sink) as Arc<dyn SegmentSink>)
        .resume_from(sink.aggregate(), ResumeMode::AnyOutcome)
        .build()
        .unwrap();

    let report = second.run(tasks(12)).await.unwrap();

    assert_eq!(report.skipped, 12);
    assert_eq!(report.scheduled, 0);
    assert!(report.is_complete());
    assert_eq!(executor.calls.load(Ordering::SeqCst), 0);
    assert_eq!(sink.results().len(), 12);
}

#[tokio::test]
async fn test_resume_runs_only_the_gap() {
    let sink = Arc::new(MemorySink::default());
    let all = tasks(9);

    // A previous run that covered the first six tasks
    let first = orchestrator(ScriptedExecutor::succeeding(), Arc::clone(&sink), 1);
    first.run(all[..6].to_vec()).await.unwrap();

    let second = OrchestratorBuilder::new()
        .config(fast_config())
        .registry(registry(1))
        .executor(Arc::new(ScriptedExecutor::succeeding()))
        .sink(Arc::clone(&sink) as Arc<dyn SegmentSink>)
        .resume_from(sink.aggregate(), ResumeMode::AnyOutcome)
        .build()
        .unwrap();

    let report = second.run(all).await.unwrap();

    assert_eq!(report.scheduled, 3);
    let totals = sink.aggregate().query(&AggregatePath::provider("openai"));
    assert_eq!(totals.total, 9);
    assert_eq!(totals.success, 9);
}
