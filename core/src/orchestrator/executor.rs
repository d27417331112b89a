//! Orchestrator execution logic

use std::sync::Arc;
use std::time::{Duration, Instant};

use fleetbench_auth::CredentialRegistry;
use tokio_util::sync::CancellationToken;

use crate::aggregate::HierarchicalAggregator;
use crate::checkpoint::CheckpointCoordinator;
use crate::config::RunConfig;
use crate::error::{BenchError, BenchResult};
use crate::task::TestTask;
use crate::throttle::ThrottleController;
use crate::traits::Executor;
use crate::worker::{RetryPolicy, ShardRunnerBuilder, ShardStats};

use super::planner::{ShardPlan, ShardPlanner};
use super::resume::{ResumeMode, ResumePlan, ResumePlanner};
use super::summary::{RunReport, ShardReport};

/// Orchestrator manages one run
///
/// Plans shards, gives each its own throttle and runner, feeds every result
/// into the single run-wide checkpoint coordinator and force-flushes it
/// before returning, however the run ends.
pub struct Orchestrator {
    /// Run configuration
    pub(crate) config: RunConfig,

    /// Provider and slot lookup
    pub(crate) registry: Arc<CredentialRegistry>,

    /// Execution collaborator (shared across shards)
    pub(crate) executor: Arc<dyn Executor>,

    /// The run's one checkpoint coordinator
    pub(crate) coordinator: Arc<CheckpointCoordinator>,

    /// Results of earlier runs, for resume planning
    pub(crate) completed: Option<HierarchicalAggregator>,

    /// What counts as done when resuming
    pub(crate) resume_mode: ResumeMode,

    /// Root shutdown token; every shard and attempt holds a child
    pub(crate) shutdown: CancellationToken,
}

impl Orchestrator {
    /// Create a new orchestrator
    ///
    /// Use `OrchestratorBuilder` for a more ergonomic construction.
    pub fn new(
        config: RunConfig,
        registry: Arc<CredentialRegistry>,
        executor: Arc<dyn Executor>,
        coordinator: Arc<CheckpointCoordinator>,
    ) -> Self {
        Self {
            config,
            registry,
            executor,
            coordinator,
            completed: None,
            resume_mode: ResumeMode::default(),
            shutdown: CancellationToken::new(),
        }
    }

    /// Get a shutdown token; cancelling it stops the run
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Trigger shutdown of all shards
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Get the run configuration
    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// The run's checkpoint coordinator
    pub fn coordinator(&self) -> &Arc<CheckpointCoordinator> {
        &self.coordinator
    }

    /// Compute what a run over `tasks` would do, without running anything
    pub fn plan(&self, tasks: Vec<TestTask>) -> BenchResult<(ResumePlan, Vec<ShardPlan>)> {
        let resume = match &self.completed {
            Some(completed) => ResumePlanner::shortfall(tasks, completed, self.resume_mode),
            None => ResumePlan {
                scheduled: tasks,
                ..Default::default()
            },
        };
        let planner = ShardPlanner::new(&self.registry, self.config.throttle.clone());
        let shards = planner.plan(resume.scheduled.clone(), self.config.sharding)?;
        Ok((resume, shards))
    }

    /// Run the task set
    ///
    /// Returns once every shard has finished or shutdown was requested and
    /// in-flight attempts have been recorded.
    pub async fn run(&self, tasks: Vec<TestTask>) -> BenchResult<RunReport> {
        let start = Instant::now();
        let requested = tasks.len();
        let (resume, plans) = self.plan(tasks)?;

        tracing::info!(
            requested,
            scheduled = resume.scheduled.len(),
            skipped = resume.skipped,
            shards = plans.len(),
            sharding = ?self.config.sharding,
            mode = ?self.config.throttle.mode,
            "Starting run"
        );

        let flusher_stop = CancellationToken::new();
        let flusher = self.coordinator.spawn_interval_flusher(flusher_stop.clone());
        let retry = RetryPolicy::from_config(&self.config.retry);

        // Spawn one runner per non-empty shard
        let mut handles = Vec::with_capacity(plans.len());
        for plan in &plans {
            let throttle = Arc::new(ThrottleController::new(plan.name(), &plan.throttle));
            if plan.is_empty() {
                handles.push((throttle, None));
                continue;
            }
            let runner = ShardRunnerBuilder::new(plan.name())
                .slot(Arc::new(plan.slot.clone()))
                .tasks(plan.tasks.clone())
                .executor(Arc::clone(&self.executor))
                .throttle(Arc::clone(&throttle))
                .coordinator(Arc::clone(&self.coordinator))
                .retry_policy(retry.clone())
                .build()?;
            let cancel = self.shutdown.child_token();
            handles.push((throttle, Some(tokio::spawn(async move { runner.run(cancel).await }))));
        }

        // Wait for all shards to complete
        let mut shards = Vec::with_capacity(plans.len());
        for (plan, (throttle, handle)) in plans.iter().zip(handles) {
            let report = match handle {
                None => ShardReport::new(plan, &ShardStats::new(0), throttle.snapshot()),
                Some(handle) => match handle.await {
                    Ok(Ok(stats)) => ShardReport::new(plan, &stats, throttle.snapshot()),
                    Ok(Err(e)) => {
                        tracing::error!(shard = %plan.name(), error = %e, "Shard returned error");
                        ShardReport::failed(plan, throttle.snapshot())
                    }
                    Err(e) => {
                        tracing::error!(shard = %plan.name(), error = %e, "Shard task panicked");
                        ShardReport::failed(plan, throttle.snapshot())
                    }
                },
            };
            tracing::info!(
                shard = %report.name,
                recorded = report.recorded,
                planned = report.planned,
                interrupted = report.interrupted,
                status = ?report.status,
                qps = report.final_throttle.qps,
                workers = report.final_throttle.workers,
                "Shard finished"
            );
            shards.push(report);
        }

        // The final flush runs however the shards ended
        flusher_stop.cancel();
        let _ = flusher.await;
        if let Err(e) = self.coordinator.flush(true) {
            tracing::error!(error = %e, "Final flush failed; results remain buffered");
        }

        let report = RunReport {
            requested,
            skipped: resume.skipped,
            scheduled: resume.scheduled.len(),
            shards,
            interrupted: self.shutdown.is_cancelled(),
            ..Default::default()
        }
        .with_checkpoint(self.coordinator.stats());

        tracing::info!(
            elapsed_secs = start.elapsed().as_secs_f64(),
            segments = report.segments_written,
            shortfall = report.shortfall_shards().count(),
            interrupted = report.interrupted,
            "Run completed"
        );

        if report.unflushed > 0 {
            return Err(BenchError::orchestration(format!(
                "{} results could not be flushed",
                report.unflushed
            )));
        }
        Ok(report)
    }

    /// Run with Ctrl+C signal handling
    ///
    /// Ctrl+C cancels the root token: shards stop admitting, in-flight
    /// attempts are cut short and the coordinator is force-flushed.
    pub async fn run_with_signal_handling(&self, tasks: Vec<TestTask>) -> BenchResult<RunReport> {
        let shutdown = self.shutdown.clone();

        // Spawn signal handler task
        let signal_handle = tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    tracing::info!("Received Ctrl+C, initiating graceful shutdown...");
                    shutdown.cancel();
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to listen for Ctrl+C");
                }
            }
        });

        let result = self.run(tasks).await;

        // Abort signal handler if still running
        signal_handle.abort();

        result
    }

    /// Run with a timeout
    ///
    /// Automatically triggers shutdown when timeout is reached.
    pub async fn run_with_timeout(
        &self,
        tasks: Vec<TestTask>,
        timeout: Duration,
    ) -> BenchResult<RunReport> {
        let shutdown = self.shutdown.clone();

        let timeout_handle = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            tracing::info!("Timeout reached, initiating shutdown...");
            shutdown.cancel();
        });

        let result = self.run(tasks).await;

        timeout_handle.abort();

        result
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("config", &self.config)
            .field("executor", &self.executor.name())
            .field("resume_mode", &self.resume_mode)
            .field("resuming", &self.completed.is_some())
            .finish()
    }
}
