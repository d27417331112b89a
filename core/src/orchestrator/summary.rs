//! Shard reports and the run summary

use std::collections::BTreeMap;
use std::time::Duration;

use fleetbench_auth::{ProviderId, SlotId};
use serde::{Deserialize, Serialize};

use crate::aggregate::{AggregatePath, HierarchicalAggregator};
use crate::checkpoint::CheckpointStats;
use crate::error::ErrorKind;
use crate::throttle::ThrottleState;
use crate::worker::ShardStats;

use super::planner::ShardPlan;

/// How a shard ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShardStatus {
    /// Every planned task has a result and no transient failure ran out of
    /// retries
    Complete,
    /// Some tasks are missing, were cut short by shutdown, or ended on
    /// exhausted retries; re-run the shortfall
    Shortfall,
}

/// Final report for one shard
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShardReport {
    /// `provider/slot`
    pub name: String,
    /// Provider
    pub provider: ProviderId,
    /// Credential slot
    pub slot: SlotId,
    /// Tasks planned
    pub planned: usize,
    /// Results recorded
    pub recorded: usize,
    /// Successes
    pub success: usize,
    /// Partials
    pub partial: usize,
    /// Failures
    pub failure: usize,
    /// Attempts made beyond each task's first
    pub retries: usize,
    /// Failures that used up every retry
    pub exhausted_retries: usize,
    /// Results cut short by shutdown
    pub interrupted: usize,
    /// Tasks never dispatched
    pub not_started: usize,
    /// Rate-limit signals observed
    pub rate_limit_signals: u64,
    /// Throttle state when the shard finished
    pub final_throttle: ThrottleState,
    /// Wall-clock time
    pub elapsed: Duration,
    /// Outcome
    pub status: ShardStatus,
}

impl ShardReport {
    /// Build a report from a shard's plan, stats and final throttle state
    pub fn new(plan: &ShardPlan, stats: &ShardStats, throttle: ThrottleState) -> Self {
        let status = if stats.exhausted_retries > 0
            || stats.interrupted() > 0
            || stats.recorded < stats.planned
        {
            ShardStatus::Shortfall
        } else {
            ShardStatus::Complete
        };
        Self {
            name: plan.name(),
            provider: plan.provider.clone(),
            slot: plan.slot.id.clone(),
            planned: stats.planned,
            recorded: stats.recorded,
            success: stats.success,
            partial: stats.partial,
            failure: stats.failure,
            retries: stats.retries,
            exhausted_retries: stats.exhausted_retries,
            interrupted: stats.interrupted(),
            not_started: stats.not_started,
            rate_limit_signals: throttle.rate_limit_signals,
            final_throttle: throttle,
            elapsed: stats.elapsed().unwrap_or_default(),
            status,
        }
    }

    /// Report for a shard whose runner failed before producing stats
    pub fn failed(plan: &ShardPlan, throttle: ThrottleState) -> Self {
        Self::new(plan, &ShardStats::new(plan.len()), throttle)
    }

    /// Check if the shard fell short
    pub fn is_shortfall(&self) -> bool {
        self.status == ShardStatus::Shortfall
    }
}

/// What one orchestrator run did
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunReport {
    /// Tasks in the input set
    pub requested: usize,
    /// Tasks skipped by resume planning
    pub skipped: usize,
    /// Tasks handed to shard runners
    pub scheduled: usize,
    /// One report per shard, in plan order
    pub shards: Vec<ShardReport>,
    /// Segments written during the run
    pub segments_written: u64,
    /// Results still buffered after the final flush (non-zero only if the
    /// final flush failed)
    pub unflushed: usize,
    /// Whether the run was cut short by shutdown
    pub interrupted: bool,
}

impl RunReport {
    /// Attach checkpoint counters
    pub fn with_checkpoint(mut self, stats: CheckpointStats) -> Self {
        self.segments_written = stats.segments;
        self.unflushed = stats.buffered;
        self
    }

    /// Shards that ended short
    pub fn shortfall_shards(&self) -> impl Iterator<Item = &ShardReport> {
        self.shards.iter().filter(|s| s.is_shortfall())
    }

    /// Not interrupted, every shard complete and every result flushed
    pub fn is_complete(&self) -> bool {
        !self.interrupted && self.unflushed == 0 && self.shards.iter().all(|s| !s.is_shortfall())
    }
}

/// Per-provider rollup, read from the aggregator
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderSummary {
    /// Results recorded
    pub total: u64,
    /// Successes
    pub success: u64,
    /// Partials
    pub partial: u64,
    /// Failures
    pub failure: u64,
    /// (success + partial) / total
    pub completion_rate: f64,
    /// Mean final-attempt latency
    pub mean_latency: Option<Duration>,
    /// Failures per kind, only kinds that occurred
    pub errors: BTreeMap<ErrorKind, u64>,
}

/// Operator-facing summary of a run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunSummary {
    /// Rollup per provider
    pub providers: BTreeMap<ProviderId, ProviderSummary>,
    /// Shards that could not reach their target
    pub shortfall: Vec<ShardReport>,
    /// Whether the run is complete
    pub complete: bool,
}

impl RunSummary {
    /// Build from the merged aggregate and the run's report
    pub fn build(aggregator: &HierarchicalAggregator, report: &RunReport) -> Self {
        let providers = aggregator
            .children(&AggregatePath::root())
            .into_iter()
            .map(|(provider, node)| {
                let summary = ProviderSummary {
                    total: node.total,
                    success: node.success,
                    partial: node.partial,
                    failure: node.failure,
                    completion_rate: node.completion_rate(),
                    mean_latency: node.mean_latency(),
                    errors: node.errors.clone(),
                };
                (ProviderId::from(provider), summary)
            })
            .collect();

        Self {
            providers,
            shortfall: report.shortfall_shards().cloned().collect(),
            complete: report.is_complete(),
        }
    }

    /// Process exit code: 0 on full completion, 1 otherwise
    pub fn exit_code(&self) -> i32 {
        if self.complete {
            0
        } else {
            1
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ThrottleConfig;
    use crate::result::TestResult;
    use crate::task::{Configuration, TestTask};
    use crate::throttle::ThrottleController;
    use fleetbench_auth::CredentialSlot;

    fn plan(n: usize) -> ShardPlan {
        ShardPlan {
            index: 0,
            provider: ProviderId::from("openai"),
            slot: CredentialSlot::new("key-1", "https://a"),
            tasks: (0..n)
                .map(|i| TestTask::new(format!("t-{}", i), "openai", Configuration::new("s", "r", "d", "c")))
                .collect(),
            throttle: ThrottleConfig::default(),
        }
    }

    fn throttle() -> ThrottleState {
        ThrottleController::new("s", &ThrottleConfig::default()).snapshot()
    }

    #[test]
    fn test_complete_shard() {
        let plan = plan(2);
        let mut stats = ShardStats::new(2);
        for task in &plan.tasks {
            stats.record(&TestResult::success(task, Duration::ZERO).with_attempts(2));
        }
        let report = ShardReport::new(&plan, &stats, throttle());
        assert_eq!(report.status, ShardStatus::Complete);
        assert_eq!(report.name, "openai/key-1");
        assert_eq!(report.retries, 2);
    }

    #[test]
    fn test_structural_failures_do_not_make_shortfall() {
        let plan = plan(1);
        let mut stats = ShardStats::new(1);
        stats.record(&TestResult::failure(&plan.tasks[0], ErrorKind::ParameterError, Duration::ZERO));
        assert_eq!(ShardReport::new(&plan, &stats, throttle()).status, ShardStatus::Complete);
    }

    #[test]
    fn test_exhausted_retries_make_shortfall() {
        let plan = plan(1);
        let mut stats = ShardStats::new(1);
        stats.record(&TestResult::failure(&plan.tasks[0], ErrorKind::RateLimited, Duration::ZERO));
        stats.exhausted_retries = 1;
        assert!(ShardReport::new(&plan, &stats, throttle()).is_shortfall());
    }

    #[test]
    fn test_missing_results_make_shortfall() {
        let plan = plan(3);
        let mut stats = ShardStats::new(3);
        stats.not_started = 3;
        assert!(ShardReport::new(&plan, &stats, throttle()).is_shortfall());
        assert!(ShardReport::failed(&plan, throttle()).is_shortfall());
    }

    #[test]
    fn test_cancelled_attempts_make_shortfall() {
        let plan = plan(3);
        let mut stats = ShardStats::new(3);
        for task in &plan.tasks {
            stats.record(&TestResult::failure(task, ErrorKind::Timeout, Duration::ZERO).mark_interrupted());
        }
        stats.cancelled = 3;

        let report = ShardReport::new(&plan, &stats, throttle());
        assert_eq!(report.recorded, report.planned);
        assert_eq!(report.interrupted, 3);
        assert!(report.is_shortfall());
    }

    #[test]
    fn test_abandoned_retries_make_shortfall() {
        let plan = plan(1);
        let mut stats = ShardStats::new(1);
        stats.record(&TestResult::failure(&plan.tasks[0], ErrorKind::RateLimited, Duration::ZERO).mark_interrupted());
        stats.abandoned_retries = 1;
        assert!(ShardReport::new(&plan, &stats, throttle()).is_shortfall());
    }

    #[test]
    fn test_interrupted_run_is_incomplete() {
        let plan = plan(1);
        let mut stats = ShardStats::new(1);
        stats.record(&TestResult::success(&plan.tasks[0], Duration::ZERO));
        let report = RunReport {
            requested: 1,
            scheduled: 1,
            shards: vec![ShardReport::new(&plan, &stats, throttle())],
            interrupted: true,
            ..Default::default()
        };

        assert!(report.shortfall_shards().next().is_none());
        assert!(!report.is_complete());
        assert_eq!(RunSummary::build(&HierarchicalAggregator::new(), &report).exit_code(), 1);
    }

    #[test]
    fn test_summary_from_aggregate() {
        let plan = plan(2);
        let mut agg = HierarchicalAggregator::new();
        agg.fold(&TestResult::success(&plan.tasks[0], Duration::from_millis(10)));
        agg.fold(&TestResult::failure(&plan.tasks[1], ErrorKind::Timeout, Duration::from_millis(30)));

        let mut stats = ShardStats::new(2);
        stats.record(&TestResult::success(&plan.tasks[0], Duration::ZERO));
        stats.record(&TestResult::failure(&plan.tasks[1], ErrorKind::Timeout, Duration::ZERO));
        stats.exhausted_retries = 1;
        let report = RunReport {
            requested: 2,
            scheduled: 2,
            shards: vec![ShardReport::new(&plan, &stats, throttle())],
            ..Default::default()
        };

        let summary = RunSummary::build(&agg, &report);
        let openai = &summary.providers[&ProviderId::from("openai")];
        assert_eq!(openai.total, 2);
        assert_eq!(openai.completion_rate, 0.5);
        assert_eq!(openai.errors.get(&ErrorKind::Timeout), Some(&1));
        assert_eq!(openai.mean_latency, Some(Duration::from_millis(20)));
        assert_eq!(summary.shortfall.len(), 1);
        assert_eq!(summary.exit_code(), 1);
    }

    #[test]
    fn test_unflushed_results_make_run_incomplete() {
        let report = RunReport::default().with_checkpoint(CheckpointStats {
            buffered: 3,
            ..Default::default()
        });
        assert!(!report.is_complete());
    }
}
