//! fleetbench-core: Sharded, throttled execution of benchmark task sets
//!
//! This crate provides the engine shared by every fleetbench component,
//! including:
//!
//! - Task and result types, and the failure taxonomy
//! - Core traits (Executor, SegmentSink)
//! - Shard planning and resume planning
//! - Per-shard adaptive throttling and the executor pool
//! - Checkpointing and hierarchical aggregation

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod aggregate;
pub mod checkpoint;
pub mod classify;
pub mod config;
pub mod error;
pub mod orchestrator;
pub mod result;
pub mod task;
pub mod throttle;
pub mod traits;
pub mod worker;

pub use aggregate::{AggregateKey, AggregateNode, AggregatePath, HierarchicalAggregator, LEVELS};
pub use checkpoint::{CheckpointCoordinator, CheckpointStats};
pub use classify::classify;
pub use config::{
    CheckpointConfig, RetryConfig, RunConfig, ShardingPolicy, ThrottleConfig, ThrottleMode,
};
pub use error::*;
pub use orchestrator::{
    Orchestrator, OrchestratorBuilder, ResumeMode, ResumePlan, RunReport, RunSummary, ShardPlan,
    ShardReport, ShardStatus,
};
pub use result::*;
pub use task::*;
pub use throttle::{ThrottleController, ThrottlePhase, ThrottleState};
pub use traits::*;
pub use worker::{RetryPolicy, ShardRunner, ShardRunnerBuilder, ShardStats};

#[cfg(test)]
mod integration_tests {
    use super::*;
    use fleetbench_auth::{CredentialRegistry, CredentialSlot};
    use proptest::prelude::*;
    use std::collections::BTreeSet;
    use std::time::Duration;

    fn task(i: usize, strategy: &str) -> TestTask {
        TestTask::new(
            format!("openai-{}", i),
            "openai",
            Configuration::new(strategy, "high", "easy", "travel"),
        )
    }

    fn registry(slots: usize) -> CredentialRegistry {
        let slots = (0..slots)
            .map(|i| CredentialSlot::new(format!("key-{}", i), "https://api.example.com"))
            .collect();
        CredentialRegistry::new()
            .with_provider("openai", slots)
            .unwrap()
    }

    // =========================================================================
    // Round-trip serialization tests
    // =========================================================================

    #[test]
    fn test_result_roundtrip() {
        let mut metadata = std::collections::BTreeMap::new();
        metadata.insert("turns".to_string(), 3);
        let result = TestResult::failure(&task(0, "react"), ErrorKind::RateLimited, Duration::from_millis(250))
            .with_attempts(3)
            .with_metadata(metadata);

        let json = serde_json::to_string(&result).unwrap();
        let deserialized: TestResult = serde_json::from_str(&json).unwrap();
        assert_eq!(deserialized, result);
    }

    #[test]
    fn test_error_kind_snake_case_serialization() {
        for kind in ErrorKind::ALL {
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json, format!("\"{}\"", kind.as_str()));
        }
    }

    #[test]
    fn test_run_config_partial_json_uses_defaults() {
        let config: RunConfig =
            serde_json::from_str(r#"{"throttle": {"mode": "fixed", "initial_workers": 3}}"#).unwrap();
        assert_eq!(config.throttle.mode, ThrottleMode::Fixed);
        assert_eq!(config.throttle.initial_workers, 3);
        assert_eq!(config.retry, RetryConfig::default());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_aggregator_json_roundtrip() {
        let mut agg = HierarchicalAggregator::new();
        agg.fold(&TestResult::success(&task(0, "react"), Duration::from_millis(10)));
        agg.fold(&TestResult::failure(&task(1, "cot"), ErrorKind::Timeout, Duration::from_millis(20)));

        let json = serde_json::to_string(&agg).unwrap();
        let deserialized: HierarchicalAggregator = serde_json::from_str(&json).unwrap();
        assert_eq!(deserialized, agg);
    }

    // =========================================================================
    // Properties
    // =========================================================================

    fn outcome_strategy() -> impl Strategy<Value = (usize, u8, u64)> {
        (0usize..4, 0u8..3, 0u64..5_000)
    }

    proptest! {
        #[test]
        fn prop_even_split_sizes_differ_by_at_most_one(len in 0usize..500, n in 1usize..16) {
            let items: Vec<usize> = (0..len).collect();
            let parts = orchestrator::even_split(items.clone(), n);

            prop_assert_eq!(parts.len(), n);
            let max = parts.iter().map(Vec::len).max().unwrap_or(0);
            let min = parts.iter().map(Vec::len).min().unwrap_or(0);
            prop_assert!(max - min <= 1);
            prop_assert_eq!(parts.concat(), items);
        }

        #[test]
        fn prop_every_task_lands_in_exactly_one_shard(len in 0usize..200, slots in 1usize..6) {
            let tasks: Vec<TestTask> = (0..len).map(|i| task(i, "react")).collect();
            let registry = registry(slots);
            let plans = orchestrator::ShardPlanner::new(&registry, ThrottleConfig::default())
                .plan(tasks, ShardingPolicy::EvenSplit)
                .unwrap();

            // No tasks means no provider to plan for
            prop_assert_eq!(plans.len(), if len == 0 { 0 } else { slots });
            let mut seen = BTreeSet::new();
            for plan in &plans {
                for t in &plan.tasks {
                    prop_assert!(seen.insert(t.task_id.0.clone()));
                }
            }
            prop_assert_eq!(seen.len(), len);
        }

        #[test]
        fn prop_fold_order_does_not_change_aggregate(
            outcomes in proptest::collection::vec(outcome_strategy(), 0..60),
            seed in any::<u64>(),
        ) {
            let strategies = ["react", "cot", "direct", "plan"];
            let results: Vec<TestResult> = outcomes
                .iter()
                .enumerate()
                .map(|(i, (s, o, ms))| {
                    let t = task(i, strategies[*s]);
                    let latency = Duration::from_millis(*ms);
                    match o {
                        0 => TestResult::success(&t, latency),
                        1 => TestResult::partial(&t, latency),
                        _ => TestResult::failure(&t, ErrorKind::Timeout, latency),
                    }
                })
                .collect();

            let mut forward = HierarchicalAggregator::new();
            forward.fold_all(results.iter());

            let mut shuffled = results.clone();
            use rand::{seq::SliceRandom, SeedableRng};
            shuffled.shuffle(&mut rand::rngs::StdRng::seed_from_u64(seed));
            let mut reordered = HierarchicalAggregator::new();
            reordered.fold_all(shuffled.iter());

            prop_assert_eq!(&forward, &reordered);
            let total = forward.totals();
            prop_assert_eq!(total.total as usize, results.len());
            prop_assert!(total.is_consistent());
        }
    }
}
