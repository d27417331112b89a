//! Shard planning: which tasks run on which credential slot

use std::collections::{BTreeMap, BTreeSet};

use fleetbench_auth::{CredentialRegistry, CredentialSlot, ProviderId, RegistryError};

use crate::config::{ShardingPolicy, ThrottleConfig};
use crate::error::BenchResult;
use crate::task::TestTask;

/// A subset of tasks bound to one credential slot
///
/// Created once per run and never mutated after dispatch.
#[derive(Debug, Clone)]
pub struct ShardPlan {
    /// Position in the plan list
    pub index: usize,

    /// Provider the slot belongs to
    pub provider: ProviderId,

    /// Slot every task of the shard runs on
    pub slot: CredentialSlot,

    /// Tasks in dispatch order
    pub tasks: Vec<TestTask>,

    /// Starting point and bounds for the shard's throttle, capped to the
    /// slot's declared ceilings
    pub throttle: ThrottleConfig,
}

impl ShardPlan {
    /// `provider/slot`, used in logs and reports
    pub fn name(&self) -> String {
        format!("{}/{}", self.provider, self.slot.id)
    }

    /// Number of tasks
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Check if the shard has no tasks
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Initial worker hint
    pub fn initial_workers(&self) -> usize {
        self.throttle.initial_workers
    }

    /// Initial QPS hint
    pub fn initial_qps(&self) -> f64 {
        self.throttle.initial_qps
    }
}

/// Splits a task set into one shard per credential slot
#[derive(Debug, Clone)]
pub struct ShardPlanner<'a> {
    registry: &'a CredentialRegistry,
    throttle: ThrottleConfig,
}

impl<'a> ShardPlanner<'a> {
    /// Create a planner over `registry`, seeding every shard's throttle from
    /// `throttle`
    pub fn new(registry: &'a CredentialRegistry, throttle: ThrottleConfig) -> Self {
        Self { registry, throttle }
    }

    /// Plan shards for `tasks`
    ///
    /// Every task lands in exactly one shard. Tasks carrying a credential
    /// hint are pinned to that slot; the rest are distributed by `policy`.
    /// Every registered slot of a provider that has tasks gets a plan, even
    /// if its share is empty. Providers are planned in id order.
    pub fn plan(&self, tasks: Vec<TestTask>, policy: ShardingPolicy) -> BenchResult<Vec<ShardPlan>> {
        let mut by_provider: BTreeMap<ProviderId, Vec<TestTask>> = BTreeMap::new();
        for task in tasks {
            by_provider.entry(task.provider.clone()).or_default().push(task);
        }

        let mut plans = Vec::new();
        for (provider, tasks) in by_provider {
            let slots = self.registry.slots(&provider)?;
            let buckets = assign(&provider, slots, tasks, policy)?;

            for (slot, tasks) in slots.iter().zip(buckets) {
                let throttle = self.throttle.capped_to(slot.max_workers, slot.max_qps);
                tracing::debug!(
                    provider = %provider,
                    slot = %slot.id,
                    tasks = tasks.len(),
                    workers = throttle.initial_workers,
                    qps = throttle.initial_qps,
                    "Planned shard"
                );
                plans.push(ShardPlan {
                    index: plans.len(),
                    provider: provider.clone(),
                    slot: slot.clone(),
                    tasks,
                    throttle,
                });
            }
        }
        Ok(plans)
    }
}

/// Distribute one provider's tasks over its slots
fn assign(
    provider: &ProviderId,
    slots: &[CredentialSlot],
    tasks: Vec<TestTask>,
    policy: ShardingPolicy,
) -> BenchResult<Vec<Vec<TestTask>>> {
    let mut buckets: Vec<Vec<TestTask>> = vec![Vec::new(); slots.len()];
    let mut free = Vec::with_capacity(tasks.len());

    for task in tasks {
        match &task.credential_hint {
            Some(hint) => {
                let idx = slots.iter().position(|s| &s.id == hint).ok_or_else(|| {
                    RegistryError::UnknownCredential {
                        provider: provider.to_string(),
                        slot: hint.to_string(),
                    }
                })?;
                buckets[idx].push(task);
            }
            None => free.push(task),
        }
    }

    match policy {
        ShardingPolicy::EvenSplit => {
            for (idx, chunk) in even_split(free, slots.len()).into_iter().enumerate() {
                buckets[idx].extend(chunk);
            }
        }
        ShardingPolicy::PinByStrategy => {
            let strategies: BTreeSet<String> = free
                .iter()
                .map(|t| t.configuration.strategy.clone())
                .collect();
            let slot_of: BTreeMap<String, usize> = strategies
                .into_iter()
                .enumerate()
                .map(|(i, s)| (s, i % slots.len()))
                .collect();
            for task in free {
                let idx = slot_of
                    .get(&task.configuration.strategy)
                    .copied()
                    .unwrap_or(0);
                buckets[idx].push(task);
            }
        }
    }
    Ok(buckets)
}

/// Split `tasks` into `n` contiguous chunks whose sizes differ by at most one
///
/// `base = len / n`; the first `len % n` chunks get one extra task.
pub fn even_split<T>(tasks: Vec<T>, n: usize) -> Vec<Vec<T>> {
    if n == 0 {
        return Vec::new();
    }
    let base = tasks.len() / n;
    let remainder = tasks.len() % n;
    let mut iter = tasks.into_iter();
    (0..n)
        .map(|i| {
            let size = base + usize::from(i < remainder);
            iter.by_ref().take(size).collect()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::Configuration;
    use fleetbench_auth::SlotId;

    fn registry() -> CredentialRegistry {
        CredentialRegistry::new()
            .with_provider(
                "openai",
                vec![
                    CredentialSlot::new("key-1", "https://a").with_ceiling(2, 1.5),
                    CredentialSlot::new("key-2", "https://a"),
                    CredentialSlot::new("key-3", "https://a"),
                ],
            )
            .unwrap()
            .with_provider("local", vec![CredentialSlot::new("only", "http://localhost")])
            .unwrap()
    }

    fn tasks(provider: &str, n: usize) -> Vec<TestTask> {
        (0..n)
            .map(|i| {
                let strategy = ["react", "cot", "plain", "reflect"][i % 4];
                TestTask::new(
                    format!("{}-{}", provider, i),
                    provider,
                    Configuration::new(strategy, "high", "easy", "travel"),
                )
            })
            .collect()
    }

    #[test]
    fn test_even_split_sizes() {
        let sizes: Vec<usize> = even_split((0..100).collect(), 3).iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![34, 33, 33]);
        let sizes: Vec<usize> = even_split((0..2).collect(), 3).iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![1, 1, 0]);
        assert!(even_split(vec![1, 2], 0).is_empty());
    }

    #[test]
    fn test_single_slot_gets_everything() {
        let registry = registry();
        let planner = ShardPlanner::new(&registry, ThrottleConfig::default());
        let plans = planner.plan(tasks("local", 7), ShardingPolicy::EvenSplit).unwrap();
        assert_eq!(plans.len(), 1);
        assert_eq!(plans[0].len(), 7);
        assert_eq!(plans[0].name(), "local/only");
    }

    #[test]
    fn test_key_pool_even_split() {
        let registry = registry();
        let planner = ShardPlanner::new(&registry, ThrottleConfig::default());
        let plans = planner.plan(tasks("openai", 100), ShardingPolicy::EvenSplit).unwrap();
        let sizes: Vec<usize> = plans.iter().map(ShardPlan::len).collect();
        assert_eq!(sizes, vec![34, 33, 33]);
        assert_eq!(plans[0].tasks[0].task_id.0, "openai-0");
        assert_eq!(plans[1].tasks[0].task_id.0, "openai-34");
    }

    #[test]
    fn test_throttle_hint_capped_to_slot() {
        let registry = registry();
        let planner = ShardPlanner::new(&registry, ThrottleConfig::default().with_initial(4, 5.0));
        let plans = planner.plan(tasks("openai", 3), ShardingPolicy::EvenSplit).unwrap();
        assert_eq!(plans[0].initial_workers(), 2);
        assert_eq!(plans[0].initial_qps(), 1.5);
        assert_eq!(plans[1].initial_workers(), 4);
        assert_eq!(plans[1].initial_qps(), 2.0);
    }

    #[test]
    fn test_unknown_provider_fails() {
        let registry = registry();
        let planner = ShardPlanner::new(&registry, ThrottleConfig::default());
        let err = planner.plan(tasks("mystery", 1), ShardingPolicy::EvenSplit).unwrap_err();
        assert!(err.to_string().contains("mystery"));
    }

    #[test]
    fn test_hinted_tasks_are_pinned() {
        let registry = registry();
        let planner = ShardPlanner::new(&registry, ThrottleConfig::default());
        let mut input = tasks("openai", 6);
        input[0] = input[0].clone().with_credential_hint(SlotId::from("key-3"));
        input[1] = input[1].clone().with_credential_hint(SlotId::from("key-3"));

        let plans = planner.plan(input, ShardingPolicy::EvenSplit).unwrap();
        assert!(plans[2].tasks.iter().any(|t| t.task_id.0 == "openai-0"));
        assert!(plans[2].tasks.iter().any(|t| t.task_id.0 == "openai-1"));
        let total: usize = plans.iter().map(ShardPlan::len).sum();
        assert_eq!(total, 6);
    }

    #[test]
    fn test_unknown_hint_fails() {
        let registry = registry();
        let planner = ShardPlanner::new(&registry, ThrottleConfig::default());
        let input = vec![tasks("openai", 1)[0]
            .clone()
            .with_credential_hint(SlotId::from("key-9"))];
        let err = planner.plan(input, ShardingPolicy::EvenSplit).unwrap_err();
        assert!(err.to_string().contains("key-9"));
    }

    #[test]
    fn test_pin_by_strategy() {
        let registry = registry();
        let planner = ShardPlanner::new(&registry, ThrottleConfig::default());
        let plans = planner.plan(tasks("openai", 20), ShardingPolicy::PinByStrategy).unwrap();

        for plan in &plans {
            let strategies: BTreeSet<&str> = plan
                .tasks
                .iter()
                .map(|t| t.configuration.strategy.as_str())
                .collect();
            assert!(!strategies.is_empty());
        }
        // Four strategies over three slots: sorted [cot, plain, react, reflect]
        // so cot and reflect share key-1
        let first: BTreeSet<&str> = plans[0]
            .tasks
            .iter()
            .map(|t| t.configuration.strategy.as_str())
            .collect();
        assert_eq!(first, BTreeSet::from(["cot", "reflect"]));
    }

    #[test]
    fn test_mixed_providers_ordered_by_id() {
        let registry = registry();
        let planner = ShardPlanner::new(&registry, ThrottleConfig::default());
        let mut input = tasks("openai", 4);
        input.extend(tasks("local", 2));
        let plans = planner.plan(input, ShardingPolicy::EvenSplit).unwrap();
        let names: Vec<String> = plans.iter().map(ShardPlan::name).collect();
        assert_eq!(names, vec!["local/only", "openai/key-1", "openai/key-2", "openai/key-3"]);
        assert!(plans.iter().enumerate().all(|(i, p)| p.index == i));
    }
}
