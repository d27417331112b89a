//! Resume planning: schedule only what a previous run left undone

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::aggregate::{AggregateKey, HierarchicalAggregator};
use crate::task::TestTask;

/// What counts toward a bucket's target
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResumeMode {
    /// Every settled result counts, failures included; results cut short by
    /// shutdown never count
    #[default]
    AnyOutcome,
    /// Only successes and partials count; failed work is scheduled again
    SuccessfulOnly,
}

/// Per-bucket resume decision
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketShortfall {
    /// Bucket key
    pub key: AggregateKey,
    /// Tasks for this bucket in the input set
    pub target: usize,
    /// Results already counted toward the target
    pub done: usize,
    /// Tasks scheduled now
    pub scheduled: usize,
}

/// Outcome of resume planning
#[derive(Debug, Clone, Default)]
pub struct ResumePlan {
    /// Tasks to run, in input order
    pub scheduled: Vec<TestTask>,
    /// Tasks skipped because their bucket already met its target
    pub skipped: usize,
    /// Decision for every bucket in the input set
    pub buckets: Vec<BucketShortfall>,
}

impl ResumePlan {
    /// Check if nothing needs to run
    pub fn is_noop(&self) -> bool {
        self.scheduled.is_empty()
    }
}

/// Compares a task set against an aggregate of already-recorded results
pub struct ResumePlanner;

impl ResumePlanner {
    /// Keep only each `(provider, configuration)` bucket's shortfall
    ///
    /// A bucket's target is the number of its tasks in `tasks`. When a
    /// bucket is short by `n`, its last `n` tasks are scheduled: a run that
    /// stopped early dispatched in input order, so the tail is what it most
    /// likely never reached. Running twice against an unchanged aggregate
    /// schedules nothing the second time.
    pub fn shortfall(
        tasks: Vec<TestTask>,
        completed: &HierarchicalAggregator,
        mode: ResumeMode,
    ) -> ResumePlan {
        let mut bucket_of: Vec<AggregateKey> = Vec::with_capacity(tasks.len());
        let mut targets: BTreeMap<AggregateKey, usize> = BTreeMap::new();
        for task in &tasks {
            let key = AggregateKey::new(task.provider.clone(), task.configuration.clone());
            *targets.entry(key.clone()).or_default() += 1;
            bucket_of.push(key);
        }

        let mut buckets = Vec::with_capacity(targets.len());
        // How many leading tasks of each bucket to skip
        let mut skip: HashMap<AggregateKey, usize> = HashMap::new();
        for (key, target) in &targets {
            let done = completed
                .leaf(key)
                .map(|node| match mode {
                    ResumeMode::AnyOutcome => node.settled(),
                    ResumeMode::SuccessfulOnly => node.completed(),
                })
                .map(|n| usize::try_from(n).unwrap_or(usize::MAX))
                .unwrap_or(0);
            let need = target.saturating_sub(done);
            skip.insert(key.clone(), target - need);
            buckets.push(BucketShortfall {
                key: key.clone(),
                target: *target,
                done,
                scheduled: need,
            });
        }

        let mut scheduled = Vec::new();
        let mut skipped = 0;
        for (task, key) in tasks.into_iter().zip(bucket_of) {
            match skip.get_mut(&key) {
                Some(remaining) if *remaining > 0 => {
                    *remaining -= 1;
                    skipped += 1;
                }
                _ => scheduled.push(task),
            }
        }

        tracing::info!(
            scheduled = scheduled.len(),
            skipped,
            buckets = buckets.len(),
            mode = ?mode,
            "Resume plan computed"
        );

        ResumePlan {
            scheduled,
            skipped,
            buckets,
        }
    }
}
