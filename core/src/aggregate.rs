//! Hierarchical result rollup
//!
//! Results are folded into leaves keyed by
//! `(provider, strategy, reliability, difficulty, category)`. Internal levels
//! are never stored: a query sums the matching leaves on demand, so a parent
//! is always exactly the sum of its children.
//!
//! All sums are integers (latency in microseconds), which makes folding
//! commutative: any fold order over the same results yields the same tree.

use std::collections::BTreeMap;
use std::time::Duration;

use fleetbench_auth::ProviderId;
use serde::{Deserialize, Serialize};

use crate::error::ErrorKind;
use crate::result::{Outcome, TestResult};
use crate::task::Configuration;

/// Names of the hierarchy levels, root first
pub const LEVELS: [&str; 5] = ["provider", "strategy", "reliability", "difficulty", "category"];

/// Full leaf key
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AggregateKey {
    /// Provider the results ran against
    pub provider: ProviderId,
    /// Configuration tuple the results were bucketed by
    pub configuration: Configuration,
}

impl AggregateKey {
    /// Create a key
    pub fn new(provider: ProviderId, configuration: Configuration) -> Self {
        Self {
            provider,
            configuration,
        }
    }

    /// Key a result belongs to
    pub fn of(result: &TestResult) -> Self {
        Self::new(result.provider.clone(), result.configuration.clone())
    }

    /// Component at `depth` (0 = provider ... 4 = category)
    pub fn component(&self, depth: usize) -> Option<&str> {
        let c = &self.configuration;
        match depth {
            0 => Some(self.provider.as_str()),
            1 => Some(&c.strategy),
            2 => Some(&c.reliability),
            3 => Some(&c.difficulty),
            4 => Some(&c.category),
            _ => None,
        }
    }
}

/// A prefix of the hierarchy, from the root (empty) down to a full leaf key
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct AggregatePath {
    parts: Vec<String>,
}

impl AggregatePath {
    /// The root: matches every leaf
    pub fn root() -> Self {
        Self::default()
    }

    /// Path selecting one provider
    pub fn provider(provider: impl Into<String>) -> Self {
        Self {
            parts: vec![provider.into()],
        }
    }

    /// Descend one level. Ignored once the path is a full leaf key.
    pub fn child(mut self, part: impl Into<String>) -> Self {
        if self.parts.len() < LEVELS.len() {
            self.parts.push(part.into());
        }
        self
    }

    /// Parse `provider/strategy/...`; empty components are skipped
    pub fn parse(path: &str) -> Self {
        path.split('/')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .fold(Self::root(), |acc, part| acc.child(part))
    }

    /// Path pointing at exactly this leaf
    pub fn for_key(key: &AggregateKey) -> Self {
        (0..LEVELS.len())
            .filter_map(|depth| key.component(depth))
            .fold(Self::root(), |acc, part| acc.child(part))
    }

    /// Number of levels fixed by this path
    pub fn depth(&self) -> usize {
        self.parts.len()
    }

    /// Whether `key` lies under this path
    pub fn matches(&self, key: &AggregateKey) -> bool {
        self.parts
            .iter()
            .enumerate()
            .all(|(depth, part)| key.component(depth) == Some(part.as_str()))
    }
}

impl std::fmt::Display for AggregatePath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.parts.is_empty() {
            f.write_str("*")
        } else {
            f.write_str(&self.parts.join("/"))
        }
    }
}

/// Running counts and sums for one leaf, or the sum of several
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregateNode {
    /// Results folded in
    pub total: u64,
    /// Successful results
    pub success: u64,
    /// Partially successful results
    pub partial: u64,
    /// Failed results
    pub failure: u64,
    /// Results cut short by shutdown (a subset of `failure`)
    #[serde(default)]
    pub interrupted: u64,
    /// Sum of final-attempt latencies in microseconds
    pub latency_us_sum: u64,
    /// Sum of attempts across all results
    #[serde(default)]
    pub attempts_sum: u64,
    /// Per-counter sums of provider-reported metadata
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata_sums: BTreeMap<String, u64>,
    /// Failures per taxonomy kind
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub errors: BTreeMap<ErrorKind, u64>,
}

impl AggregateNode {
    /// Fold one result into this node
    pub fn record(&mut self, result: &TestResult) {
        self.total += 1;
        match result.outcome {
            Outcome::Success => self.success += 1,
            Outcome::Partial => self.partial += 1,
            Outcome::Failure => {
                self.failure += 1;
                let kind = result.error_kind.unwrap_or(ErrorKind::Other);
                *self.errors.entry(kind).or_default() += 1;
            }
        }
        if result.interrupted {
            self.interrupted += 1;
        }
        self.latency_us_sum = self.latency_us_sum.saturating_add(result.latency_us());
        self.attempts_sum = self.attempts_sum.saturating_add(u64::from(result.attempts));
        for (name, value) in &result.metadata {
            let sum = self.metadata_sums.entry(name.clone()).or_default();
            *sum = sum.saturating_add(*value);
        }
    }

    /// Add another node's counts and sums to this one
    pub fn absorb(&mut self, other: &AggregateNode) {
        self.total += other.total;
        self.success += other.success;
        self.partial += other.partial;
        self.failure += other.failure;
        self.interrupted += other.interrupted;
        self.latency_us_sum = self.latency_us_sum.saturating_add(other.latency_us_sum);
        self.attempts_sum = self.attempts_sum.saturating_add(other.attempts_sum);
        for (name, value) in &other.metadata_sums {
            let sum = self.metadata_sums.entry(name.clone()).or_default();
            *sum = sum.saturating_add(*value);
        }
        for (kind, count) in &other.errors {
            *self.errors.entry(*kind).or_default() += count;
        }
    }

    /// `total == success + partial + failure`
    pub fn is_consistent(&self) -> bool {
        self.total == self.success + self.partial + self.failure
            && self.errors.values().sum::<u64>() == self.failure
            && self.interrupted <= self.failure
    }

    /// Results that reached a final outcome without shutdown cutting them short
    pub fn settled(&self) -> u64 {
        self.total.saturating_sub(self.interrupted)
    }

    /// Success plus partial
    pub fn completed(&self) -> u64 {
        self.success + self.partial
    }

    /// Share of results that completed (success or partial)
    pub fn completion_rate(&self) -> f64 {
        if self.total > 0 {
            self.completed() as f64 / self.total as f64
        } else {
            0.0
        }
    }

    /// Share of results that fully succeeded
    pub fn success_rate(&self) -> f64 {
        if self.total > 0 {
            self.success as f64 / self.total as f64
        } else {
            0.0
        }
    }

    /// Mean final-attempt latency
    pub fn mean_latency(&self) -> Option<Duration> {
        (self.total > 0).then(|| Duration::from_micros(self.latency_us_sum / self.total))
    }

    /// Mean of a metadata counter over all results
    pub fn metadata_mean(&self, name: &str) -> Option<f64> {
        if self.total == 0 {
            return None;
        }
        self.metadata_sums
            .get(name)
            .map(|sum| *sum as f64 / self.total as f64)
    }

    /// Failures of one kind
    pub fn error_count(&self, kind: ErrorKind) -> u64 {
        self.errors.get(&kind).copied().unwrap_or(0)
    }
}

#[derive(Serialize, Deserialize)]
struct LeafEntry {
    key: AggregateKey,
    node: AggregateNode,
}

/// Leaf-level rollup of every folded result
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<LeafEntry>", into = "Vec<LeafEntry>")]
pub struct HierarchicalAggregator {
    leaves: BTreeMap<AggregateKey, AggregateNode>,
}

impl From<Vec<LeafEntry>> for HierarchicalAggregator {
    fn from(entries: Vec<LeafEntry>) -> Self {
        let mut aggregator = Self::new();
        for entry in entries {
            aggregator
                .leaves
                .entry(entry.key)
                .or_default()
                .absorb(&entry.node);
        }
        aggregator
    }
}

impl From<HierarchicalAggregator> for Vec<LeafEntry> {
    fn from(aggregator: HierarchicalAggregator) -> Self {
        aggregator
            .leaves
            .into_iter()
            .map(|(key, node)| LeafEntry { key, node })
            .collect()
    }
}

impl HierarchicalAggregator {
    /// Empty rollup
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one result into exactly one leaf
    ///
    /// Callers guarantee each result is folded once; the store's
    /// merge-then-mark sequence provides that.
    pub fn fold(&mut self, result: &TestResult) {
        self.leaves
            .entry(AggregateKey::of(result))
            .or_default()
            .record(result);
    }

    /// Fold a batch
    pub fn fold_all<'a>(&mut self, results: impl IntoIterator<Item = &'a TestResult>) {
        for result in results {
            self.fold(result);
        }
    }

    /// Add every leaf of `other` to this rollup
    pub fn merge(&mut self, other: &HierarchicalAggregator) {
        for (key, node) in &other.leaves {
            self.leaves.entry(key.clone()).or_default().absorb(node);
        }
    }

    /// Sum of all leaves under `path`
    pub fn query(&self, path: &AggregatePath) -> AggregateNode {
        let mut sum = AggregateNode::default();
        for (_, node) in self.leaves.iter().filter(|(key, _)| path.matches(key)) {
            sum.absorb(node);
        }
        sum
    }

    /// Rollups one level below `path`, keyed by the child component
    pub fn children(&self, path: &AggregatePath) -> BTreeMap<String, AggregateNode> {
        let mut children: BTreeMap<String, AggregateNode> = BTreeMap::new();
        for (key, node) in self.leaves.iter().filter(|(key, _)| path.matches(key)) {
            if let Some(component) = key.component(path.depth()) {
                children
                    .entry(component.to_string())
                    .or_default()
                    .absorb(node);
            }
        }
        children
    }

    /// One leaf, if anything was folded into it
    pub fn leaf(&self, key: &AggregateKey) -> Option<&AggregateNode> {
        self.leaves.get(key)
    }

    /// All leaves in key order
    pub fn leaves(&self) -> impl Iterator<Item = (&AggregateKey, &AggregateNode)> {
        self.leaves.iter()
    }

    /// Whole-run rollup
    pub fn totals(&self) -> AggregateNode {
        self.query(&AggregatePath::root())
    }

    /// Number of non-empty leaves
    pub fn len(&self) -> usize {
        self.leaves.len()
    }

    /// Check if nothing has been folded yet
    pub fn is_empty(&self) -> bool {
        self.leaves.is_empty()
    }
}
