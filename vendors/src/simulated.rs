//! Simulated model-serving endpoint

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use fleetbench_core::{
    ExecutionContext, ExecutionError, ExecutionReport, Executor, FailureSignal, TestTask,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::time::Instant;

use crate::config::{ConfigValidationError, SimulationConfig};

/// Structural failures the simulated model makes, as (reason, message)
const STRUCTURAL_FAILURES: &[(&str, &str)] = &[
    ("tool_selection", "model called search_flights instead of book_hotel"),
    ("parameter", "missing required parameter 'date'"),
    ("sequence_order", "payment called before reservation"),
    ("dependency", "reservation id from previous step not found"),
    ("malformed_response", "reply is not valid JSON"),
    ("max_turns", "conversation exceeded the turn limit"),
];

const CAPACITY_WINDOW: Duration = Duration::from_secs(1);

/// Every random draw of one attempt, made up front so the outcome depends
/// only on seed, task and attempt number
struct Rolls {
    hang: bool,
    latency: Duration,
    rate_limited: bool,
    failure: Option<usize>,
    partial: bool,
    turns: u64,
    tool_calls: u64,
}

/// Seeded stand-in for a remote endpoint
///
/// The same seed, task id and attempt number always produce the same
/// outcome, regardless of scheduling. Per-slot capacity limits are the one
/// load-dependent behaviour: a slot asked for more than its capacity within
/// one second answers 429.
pub struct SimulatedExecutor {
    config: SimulationConfig,
    windows: Mutex<HashMap<String, VecDeque<Instant>>>,
    calls: AtomicU64,
}

impl SimulatedExecutor {
    /// Create a simulated endpoint
    pub fn new(config: SimulationConfig) -> Result<Self, ConfigValidationError> {
        config.validate()?;
        Ok(Self {
            config,
            windows: Mutex::new(HashMap::new()),
            calls: AtomicU64::new(0),
        })
    }

    /// Attempts executed so far
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }

    /// The configuration in use
    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    fn roll(&self, task: &TestTask, attempt: u32, slot: &str) -> Rolls {
        let mut rng = StdRng::seed_from_u64(attempt_seed(self.config.seed, &task.task_id.0, attempt));
        let hang = rng.gen_bool(self.config.hang_rate);
        let latency = Duration::from_millis(
            rng.gen_range(self.config.latency_ms_min..=self.config.latency_ms_max),
        );
        let rate_limited = rng.gen_bool(self.config.rate_limit_rate_for(slot));
        let failure = rng
            .gen_bool(self.config.failure_rate)
            .then(|| rng.gen_range(0..STRUCTURAL_FAILURES.len()));
        let partial = rng.gen_bool(self.config.partial_rate);
        Rolls {
            hang,
            latency,
            rate_limited,
            failure,
            partial,
            turns: rng.gen_range(1..=6),
            tool_calls: rng.gen_range(0..=4),
        }
    }

    /// Record one request against the slot's window; false if over capacity
    fn admit(&self, slot: &str) -> bool {
        let Some(qps) = self.config.slot_capacity_qps.get(slot) else {
            return true;
        };
        let now = Instant::now();
        let mut windows = self.windows.lock().unwrap_or_else(PoisonError::into_inner);
        let window = windows.entry(slot.to_string()).or_default();
        while window
            .front()
            .is_some_and(|t| now.duration_since(*t) >= CAPACITY_WINDOW)
        {
            window.pop_front();
        }
        if window.len() as f64 >= qps.ceil() {
            return false;
        }
        window.push_back(now);
        true
    }
}

#[async_trait]
impl Executor for SimulatedExecutor {
    fn name(&self) -> &str {
        "simulated"
    }

    async fn execute(
        &self,
        ctx: ExecutionContext,
        task: &TestTask,
    ) -> Result<ExecutionReport, ExecutionError> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        let slot = ctx.slot.id.as_str();
        let rolls = self.roll(task, ctx.attempt, slot);

        if rolls.hang {
            tracing::debug!(task_id = %task.task_id, attempt = ctx.attempt, "Simulated hang");
            ctx.cancel.cancelled().await;
            return Err(ExecutionError::Cancelled);
        }

        let admitted = self.admit(slot);

        tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => return Err(ExecutionError::Cancelled),
            _ = tokio::time::sleep(rolls.latency) => {}
        }

        if !admitted || rolls.rate_limited {
            return Err(ExecutionError::Failed(
                FailureSignal::status(429, "Too Many Requests")
                    .with_retry_after(Duration::from_millis(200)),
            ));
        }

        if let Some(index) = rolls.failure {
            let (reason, message) = STRUCTURAL_FAILURES[index];
            return Err(ExecutionError::Failed(FailureSignal::reason(reason, message)));
        }

        let report = if rolls.partial {
            ExecutionReport::partial()
        } else {
            ExecutionReport::success()
        };
        Ok(report
            .with_counter("turns", rolls.turns)
            .with_counter("tool_calls", rolls.tool_calls))
    }
}

impl std::fmt::Debug for SimulatedExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulatedExecutor")
            .field("config", &self.config)
            .field("calls", &self.calls())
            .finish()
    }
}

/// FNV-1a over the task id, mixed with seed and attempt
fn attempt_seed(seed: u64, task_id: &str, attempt: u32) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in task_id.bytes() {
        hash ^= u64::from(byte);
        hash = hash.wrapping_mul(0x0100_0000_01b3);
    }
    hash ^ seed.rotate_left(17) ^ u64::from(attempt).wrapping_mul(0x9e37_79b9_7f4a_7c15)
}
