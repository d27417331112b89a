//! Per-shard adaptive throttle state machine

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::pacer::QpsPacer;
use crate::config::{ThrottleConfig, ThrottleMode};
use crate::error::ErrorKind;

/// Phase of the throttle state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThrottlePhase {
    /// Initial phase, nothing observed yet
    Warm,
    /// At least one increase has happened since the last backoff
    Cruising,
    /// A rate-limit signal was just observed; no increases allowed
    Backoff,
    /// A clean run has followed a backoff; the next clean run increases
    Recovering,
}

/// Floors and ceilings for one shard
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThrottleBounds {
    /// Worker floor
    pub min_workers: usize,
    /// Worker ceiling
    pub max_workers: usize,
    /// QPS floor
    pub min_qps: f64,
    /// QPS ceiling
    pub max_qps: f64,
}

/// Mutable per-shard throttle state
///
/// Never persisted; rebuilt from configuration on every run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThrottleState {
    /// Current phase
    pub phase: ThrottlePhase,
    /// Current in-flight ceiling
    pub workers: usize,
    /// Current requests-per-second ceiling
    pub qps: f64,
    /// Clean completions since the last transition
    pub consecutive_successes: u32,
    /// Rate-limit signals since the last clean completion
    pub consecutive_throttles: u32,
    /// Floors and ceilings
    pub bounds: ThrottleBounds,
    /// Rate-limit signals observed over the shard's lifetime
    pub rate_limit_signals: u64,
    /// Lowest QPS ceiling reached
    pub lowest_qps: f64,
    /// Bumped on every change to `workers` or `qps`
    pub epoch: u64,
}

impl ThrottleState {
    fn from_config(config: &ThrottleConfig) -> Self {
        Self {
            phase: ThrottlePhase::Warm,
            workers: config.initial_workers,
            qps: config.initial_qps,
            consecutive_successes: 0,
            consecutive_throttles: 0,
            bounds: ThrottleBounds {
                min_workers: config.min_workers,
                max_workers: config.max_workers,
                min_qps: config.min_qps,
                max_qps: config.max_qps,
            },
            rate_limit_signals: 0,
            lowest_qps: config.initial_qps,
            epoch: 0,
        }
    }
}

/// Proof of admission, carrying the limits in force when it was issued
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AdmitToken {
    /// In-flight ceiling at admission
    pub workers: usize,
    /// QPS ceiling at admission
    pub qps: f64,
    /// State epoch at admission
    pub epoch: u64,
}

/// Result of [`ThrottleController::admit`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Admission {
    /// Limits in force
    pub token: AdmitToken,
    /// How long to wait before dispatch; zero means go now
    pub wait: Duration,
}

struct Inner {
    state: ThrottleState,
    pacer: Arc<QpsPacer>,
}

/// Admission control for one shard
///
/// The single owner of pacing for its shard. State changes are serialized
/// by an internal mutex; nothing is shared with other shards.
pub struct ThrottleController {
    name: String,
    mode: ThrottleMode,
    increase_after: u32,
    increase_factor: f64,
    inner: Mutex<Inner>,
}

impl ThrottleController {
    /// Create a controller at the configured starting point
    pub fn new(name: impl Into<String>, config: &ThrottleConfig) -> Self {
        let state = ThrottleState::from_config(config);
        let pacer = Arc::new(QpsPacer::new(state.qps));
        Self {
            name: name.into(),
            mode: config.mode,
            increase_after: config.increase_after.max(1),
            increase_factor: config.increase_factor,
            inner: Mutex::new(Inner { state, pacer }),
        }
    }

    // Every transition is computed before it is stored, so a poisoned
    // lock still guards a valid state.
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Ask to dispatch one request
    ///
    /// If `wait` is zero the request may go now. Otherwise the caller
    /// sleeps for `wait` and asks again.
    pub fn admit(&self) -> Admission {
        let (token, pacer) = {
            let inner = self.lock();
            let token = AdmitToken {
                workers: inner.state.workers,
                qps: inner.state.qps,
                epoch: inner.state.epoch,
            };
            (token, Arc::clone(&inner.pacer))
        };
        Admission {
            token,
            wait: pacer.check(),
        }
    }

    /// Wait until admitted, or until `cancel` fires
    pub async fn acquire(&self, cancel: &CancellationToken) -> Option<AdmitToken> {
        loop {
            let admission = self.admit();
            if admission.wait.is_zero() {
                return Some(admission.token);
            }
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return None,
                _ = tokio::time::sleep(admission.wait) => {}
            }
        }
    }

    /// Current in-flight ceiling
    pub fn workers(&self) -> usize {
        self.lock().state.workers
    }

    /// Current QPS ceiling
    pub fn qps(&self) -> f64 {
        self.lock().state.qps
    }

    /// Copy of the current state
    pub fn snapshot(&self) -> ThrottleState {
        self.lock().state.clone()
    }

    /// Feed one final attempt outcome into the state machine
    ///
    /// `None` is a success or partial. Any failure other than
    /// `RateLimited` counts as clean: it says nothing about provider load.
    pub fn observe(&self, error_kind: Option<ErrorKind>) {
        if error_kind == Some(ErrorKind::RateLimited) {
            self.on_rate_limited();
        } else {
            self.on_clean();
        }
    }

    /// A rate-limit signal: halve QPS, drop one worker, enter backoff
    pub fn on_rate_limited(&self) {
        let mut inner = self.lock();
        let state = &mut inner.state;
        state.rate_limit_signals += 1;
        state.consecutive_throttles += 1;
        state.consecutive_successes = 0;
        if self.mode == ThrottleMode::Fixed {
            return;
        }

        let workers = state.workers.saturating_sub(1).max(state.bounds.min_workers);
        let qps = (state.qps / 2.0).max(state.bounds.min_qps);
        state.phase = ThrottlePhase::Backoff;
        let changed = self.apply(&mut inner, workers, qps);
        info!(
            shard = %self.name,
            workers = inner.state.workers,
            qps = inner.state.qps,
            changed,
            "Rate limited, backing off"
        );
    }

    /// A clean completion: count toward the next increase
    pub fn on_clean(&self) {
        let mut inner = self.lock();
        let state = &mut inner.state;
        state.consecutive_throttles = 0;
        state.consecutive_successes += 1;
        if self.mode == ThrottleMode::Fixed || state.consecutive_successes < self.increase_after {
            return;
        }
        state.consecutive_successes = 0;

        if state.phase == ThrottlePhase::Backoff {
            state.phase = ThrottlePhase::Recovering;
            debug!(shard = %self.name, "Backoff cleared, recovering");
            return;
        }

        let workers = (state.workers + 1).min(state.bounds.max_workers);
        let qps = (state.qps * self.increase_factor).min(state.bounds.max_qps);
        state.phase = ThrottlePhase::Cruising;
        if self.apply(&mut inner, workers, qps) {
            debug!(
                shard = %self.name,
                workers = inner.state.workers,
                qps = inner.state.qps,
                "Throttle increased"
            );
        }
    }

    // Store new limits, rebuilding the pacer if QPS moved
    fn apply(&self, inner: &mut Inner, workers: usize, qps: f64) -> bool {
        let state = &mut inner.state;
        let qps_changed = (qps - state.qps).abs() > f64::EPSILON;
        let changed = qps_changed || workers != state.workers;
        state.workers = workers;
        state.qps = qps;
        state.lowest_qps = state.lowest_qps.min(qps);
        if changed {
            state.epoch += 1;
        }
        if qps_changed {
            inner.pacer = Arc::new(QpsPacer::new(qps));
        }
        changed
    }

    /// Shard name used in logs
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Fixed or adaptive
    pub fn mode(&self) -> ThrottleMode {
        self.mode
    }
}

impl std::fmt::Debug for ThrottleController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThrottleController")
            .field("name", &self.name)
            .field("mode", &self.mode)
            .field("state", &self.snapshot())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ThrottleConfig {
        ThrottleConfig {
            mode: ThrottleMode::Adaptive,
            initial_workers: 4,
            initial_qps: 8.0,
            min_workers: 1,
            max_workers: 6,
            min_qps: 1.0,
            max_qps: 12.0,
            increase_after: 3,
            increase_factor: 1.2,
        }
    }

    fn clean_run(controller: &ThrottleController, n: u32) {
        for _ in 0..n {
            controller.observe(None);
        }
    }

    #[test]
    fn test_starts_warm_at_initial_values() {
        let controller = ThrottleController::new("s", &config());
        let state = controller.snapshot();
        assert_eq!(state.phase, ThrottlePhase::Warm);
        assert_eq!(state.workers, 4);
        assert_eq!(state.qps, 8.0);
    }

    #[test]
    fn test_rate_limit_halves_qps_and_drops_worker() {
        let controller = ThrottleController::new("s", &config());
        controller.observe(Some(ErrorKind::RateLimited));

        let admission = controller.admit();
        assert_eq!(admission.token.workers, 3);
        assert_eq!(admission.token.qps, 4.0);
        assert_eq!(controller.snapshot().phase, ThrottlePhase::Backoff);
    }

    #[test]
    fn test_rate_limit_holds_at_floor() {
        let controller = ThrottleController::new("s", &config());
        for _ in 0..10 {
            controller.on_rate_limited();
        }
        let state = controller.snapshot();
        assert_eq!(state.workers, 1);
        assert_eq!(state.qps, 1.0);
        assert_eq!(state.rate_limit_signals, 10);
        assert_eq!(state.lowest_qps, 1.0);
    }

    #[test]
    fn test_clean_run_increases() {
        let controller = ThrottleController::new("s", &config());
        clean_run(&controller, 3);
        let state = controller.snapshot();
        assert_eq!(state.phase, ThrottlePhase::Cruising);
        assert_eq!(state.workers, 5);
        assert!((state.qps - 9.6).abs() < 1e-9);
    }

    #[test]
    fn test_increase_holds_at_ceiling() {
        let controller = ThrottleController::new("s", &config());
        clean_run(&controller, 3 * 20);
        let state = controller.snapshot();
        assert_eq!(state.workers, 6);
        assert_eq!(state.qps, 12.0);
    }

    #[test]
    fn test_ordinary_failures_count_as_clean() {
        let controller = ThrottleController::new("s", &config());
        controller.observe(Some(ErrorKind::ToolSelectionError));
        controller.observe(Some(ErrorKind::Timeout));
        controller.observe(None);
        assert_eq!(controller.workers(), 5);
    }

    #[test]
    fn test_backoff_needs_two_clean_runs_to_increase() {
        let controller = ThrottleController::new("s", &config());
        controller.on_rate_limited();
        let after_backoff = controller.snapshot();

        clean_run(&controller, 3);
        let recovering = controller.snapshot();
        assert_eq!(recovering.phase, ThrottlePhase::Recovering);
        assert_eq!(recovering.workers, after_backoff.workers);
        assert_eq!(recovering.qps, after_backoff.qps);

        clean_run(&controller, 3);
        let cruising = controller.snapshot();
        assert_eq!(cruising.phase, ThrottlePhase::Cruising);
        assert_eq!(cruising.workers, after_backoff.workers + 1);
    }

    #[test]
    fn test_rate_limit_overrides_pending_increase() {
        let controller = ThrottleController::new("s", &config());
        clean_run(&controller, 2);
        controller.on_rate_limited();
        controller.observe(None);
        let state = controller.snapshot();
        assert_eq!(state.workers, 3);
        assert_eq!(state.consecutive_successes, 1);
        assert_eq!(state.phase, ThrottlePhase::Backoff);
    }

    #[test]
    fn test_fixed_mode_never_adapts() {
        let controller =
            ThrottleController::new("s", &config().with_mode(ThrottleMode::Fixed));
        controller.on_rate_limited();
        clean_run(&controller, 30);
        let state = controller.snapshot();
        assert_eq!(state.workers, 4);
        assert_eq!(state.qps, 8.0);
        assert_eq!(state.epoch, 0);
        assert_eq!(state.rate_limit_signals, 1);
        assert_eq!(state.phase, ThrottlePhase::Warm);
    }

    #[test]
    fn test_epoch_tracks_changes() {
        let controller = ThrottleController::new("s", &config());
        let before = controller.admit().token.epoch;
        controller.on_rate_limited();
        assert!(controller.admit().token.epoch > before);
    }

    #[test]
    fn test_admit_paces_requests() {
        let controller = ThrottleController::new("s", &config().with_initial(4, 1.0));
        assert!(controller.admit().wait.is_zero());
        assert!(!controller.admit().wait.is_zero());
    }

    #[tokio::test]
    async fn test_acquire_returns_none_when_cancelled() {
        let controller = ThrottleController::new("s", &config().with_initial(4, 1.0));
        let cancel = CancellationToken::new();
        assert!(controller.acquire(&cancel).await.is_some());
        cancel.cancel();
        assert!(controller.acquire(&cancel).await.is_none());
    }
}
