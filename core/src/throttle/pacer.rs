//! QPS pacing via governor

use std::num::NonZeroU32;
use std::time::Duration;

use governor::clock::{Clock, DefaultClock};
use governor::{state::InMemoryState, state::NotKeyed, Quota, RateLimiter};

/// GCRA pacer for one QPS ceiling
///
/// Burst size is one: cells are spaced `1 / qps` apart. Sub-1 rates are
/// expressed as a longer replenish period instead of being rounded up.
/// The pacer is immutable; a new ceiling means a new pacer.
pub struct QpsPacer {
    limiter: RateLimiter<NotKeyed, InMemoryState, DefaultClock>,
    qps: f64,
}

impl QpsPacer {
    /// Create a pacer for `qps` requests per second
    ///
    /// Non-positive or non-finite rates fall back to one request per second.
    pub fn new(qps: f64) -> Self {
        let qps = if qps.is_finite() && qps > 0.0 { qps } else { 1.0 };
        let quota = Quota::with_period(Duration::from_secs_f64(1.0 / qps))
            .unwrap_or_else(|| Quota::per_second(NonZeroU32::MIN));
        Self {
            limiter: RateLimiter::direct(quota),
            qps,
        }
    }

    /// Try to take the next cell
    ///
    /// Returns `Duration::ZERO` if a request may go now (the cell is
    /// consumed), otherwise how long to wait before asking again.
    pub fn check(&self) -> Duration {
        match self.limiter.check() {
            Ok(()) => Duration::ZERO,
            Err(not_until) => {
                let wait = not_until.wait_time_from(DefaultClock::default().now());
                // Never report zero for a denied cell, or callers would spin
                wait.max(Duration::from_millis(1)).min(self.period())
            }
        }
    }

    /// Spacing between cells
    pub fn period(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.qps)
    }

    /// The configured rate
    pub fn qps(&self) -> f64 {
        self.qps
    }
}

impl std::fmt::Debug for QpsPacer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QpsPacer").field("qps", &self.qps).finish()
    }
}
