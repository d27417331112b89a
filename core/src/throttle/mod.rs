//! Adaptive throttle controller
//!
//! Each shard owns one [`ThrottleController`]. It decides how many tasks the
//! shard may have in flight and paces dispatch to a QPS ceiling; both move
//! in response to observed outcomes:
//!
//! - a `RateLimited` failure halves QPS, drops one worker and enters
//!   `Backoff`
//! - `k` consecutive clean completions outside `Backoff` raise QPS by the
//!   increase factor and add one worker
//! - `k` clean completions inside `Backoff` only move to `Recovering`
//!
//! ```text
//!   Warm ──k clean──▶ Cruising ◀──k clean── Recovering
//!     │                  │                      ▲
//!     └──rate limited──▶ Backoff ──k clean──────┘
//! ```
//!
//! In fixed mode the controller still counts signals but never adapts.

mod controller;
mod pacer;

pub use controller::{
    Admission, AdmitToken, ThrottleBounds, ThrottleController, ThrottlePhase, ThrottleState,
};
pub use pacer::QpsPacer;
