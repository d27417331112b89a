//! Execution collaborators for fleetbench
//!
//! This crate provides implementations of the `Executor` trait:
//!
//! - `SimulatedExecutor`: a seeded stand-in for a model-serving endpoint that
//!   models latency, rate limiting, structural failures, partial results
//!   and hangs

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod simulated;

pub use config::{ConfigValidationError, SimulationConfig};
pub use simulated::SimulatedExecutor;
