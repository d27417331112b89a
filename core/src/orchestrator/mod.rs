//! Orchestrator for run lifecycle management
//!
//! The Orchestrator coordinates a complete run:
//! - Resume planning against results already on disk
//! - Splitting the task set into one shard per credential slot
//! - Giving every shard its own throttle and runner
//! - Feeding all results into one long-lived checkpoint coordinator
//! - Graceful shutdown via a root cancellation token
//!
//! # Example
//!
//! ```ignore
//! use fleetbench_core::orchestrator::OrchestratorBuilder;
//!
//! let orchestrator = OrchestratorBuilder::new()
//!     .config(config)
//!     .registry(registry)
//!     .executor(executor)
//!     .sink(store)
//!     .build()?;
//!
//! let report = orchestrator.run_with_signal_handling(tasks).await?;
//! ```

mod builder;
mod executor;
mod planner;
mod resume;
mod summary;

pub use builder::OrchestratorBuilder;
pub use executor::Orchestrator;
pub use planner::{even_split, ShardPlan, ShardPlanner};
pub use resume::{BucketShortfall, ResumeMode, ResumePlan, ResumePlanner};
pub use summary::{ProviderSummary, RunReport, RunSummary, ShardReport, ShardStatus};

#[cfg(test)]
mod tests;
