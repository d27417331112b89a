//! Worker module: the task executor pool for one shard
//!
//! A [`ShardRunner`] owns the tasks of one shard and drives them through
//! the simple but critical loop: **admit -> execute -> classify -> record
//! or retry**.
//!
//! 1. Wait for the shard's [`ThrottleController`](crate::throttle::ThrottleController)
//!    to admit the next dispatch, with no more than its current worker
//!    count in flight
//! 2. Run one attempt through the [`Executor`](crate::traits::Executor)
//!    under the task's deadline and a per-attempt cancellation token
//! 3. Classify failures and feed the outcome to the throttle
//! 4. Retry transient failures after a jittered backoff, without holding a
//!    worker slot while waiting
//! 5. Hand the final result to the
//!    [`CheckpointCoordinator`](crate::checkpoint::CheckpointCoordinator)
//!
//! # Example
//!
//! ```ignore
//! use fleetbench_core::worker::ShardRunnerBuilder;
//!
//! let runner = ShardRunnerBuilder::new("openai/key-1")
//!     .slot(slot)
//!     .tasks(tasks)
//!     .executor(executor)
//!     .throttle(throttle)
//!     .coordinator(coordinator)
//!     .build()?;
//!
//! let stats = runner.run(cancel).await?;
//! println!("Recorded: {}", stats.recorded);
//! ```

mod builder;
mod executor;
mod retry;
mod stats;

pub use builder::ShardRunnerBuilder;
pub use executor::ShardRunner;
pub use retry::RetryPolicy;
pub use stats::ShardStats;
