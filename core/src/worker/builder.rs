//! Builder pattern for ShardRunner construction

use crate::checkpoint::CheckpointCoordinator;
use crate::error::{BenchError, BenchResult};
use crate::task::TestTask;
use crate::throttle::ThrottleController;
use crate::traits::Executor;

use super::executor::ShardRunner;
use super::retry::RetryPolicy;

use fleetbench_auth::CredentialSlot;
use std::sync::Arc;

/// Builder for creating ShardRunner instances
///
/// # Example
/// ```ignore
/// let runner = ShardRunnerBuilder::new("openai/key-1")
///     .slot(slot)
///     .tasks(tasks)
///     .executor(executor)
///     .throttle(throttle)
///     .coordinator(coordinator)
///     .build()?;
/// ```
pub struct ShardRunnerBuilder {
    name: String,
    slot: Option<Arc<CredentialSlot>>,
    tasks: Vec<TestTask>,
    executor: Option<Arc<dyn Executor>>,
    throttle: Option<Arc<ThrottleController>>,
    coordinator: Option<Arc<CheckpointCoordinator>>,
    retry: Option<RetryPolicy>,
}

impl ShardRunnerBuilder {
    /// Create a new builder for the named shard
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            slot: None,
            tasks: Vec::new(),
            executor: None,
            throttle: None,
            coordinator: None,
            retry: None,
        }
    }

    /// Set the credential slot
    pub fn slot(mut self, slot: Arc<CredentialSlot>) -> Self {
        self.slot = Some(slot);
        self
    }

    /// Set the tasks, in dispatch order
    pub fn tasks(mut self, tasks: Vec<TestTask>) -> Self {
        self.tasks = tasks;
        self
    }

    /// Set the execution collaborator
    pub fn executor(mut self, executor: Arc<dyn Executor>) -> Self {
        self.executor = Some(executor);
        self
    }

    /// Set the shard's throttle controller
    pub fn throttle(mut self, throttle: Arc<ThrottleController>) -> Self {
        self.throttle = Some(throttle);
        self
    }

    /// Set the run-wide checkpoint coordinator
    pub fn coordinator(mut self, coordinator: Arc<CheckpointCoordinator>) -> Self {
        self.coordinator = Some(coordinator);
        self
    }

    /// Set the retry policy (defaults to [`RetryPolicy::default`])
    pub fn retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = Some(retry);
        self
    }

    /// Build the ShardRunner
    ///
    /// # Errors
    /// Returns an error if any required field is missing.
    pub fn build(self) -> BenchResult<ShardRunner> {
        let slot = self.slot.ok_or(BenchError::missing_config("slot"))?;
        let executor = self
            .executor
            .ok_or(BenchError::missing_config("executor"))?;
        let throttle = self
            .throttle
            .ok_or(BenchError::missing_config("throttle"))?;
        let coordinator = self
            .coordinator
            .ok_or(BenchError::missing_config("coordinator"))?;

        Ok(ShardRunner::new(
            self.name,
            slot,
            self.tasks,
            executor,
            throttle,
            coordinator,
            self.retry.unwrap_or_default(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ThrottleConfig;

    #[test]
    fn test_builder_missing_slot() {
        let result = ShardRunnerBuilder::new("s").build();
        assert!(result.unwrap_err().to_string().contains("slot"));
    }

    #[test]
    fn test_builder_missing_executor() {
        let result = ShardRunnerBuilder::new("s")
            .slot(Arc::new(CredentialSlot::new("key-1", "local")))
            .build();
        assert!(result.unwrap_err().to_string().contains("executor"));
    }

    #[test]
    fn test_builder_missing_throttle_reported_before_coordinator() {
        struct Noop;

        #[async_trait::async_trait]
        impl Executor for Noop {
            fn name(&self) -> &str {
                "noop"
            }

            async fn execute(
                &self,
                _ctx: crate::traits::ExecutionContext,
                _task: &TestTask,
            ) -> Result<crate::traits::ExecutionReport, crate::traits::ExecutionError> {
                Ok(crate::traits::ExecutionReport::success())
            }
        }

        let result = ShardRunnerBuilder::new("s")
            .slot(Arc::new(CredentialSlot::new("key-1", "local")))
            .executor(Arc::new(Noop))
            .build();
        assert!(result.unwrap_err().to_string().contains("throttle"));

        let result = ShardRunnerBuilder::new("s")
            .slot(Arc::new(CredentialSlot::new("key-1", "local")))
            .executor(Arc::new(Noop))
            .throttle(Arc::new(ThrottleController::new("s", &ThrottleConfig::default())))
            .build();
        assert!(result.unwrap_err().to_string().contains("coordinator"));
    }
}
