//! Builder pattern for Orchestrator construction

use std::sync::Arc;

use fleetbench_auth::CredentialRegistry;

use crate::aggregate::HierarchicalAggregator;
use crate::checkpoint::CheckpointCoordinator;
use crate::config::RunConfig;
use crate::error::{BenchError, BenchResult};
use crate::traits::{Executor, SegmentSink, WriterId};

use super::executor::Orchestrator;
use super::resume::ResumeMode;

/// Builder for creating an Orchestrator with proper configuration
///
/// # Example
///
/// ```ignore
/// let orchestrator = OrchestratorBuilder::new()
///     .config(config)
///     .registry(registry)
///     .executor(executor)
///     .sink(store)
///     .resume_from(aggregate, ResumeMode::AnyOutcome)
///     .build()?;
/// ```
pub struct OrchestratorBuilder {
    config: RunConfig,
    registry: Option<Arc<CredentialRegistry>>,
    executor: Option<Arc<dyn Executor>>,
    sink: Option<Arc<dyn SegmentSink>>,
    writer: Option<WriterId>,
    completed: Option<HierarchicalAggregator>,
    resume_mode: ResumeMode,
}

impl OrchestratorBuilder {
    /// Create a new orchestrator builder with default configuration
    pub fn new() -> Self {
        Self {
            config: RunConfig::default(),
            registry: None,
            executor: None,
            sink: None,
            writer: None,
            completed: None,
            resume_mode: ResumeMode::default(),
        }
    }

    /// Set the full run configuration
    pub fn config(mut self, config: RunConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the credential registry
    pub fn registry(mut self, registry: Arc<CredentialRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Set the execution collaborator
    pub fn executor(mut self, executor: Arc<dyn Executor>) -> Self {
        self.executor = Some(executor);
        self
    }

    /// Set the durable sink flushed segments go to
    pub fn sink(mut self, sink: Arc<dyn SegmentSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Set the writer identity (defaults to [`WriterId::for_process`])
    pub fn writer(mut self, writer: WriterId) -> Self {
        self.writer = Some(writer);
        self
    }

    /// Skip work already reflected in `completed`
    pub fn resume_from(mut self, completed: HierarchicalAggregator, mode: ResumeMode) -> Self {
        self.completed = Some(completed);
        self.resume_mode = mode;
        self
    }

    /// Build the orchestrator
    ///
    /// # Errors
    ///
    /// Returns an error if the registry, executor or sink is not set, or if
    /// configuration validation fails.
    pub fn build(self) -> BenchResult<Orchestrator> {
        let registry = self
            .registry
            .ok_or_else(|| BenchError::missing_config("registry"))?;

        let executor = self
            .executor
            .ok_or_else(|| BenchError::missing_config("executor"))?;

        let sink = self.sink.ok_or_else(|| BenchError::missing_config("sink"))?;

        self.config.validate()?;

        let writer = self.writer.unwrap_or_else(WriterId::for_process);
        let coordinator = Arc::new(CheckpointCoordinator::new(
            sink,
            writer,
            self.config.checkpoint.clone(),
        ));

        let mut orchestrator = Orchestrator::new(self.config, registry, executor, coordinator);
        orchestrator.completed = self.completed;
        orchestrator.resume_mode = self.resume_mode;
        Ok(orchestrator)
    }
}

impl Default for OrchestratorBuilder {
    fn default() -> Self {
        Self::new()
    }
}
