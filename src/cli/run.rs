//! `fleetbench run`

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;
use fleetbench_auth::{CredentialRegistry, ProviderId};
use fleetbench_core::{Executor, OrchestratorBuilder, RunReport, RunSummary, SegmentSink, BenchResult};
use fleetbench_samplers::TaskGrid;
use fleetbench_storage::ResultStore;
use fleetbench_vendors::SimulatedExecutor;

use super::{ModeArg, ResumeArg, ShardingArg};
use crate::config::AppConfig;
use crate::output;
use crate::progress::ProgressTicker;

/// Arguments of `fleetbench run`
#[derive(Args, Debug, Default)]
pub struct RunArgs {
    /// Provider to benchmark; repeat for several (default: every configured provider)
    #[arg(short, long = "provider")]
    pub providers: Vec<String>,

    /// Tasks per provider
    #[arg(short = 'n', long, default_value = "100")]
    pub tasks: usize,

    /// Throttle mode
    #[arg(long, value_enum)]
    pub mode: Option<ModeArg>,

    /// Initial workers per shard
    #[arg(short, long)]
    pub workers: Option<usize>,

    /// Initial requests per second per shard
    #[arg(short, long)]
    pub qps: Option<f64>,

    /// How tasks are spread over a provider's slots
    #[arg(long, value_enum)]
    pub sharding: Option<ShardingArg>,

    /// What counts as done when resuming
    #[arg(long, value_enum, conflicts_with = "no_resume")]
    pub resume: Option<ResumeArg>,

    /// Ignore earlier results and schedule every task
    #[arg(long)]
    pub no_resume: bool,

    /// Print the plan and exit
    #[arg(long)]
    pub dry_run: bool,

    /// Stop the run after this many seconds
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Seed for the simulated endpoint
    #[arg(long)]
    pub seed: Option<u64>,
}

impl RunArgs {
    /// Apply flag overrides on top of the loaded configuration
    ///
    /// A starting point outside the configured bounds widens them.
    pub fn apply(&self, config: &mut AppConfig) {
        let throttle = &mut config.throttle;
        if let Some(mode) = self.mode {
            throttle.mode = mode.into();
        }
        if let Some(workers) = self.workers {
            throttle.initial_workers = workers;
            throttle.min_workers = throttle.min_workers.min(workers);
            throttle.max_workers = throttle.max_workers.max(workers);
        }
        if let Some(qps) = self.qps {
            throttle.initial_qps = qps;
            throttle.min_qps = throttle.min_qps.min(qps);
            throttle.max_qps = throttle.max_qps.max(qps);
        }
        if let Some(sharding) = self.sharding {
            config.sharding = sharding.into();
        }
        if let Some(resume) = self.resume {
            config.resume = resume.into();
        }
        if let Some(seed) = self.seed {
            config.simulation.seed = seed;
        }
    }
}

/// Providers named on the command line, or every registered one
fn select_providers(registry: &CredentialRegistry, names: &[String]) -> Result<Vec<ProviderId>> {
    if names.is_empty() {
        let all: Vec<ProviderId> = registry.providers().cloned().collect();
        anyhow::ensure!(!all.is_empty(), "no providers configured");
        return Ok(all);
    }
    names
        .iter()
        .map(|name| {
            let provider = ProviderId::from(name.as_str());
            anyhow::ensure!(
                registry.contains(&provider),
                "unknown provider '{}' (configured: {})",
                name,
                registry
                    .providers()
                    .map(|p| p.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            );
            Ok(provider)
        })
        .collect()
}

/// Resolve every slot's credential up front so a missing key fails the run
/// before any work is dispatched
fn check_credentials(registry: &CredentialRegistry, providers: &[ProviderId]) -> Result<()> {
    for provider in providers {
        for slot in registry.slots(provider)? {
            slot.credential
                .resolve()
                .with_context(|| format!("credential for {}/{}", provider, slot.id))?;
        }
    }
    Ok(())
}

/// Run the benchmark
pub async fn execute(args: RunArgs, mut config: AppConfig) -> Result<ExitCode> {
    args.apply(&mut config);
    config.validate()?;

    let registry = config.registry()?;
    let providers = select_providers(&registry, &args.providers)?;
    check_credentials(&registry, &providers)?;

    let grid = TaskGrid::new(config.grid.clone()).context("invalid task grid")?;
    let tasks = grid.tasks_for(providers.iter(), args.tasks);

    let store = Arc::new(
        ResultStore::open(&config.state_dir)
            .with_context(|| format!("Failed to open state dir: {}", config.state_dir.display()))?,
    );
    let (merged, completed) = store.merge().context("Failed to merge earlier results")?;
    if !merged.merged.is_empty() {
        tracing::info!(
            segments = merged.merged.len(),
            results = merged.results,
            "Merged leftover segments"
        );
    }

    let executor = SimulatedExecutor::new(config.simulation.clone())
        .context("invalid simulation config")?;

    let mut builder = OrchestratorBuilder::new()
        .config(config.run_config())
        .registry(Arc::new(registry))
        .executor(Arc::new(executor) as Arc<dyn Executor>)
        .sink(Arc::clone(&store) as Arc<dyn SegmentSink>);
    if !args.no_resume {
        builder = builder.resume_from(completed, config.resume);
    }
    let orchestrator = builder.build()?;

    let (resume, shards) = orchestrator.plan(tasks.clone())?;
    let names: Vec<String> = providers.iter().map(|p| p.to_string()).collect();

    if args.dry_run {
        output::print_config(&config, &names, args.tasks);
        output::print_plan(&resume, &shards);
        return Ok(ExitCode::SUCCESS);
    }

    output::print_config(&config, &names, args.tasks);
    if resume.skipped > 0 {
        println!(
            "Resuming: {} of {} tasks already recorded\n",
            resume.skipped,
            tasks.len()
        );
    }

    let progress = ProgressTicker::start(
        Arc::clone(orchestrator.coordinator()),
        Arc::clone(&store),
        resume.scheduled.len(),
        Duration::from_secs(config.progress_interval_secs),
    )?;

    let result: BenchResult<RunReport> = match args.timeout {
        Some(secs) => {
            let shutdown = orchestrator.shutdown_token();
            let ctrl_c = tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::info!("Received Ctrl+C, initiating graceful shutdown...");
                    shutdown.cancel();
                }
            });
            let result = orchestrator
                .run_with_timeout(tasks, Duration::from_secs(secs))
                .await;
            ctrl_c.abort();
            result
        }
        None => orchestrator.run_with_signal_handling(tasks).await,
    };

    progress.finish().await;
    let report = result.context("Run failed")?;

    let (_, aggregate) = {
        let store = Arc::clone(&store);
        tokio::task::spawn_blocking(move || store.merge())
            .await?
            .context("Failed to merge run results")?
    };

    let summary = RunSummary::build(&aggregate, &report);
    output::print_run(&report, &summary);

    Ok(ExitCode::from(summary.exit_code() as u8))
}
