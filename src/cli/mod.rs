//! CLI argument parsing and command dispatch

mod run;
mod store;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use fleetbench_core::{ResumeMode, ShardingPolicy, ThrottleMode};

use crate::config::AppConfig;

pub use run::RunArgs;
pub use store::StatusArgs;

/// Fleetbench - sharded, rate-adaptive benchmark harness
#[derive(Parser, Debug)]
#[command(name = "fleetbench")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Enable debug logging (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Log line format
    #[arg(long, global = true, value_enum, default_value = "text")]
    pub log_format: LogFormat,

    /// Configuration file (default: ./fleetbench.yaml if present)
    #[arg(short, long, global = true, env = "FLEETBENCH_CONFIG")]
    pub config: Option<PathBuf>,

    /// Directory holding results and checkpoints
    #[arg(long, global = true)]
    pub state_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run (or resume) a benchmark
    Run(RunArgs),
    /// Show aggregated results, including segments not merged yet
    Status(StatusArgs),
    /// Fold pending segments into the aggregate snapshot
    Merge,
    /// Archive merged segments into a single file
    Consolidate,
}

/// Log line format
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// Human-readable lines
    Text,
    /// One JSON object per line
    Json,
}

/// Throttle mode as accepted on the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ModeArg {
    /// Keep the initial workers and QPS
    Fixed,
    /// Back off on rate limits, recover on clean completions
    Adaptive,
}

impl From<ModeArg> for ThrottleMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Fixed => ThrottleMode::Fixed,
            ModeArg::Adaptive => ThrottleMode::Adaptive,
        }
    }
}

/// Sharding policy as accepted on the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ShardingArg {
    /// Split each provider's tasks evenly over its slots
    EvenSplit,
    /// Give each prompting strategy its own slot
    PinByStrategy,
}

impl From<ShardingArg> for ShardingPolicy {
    fn from(policy: ShardingArg) -> Self {
        match policy {
            ShardingArg::EvenSplit => ShardingPolicy::EvenSplit,
            ShardingArg::PinByStrategy => ShardingPolicy::PinByStrategy,
        }
    }
}

/// Resume mode as accepted on the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ResumeArg {
    /// Every recorded result counts as done
    AnyOutcome,
    /// Failed tasks are run again
    SuccessfulOnly,
}

impl From<ResumeArg> for ResumeMode {
    fn from(mode: ResumeArg) -> Self {
        match mode {
            ResumeArg::AnyOutcome => ResumeMode::AnyOutcome,
            ResumeArg::SuccessfulOnly => ResumeMode::SuccessfulOnly,
        }
    }
}

impl Cli {
    /// Load configuration and run the selected command
    pub async fn run(self) -> Result<ExitCode> {
        let mut config = AppConfig::load(self.config.as_deref())?;
        if let Some(state_dir) = self.state_dir {
            config.state_dir = state_dir;
        }
        tracing::debug!(state_dir = %config.state_dir.display(), "Configuration loaded");

        match self.command {
            Commands::Run(args) => run::execute(args, config).await,
            Commands::Status(args) => store::status(args, &config),
            Commands::Merge => store::merge(&config),
            Commands::Consolidate => store::consolidate(&config),
        }
    }
}
