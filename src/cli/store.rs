//! `fleetbench status`, `merge` and `consolidate`

use std::collections::BTreeMap;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Args;
use fleetbench_core::{AggregateNode, AggregatePath, HierarchicalAggregator};
use fleetbench_storage::{ResultStore, StoreStatus};
use serde::Serialize;

use crate::config::AppConfig;
use crate::output;

/// Arguments of `fleetbench status`
#[derive(Args, Debug, Default)]
pub struct StatusArgs {
    /// Restrict to one provider
    #[arg(short, long)]
    pub provider: Option<String>,

    /// Restrict to one prompting strategy of the provider
    #[arg(short, long, requires = "provider")]
    pub strategy: Option<String>,

    /// Print JSON instead of a table
    #[arg(long)]
    pub json: bool,
}

impl StatusArgs {
    fn path(&self) -> AggregatePath {
        match (&self.provider, &self.strategy) {
            (Some(provider), Some(strategy)) => {
                AggregatePath::provider(provider.as_str()).child(strategy.as_str())
            }
            (Some(provider), None) => AggregatePath::provider(provider.as_str()),
            _ => AggregatePath::root(),
        }
    }
}

#[derive(Debug, Serialize)]
struct StatusView {
    path: String,
    store: StoreStatus,
    totals: AggregateNode,
    children: BTreeMap<String, AggregateNode>,
}

fn open(config: &AppConfig) -> Result<ResultStore> {
    ResultStore::open(&config.state_dir)
        .with_context(|| format!("Failed to open state dir: {}", config.state_dir.display()))
}

fn status_view(store: &ResultStore, args: &StatusArgs) -> Result<StatusView> {
    let aggregate: HierarchicalAggregator = store.aggregate().context("Failed to read results")?;
    let path = args.path();
    Ok(StatusView {
        path: path.to_string(),
        store: store.status()?,
        totals: aggregate.query(&path),
        children: aggregate.children(&path),
    })
}

/// Show the aggregate, pending segments included; nothing is committed
pub fn status(args: StatusArgs, config: &AppConfig) -> Result<ExitCode> {
    let store = open(config)?;
    let view = status_view(&store, &args)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&view)?);
    } else {
        output::print_rollup(&args.path(), &view.totals, &view.children, &view.store);
    }
    Ok(ExitCode::SUCCESS)
}

/// Fold pending segments into the snapshot
pub fn merge(config: &AppConfig) -> Result<ExitCode> {
    let store = open(config)?;
    let (report, aggregate) = store.merge().context("Merge failed")?;
    println!(
        "✓ Merged {} segments ({} results); {} results total, generation {}",
        report.merged.len(),
        report.results,
        aggregate.totals().total,
        report.generation
    );
    Ok(ExitCode::SUCCESS)
}

/// Archive merged segments
pub fn consolidate(config: &AppConfig) -> Result<ExitCode> {
    let store = open(config)?;
    match store.consolidate().context("Consolidation failed")? {
        Some(report) => println!(
            "✓ Consolidated {} segments ({} results) into {}",
            report.segments,
            report.results,
            report.archive.display()
        ),
        None => println!("Nothing to consolidate; run `fleetbench merge` first"),
    }
    Ok(ExitCode::SUCCESS)
}
