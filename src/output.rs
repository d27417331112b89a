//! Console output

use std::collections::BTreeMap;

use fleetbench_core::{
    AggregateNode, AggregatePath, ResumePlan, RunReport, RunSummary, ShardPlan, ShardStatus,
    LEVELS,
};
use fleetbench_storage::StoreStatus;

use crate::config::AppConfig;

fn rule() -> String {
    "=".repeat(70)
}

fn banner(title: &str) {
    println!("\n{}", rule());
    println!("   {}", title);
    println!("{}", rule());
    println!();
}

fn pct(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64 * 100.0
    }
}

/// Print the effective configuration before a run
pub fn print_config(config: &AppConfig, providers: &[String], tasks_per_provider: usize) {
    banner("Fleetbench - Sharded Benchmark Run");
    let throttle = &config.throttle;
    println!("Configuration:");
    println!("  Providers:    {}", providers.join(", "));
    println!("  Tasks:        {} per provider", tasks_per_provider);
    println!("  Throttle:     {:?}", throttle.mode);
    println!(
        "  Workers:      {} (min {}, max {})",
        throttle.initial_workers, throttle.min_workers, throttle.max_workers
    );
    println!(
        "  QPS:          {:.1} (min {:.1}, max {:.1})",
        throttle.initial_qps, throttle.min_qps, throttle.max_qps
    );
    println!("  Sharding:     {:?}", config.sharding);
    println!("  Retries:      {} attempts", config.retry.max_attempts);
    println!("  State dir:    {}", config.state_dir.display());
    println!("{}", rule());
    println!();
}

/// Print what a run would do
pub fn print_plan(resume: &ResumePlan, shards: &[ShardPlan]) {
    banner("Run Plan");
    println!(
        "Tasks: {} scheduled, {} already done",
        resume.scheduled.len(),
        resume.skipped
    );
    if resume.skipped > 0 {
        println!();
        println!("Resume shortfall by bucket:");
        for bucket in resume.buckets.iter().filter(|b| b.scheduled > 0) {
            println!(
                "  {:<50} {:>4}/{:<4} +{}",
                AggregatePath::for_key(&bucket.key).to_string(),
                bucket.done,
                bucket.target,
                bucket.scheduled
            );
        }
    }
    println!();
    println!("Shards:");
    for shard in shards {
        println!(
            "  {:<30} {:>5} tasks  {} workers @ {:.1} qps",
            shard.name(),
            shard.len(),
            shard.initial_workers(),
            shard.initial_qps()
        );
    }
    println!("{}", rule());
    println!();
}

/// Print the result of a run
pub fn print_run(report: &RunReport, summary: &RunSummary) {
    banner("Run Results");

    println!("Shards:");
    for shard in &report.shards {
        let status = match shard.status {
            ShardStatus::Complete => "complete",
            ShardStatus::Shortfall => "SHORTFALL",
        };
        println!(
            "  {:<30} {:>5}/{:<5} ok {:<5} partial {:<4} failed {:<4} 429s {:<4} {:>7.1}s  {}",
            shard.name,
            shard.recorded,
            shard.planned,
            shard.success,
            shard.partial,
            shard.failure,
            shard.rate_limit_signals,
            shard.elapsed.as_secs_f64(),
            status
        );
        println!(
            "  {:<30} retries {:<4} exhausted {:<4} interrupted {:<4} not started {}",
            "", shard.retries, shard.exhausted_retries, shard.interrupted, shard.not_started
        );
        println!(
            "  {:<30} throttle {:?}: {} workers @ {:.2} qps (lowest {:.2})",
            "",
            shard.final_throttle.phase,
            shard.final_throttle.workers,
            shard.final_throttle.qps,
            shard.final_throttle.lowest_qps
        );
    }
    println!();

    println!("Providers (all recorded runs):");
    for (provider, rollup) in &summary.providers {
        println!(
            "  {:<20} {:>6} results  {:.1}% completed  mean latency {}",
            provider,
            rollup.total,
            rollup.completion_rate * 100.0,
            rollup
                .mean_latency
                .map(|d| format!("{:.2} ms", d.as_secs_f64() * 1000.0))
                .unwrap_or_else(|| "-".to_string())
        );
        for (kind, count) in &rollup.errors {
            println!("  {:<20}   {:<20} {}", "", kind.as_str(), count);
        }
    }
    println!();

    println!(
        "Scheduled {} of {} tasks ({} skipped), {} segments written",
        report.scheduled, report.requested, report.skipped, report.segments_written
    );
    if report.interrupted {
        println!("Run was interrupted; run again to resume.");
    }
    if summary.complete {
        println!("Status: complete");
    } else {
        println!(
            "Status: incomplete ({} shards short); run again to fill the gap",
            summary.shortfall.len()
        );
    }
    println!("{}", rule());
    println!();
}

/// Print a rollup of one aggregate path and its children
pub fn print_rollup(
    path: &AggregatePath,
    node: &AggregateNode,
    children: &BTreeMap<String, AggregateNode>,
    store: &StoreStatus,
) {
    banner(&format!("Results: {}", path));

    println!("Store:");
    println!("  Segments:     {} ({} unmerged)", store.segments, store.unmerged);
    println!("  Generation:   {}", store.generation);
    println!("  Archives:     {}", store.archives);
    println!();

    println!("Totals:");
    println!("  Results:      {}", node.total);
    println!("  Successful:   {} ({:.1}%)", node.success, pct(node.success, node.total));
    println!("  Partial:      {} ({:.1}%)", node.partial, pct(node.partial, node.total));
    println!("  Failed:       {} ({:.1}%)", node.failure, pct(node.failure, node.total));
    if node.interrupted > 0 {
        println!("  Interrupted:  {} (scheduled again on resume)", node.interrupted);
    }
    if let Some(latency) = node.mean_latency() {
        println!("  Mean latency: {:.2} ms", latency.as_secs_f64() * 1000.0);
    }
    if node.total > 0 {
        println!(
            "  Mean attempts: {:.2}",
            node.attempts_sum as f64 / node.total as f64
        );
    }
    for name in node.metadata_sums.keys() {
        if let Some(mean) = node.metadata_mean(name) {
            println!("  Mean {}: {:.2}", name, mean);
        }
    }
    if !node.errors.is_empty() {
        println!();
        println!("Errors:");
        for (kind, count) in &node.errors {
            println!("  {:<22} {}", kind.as_str(), count);
        }
    }

    if let Some(level) = LEVELS.get(path.depth()) {
        if !children.is_empty() {
            println!();
            println!("By {}:", level);
            for (name, child) in children {
                println!(
                    "  {:<24} {:>6} results  {:>5.1}% completed",
                    name,
                    child.total,
                    child.completion_rate() * 100.0
                );
            }
        }
    }
    println!("{}", rule());
    println!();
}
