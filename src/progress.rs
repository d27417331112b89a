//! Live progress while a run is in flight

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use fleetbench_core::CheckpointCoordinator;
use fleetbench_storage::ResultStore;
use indicatif::{ProgressBar, ProgressStyle};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Progress bar fed from the coordinator's counters
///
/// Each tick also folds freshly flushed segments into the store's snapshot,
/// so `fleetbench status` from another shell sees the run advance.
pub struct ProgressTicker {
    bar: ProgressBar,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl ProgressTicker {
    /// Start ticking; `expected` is the number of scheduled tasks
    pub fn start(
        coordinator: Arc<CheckpointCoordinator>,
        store: Arc<ResultStore>,
        expected: usize,
        interval: Duration,
    ) -> Result<Self> {
        let bar = ProgressBar::new(expected as u64);
        bar.set_style(
            ProgressStyle::default_bar()
                .template(
                    "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}",
                )?
                .progress_chars("#>-"),
        );

        let cancel = CancellationToken::new();
        let handle = {
            let bar = bar.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = ticker.tick() => {}
                    }
                    let stats = coordinator.stats();
                    bar.set_position(stats.added);

                    let store = Arc::clone(&store);
                    match tokio::task::spawn_blocking(move || store.merge()).await {
                        Ok(Ok((report, _))) => bar.set_message(format!(
                            "{} segments, generation {}",
                            stats.segments, report.generation
                        )),
                        Ok(Err(e)) => tracing::warn!(error = %e, "Background merge failed"),
                        Err(e) => tracing::warn!(error = %e, "Background merge panicked"),
                    }
                }
                bar.set_position(coordinator.stats().added);
            })
        };

        Ok(Self {
            bar,
            cancel,
            handle,
        })
    }

    /// Stop ticking and leave the final count on screen
    pub async fn finish(self) {
        self.cancel.cancel();
        if let Err(e) = self.handle.await {
            tracing::warn!(error = %e, "Progress task failed");
        }
        self.bar.finish_with_message("Run complete");
    }
}
