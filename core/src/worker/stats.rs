//! Shard runner statistics

use std::time::Instant;

use crate::result::{Outcome, TestResult};

/// Counters tracked by each shard runner
#[derive(Debug, Default, Clone)]
pub struct ShardStats {
    /// Tasks handed to the runner
    pub planned: usize,

    /// Results handed to the checkpoint coordinator
    pub recorded: usize,

    /// Successful results
    pub success: usize,

    /// Partially successful results
    pub partial: usize,

    /// Failed results
    pub failure: usize,

    /// Attempts made beyond each task's first
    pub retries: usize,

    /// Failures that used up the attempt ceiling on a transient kind
    pub exhausted_retries: usize,

    /// Attempts cut short by shutdown
    pub cancelled: usize,

    /// Transient failures whose retry shutdown prevented
    pub abandoned_retries: usize,

    /// Tasks never dispatched because the run stopped first
    pub not_started: usize,

    /// Runner start time
    pub started_at: Option<Instant>,

    /// Runner end time
    pub ended_at: Option<Instant>,
}

impl ShardStats {
    /// Create stats for a shard of `planned` tasks
    pub fn new(planned: usize) -> Self {
        Self {
            planned,
            ..Default::default()
        }
    }

    /// Start tracking (records start time)
    pub fn start(&mut self) {
        self.started_at = Some(Instant::now());
    }

    /// Stop tracking (records end time)
    pub fn stop(&mut self) {
        self.ended_at = Some(Instant::now());
    }

    /// Record a final result
    pub fn record(&mut self, result: &TestResult) {
        self.recorded += 1;
        self.retries += result.attempts.saturating_sub(1) as usize;
        match result.outcome {
            Outcome::Success => self.success += 1,
            Outcome::Partial => self.partial += 1,
            Outcome::Failure => self.failure += 1,
        }
    }

    /// Tasks whose result shutdown cut short
    pub fn interrupted(&self) -> usize {
        self.cancelled + self.abandoned_retries
    }

    /// Planned tasks without a recorded result
    pub fn shortfall(&self) -> usize {
        self.planned.saturating_sub(self.recorded)
    }

    /// Get completion rate (success or partial over recorded, 0.0 - 1.0)
    pub fn completion_rate(&self) -> f64 {
        if self.recorded == 0 {
            0.0
        } else {
            (self.success + self.partial) as f64 / self.recorded as f64
        }
    }

    /// Get elapsed time since start
    pub fn elapsed(&self) -> Option<std::time::Duration> {
        self.started_at.map(|start| {
            self.ended_at
                .map(|end| end.duration_since(start))
                .unwrap_or_else(|| start.elapsed())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::task::{Configuration, TestTask};
    use std::time::Duration;

    fn task() -> TestTask {
        TestTask::new("t", "p", Configuration::new("s", "r", "d", "c"))
    }

    #[test]
    fn test_shard_stats_defaults() {
        let stats = ShardStats::new(5);
        assert_eq!(stats.planned, 5);
        assert_eq!(stats.recorded, 0);
        assert_eq!(stats.shortfall(), 5);
        assert_eq!(stats.completion_rate(), 0.0);
        assert!(stats.elapsed().is_none());
    }

    #[test]
    fn test_shard_stats_record() {
        let mut stats = ShardStats::new(3);
        stats.record(&TestResult::success(&task(), Duration::ZERO));
        stats.record(&TestResult::partial(&task(), Duration::ZERO).with_attempts(2));
        stats.record(&TestResult::failure(&task(), ErrorKind::Timeout, Duration::ZERO).with_attempts(3));

        assert_eq!(stats.recorded, 3);
        assert_eq!(stats.success, 1);
        assert_eq!(stats.partial, 1);
        assert_eq!(stats.failure, 1);
        assert_eq!(stats.retries, 3);
        assert_eq!(stats.shortfall(), 0);
        assert!((stats.completion_rate() - 2.0 / 3.0).abs() < 0.001);
    }

    #[test]
    fn test_shard_stats_interrupted() {
        let mut stats = ShardStats::new(4);
        stats.cancelled = 2;
        stats.abandoned_retries = 1;
        assert_eq!(stats.interrupted(), 3);
    }

    #[test]
    fn test_shard_stats_start_stop() {
        let mut stats = ShardStats::new(0);
        stats.start();
        std::thread::sleep(Duration::from_millis(10));
        stats.stop();
        assert!(stats.elapsed().unwrap() >= Duration::from_millis(10));
    }
}
