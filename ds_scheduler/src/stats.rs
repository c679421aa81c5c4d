//! ABOUTME: Statistics accumulator — atomics-backed counters behind the admin stats API
//! ABOUTME: Out-of-scope as a full metrics system; ambient since `ds_web` needs something to read

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Job-outcome counters, snapshotted read-only for `GET /api/stats`.
#[derive(Debug)]
pub struct StatsAccumulator {
    total_jobs: AtomicU64,
    completed_jobs: AtomicU64,
    failed_jobs: AtomicU64,
    timeout_jobs: AtomicU64,
    cancelled_jobs: AtomicU64,
    total_execution_time_ms: AtomicU64,
    min_execution_time_ms: AtomicU64,
    max_execution_time_ms: AtomicU64,
    scheduler_cycles: AtomicU64,
    jobs_dispatched: AtomicU64,
}

/// Read-only snapshot returned to callers; never exposes the atomics.
#[derive(Debug, Clone, Serialize)]
pub struct StatsSnapshot {
    pub total_jobs: u64,
    pub completed_jobs: u64,
    pub failed_jobs: u64,
    pub timeout_jobs: u64,
    pub cancelled_jobs: u64,
    pub avg_execution_time_ms: u64,
    pub min_execution_time_ms: u64,
    pub max_execution_time_ms: u64,
    pub scheduler_cycles: u64,
    pub jobs_dispatched: u64,
}

impl Default for StatsAccumulator {
    /// `min_execution_time_ms` must start at `u64::MAX`, not the atomics'
    /// natural zero default — `fetch_min` would otherwise clamp it to 0
    /// on the very first recorded duration.
    fn default() -> Self {
        Self {
            total_jobs: AtomicU64::new(0),
            completed_jobs: AtomicU64::new(0),
            failed_jobs: AtomicU64::new(0),
            timeout_jobs: AtomicU64::new(0),
            cancelled_jobs: AtomicU64::new(0),
            total_execution_time_ms: AtomicU64::new(0),
            min_execution_time_ms: AtomicU64::new(u64::MAX),
            max_execution_time_ms: AtomicU64::new(0),
            scheduler_cycles: AtomicU64::new(0),
            jobs_dispatched: AtomicU64::new(0),
        }
    }
}

impl StatsAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_cycle(&self) {
        self.scheduler_cycles.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dispatch(&self) {
        self.total_jobs.fetch_add(1, Ordering::Relaxed);
        self.jobs_dispatched.fetch_add(1, Ordering::Relaxed);
    }

    /// Folds one terminal execution result into the running totals (§4.6
    /// step 4, "surface terminal status to the statistics accumulator").
    ///
    /// The wire/store model has no distinct cancelled status: a cancelled
    /// job is reported as `Failed` with an `error` naming the cancellation
    /// (spec §4.6's cancellation test contract). `was_cancelled` lets the
    /// caller route that case into `cancelled_jobs` instead of
    /// `failed_jobs` so the two stay distinguishable at the stats layer.
    pub fn record_terminal(
        &self,
        status: ds_db::ExecutionStatus,
        duration_ms: Option<u64>,
        was_cancelled: bool,
    ) {
        use ds_db::ExecutionStatus::*;
        match status {
            Success => {
                self.completed_jobs.fetch_add(1, Ordering::Relaxed);
            }
            Failed if was_cancelled => {
                self.record_cancelled();
            }
            Failed => {
                self.failed_jobs.fetch_add(1, Ordering::Relaxed);
            }
            Timeout => {
                self.timeout_jobs.fetch_add(1, Ordering::Relaxed);
            }
            Waiting | Running => {}
        }

        if let Some(duration) = duration_ms {
            self.total_execution_time_ms
                .fetch_add(duration, Ordering::Relaxed);
            self.min_execution_time_ms
                .fetch_min(duration, Ordering::Relaxed);
            self.max_execution_time_ms
                .fetch_max(duration, Ordering::Relaxed);
        }
    }

    pub fn record_cancelled(&self) {
        self.cancelled_jobs.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let completed = self.completed_jobs.load(Ordering::Relaxed);
        let total_time = self.total_execution_time_ms.load(Ordering::Relaxed);
        let avg = if completed > 0 {
            total_time / completed
        } else {
            0
        };
        let min = self.min_execution_time_ms.load(Ordering::Relaxed);
        StatsSnapshot {
            total_jobs: self.total_jobs.load(Ordering::Relaxed),
            completed_jobs: completed,
            failed_jobs: self.failed_jobs.load(Ordering::Relaxed),
            timeout_jobs: self.timeout_jobs.load(Ordering::Relaxed),
            cancelled_jobs: self.cancelled_jobs.load(Ordering::Relaxed),
            avg_execution_time_ms: avg,
            min_execution_time_ms: if min == u64::MAX { 0 } else { min },
            max_execution_time_ms: self.max_execution_time_ms.load(Ordering::Relaxed),
            scheduler_cycles: self.scheduler_cycles.load(Ordering::Relaxed),
            jobs_dispatched: self.jobs_dispatched.load(Ordering::Relaxed),
        }
    }

    pub fn reset(&self) {
        self.total_jobs.store(0, Ordering::Relaxed);
        self.completed_jobs.store(0, Ordering::Relaxed);
        self.failed_jobs.store(0, Ordering::Relaxed);
        self.timeout_jobs.store(0, Ordering::Relaxed);
        self.cancelled_jobs.store(0, Ordering::Relaxed);
        self.total_execution_time_ms.store(0, Ordering::Relaxed);
        self.min_execution_time_ms
            .store(u64::MAX, Ordering::Relaxed);
        self.max_execution_time_ms.store(0, Ordering::Relaxed);
        self.scheduler_cycles.store(0, Ordering::Relaxed);
        self.jobs_dispatched.store(0, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ds_db::ExecutionStatus;

    #[test]
    fn avg_execution_time_is_zero_with_no_completions() {
        let stats = StatsAccumulator::new();
        assert_eq!(stats.snapshot().avg_execution_time_ms, 0);
    }

    #[test]
    fn records_terminal_outcomes_and_timings() {
        let stats = StatsAccumulator::new();
        stats.record_terminal(ExecutionStatus::Success, Some(100), false);
        stats.record_terminal(ExecutionStatus::Success, Some(300), false);
        stats.record_terminal(ExecutionStatus::Failed, None, false);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.completed_jobs, 2);
        assert_eq!(snapshot.failed_jobs, 1);
        assert_eq!(snapshot.avg_execution_time_ms, 200);
        assert_eq!(snapshot.min_execution_time_ms, 100);
        assert_eq!(snapshot.max_execution_time_ms, 300);
    }

    #[test]
    fn cancelled_failure_counts_as_cancelled_not_failed() {
        let stats = StatsAccumulator::new();
        stats.record_terminal(ExecutionStatus::Failed, Some(10), true);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.cancelled_jobs, 1);
        assert_eq!(snapshot.failed_jobs, 0);
    }

    #[test]
    fn reset_clears_every_counter() {
        let stats = StatsAccumulator::new();
        stats.record_dispatch();
        stats.record_terminal(ExecutionStatus::Success, Some(50), false);
        stats.reset();
        let snapshot = stats.snapshot();
        assert_eq!(snapshot.total_jobs, 0);
        assert_eq!(snapshot.completed_jobs, 0);
        assert_eq!(snapshot.avg_execution_time_ms, 0);
    }
}
