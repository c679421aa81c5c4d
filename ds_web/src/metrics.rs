//! ABOUTME: `/metrics` surface — prometheus-client gauges mirroring the stats accumulator

use ds_scheduler::StatsSnapshot;
use prometheus_client::encoding::text::encode;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::registry::Registry;
use std::sync::Mutex;

/// One gauge per counter in [`StatsSnapshot`]. Registered once at startup;
/// `render` pushes the latest snapshot into the gauges immediately before
/// encoding, so scrape-time values never lag behind the last terminal
/// result folded in by `ResultReconciler`.
pub struct Metrics {
    registry: Mutex<Registry>,
    total_jobs: Gauge,
    completed_jobs: Gauge,
    failed_jobs: Gauge,
    timeout_jobs: Gauge,
    cancelled_jobs: Gauge,
    avg_execution_time_ms: Gauge,
    min_execution_time_ms: Gauge,
    max_execution_time_ms: Gauge,
    scheduler_cycles: Gauge,
    jobs_dispatched: Gauge,
}

impl Metrics {
    pub fn new() -> Self {
        let mut registry = Registry::default();
        let total_jobs = Gauge::default();
        let completed_jobs = Gauge::default();
        let failed_jobs = Gauge::default();
        let timeout_jobs = Gauge::default();
        let cancelled_jobs = Gauge::default();
        let avg_execution_time_ms = Gauge::default();
        let min_execution_time_ms = Gauge::default();
        let max_execution_time_ms = Gauge::default();
        let scheduler_cycles = Gauge::default();
        let jobs_dispatched = Gauge::default();

        registry.register("ds_total_jobs", "Jobs dispatched", total_jobs.clone());
        registry.register("ds_completed_jobs", "Jobs finished SUCCESS", completed_jobs.clone());
        registry.register("ds_failed_jobs", "Jobs finished FAILED", failed_jobs.clone());
        registry.register("ds_timeout_jobs", "Jobs finished TIMEOUT", timeout_jobs.clone());
        registry.register("ds_cancelled_jobs", "Jobs cancelled before completion", cancelled_jobs.clone());
        registry.register(
            "ds_avg_execution_time_ms",
            "Average execution wall time",
            avg_execution_time_ms.clone(),
        );
        registry.register(
            "ds_min_execution_time_ms",
            "Minimum execution wall time",
            min_execution_time_ms.clone(),
        );
        registry.register(
            "ds_max_execution_time_ms",
            "Maximum execution wall time",
            max_execution_time_ms.clone(),
        );
        registry.register("ds_scheduler_cycles", "Tick loop iterations", scheduler_cycles.clone());
        registry.register("ds_jobs_dispatched", "Total dispatch attempts", jobs_dispatched.clone());

        Self {
            registry: Mutex::new(registry),
            total_jobs,
            completed_jobs,
            failed_jobs,
            timeout_jobs,
            cancelled_jobs,
            avg_execution_time_ms,
            min_execution_time_ms,
            max_execution_time_ms,
            scheduler_cycles,
            jobs_dispatched,
        }
    }

    fn refresh(&self, snapshot: &StatsSnapshot) {
        self.total_jobs.set(snapshot.total_jobs as i64);
        self.completed_jobs.set(snapshot.completed_jobs as i64);
        self.failed_jobs.set(snapshot.failed_jobs as i64);
        self.timeout_jobs.set(snapshot.timeout_jobs as i64);
        self.cancelled_jobs.set(snapshot.cancelled_jobs as i64);
        self.avg_execution_time_ms.set(snapshot.avg_execution_time_ms as i64);
        self.min_execution_time_ms.set(snapshot.min_execution_time_ms as i64);
        self.max_execution_time_ms.set(snapshot.max_execution_time_ms as i64);
        self.scheduler_cycles.set(snapshot.scheduler_cycles as i64);
        self.jobs_dispatched.set(snapshot.jobs_dispatched as i64);
    }

    /// Refreshes the gauges from `snapshot` and encodes the registry in
    /// OpenMetrics text format.
    pub fn render(&self, snapshot: &StatsSnapshot) -> String {
        self.refresh(snapshot);
        let mut buf = String::new();
        let registry = self.registry.lock().expect("metrics registry lock poisoned");
        encode(&mut buf, &registry).expect("encoding the metrics registry cannot fail");
        buf
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
