//! ABOUTME: Database connection pool metrics
//! ABOUTME: Exposes store-layer counters through the admin API's /metrics surface

use prometheus_client::metrics::{counter::Counter, gauge::Gauge};

#[derive(Debug, Clone, Default)]
pub struct PoolMetrics {
    pub connections_acquired: Counter,
    pub connections_failed: Counter,
    pub queries_total: Counter,
    pub queries_failed: Counter,
    pub connections_idle: Gauge,
    pub connections_active: Gauge,
}

impl PoolMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_acquired(&self) {
        self.connections_acquired.inc();
    }

    pub fn record_failed(&self) {
        self.connections_failed.inc();
    }

    pub fn record_query(&self, ok: bool) {
        self.queries_total.inc();
        if !ok {
            self.queries_failed.inc();
        }
    }

    pub fn set_idle(&self, count: i64) {
        self.connections_idle.set(count);
    }

    pub fn set_active(&self, count: i64) {
        self.connections_active.set(count);
    }

    /// Folds the outcome of one pooled-connection round trip (acquire,
    /// execute, release — `SqlitePool` does all three implicitly per call)
    /// into the counters, then passes the result through unchanged so
    /// repository methods can wrap a query inline.
    pub fn trace<T, E>(&self, result: Result<T, E>) -> Result<T, E> {
        match &result {
            Ok(_) => {
                self.record_acquired();
                self.record_query(true);
            }
            Err(_) => {
                self.record_failed();
                self.record_query(false);
            }
        }
        result
    }
}
