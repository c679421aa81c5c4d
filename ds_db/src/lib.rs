//! ABOUTME: Relational store layer: connection pool, migrations, repositories
//! ABOUTME: Backs job/execution/executor/lock/config persistence

pub mod metrics;
pub mod repositories;

pub use metrics::PoolMetrics;
pub use repositories::executions::{Execution, ExecutionRepository, ExecutionStatus};
pub use repositories::executors::{ExecutorNode, ExecutorRepository, ExecutorStatus};
pub use repositories::jobs::{CreateJobRequest, Job, JobRepository, JobType, UpdateJobRequest};
pub use repositories::locks::{Lock, LockRepository};
pub use repositories::system_config::SystemConfigRepository;

use ds_core::{Error, Result};
use sqlx::{
    migrate::MigrateDatabase,
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions},
    Sqlite, SqlitePool,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// Database connection retry configuration, the same exponential-backoff
/// shape used for broker/coordination-service reconnects elsewhere in the
/// scheduler.
#[derive(Debug, Clone)]
pub struct DatabaseRetryConfig {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
}

impl Default for DatabaseRetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay_ms: 1000,
            max_delay_ms: 30000,
            backoff_multiplier: 2.0,
        }
    }
}

impl DatabaseRetryConfig {
    fn calculate_delay(&self, attempt: u32) -> Duration {
        let delay_ms = self.initial_delay_ms as f64 * self.backoff_multiplier.powi(attempt as i32);
        let capped_delay = delay_ms.min(self.max_delay_ms as f64);

        let jitter = {
            use std::time::SystemTime;
            let nanos = SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .subsec_nanos();
            0.9 + ((nanos % 201) as f64 / 1000.0)
        };

        Duration::from_millis((capped_delay * jitter) as u64)
    }
}

/// Database connection pool and administrative operations. Cloning is cheap
/// — `SqlitePool` is reference-counted internally.
#[derive(Debug, Clone)]
pub struct Db {
    pool: SqlitePool,
    metrics: Arc<PoolMetrics>,
}

impl Db {
    #[instrument(skip(db_path))]
    pub async fn new(db_path: &str) -> Result<Self> {
        Self::new_with_retry(db_path, DatabaseRetryConfig::default()).await
    }

    #[instrument(skip(db_path, retry_config))]
    pub async fn new_with_retry(db_path: &str, retry_config: DatabaseRetryConfig) -> Result<Self> {
        info!(
            db_path,
            max_attempts = retry_config.max_attempts,
            "initializing database"
        );

        let database_url = format!("sqlite://{}", db_path);
        let mut last_error = None;

        for attempt in 0..retry_config.max_attempts {
            if attempt > 0 {
                let delay = retry_config.calculate_delay(attempt - 1);
                warn!(
                    attempt = attempt + 1,
                    max_attempts = retry_config.max_attempts,
                    delay_ms = delay.as_millis(),
                    "database connection failed, retrying"
                );
                tokio::time::sleep(delay).await;
            }

            match Self::try_initialize(db_path, &database_url).await {
                Ok(db) => match db.migrate().await {
                    Ok(()) => {
                        info!(attempts = attempt + 1, "database initialized and migrated");
                        return Ok(db);
                    }
                    Err(e) => {
                        warn!(attempt = attempt + 1, error = %e, "migration failed, retrying");
                        last_error = Some(e);
                        continue;
                    }
                },
                Err(e) => {
                    warn!(attempt = attempt + 1, error = %e, "database init failed");
                    last_error = Some(e);
                    continue;
                }
            }
        }

        Err(Error::Database(format!(
            "failed to initialize database after {} attempts: {}",
            retry_config.max_attempts,
            last_error.map(|e| e.to_string()).unwrap_or_default()
        )))
    }

    async fn try_initialize(db_path: &str, database_url: &str) -> Result<Self> {
        if !Sqlite::database_exists(database_url).await.unwrap_or(false) {
            debug!(database_url, "creating database");
            Sqlite::create_database(database_url)
                .await
                .map_err(|e| Error::Database(format!("failed to create database: {e}")))?;
        }

        let connect_options = SqliteConnectOptions::new()
            .filename(db_path)
            .journal_mode(SqliteJournalMode::Wal)
            .create_if_missing(true)
            .pragma("foreign_keys", "ON")
            .pragma("synchronous", "NORMAL")
            .pragma("busy_timeout", "30000");

        let pool = SqlitePoolOptions::new()
            .max_connections(10)
            .min_connections(1)
            .connect_with(connect_options)
            .await
            .map_err(|e| Error::Database(format!("failed to create connection pool: {e}")))?;

        Ok(Self {
            pool,
            metrics: Arc::new(PoolMetrics::new()),
        })
    }

    #[instrument(skip(self))]
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| Error::Database(format!("migration failed: {e}")))?;
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn from_pool(pool: SqlitePool) -> Self {
        Self {
            pool,
            metrics: Arc::new(PoolMetrics::new()),
        }
    }

    /// Query-count/elapsed stats accumulator (§4.2) — one per `Db`, shared
    /// by every repository the same pool hands out.
    pub fn pool_metrics(&self) -> &Arc<PoolMetrics> {
        &self.metrics
    }

    #[instrument(skip(self))]
    pub async fn health_check(&self) -> Result<()> {
        self.metrics
            .trace(sqlx::query("SELECT 1").fetch_one(&self.pool).await)
            .map_err(|e| Error::Database(format!("health check failed: {e}")))?;
        Ok(())
    }

    pub fn jobs(&self) -> JobRepository<'_> {
        JobRepository::new(&self.pool, &self.metrics)
    }

    pub fn executions(&self) -> ExecutionRepository<'_> {
        ExecutionRepository::new(&self.pool, &self.metrics)
    }

    pub fn executors(&self) -> ExecutorRepository<'_> {
        ExecutorRepository::new(&self.pool, &self.metrics)
    }

    pub fn locks(&self) -> LockRepository<'_> {
        LockRepository::new(&self.pool, &self.metrics)
    }

    pub fn system_config(&self) -> SystemConfigRepository<'_> {
        SystemConfigRepository::new(&self.pool, &self.metrics)
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::Db;

    /// Create a database against a unique temp file so concurrent tests
    /// don't contend on the same SQLite file.
    pub async fn create_test_db() -> Db {
        let path = std::env::temp_dir().join(format!("ds_db-test-{}.db", ulid::Ulid::new()));
        Db::new(path.to_str().expect("utf8 temp path"))
            .await
            .expect("open test db")
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::create_test_db;

    #[tokio::test]
    async fn migrates_and_health_checks() {
        let db = create_test_db().await;
        db.health_check().await.unwrap();
    }
}
