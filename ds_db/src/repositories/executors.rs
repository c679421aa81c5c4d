//! ABOUTME: Executor roster repository — durable mirror of fleet membership
//! ABOUTME: `current_load` here is the synchronization point placement reads

use crate::metrics::PoolMetrics;
use ds_core::{time::now_iso8601, Error, Result};
use serde::{Deserialize, Serialize};
use sqlx::{sqlite::SqliteTypeInfo, Decode, Encode, FromRow, Sqlite, SqlitePool, Type};
use tracing::instrument;

/// `executor_node.status` (§3 "Executor").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutorStatus {
    Online,
    Offline,
}

impl ExecutorStatus {
    fn as_str(&self) -> &'static str {
        match self {
            ExecutorStatus::Online => "ONLINE",
            ExecutorStatus::Offline => "OFFLINE",
        }
    }
}

impl std::str::FromStr for ExecutorStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "ONLINE" => Ok(ExecutorStatus::Online),
            "OFFLINE" => Ok(ExecutorStatus::Offline),
            other => Err(Error::InvalidInput(format!(
                "unknown executor status {other:?}"
            ))),
        }
    }
}

impl Type<Sqlite> for ExecutorStatus {
    fn type_info() -> SqliteTypeInfo {
        <String as Type<Sqlite>>::type_info()
    }
}

impl<'q> Encode<'q, Sqlite> for ExecutorStatus {
    fn encode_by_ref(
        &self,
        buf: &mut Vec<sqlx::sqlite::SqliteArgumentValue<'q>>,
    ) -> Result<sqlx::encode::IsNull, sqlx::error::BoxDynError> {
        Encode::<Sqlite>::encode_by_ref(&self.as_str().to_string(), buf)
    }
}

impl<'r> Decode<'r, Sqlite> for ExecutorStatus {
    fn decode(value: sqlx::sqlite::SqliteValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let raw = <String as Decode<Sqlite>>::decode(value)?;
        Ok(raw.parse()?)
    }
}

/// A worker in the executor fleet (§3 "Executor").
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ExecutorNode {
    pub executor_id: String,
    pub host: String,
    pub port: i64,
    pub status: ExecutorStatus,
    pub max_load: i64,
    pub current_load: i64,
    pub total_tasks_executed: i64,
    pub last_heartbeat: String,
    pub register_time: String,
}

/// Default liveness window: online and heartbeat within 5 minutes.
pub const LIVE_WINDOW_SECONDS: i64 = 5 * 60;

impl ExecutorNode {
    /// `status=ONLINE AND now − last_heartbeat < LIVE_WINDOW`.
    pub fn is_live(&self, live_window_seconds: i64) -> bool {
        if self.status != ExecutorStatus::Online {
            return false;
        }
        let Ok(last) = ds_core::time::parse_rfc3339(&self.last_heartbeat) else {
            return false;
        };
        let age = (std::time::SystemTime::now())
            .duration_since(last)
            .unwrap_or_default();
        age.as_secs() < live_window_seconds.max(0) as u64
    }

    pub fn has_capacity(&self) -> bool {
        self.current_load < self.max_load
    }
}

pub struct ExecutorRepository<'a> {
    pool: &'a SqlitePool,
    metrics: &'a PoolMetrics,
}

impl<'a> ExecutorRepository<'a> {
    pub fn new(pool: &'a SqlitePool, metrics: &'a PoolMetrics) -> Self {
        Self { pool, metrics }
    }

    /// Upserts the roster row for `executor_id` — registration from a fresh
    /// process, or re-registration after a restart.
    #[instrument(skip(self))]
    pub async fn register(
        &self,
        executor_id: &str,
        host: &str,
        port: i64,
        max_load: i64,
    ) -> Result<ExecutorNode> {
        let now = now_iso8601();
        let row = sqlx::query_as::<_, ExecutorNode>(
            r#"
            INSERT INTO executor_node (
                executor_id, host, port, status, max_load, current_load,
                total_tasks_executed, last_heartbeat, register_time
            ) VALUES (?1, ?2, ?3, ?4, ?5, 0, 0, ?6, ?6)
            ON CONFLICT (executor_id) DO UPDATE SET
                host = excluded.host,
                port = excluded.port,
                status = excluded.status,
                max_load = excluded.max_load,
                last_heartbeat = excluded.last_heartbeat
            RETURNING *
            "#,
        )
        .bind(executor_id)
        .bind(host)
        .bind(port)
        .bind(ExecutorStatus::Online)
        .bind(max_load)
        .bind(&now)
        .fetch_one(self.pool)
        .await;
        self.metrics
            .trace(row)
            .map_err(|e| Error::Database(format!("failed to register executor {executor_id}: {e}")))
    }

    #[instrument(skip(self))]
    pub async fn get(&self, executor_id: &str) -> Result<Option<ExecutorNode>> {
        let row = sqlx::query_as::<_, ExecutorNode>("SELECT * FROM executor_node WHERE executor_id = ?1")
            .bind(executor_id)
            .fetch_optional(self.pool)
            .await;
        self.metrics
            .trace(row)
            .map_err(|e| Error::Database(format!("failed to fetch executor {executor_id}: {e}")))
    }

    #[instrument(skip(self))]
    pub async fn list_all(&self) -> Result<Vec<ExecutorNode>> {
        let rows = sqlx::query_as::<_, ExecutorNode>("SELECT * FROM executor_node ORDER BY executor_id")
            .fetch_all(self.pool)
            .await;
        self.metrics
            .trace(rows)
            .map_err(|e| Error::Database(format!("failed to list executors: {e}")))
    }

    /// All `ONLINE` executors whose heartbeat is within `live_window_seconds`.
    #[instrument(skip(self))]
    pub async fn list_live(&self, live_window_seconds: i64) -> Result<Vec<ExecutorNode>> {
        let rows = sqlx::query_as::<_, ExecutorNode>(
            "SELECT * FROM executor_node WHERE status = 'ONLINE' ORDER BY executor_id",
        )
        .fetch_all(self.pool)
        .await;
        let rows = self
            .metrics
            .trace(rows)
            .map_err(|e| Error::Database(format!("failed to list live executors: {e}")))?;
        Ok(rows
            .into_iter()
            .filter(|e| e.is_live(live_window_seconds))
            .collect())
    }

    #[instrument(skip(self))]
    pub async fn update_status(&self, executor_id: &str, status: ExecutorStatus) -> Result<()> {
        let result = sqlx::query("UPDATE executor_node SET status = ?2 WHERE executor_id = ?1")
            .bind(executor_id)
            .bind(status)
            .execute(self.pool)
            .await;
        self.metrics
            .trace(result)
            .map_err(|e| Error::Database(format!("failed to update status for {executor_id}: {e}")))?;
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn update_max_load(&self, executor_id: &str, max_load: i64) -> Result<()> {
        let result = sqlx::query("UPDATE executor_node SET max_load = ?2 WHERE executor_id = ?1")
            .bind(executor_id)
            .bind(max_load)
            .execute(self.pool)
            .await;
        self.metrics
            .trace(result)
            .map_err(|e| Error::Database(format!("failed to update max_load for {executor_id}: {e}")))?;
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn heartbeat(&self, executor_id: &str) -> Result<()> {
        let now = now_iso8601();
        let result = sqlx::query("UPDATE executor_node SET last_heartbeat = ?2 WHERE executor_id = ?1")
            .bind(executor_id)
            .bind(&now)
            .execute(self.pool)
            .await;
        self.metrics
            .trace(result)
            .map_err(|e| Error::Database(format!("failed to heartbeat {executor_id}: {e}")))?;
        Ok(())
    }

    /// `current_load += 1`, called right after placement picks this
    /// executor and before the dispatch envelope is produced (§4.6 step 3).
    #[instrument(skip(self))]
    pub async fn increment_load(&self, executor_id: &str) -> Result<()> {
        let result = sqlx::query("UPDATE executor_node SET current_load = current_load + 1 WHERE executor_id = ?1")
            .bind(executor_id)
            .execute(self.pool)
            .await;
        self.metrics
            .trace(result)
            .map_err(|e| Error::Database(format!("failed to increment load for {executor_id}: {e}")))?;
        Ok(())
    }

    /// `current_load -= 1`, clamped at zero so a redelivered result never
    /// drives the counter negative.
    #[instrument(skip(self))]
    pub async fn decrement_load(&self, executor_id: &str) -> Result<()> {
        let result = sqlx::query(
            "UPDATE executor_node SET current_load = MAX(current_load - 1, 0) WHERE executor_id = ?1",
        )
        .bind(executor_id)
        .execute(self.pool)
        .await;
        self.metrics
            .trace(result)
            .map_err(|e| Error::Database(format!("failed to decrement load for {executor_id}: {e}")))?;
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn increment_task_count(&self, executor_id: &str) -> Result<()> {
        let result = sqlx::query(
            "UPDATE executor_node SET total_tasks_executed = total_tasks_executed + 1 WHERE executor_id = ?1",
        )
        .bind(executor_id)
        .execute(self.pool)
        .await;
        self.metrics.trace(result).map_err(|e| {
            Error::Database(format!("failed to increment task count for {executor_id}: {e}"))
        })?;
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn unregister(&self, executor_id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM executor_node WHERE executor_id = ?1")
            .bind(executor_id)
            .execute(self.pool)
            .await;
        let result = self
            .metrics
            .trace(result)
            .map_err(|e| Error::Database(format!("failed to unregister {executor_id}: {e}")))?;
        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::create_test_db;

    #[tokio::test]
    async fn register_then_load_roundtrip() {
        let db = create_test_db().await;
        let node = db
            .executors()
            .register("exec-1", "127.0.0.1", 9000, 10)
            .await
            .unwrap();
        assert_eq!(node.current_load, 0);
        assert_eq!(node.status, ExecutorStatus::Online);

        db.executors().increment_load("exec-1").await.unwrap();
        db.executors().increment_load("exec-1").await.unwrap();
        let node = db.executors().get("exec-1").await.unwrap().unwrap();
        assert_eq!(node.current_load, 2);

        db.executors().decrement_load("exec-1").await.unwrap();
        let node = db.executors().get("exec-1").await.unwrap().unwrap();
        assert_eq!(node.current_load, 1);
    }

    #[tokio::test]
    async fn decrement_clamps_at_zero() {
        let db = create_test_db().await;
        db.executors()
            .register("exec-2", "127.0.0.1", 9000, 10)
            .await
            .unwrap();
        db.executors().decrement_load("exec-2").await.unwrap();
        let node = db.executors().get("exec-2").await.unwrap().unwrap();
        assert_eq!(node.current_load, 0);
    }

    #[tokio::test]
    async fn offline_executor_is_never_live() {
        let db = create_test_db().await;
        db.executors()
            .register("exec-3", "127.0.0.1", 9000, 10)
            .await
            .unwrap();
        db.executors()
            .update_status("exec-3", ExecutorStatus::Offline)
            .await
            .unwrap();
        let live = db.executors().list_live(300).await.unwrap();
        assert!(live.is_empty());
    }

    #[tokio::test]
    async fn stale_heartbeat_excluded_from_live_set() {
        let db = create_test_db().await;
        db.executors()
            .register("exec-4", "127.0.0.1", 9000, 10)
            .await
            .unwrap();
        // A window of zero seconds means "never live" since any elapsed
        // time, however small, exceeds it.
        std::thread::sleep(std::time::Duration::from_millis(10));
        let live = db.executors().list_live(0).await.unwrap();
        assert!(live.is_empty());
    }
}
