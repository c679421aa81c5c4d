//! ABOUTME: Execution repository — one row per attempt to run a job
//! ABOUTME: Terminal writes (`update_result`) are idempotent under the same id

use crate::metrics::PoolMetrics;
use ds_core::{time::now_iso8601, Error, Result};
use serde::{Deserialize, Serialize};
use sqlx::{sqlite::SqliteTypeInfo, Decode, Encode, FromRow, Sqlite, SqlitePool, Type};
use tracing::instrument;

/// `job_execution.status` (§3 "Execution").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    Waiting,
    Running,
    Success,
    Failed,
    Timeout,
}

impl ExecutionStatus {
    fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Waiting => "WAITING",
            ExecutionStatus::Running => "RUNNING",
            ExecutionStatus::Success => "SUCCESS",
            ExecutionStatus::Failed => "FAILED",
            ExecutionStatus::Timeout => "TIMEOUT",
        }
    }

    /// Terminal statuses are write-once (§3 invariant).
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionStatus::Success | ExecutionStatus::Failed | ExecutionStatus::Timeout
        )
    }
}

impl std::str::FromStr for ExecutionStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "WAITING" => Ok(ExecutionStatus::Waiting),
            "RUNNING" => Ok(ExecutionStatus::Running),
            "SUCCESS" => Ok(ExecutionStatus::Success),
            "FAILED" => Ok(ExecutionStatus::Failed),
            "TIMEOUT" => Ok(ExecutionStatus::Timeout),
            other => Err(Error::InvalidInput(format!(
                "unknown execution status {other:?}"
            ))),
        }
    }
}

impl Type<Sqlite> for ExecutionStatus {
    fn type_info() -> SqliteTypeInfo {
        <String as Type<Sqlite>>::type_info()
    }
}

impl<'q> Encode<'q, Sqlite> for ExecutionStatus {
    fn encode_by_ref(
        &self,
        buf: &mut Vec<sqlx::sqlite::SqliteArgumentValue<'q>>,
    ) -> Result<sqlx::encode::IsNull, sqlx::error::BoxDynError> {
        Encode::<Sqlite>::encode_by_ref(&self.as_str().to_string(), buf)
    }
}

impl<'r> Decode<'r, Sqlite> for ExecutionStatus {
    fn decode(value: sqlx::sqlite::SqliteValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let raw = <String as Decode<Sqlite>>::decode(value)?;
        Ok(raw.parse()?)
    }
}

/// One attempt to run a job (§3 "Execution").
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Execution {
    pub execution_id: i64,
    pub job_id: String,
    pub executor_id: Option<String>,
    pub status: ExecutionStatus,
    pub trigger_time: String,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    pub output: Option<String>,
    pub error: Option<String>,
}

pub struct ExecutionRepository<'a> {
    pool: &'a SqlitePool,
    metrics: &'a PoolMetrics,
}

impl<'a> ExecutionRepository<'a> {
    pub fn new(pool: &'a SqlitePool, metrics: &'a PoolMetrics) -> Self {
        Self { pool, metrics }
    }

    /// Inserts with status `WAITING`, returning the store-assigned
    /// `execution_id`.
    #[instrument(skip(self))]
    pub async fn save(&self, job_id: &str, executor_id: Option<&str>) -> Result<Execution> {
        let now = now_iso8601();
        let row = sqlx::query_as::<_, Execution>(
            r#"
            INSERT INTO job_execution (job_id, executor_id, status, trigger_time)
            VALUES (?1, ?2, ?3, ?4)
            RETURNING *
            "#,
        )
        .bind(job_id)
        .bind(executor_id)
        .bind(ExecutionStatus::Waiting)
        .bind(&now)
        .fetch_one(self.pool)
        .await;
        self.metrics
            .trace(row)
            .map_err(|e| Error::Database(format!("failed to save execution for {job_id}: {e}")))
    }

    #[instrument(skip(self))]
    pub async fn get(&self, execution_id: i64) -> Result<Option<Execution>> {
        let row = sqlx::query_as::<_, Execution>("SELECT * FROM job_execution WHERE execution_id = ?1")
            .bind(execution_id)
            .fetch_optional(self.pool)
            .await;
        self.metrics
            .trace(row)
            .map_err(|e| Error::Database(format!("failed to fetch execution {execution_id}: {e}")))
    }

    /// Stamps `start_time=now` and flips status to `RUNNING`.
    #[instrument(skip(self))]
    pub async fn mark_running(&self, execution_id: i64) -> Result<()> {
        let now = now_iso8601();
        let result = sqlx::query(
            "UPDATE job_execution SET status = ?2, start_time = ?3 WHERE execution_id = ?1",
        )
        .bind(execution_id)
        .bind(ExecutionStatus::Running)
        .bind(&now)
        .execute(self.pool)
        .await;
        self.metrics
            .trace(result)
            .map_err(|e| Error::Database(format!("failed to mark execution {execution_id} running: {e}")))?;
        Ok(())
    }

    /// Stamps `end_time=now` and writes the terminal status plus
    /// output/error text. Idempotent under the same id: re-applying the
    /// same terminal write is a no-op rewrite, tolerating `JOB_RESULT`
    /// redelivery (§4.8 at-least-once guarantee).
    #[instrument(skip(self, output, error))]
    pub async fn update_result(
        &self,
        execution_id: i64,
        status: ExecutionStatus,
        output: Option<&str>,
        error: Option<&str>,
    ) -> Result<()> {
        if !status.is_terminal() {
            return Err(Error::InvalidInput(format!(
                "update_result requires a terminal status, got {status:?}"
            )));
        }
        let now = now_iso8601();
        let result = sqlx::query(
            r#"
            UPDATE job_execution
            SET status = ?2, output = ?3, error = ?4, end_time = ?5,
                start_time = COALESCE(start_time, ?5)
            WHERE execution_id = ?1
            "#,
        )
        .bind(execution_id)
        .bind(status)
        .bind(output)
        .bind(error)
        .bind(&now)
        .execute(self.pool)
        .await;
        self.metrics.trace(result).map_err(|e| {
            Error::Database(format!(
                "failed to update execution {execution_id} result: {e}"
            ))
        })?;
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn latest_for_job(&self, job_id: &str) -> Result<Option<Execution>> {
        let row = sqlx::query_as::<_, Execution>(
            "SELECT * FROM job_execution WHERE job_id = ?1 ORDER BY execution_id DESC LIMIT 1",
        )
        .bind(job_id)
        .fetch_optional(self.pool)
        .await;
        self.metrics
            .trace(row)
            .map_err(|e| Error::Database(format!("failed to fetch latest execution for {job_id}: {e}")))
    }

    #[instrument(skip(self))]
    pub async fn list_for_job(&self, job_id: &str) -> Result<Vec<Execution>> {
        let rows = sqlx::query_as::<_, Execution>(
            "SELECT * FROM job_execution WHERE job_id = ?1 ORDER BY execution_id DESC",
        )
        .bind(job_id)
        .fetch_all(self.pool)
        .await;
        self.metrics
            .trace(rows)
            .map_err(|e| Error::Database(format!("failed to list executions for {job_id}: {e}")))
    }

    /// Deletes archived executions older than `days`.
    #[instrument(skip(self))]
    pub async fn cleanup_expired(&self, days: i64) -> Result<u64> {
        let result = sqlx::query(
            "DELETE FROM job_execution WHERE trigger_time < datetime('now', ?1)",
        )
        .bind(format!("-{days} days"))
        .execute(self.pool)
        .await;
        let result = self
            .metrics
            .trace(result)
            .map_err(|e| Error::Database(format!("failed to cleanup expired executions: {e}")))?;
        Ok(result.rows_affected())
    }

    /// Executions this executor is currently carrying (`WAITING` or
    /// `RUNNING`) — backs `GET /api/executors/{id}/tasks`.
    #[instrument(skip(self))]
    pub async fn list_active_for_executor(&self, executor_id: &str) -> Result<Vec<Execution>> {
        let rows = sqlx::query_as::<_, Execution>(
            r#"
            SELECT * FROM job_execution
            WHERE executor_id = ?1 AND status IN ('WAITING', 'RUNNING')
            ORDER BY execution_id DESC
            "#,
        )
        .bind(executor_id)
        .fetch_all(self.pool)
        .await;
        self.metrics.trace(rows).map_err(|e| {
            Error::Database(format!("failed to list active executions for {executor_id}: {e}"))
        })
    }

    /// Executions still `RUNNING` whose `start_time` is older than
    /// `threshold_seconds` — input to the lost-execution reaper.
    #[instrument(skip(self))]
    pub async fn list_stale_running(&self, threshold_seconds: i64) -> Result<Vec<Execution>> {
        let rows = sqlx::query_as::<_, Execution>(
            r#"
            SELECT * FROM job_execution
            WHERE status = 'RUNNING'
              AND start_time IS NOT NULL
              AND start_time < datetime('now', ?1)
            "#,
        )
        .bind(format!("-{threshold_seconds} seconds"))
        .fetch_all(self.pool)
        .await;
        self.metrics
            .trace(rows)
            .map_err(|e| Error::Database(format!("failed to list stale running executions: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repositories::jobs::{CreateJobRequest, JobType};
    use crate::test_support::create_test_db;

    fn once_request(job_id: &str) -> CreateJobRequest {
        CreateJobRequest {
            job_id: job_id.to_string(),
            name: "say hello".to_string(),
            command: "echo hello".to_string(),
            job_type: JobType::Once,
            priority: 0,
            cron_expression: None,
            timeout_seconds: 5,
            retry_count: 0,
            retry_interval_seconds: 0,
        }
    }

    #[tokio::test]
    async fn save_inserts_waiting_with_assigned_id() {
        let db = create_test_db().await;
        db.jobs().save(once_request("job-1")).await.unwrap();
        let execution = db.executions().save("job-1", Some("exec-1")).await.unwrap();
        assert!(execution.execution_id > 0);
        assert_eq!(execution.status, ExecutionStatus::Waiting);
        assert!(execution.start_time.is_none());
    }

    #[tokio::test]
    async fn update_result_is_idempotent_under_same_id() {
        let db = create_test_db().await;
        db.jobs().save(once_request("job-2")).await.unwrap();
        let execution = db.executions().save("job-2", None).await.unwrap();
        db.executions()
            .update_result(execution.execution_id, ExecutionStatus::Success, Some("hello"), None)
            .await
            .unwrap();
        // Redelivery of the same terminal result must not error or corrupt state.
        db.executions()
            .update_result(execution.execution_id, ExecutionStatus::Success, Some("hello"), None)
            .await
            .unwrap();

        let fetched = db.executions().get(execution.execution_id).await.unwrap().unwrap();
        assert_eq!(fetched.status, ExecutionStatus::Success);
        assert_eq!(fetched.output.as_deref(), Some("hello"));
        assert!(fetched.start_time.is_some());
        assert!(fetched.end_time.is_some());
    }

    #[tokio::test]
    async fn update_result_rejects_non_terminal_status() {
        let db = create_test_db().await;
        db.jobs().save(once_request("job-3")).await.unwrap();
        let execution = db.executions().save("job-3", None).await.unwrap();
        let err = db
            .executions()
            .update_result(execution.execution_id, ExecutionStatus::Running, None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[tokio::test]
    async fn active_for_executor_excludes_terminal_executions() {
        let db = create_test_db().await;
        db.jobs().save(once_request("job-4")).await.unwrap();
        db.jobs().save(once_request("job-5")).await.unwrap();
        let running = db.executions().save("job-4", Some("exec-1")).await.unwrap();
        let done = db.executions().save("job-5", Some("exec-1")).await.unwrap();
        db.executions()
            .update_result(done.execution_id, ExecutionStatus::Success, None, None)
            .await
            .unwrap();

        let active = db.executions().list_active_for_executor("exec-1").await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].execution_id, running.execution_id);
    }
}
