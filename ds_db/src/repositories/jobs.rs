//! ABOUTME: Job repository — typed CRUD for durable job templates
//! ABOUTME: Owns the pending-jobs query that gates against double-dispatch

use crate::metrics::PoolMetrics;
use ds_core::{time::now_iso8601, Error, Result};
use serde::{Deserialize, Serialize};
use sqlx::{sqlite::SqliteTypeInfo, Decode, Encode, FromRow, Sqlite, SqlitePool, Type};
use tracing::{instrument, warn};

/// `job_info.job_type` — one-shot vs. cron-driven recurring job. Stored as
/// TEXT, the same string-enum convention the job-lock status uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobType {
    Once,
    Periodic,
}

impl JobType {
    fn as_str(&self) -> &'static str {
        match self {
            JobType::Once => "ONCE",
            JobType::Periodic => "PERIODIC",
        }
    }
}

impl std::str::FromStr for JobType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "ONCE" => Ok(JobType::Once),
            "PERIODIC" => Ok(JobType::Periodic),
            other => Err(Error::InvalidInput(format!("unknown job_type {other:?}"))),
        }
    }
}

impl Type<Sqlite> for JobType {
    fn type_info() -> SqliteTypeInfo {
        <String as Type<Sqlite>>::type_info()
    }
}

impl<'q> Encode<'q, Sqlite> for JobType {
    fn encode_by_ref(
        &self,
        buf: &mut Vec<sqlx::sqlite::SqliteArgumentValue<'q>>,
    ) -> Result<sqlx::encode::IsNull, sqlx::error::BoxDynError> {
        Encode::<Sqlite>::encode_by_ref(&self.as_str().to_string(), buf)
    }
}

impl<'r> Decode<'r, Sqlite> for JobType {
    fn decode(value: sqlx::sqlite::SqliteValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let raw = <String as Decode<Sqlite>>::decode(value)?;
        Ok(raw.parse()?)
    }
}

/// A durable job template (§3 "Job").
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Job {
    pub job_id: String,
    pub name: String,
    pub command: String,
    pub job_type: JobType,
    pub priority: i64,
    pub cron_expression: Option<String>,
    pub timeout_seconds: i64,
    pub retry_count: i64,
    pub retry_interval_seconds: i64,
    pub create_time: String,
    pub update_time: String,
}

fn default_timeout_seconds() -> i64 {
    60
}

/// Request to create a new job. `job_id` is caller-supplied (an [`ds_core::Id`]
/// formatted as text) so the broker envelope and store agree on identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateJobRequest {
    pub job_id: String,
    pub name: String,
    pub command: String,
    pub job_type: JobType,
    #[serde(default)]
    pub priority: i64,
    pub cron_expression: Option<String>,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: i64,
    #[serde(default)]
    pub retry_count: i64,
    #[serde(default)]
    pub retry_interval_seconds: i64,
}

/// Request to update a job. Rewrites every mutable field (§4.2: "rewrites
/// all mutable fields; missing rows fail").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateJobRequest {
    pub name: String,
    pub command: String,
    pub job_type: JobType,
    pub priority: i64,
    pub cron_expression: Option<String>,
    pub timeout_seconds: i64,
    pub retry_count: i64,
    pub retry_interval_seconds: i64,
}

pub struct JobRepository<'a> {
    pool: &'a SqlitePool,
    metrics: &'a PoolMetrics,
}

impl<'a> JobRepository<'a> {
    pub fn new(pool: &'a SqlitePool, metrics: &'a PoolMetrics) -> Self {
        Self { pool, metrics }
    }

    /// Insert-only: fails if `job_id` already exists.
    #[instrument(skip(self, request), fields(job_id = %request.job_id))]
    pub async fn save(&self, request: CreateJobRequest) -> Result<Job> {
        if request.job_type == JobType::Periodic && request.cron_expression.is_none() {
            return Err(Error::InvalidInput(
                "cron_expression is required for PERIODIC jobs".to_string(),
            ));
        }
        let now = now_iso8601();
        let job_type = request.job_type;
        let row = sqlx::query_as::<_, Job>(
            r#"
            INSERT INTO job_info (
                job_id, name, command, job_type, priority, cron_expression,
                timeout_seconds, retry_count, retry_interval_seconds,
                create_time, update_time
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?10)
            RETURNING *
            "#,
        )
        .bind(&request.job_id)
        .bind(&request.name)
        .bind(&request.command)
        .bind(job_type)
        .bind(request.priority)
        .bind(&request.cron_expression)
        .bind(request.timeout_seconds)
        .bind(request.retry_count)
        .bind(request.retry_interval_seconds)
        .bind(&now)
        .fetch_one(self.pool)
        .await;
        self.metrics
            .trace(row)
            .map_err(|e| Error::Database(format!("failed to save job {}: {e}", request.job_id)))
    }

    #[instrument(skip(self))]
    pub async fn get(&self, job_id: &str) -> Result<Option<Job>> {
        let row = sqlx::query_as::<_, Job>("SELECT * FROM job_info WHERE job_id = ?1")
            .bind(job_id)
            .fetch_optional(self.pool)
            .await;
        self.metrics
            .trace(row)
            .map_err(|e| Error::Database(format!("failed to fetch job {job_id}: {e}")))
    }

    /// Rewrites all mutable fields; fails if the row is missing.
    #[instrument(skip(self, request))]
    pub async fn update(&self, job_id: &str, request: UpdateJobRequest) -> Result<Job> {
        if request.job_type == JobType::Periodic && request.cron_expression.is_none() {
            return Err(Error::InvalidInput(
                "cron_expression is required for PERIODIC jobs".to_string(),
            ));
        }
        let now = now_iso8601();
        let job_type = request.job_type;
        let updated = sqlx::query_as::<_, Job>(
            r#"
            UPDATE job_info SET
                name = ?2, command = ?3, job_type = ?4, priority = ?5,
                cron_expression = ?6, timeout_seconds = ?7, retry_count = ?8,
                retry_interval_seconds = ?9, update_time = ?10
            WHERE job_id = ?1
            RETURNING *
            "#,
        )
        .bind(job_id)
        .bind(&request.name)
        .bind(&request.command)
        .bind(job_type)
        .bind(request.priority)
        .bind(&request.cron_expression)
        .bind(request.timeout_seconds)
        .bind(request.retry_count)
        .bind(request.retry_interval_seconds)
        .bind(&now)
        .fetch_optional(self.pool)
        .await;
        let updated = self
            .metrics
            .trace(updated)
            .map_err(|e| Error::Database(format!("failed to update job {job_id}: {e}")))?;

        updated.ok_or_else(|| Error::NotFound(format!("job {job_id} not found")))
    }

    /// Deletes a job. Executions are not removed — they stay behind as an
    /// archive, per §3 ("deletion cascades logically to executions").
    #[instrument(skip(self))]
    pub async fn delete(&self, job_id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM job_info WHERE job_id = ?1")
            .bind(job_id)
            .execute(self.pool)
            .await;
        let result = self
            .metrics
            .trace(result)
            .map_err(|e| Error::Database(format!("failed to delete job {job_id}: {e}")))?;
        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self))]
    pub async fn list_all(&self) -> Result<Vec<Job>> {
        let rows = sqlx::query_as::<_, Job>("SELECT * FROM job_info ORDER BY priority DESC, create_time ASC")
            .fetch_all(self.pool)
            .await;
        self.metrics
            .trace(rows)
            .map_err(|e| Error::Database(format!("failed to list jobs: {e}")))
    }

    #[instrument(skip(self))]
    pub async fn list_by_type(&self, job_type: JobType) -> Result<Vec<Job>> {
        let rows = sqlx::query_as::<_, Job>(
            "SELECT * FROM job_info WHERE job_type = ?1 ORDER BY priority DESC, create_time ASC",
        )
        .bind(job_type)
        .fetch_all(self.pool)
        .await;
        self.metrics
            .trace(rows)
            .map_err(|e| Error::Database(format!("failed to list jobs by type: {e}")))
    }

    /// Jobs with no `RUNNING` execution row, ordered `(priority DESC,
    /// create_time ASC)`. This is the gate that prevents double-dispatch of
    /// an in-flight one-shot (§4.2, invariant 2 in §8).
    #[instrument(skip(self))]
    pub async fn get_pending(&self, limit: i64) -> Result<Vec<Job>> {
        let rows = sqlx::query_as::<_, Job>(
            r#"
            SELECT j.* FROM job_info j
            WHERE NOT EXISTS (
                SELECT 1 FROM job_execution e
                WHERE e.job_id = j.job_id AND e.status = 'RUNNING'
            )
            ORDER BY j.priority DESC, j.create_time ASC
            LIMIT ?1
            "#,
        )
        .bind(limit)
        .fetch_all(self.pool)
        .await;
        self.metrics.trace(rows).map_err(|e| {
            warn!(error = %e, "get_pending_jobs query failed");
            Error::Database(format!("failed to fetch pending jobs: {e}"))
        })
    }
}
