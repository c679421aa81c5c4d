//! ABOUTME: Lost-execution reaper — sweeps `RUNNING` rows orphaned by a dead executor
//! ABOUTME: Threshold is `max(job.timeout_seconds, LIVE_WINDOW) + 30s`, recorded as TIMEOUT

use ds_db::{Db, ExecutionStatus, ExecutorNode};
use tracing::{info, instrument, warn};

/// Extra grace past the live-executor window, covering broker and store
/// propagation delay before a result would normally land.
const BROKER_GRACE_SECONDS: i64 = 30;

/// Periodically reclaims executions that have been `RUNNING` far longer
/// than any legitimate job or executor liveness window allows — almost
/// always because the executor that owned them died without reporting a
/// result. Marked `TIMEOUT` rather than `FAILED` (§9 open question), the
/// same status the executor's own in-process timeout path uses.
pub struct LostExecutionReaper {
    db: Db,
    sweep_interval_seconds: u64,
}

impl LostExecutionReaper {
    pub fn new(db: Db, sweep_interval_seconds: u64) -> Self {
        Self {
            db,
            sweep_interval_seconds,
        }
    }

    pub async fn run(self) {
        let mut ticker =
            tokio::time::interval(std::time::Duration::from_secs(self.sweep_interval_seconds.max(1)));
        loop {
            ticker.tick().await;
            if let Err(e) = self.sweep_once().await {
                warn!(error = %e, "lost-execution sweep failed");
            }
        }
    }

    #[instrument(skip(self))]
    async fn sweep_once(&self) -> ds_core::Result<()> {
        let live_window = ds_db::repositories::executors::LIVE_WINDOW_SECONDS;
        let stale = self
            .db
            .executions()
            .list_stale_running(live_window + BROKER_GRACE_SECONDS)
            .await?;

        for execution in stale {
            let Some(job) = self.db.jobs().get(&execution.job_id).await? else {
                warn!(job_id = %execution.job_id, "stale execution references a deleted job, reclaiming anyway");
                self.reclaim(execution.execution_id).await?;
                continue;
            };
            let threshold = job.timeout_seconds.max(live_window) + BROKER_GRACE_SECONDS;
            if Self::is_older_than(&execution, threshold) {
                self.reclaim(execution.execution_id).await?;
                if let Some(executor_id) = &execution.executor_id {
                    self.unstick_executor_if_dead(executor_id).await?;
                }
            }
        }
        Ok(())
    }

    fn is_older_than(execution: &ds_db::Execution, threshold_seconds: i64) -> bool {
        let Some(start_time) = execution.start_time.as_deref() else {
            return false;
        };
        let Ok(start) = ds_core::time::parse_rfc3339(start_time) else {
            return false;
        };
        let age = std::time::SystemTime::now()
            .duration_since(start)
            .unwrap_or_default();
        age.as_secs() >= threshold_seconds.max(0) as u64
    }

    async fn reclaim(&self, execution_id: i64) -> ds_core::Result<()> {
        info!(execution_id, "reclaiming lost execution as TIMEOUT");
        self.db
            .executions()
            .update_result(
                execution_id,
                ExecutionStatus::Timeout,
                None,
                Some("execution abandoned: owning executor stopped reporting"),
            )
            .await
    }

    /// If the executor that owned a reclaimed execution is no longer
    /// live, its load counter may be stuck; decrementing here lets it
    /// recover without waiting for a result that will never arrive.
    async fn unstick_executor_if_dead(&self, executor_id: &str) -> ds_core::Result<()> {
        let executors = self.db.executors();
        let Some(node) = executors.get(executor_id).await? else {
            return Ok(());
        };
        let live_window = ds_db::repositories::executors::LIVE_WINDOW_SECONDS;
        if !Self::node_is_live(&node, live_window) {
            executors.decrement_load(executor_id).await?;
        }
        Ok(())
    }

    fn node_is_live(node: &ExecutorNode, live_window_seconds: i64) -> bool {
        node.is_live(live_window_seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ds_db::CreateJobRequest;

    async fn test_db() -> Db {
        let path = std::env::temp_dir().join(format!("ds_scheduler-reaper-test-{}.db", ulid::Ulid::new()));
        Db::new(path.to_str().unwrap()).await.unwrap()
    }

    fn once_request(job_id: &str) -> CreateJobRequest {
        CreateJobRequest {
            job_id: job_id.to_string(),
            name: "long job".to_string(),
            command: "sleep 600".to_string(),
            job_type: ds_db::JobType::Once,
            priority: 0,
            cron_expression: None,
            timeout_seconds: 5,
            retry_count: 0,
            retry_interval_seconds: 0,
        }
    }

    #[tokio::test]
    async fn sweep_reclaims_an_execution_abandoned_by_a_dead_executor() {
        let db = test_db().await;
        db.jobs().save(once_request("job-1")).await.unwrap();
        let executor = db.executors().register("exec-1", "127.0.0.1", 9000, 5).await.unwrap();
        let execution = db.executions().save("job-1", Some(&executor.executor_id)).await.unwrap();
        db.executions().mark_running(execution.execution_id).await.unwrap();
        db.executors().increment_load(&executor.executor_id).await.unwrap();

        // Simulate a start_time long enough ago to clear the reclaim threshold
        // (job timeout 5s, LIVE_WINDOW 300s, BROKER_GRACE 30s) without waiting.
        sqlx::query("UPDATE job_execution SET start_time = ?1 WHERE execution_id = ?2")
            .bind((chrono::Utc::now() - chrono::Duration::seconds(1000)).to_rfc3339())
            .bind(execution.execution_id)
            .execute(db.pool())
            .await
            .unwrap();
        sqlx::query("UPDATE executor_node SET status = 'OFFLINE' WHERE executor_id = ?1")
            .bind(&executor.executor_id)
            .execute(db.pool())
            .await
            .unwrap();

        let reaper = LostExecutionReaper::new(db.clone(), 60);
        reaper.sweep_once().await.unwrap();

        let reclaimed = db.executions().get(execution.execution_id).await.unwrap().unwrap();
        assert_eq!(reclaimed.status, ExecutionStatus::Timeout);
        assert!(reclaimed.error.unwrap().contains("abandoned"));
    }

    #[tokio::test]
    async fn sweep_leaves_recently_started_executions_alone() {
        let db = test_db().await;
        db.jobs().save(once_request("job-2")).await.unwrap();
        let executor = db.executors().register("exec-2", "127.0.0.1", 9001, 5).await.unwrap();
        let execution = db.executions().save("job-2", Some(&executor.executor_id)).await.unwrap();
        db.executions().mark_running(execution.execution_id).await.unwrap();
        sqlx::query("UPDATE job_execution SET start_time = ?1 WHERE execution_id = ?2")
            .bind(ds_core::time::now_iso8601())
            .bind(execution.execution_id)
            .execute(db.pool())
            .await
            .unwrap();

        let reaper = LostExecutionReaper::new(db.clone(), 60);
        reaper.sweep_once().await.unwrap();

        let still_running = db.executions().get(execution.execution_id).await.unwrap().unwrap();
        assert_eq!(still_running.status, ExecutionStatus::Running);
    }
}
