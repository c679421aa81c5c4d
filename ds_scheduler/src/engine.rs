//! ABOUTME: Leader-only tick loop — pull, gate, dispatch; plus the job-result reconciler

use crate::placement::Placement;
use crate::queue::DispatchQueue;
use crate::stats::StatsAccumulator;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ds_broker::{
    BrokerProducer, Envelope, EnvelopeType, EnvelopeHandler, JobResultPayload, JobSubmitPayload,
    TOPIC_JOB_SUBMIT,
};
use ds_coord::{LeaderState, MembershipRegistry};
use ds_core::time::parse_rfc3339;
use ds_cron::CronExpr;
use ds_db::{Db, Execution, ExecutionStatus, Job, JobType};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error, info, instrument, warn};

/// Default number of pending jobs pulled from the store per tick.
pub const DEFAULT_BATCH_SIZE: i64 = 10;

/// Leader-only scheduling engine: ticks every `check_interval` seconds,
/// gates each pulled job through `should_execute`, and dispatches the
/// survivors. Constructed once per process; `run` owns the tick loop for
/// as long as this node holds `/scheduler/leader`.
pub struct SchedulingEngine {
    db: Db,
    producer: Arc<BrokerProducer>,
    placement: Arc<Placement>,
    queue: DispatchQueue,
    stats: Arc<StatsAccumulator>,
    registry: Option<Arc<MembershipRegistry>>,
    check_interval_seconds: u64,
    batch_size: i64,
    live_window_seconds: i64,
}

impl SchedulingEngine {
    pub fn new(
        db: Db,
        producer: Arc<BrokerProducer>,
        placement: Arc<Placement>,
        stats: Arc<StatsAccumulator>,
        registry: Option<Arc<MembershipRegistry>>,
        check_interval_seconds: u64,
        live_window_seconds: i64,
    ) -> Self {
        Self {
            db,
            producer,
            placement,
            queue: DispatchQueue::new(),
            stats,
            registry,
            check_interval_seconds,
            batch_size: DEFAULT_BATCH_SIZE,
            live_window_seconds,
        }
    }

    /// Shared store handle — reused by `ds_web` so the admin API reads
    /// through the same pool the tick loop dispatches against.
    pub fn db(&self) -> &Db {
        &self.db
    }

    pub fn stats(&self) -> &Arc<StatsAccumulator> {
        &self.stats
    }

    pub fn producer(&self) -> &Arc<BrokerProducer> {
        &self.producer
    }

    pub fn placement(&self) -> &Arc<Placement> {
        &self.placement
    }

    pub fn registry(&self) -> Option<&Arc<MembershipRegistry>> {
        self.registry.as_ref()
    }

    /// Runs the tick loop forever, only actually ticking while
    /// `leader_rx` reports [`LeaderState::Leader`] (§4.7: "on losing
    /// leadership, the engine stops dispatching").
    #[instrument(skip(self, leader_rx))]
    pub async fn run(&self, mut leader_rx: watch::Receiver<LeaderState>) {
        let mut ticker = tokio::time::interval(std::time::Duration::from_secs(
            self.check_interval_seconds.max(1),
        ));
        loop {
            ticker.tick().await;
            if *leader_rx.borrow() != LeaderState::Leader {
                continue;
            }
            if let Err(e) = self.tick_once().await {
                error!(error = %e, "scheduling tick failed");
            }
        }
    }

    #[instrument(skip(self))]
    async fn tick_once(&self) -> ds_core::Result<()> {
        self.stats.record_cycle();

        let pending = self.db.jobs().get_pending(self.batch_size).await?;
        for job in pending {
            self.queue.push(job);
        }

        let now = Utc::now();
        while let Some(job) = self.queue.pop() {
            if self.should_execute(&job, now).await? {
                self.dispatch(&job).await?;
            } else {
                debug!(job_id = %job.job_id, "job deferred, not dispatching this tick");
            }
        }

        Ok(())
    }

    /// §4.6 `shouldExecute`: gates a pulled job before dispatch is
    /// attempted. Does not itself consult placement — `dispatch` handles
    /// the "no executor available" case as a deferral.
    async fn should_execute(&self, job: &Job, now: DateTime<Utc>) -> ds_core::Result<bool> {
        match job.job_type {
            JobType::Once => Ok(true),
            JobType::Periodic => {
                let Some(expr) = job.cron_expression.as_deref() else {
                    warn!(job_id = %job.job_id, "periodic job missing cron_expression");
                    return Ok(false);
                };
                let cron = CronExpr::parse(expr)?;
                if !cron.matches(now) {
                    return Ok(false);
                }
                let latest = self.db.executions().latest_for_job(&job.job_id).await?;
                Ok(Self::previous_run_is_complete(latest.as_ref(), now))
            }
        }
    }

    /// No previous execution means this is the job's first firing. A
    /// previous execution gates on two things: it must have reached a
    /// terminal status, and it must not have already fired within the
    /// same civil minute `now` falls in (guards against re-dispatch when
    /// `check_interval` is shorter than a minute).
    fn previous_run_is_complete(latest: Option<&Execution>, now: DateTime<Utc>) -> bool {
        let Some(execution) = latest else {
            return true;
        };
        if !execution.status.is_terminal() {
            return false;
        }
        match parse_rfc3339(&execution.trigger_time) {
            Ok(trigger) => {
                let trigger: DateTime<Utc> = trigger.into();
                !Self::same_civil_minute(trigger, now)
            }
            Err(_) => true,
        }
    }

    fn same_civil_minute(a: DateTime<Utc>, b: DateTime<Utc>) -> bool {
        use chrono::{Datelike, Timelike};
        a.year() == b.year()
            && a.ordinal() == b.ordinal()
            && a.hour() == b.hour()
            && a.minute() == b.minute()
    }

    /// §4.6 `dispatch`: placement, execution row, load increment, publish.
    /// Any failure here is logged and swallowed per "every step above is
    /// best-effort" — the job remains pending and is retried next tick.
    /// Also the entry point for `/api/jobs/{id}/execute`: a forced
    /// one-shot dispatch bypasses `should_execute`'s cron/dedup gate
    /// entirely, since the operator is asking for an out-of-band run now.
    #[instrument(skip(self, job), fields(job_id = %job.job_id))]
    pub async fn dispatch(&self, job: &Job) -> ds_core::Result<Option<i64>> {
        let live = self.db.executors().list_live(self.live_window_seconds).await?;
        let Some((executor_id, _address)) = self.placement.pick(&live) else {
            debug!(job_id = %job.job_id, "no live executor available, deferring dispatch");
            return Ok(None);
        };

        let execution = self
            .db
            .executions()
            .save(&job.job_id, Some(&executor_id))
            .await?;

        self.db.executors().increment_load(&executor_id).await?;
        if let Some(registry) = &self.registry {
            if let Some(node) = self.db.executors().get(&executor_id).await? {
                if let Err(e) = registry.update_load(&executor_id, node.current_load).await {
                    warn!(executor_id, error = %e, "failed to mirror load into coordination registry");
                }
            }
        }

        let payload = JobSubmitPayload {
            execution_id: execution.execution_id,
            job_id: job.job_id.clone(),
            command: job.command.clone(),
            timeout_seconds: job.timeout_seconds,
        };
        let payload_json = serde_json::to_string(&payload)
            .map_err(|e| ds_core::Error::InvalidInput(format!("failed to encode job payload: {e}")))?;
        let envelope = Envelope::new(EnvelopeType::JobSubmit, payload_json);
        let delivered = self
            .producer
            .produce(TOPIC_JOB_SUBMIT, &job.job_id, &envelope)
            .await;

        self.stats.record_dispatch();
        info!(
            job_id = %job.job_id,
            executor_id,
            execution_id = execution.execution_id,
            delivered,
            "dispatched job"
        );
        Ok(Some(execution.execution_id))
    }
}

/// Consumes `job-result` and folds each terminal outcome back into the
/// store, the executor load counters, and the statistics accumulator.
pub struct ResultReconciler {
    db: Db,
    stats: Arc<StatsAccumulator>,
    registry: Option<Arc<MembershipRegistry>>,
}

impl ResultReconciler {
    pub fn new(db: Db, stats: Arc<StatsAccumulator>, registry: Option<Arc<MembershipRegistry>>) -> Self {
        Self { db, stats, registry }
    }

    #[instrument(skip(self, payload))]
    async fn reconcile(&self, payload: JobResultPayload) {
        let latest = match self.db.executions().latest_for_job(&payload.job_id).await {
            Ok(latest) => latest,
            Err(e) => {
                error!(job_id = %payload.job_id, error = %e, "failed to fetch latest execution");
                return;
            }
        };

        let Some(execution) = latest else {
            warn!(job_id = %payload.job_id, "orphan result: no execution row for job");
            return;
        };

        let status: ExecutionStatus = match payload.status.parse() {
            Ok(status) => status,
            Err(e) => {
                warn!(job_id = %payload.job_id, status = %payload.status, error = %e, "unrecognized result status");
                return;
            }
        };

        if let Err(e) = self
            .db
            .executions()
            .update_result(
                execution.execution_id,
                status,
                payload.output.as_deref(),
                payload.error.as_deref(),
            )
            .await
        {
            error!(execution_id = execution.execution_id, error = %e, "failed to update execution result");
            return;
        }

        if let Some(executor_id) = &execution.executor_id {
            if let Err(e) = self.db.executors().decrement_load(executor_id).await {
                warn!(executor_id, error = %e, "failed to decrement executor load");
            }
            if let Err(e) = self.db.executors().increment_task_count(executor_id).await {
                warn!(executor_id, error = %e, "failed to increment executor task count");
            }
            if let Some(registry) = &self.registry {
                if let Ok(Some(node)) = self.db.executors().get(executor_id).await {
                    if let Err(e) = registry.update_load(executor_id, node.current_load).await {
                        warn!(executor_id, error = %e, "failed to mirror load after reconcile");
                    }
                }
            }
        }

        let duration_ms = match (parse_rfc3339(&payload.start_time), parse_rfc3339(&payload.end_time)) {
            (Ok(start), Ok(end)) => end.duration_since(start).ok().map(|d| d.as_millis() as u64),
            _ => None,
        };
        let was_cancelled = payload
            .error
            .as_deref()
            .is_some_and(|e| e.contains("cancelled"));
        self.stats.record_terminal(status, duration_ms, was_cancelled);
    }
}

#[async_trait]
impl EnvelopeHandler for ResultReconciler {
    async fn handle(&self, envelope: Envelope) {
        if envelope.envelope_type != EnvelopeType::JobResult {
            return;
        }
        match serde_json::from_str::<JobResultPayload>(&envelope.payload) {
            Ok(payload) => self.reconcile(payload).await,
            Err(e) => warn!(error = %e, "malformed job-result payload"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ds_db::CreateJobRequest;

    async fn test_db() -> Db {
        let path = std::env::temp_dir().join(format!("ds_scheduler-engine-test-{}.db", ulid::Ulid::new()));
        Db::new(path.to_str().unwrap()).await.unwrap()
    }

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

    #[test]
    fn no_previous_execution_allows_first_fire() {
        assert!(SchedulingEngine::previous_run_is_complete(None, Utc::now()));
    }

    #[test]
    fn non_terminal_previous_execution_blocks_refire() {
        let execution = Execution {
            execution_id: 1,
            job_id: "job-1".to_string(),
            executor_id: None,
            status: ExecutionStatus::Running,
            trigger_time: ds_core::time::now_iso8601(),
            start_time: None,
            end_time: None,
            output: None,
            error: None,
        };
        assert!(!SchedulingEngine::previous_run_is_complete(
            Some(&execution),
            Utc::now()
        ));
    }

    #[test]
    fn terminal_execution_in_same_minute_blocks_refire() {
        let now = Utc::now();
        let execution = Execution {
            execution_id: 1,
            job_id: "job-1".to_string(),
            executor_id: None,
            status: ExecutionStatus::Success,
            trigger_time: now.to_rfc3339(),
            start_time: Some(now.to_rfc3339()),
            end_time: Some(now.to_rfc3339()),
            output: Some("hello".to_string()),
            error: None,
        };
        assert!(!SchedulingEngine::previous_run_is_complete(
            Some(&execution),
            now
        ));
    }

    #[test]
    fn terminal_execution_from_a_prior_minute_allows_refire() {
        let trigger = Utc::now() - chrono::Duration::minutes(2);
        let execution = Execution {
            execution_id: 1,
            job_id: "job-1".to_string(),
            executor_id: None,
            status: ExecutionStatus::Failed,
            trigger_time: trigger.to_rfc3339(),
            start_time: Some(trigger.to_rfc3339()),
            end_time: Some(trigger.to_rfc3339()),
            output: None,
            error: Some("boom".to_string()),
        };
        assert!(SchedulingEngine::previous_run_is_complete(
            Some(&execution),
            Utc::now()
        ));
    }

    #[tokio::test]
    async fn reconciler_fills_in_result_and_drops_orphans() {
        let db = test_db().await;
        let stats = Arc::new(StatsAccumulator::new());
        let reconciler = ResultReconciler::new(db.clone(), stats.clone(), None);

        // Orphan: no execution row exists yet for this job.
        reconciler
            .reconcile(JobResultPayload {
                job_id: "ghost-job".to_string(),
                status: "SUCCESS".to_string(),
                output: Some("hi".to_string()),
                error: None,
                start_time: ds_core::time::now_iso8601(),
                end_time: ds_core::time::now_iso8601(),
            })
            .await;

        db.jobs().save(once_request("job-1")).await.unwrap();
        let executor = db.executors().register("exec-1", "127.0.0.1", 9000, 5).await.unwrap();
        let execution = db.executions().save("job-1", Some(&executor.executor_id)).await.unwrap();
        db.executors().increment_load(&executor.executor_id).await.unwrap();

        reconciler
            .reconcile(JobResultPayload {
                job_id: "job-1".to_string(),
                status: "SUCCESS".to_string(),
                output: Some("hello".to_string()),
                error: None,
                start_time: ds_core::time::now_iso8601(),
                end_time: ds_core::time::now_iso8601(),
            })
            .await;

        let stored = db.executions().get(execution.execution_id).await.unwrap().unwrap();
        assert_eq!(stored.status, ExecutionStatus::Success);
        assert_eq!(stored.output.as_deref(), Some("hello"));

        let node = db.executors().get(&executor.executor_id).await.unwrap().unwrap();
        assert_eq!(node.current_load, 0, "load decremented on reconcile");
        assert_eq!(node.total_tasks_executed, 1);
    }

    #[tokio::test]
    async fn reconciler_counts_cancelled_result_as_cancelled_not_failed() {
        let db = test_db().await;
        let stats = Arc::new(StatsAccumulator::new());
        let reconciler = ResultReconciler::new(db.clone(), stats.clone(), None);

        db.jobs().save(once_request("job-1")).await.unwrap();
        db.executions().save("job-1", None).await.unwrap();

        reconciler
            .reconcile(JobResultPayload {
                job_id: "job-1".to_string(),
                status: "FAILED".to_string(),
                output: None,
                error: Some("task cancelled".to_string()),
                start_time: ds_core::time::now_iso8601(),
                end_time: ds_core::time::now_iso8601(),
            })
            .await;

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.cancelled_jobs, 1);
        assert_eq!(snapshot.failed_jobs, 0);
    }
}
