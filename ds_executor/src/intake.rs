//! ABOUTME: Executor intake — job-submit/job-cancel consumer, runner queue, cancellation set

use async_trait::async_trait;
use ds_broker::{
    BrokerProducer, Envelope, EnvelopeHandler, EnvelopeType, JobResultPayload, JobSubmitPayload,
    TOPIC_JOB_RESULT,
};
use ds_core::time::now_iso8601;
use std::collections::{HashSet, VecDeque};
use std::sync::Mutex;
use tokio::sync::Notify;
use tracing::{info, instrument, warn};

/// Jobs the runner should refuse to start (or abort if already running).
/// Consulted before starting a job and while streaming its output.
#[derive(Default)]
pub struct CancelSet {
    inner: Mutex<HashSet<String>>,
}

impl CancelSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, job_id: &str) {
        self.inner.lock().expect("cancel set lock poisoned").insert(job_id.to_string());
    }

    pub fn contains(&self, job_id: &str) -> bool {
        self.inner.lock().expect("cancel set lock poisoned").contains(job_id)
    }

    pub fn remove(&self, job_id: &str) {
        self.inner.lock().expect("cancel set lock poisoned").remove(job_id);
    }
}

/// FIFO staging buffer between the broker consumer and the runner loop.
#[derive(Default)]
pub struct RunnerQueue {
    inner: Mutex<VecDeque<JobSubmitPayload>>,
    notify: Notify,
}

impl RunnerQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, job: JobSubmitPayload) {
        self.inner.lock().expect("runner queue lock poisoned").push_back(job);
        self.notify.notify_one();
    }

    pub fn pop(&self) -> Option<JobSubmitPayload> {
        self.inner.lock().expect("runner queue lock poisoned").pop_front()
    }

    /// Removes a still-queued job by id, returning it if found (§4.9:
    /// cancel of a job that hasn't started yet).
    pub fn remove(&self, job_id: &str) -> Option<JobSubmitPayload> {
        let mut queue = self.inner.lock().expect("runner queue lock poisoned");
        let idx = queue.iter().position(|j| j.job_id == job_id)?;
        queue.remove(idx)
    }

    /// Waits until a job is pushed or `notify_one` otherwise fires.
    pub async fn notified(&self) {
        self.notify.notified().await;
    }
}

/// Consumes `job-submit` and `job-cancel` for this executor's subscription
/// group, feeding the runner queue and cancellation set.
pub struct Intake {
    pub queue: std::sync::Arc<RunnerQueue>,
    pub cancel_set: std::sync::Arc<CancelSet>,
    producer: std::sync::Arc<BrokerProducer>,
}

impl Intake {
    pub fn new(
        queue: std::sync::Arc<RunnerQueue>,
        cancel_set: std::sync::Arc<CancelSet>,
        producer: std::sync::Arc<BrokerProducer>,
    ) -> Self {
        Self {
            queue,
            cancel_set,
            producer,
        }
    }

    #[instrument(skip(self, job_id))]
    async fn publish_cancelled_before_start(&self, job_id: &str) {
        let now = now_iso8601();
        let payload = JobResultPayload {
            job_id: job_id.to_string(),
            status: "FAILED".to_string(),
            output: None,
            error: Some("task cancelled".to_string()),
            start_time: now.clone(),
            end_time: now,
        };
        let Ok(payload_json) = serde_json::to_string(&payload) else {
            warn!(job_id, "failed to encode cancelled-job result");
            return;
        };
        let envelope = Envelope::new(EnvelopeType::JobResult, payload_json);
        self.producer.produce(TOPIC_JOB_RESULT, job_id, &envelope).await;
    }
}

#[async_trait]
impl EnvelopeHandler for Intake {
    async fn handle(&self, envelope: Envelope) {
        match envelope.envelope_type {
            EnvelopeType::JobSubmit => match serde_json::from_str::<JobSubmitPayload>(&envelope.payload)
            {
                Ok(job) => {
                    info!(job_id = %job.job_id, "received job submission");
                    self.queue.push(job);
                }
                Err(e) => warn!(error = %e, "malformed job-submit payload"),
            },
            EnvelopeType::JobCancel => {
                let job_id = envelope.payload;
                info!(job_id = %job_id, "received cancellation request");
                self.cancel_set.insert(&job_id);
                if self.queue.remove(&job_id).is_some() {
                    self.publish_cancelled_before_start(&job_id).await;
                }
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(id: &str) -> JobSubmitPayload {
        JobSubmitPayload {
            execution_id: 1,
            job_id: id.to_string(),
            command: "echo hi".to_string(),
            timeout_seconds: 5,
        }
    }

    #[test]
    fn queue_removes_by_id() {
        let queue = RunnerQueue::new();
        queue.push(job("a"));
        queue.push(job("b"));
        assert!(queue.remove("a").is_some());
        assert!(queue.remove("a").is_none());
        let remaining = queue.pop().unwrap();
        assert_eq!(remaining.job_id, "b");
    }

    #[test]
    fn cancel_set_tracks_membership() {
        let set = CancelSet::new();
        assert!(!set.contains("x"));
        set.insert("x");
        assert!(set.contains("x"));
        set.remove("x");
        assert!(!set.contains("x"));
    }
}
