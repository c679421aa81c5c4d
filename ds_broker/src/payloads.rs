//! ABOUTME: JSON shapes embedded in `Envelope::payload` for JOB_SUBMIT and JOB_RESULT

use serde::{Deserialize, Serialize};

/// Embedded in a `JOB_SUBMIT` envelope's payload. Carries everything the
/// executor needs to run the job without a second store round-trip.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSubmitPayload {
    pub execution_id: i64,
    pub job_id: String,
    pub command: String,
    pub timeout_seconds: i64,
}

/// Embedded in a `JOB_RESULT` envelope's payload. The scheduler resolves
/// `job_id` to the latest execution row itself rather than trusting an
/// echoed execution id (§4.6 "result reconciler").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobResultPayload {
    pub job_id: String,
    pub status: String,
    pub output: Option<String>,
    pub error: Option<String>,
    pub start_time: String,
    pub end_time: String,
}
