//! ABOUTME: Request bodies for the admin API that aren't already store-layer types

use ds_db::JobType;
use serde::Deserialize;

/// `POST /api/jobs` body. `job_id` is caller-optional; the handler mints a
/// ULID when absent so callers don't have to coordinate id generation.
#[derive(Debug, Deserialize)]
pub struct SubmitJobRequest {
    pub job_id: Option<String>,
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

fn default_timeout_seconds() -> i64 {
    60
}

/// `PUT /api/executors/{id}/load` body.
#[derive(Debug, Deserialize)]
pub struct SetLoadRequest {
    pub max_load: i64,
}

/// `PUT /api/executors/{id}/status` body.
#[derive(Debug, Deserialize)]
pub struct SetStatusRequest {
    pub online: bool,
}
