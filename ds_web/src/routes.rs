//! ABOUTME: Handler bodies for every route in §6's admin API table

use crate::error::{ApiError, ApiResult};
use crate::models::{SetLoadRequest, SetStatusRequest, SubmitJobRequest};
use crate::AppState;
use actix_web::{web, HttpResponse};
use ds_db::{CreateJobRequest, ExecutorStatus, UpdateJobRequest};
use serde_json::json;

// ---- stats ----------------------------------------------------------

pub async fn stats_overview(state: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok().json(state.engine.stats().snapshot())
}

/// `GET /api/stats/jobs` — job counts by lifecycle type, the slice of the
/// snapshot that doesn't require an executor roster join.
pub async fn stats_jobs(state: web::Data<AppState>) -> ApiResult<HttpResponse> {
    let jobs = state.engine.db().jobs().list_all().await?;
    let (once, periodic) = jobs.iter().fold((0u64, 0u64), |(once, periodic), job| {
        match job.job_type {
            ds_db::JobType::Once => (once + 1, periodic),
            ds_db::JobType::Periodic => (once, periodic + 1),
        }
    });
    Ok(HttpResponse::Ok().json(json!({
        "total_jobs": jobs.len(),
        "once_jobs": once,
        "periodic_jobs": periodic,
    })))
}

/// `GET /api/stats/executors` — fleet size/load summary.
pub async fn stats_executors(state: web::Data<AppState>) -> ApiResult<HttpResponse> {
    let executors = state.engine.db().executors().list_all().await?;
    let online = executors
        .iter()
        .filter(|e| e.status == ExecutorStatus::Online)
        .count();
    let total_load: i64 = executors.iter().map(|e| e.current_load).sum();
    let total_capacity: i64 = executors.iter().map(|e| e.max_load).sum();
    Ok(HttpResponse::Ok().json(json!({
        "total_executors": executors.len(),
        "online_executors": online,
        "total_current_load": total_load,
        "total_capacity": total_capacity,
    })))
}

/// `GET /api/stats/system` — the active placement strategy plus the
/// accumulator's cycle/dispatch counters.
pub async fn stats_system(state: web::Data<AppState>) -> HttpResponse {
    let snapshot = state.engine.stats().snapshot();
    HttpResponse::Ok().json(json!({
        "placement_strategy": format!("{:?}", state.engine.placement().strategy()),
        "scheduler_cycles": snapshot.scheduler_cycles,
        "jobs_dispatched": snapshot.jobs_dispatched,
    }))
}

pub async fn stats_reset(state: web::Data<AppState>) -> HttpResponse {
    state.engine.stats().reset();
    HttpResponse::Ok().json(json!({ "reset": true }))
}

// ---- jobs -------------------------------------------------------------

pub async fn list_jobs(state: web::Data<AppState>) -> ApiResult<HttpResponse> {
    let jobs = state.engine.db().jobs().list_all().await?;
    Ok(HttpResponse::Ok().json(jobs))
}

pub async fn submit_job(
    state: web::Data<AppState>,
    body: web::Json<SubmitJobRequest>,
) -> ApiResult<HttpResponse> {
    let body = body.into_inner();
    let job_id = body.job_id.unwrap_or_else(|| ds_core::Id::new().to_string());
    let request = CreateJobRequest {
        job_id,
        name: body.name,
        command: body.command,
        job_type: body.job_type,
        priority: body.priority,
        cron_expression: body.cron_expression,
        timeout_seconds: body.timeout_seconds,
        retry_count: body.retry_count,
        retry_interval_seconds: body.retry_interval_seconds,
    };
    let job = state.engine.db().jobs().save(request).await?;
    Ok(HttpResponse::Ok().json(job))
}

pub async fn get_job(state: web::Data<AppState>, path: web::Path<String>) -> ApiResult<HttpResponse> {
    let job_id = path.into_inner();
    let job = state
        .engine
        .db()
        .jobs()
        .get(&job_id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("job {job_id} not found")))?;
    Ok(HttpResponse::Ok().json(job))
}

pub async fn update_job(
    state: web::Data<AppState>,
    path: web::Path<String>,
    body: web::Json<UpdateJobRequest>,
) -> ApiResult<HttpResponse> {
    let job_id = path.into_inner();
    let job = state.engine.db().jobs().update(&job_id, body.into_inner()).await?;
    Ok(HttpResponse::Ok().json(job))
}

/// `DELETE /api/jobs/{id}` — "cancel+delete": publish a `JOB_CANCEL`
/// for any in-flight execution before dropping the job template. Execution
/// rows are left behind as an archive.
pub async fn delete_job(state: web::Data<AppState>, path: web::Path<String>) -> ApiResult<HttpResponse> {
    let job_id = path.into_inner();

    let envelope = ds_broker::Envelope::new(ds_broker::EnvelopeType::JobCancel, job_id.clone());
    state
        .engine
        .producer()
        .produce(ds_broker::TOPIC_JOB_CANCEL, &job_id, &envelope)
        .await;

    let deleted = state.engine.db().jobs().delete(&job_id).await?;
    if !deleted {
        return Err(ApiError::not_found(format!("job {job_id} not found")));
    }
    Ok(HttpResponse::Ok().json(json!({ "deleted": true })))
}

/// `POST /api/jobs/{id}/execute` — forces a one-shot dispatch of an
/// existing job template right now, bypassing the cron/dedup gate in
/// `should_execute` (§6, §4.6 dispatch docs).
pub async fn execute_job(state: web::Data<AppState>, path: web::Path<String>) -> ApiResult<HttpResponse> {
    let job_id = path.into_inner();
    let job = state
        .engine
        .db()
        .jobs()
        .get(&job_id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("job {job_id} not found")))?;

    match state.engine.dispatch(&job).await? {
        Some(execution_id) => Ok(HttpResponse::Ok().json(json!({ "execution_id": execution_id }))),
        None => Err(ApiError::new(
            actix_web::http::StatusCode::SERVICE_UNAVAILABLE,
            "no live executor available",
        )),
    }
}

pub async fn job_executions(state: web::Data<AppState>, path: web::Path<String>) -> ApiResult<HttpResponse> {
    let job_id = path.into_inner();
    let executions = state.engine.db().executions().list_for_job(&job_id).await?;
    Ok(HttpResponse::Ok().json(executions))
}

// ---- executors ----------------------------------------------------------

pub async fn list_executors(state: web::Data<AppState>) -> ApiResult<HttpResponse> {
    let executors = state.engine.db().executors().list_all().await?;
    Ok(HttpResponse::Ok().json(executors))
}

pub async fn get_executor(state: web::Data<AppState>, path: web::Path<String>) -> ApiResult<HttpResponse> {
    let executor_id = path.into_inner();
    let executor = state
        .engine
        .db()
        .executors()
        .get(&executor_id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("executor {executor_id} not found")))?;
    Ok(HttpResponse::Ok().json(executor))
}

pub async fn executor_tasks(state: web::Data<AppState>, path: web::Path<String>) -> ApiResult<HttpResponse> {
    let executor_id = path.into_inner();
    let tasks = state
        .engine
        .db()
        .executions()
        .list_active_for_executor(&executor_id)
        .await?;
    Ok(HttpResponse::Ok().json(tasks))
}

pub async fn set_executor_load(
    state: web::Data<AppState>,
    path: web::Path<String>,
    body: web::Json<SetLoadRequest>,
) -> ApiResult<HttpResponse> {
    let executor_id = path.into_inner();
    state
        .engine
        .db()
        .executors()
        .update_max_load(&executor_id, body.max_load)
        .await?;
    Ok(HttpResponse::Ok().json(json!({ "max_load": body.max_load })))
}

pub async fn set_executor_status(
    state: web::Data<AppState>,
    path: web::Path<String>,
    body: web::Json<SetStatusRequest>,
) -> ApiResult<HttpResponse> {
    let executor_id = path.into_inner();
    let status = if body.online {
        ExecutorStatus::Online
    } else {
        ExecutorStatus::Offline
    };
    state.engine.db().executors().update_status(&executor_id, status).await?;

    if let Some(registry) = state.engine.registry() {
        if let Err(e) = registry.update_status(&executor_id, body.online).await {
            tracing::warn!(executor_id, error = %e, "failed to mirror status into coordination registry");
        }
    }

    Ok(HttpResponse::Ok().json(json!({ "online": body.online })))
}

// ---- metrics ----------------------------------------------------------

pub async fn metrics(state: web::Data<AppState>) -> HttpResponse {
    let snapshot = state.engine.stats().snapshot();
    let body = state.metrics.render(&snapshot);
    HttpResponse::Ok()
        .content_type("text/plain; version=0.0.4; charset=utf-8")
        .body(body)
}
