//! ABOUTME: Integration tests for the admin HTTP API layer
//! ABOUTME: Exercises routing end-to-end via `actix_web::test::init_service`

use crate::AppState;
use actix_web::{test, web, App};
use ds_broker::BrokerProducer;
use ds_config::SelectionStrategy;
use ds_db::{Db, JobType};
use ds_scheduler::{Placement, SchedulingEngine, StatsAccumulator};
use serde_json::json;
use std::sync::Arc;

async fn test_state() -> Arc<AppState> {
    let db_path = std::env::temp_dir().join(format!("ds_web-test-{}.db", ulid::Ulid::new()));
    let db = Db::new(db_path.to_str().unwrap()).await.unwrap();
    let producer = Arc::new(BrokerProducer::new("127.0.0.1:0").unwrap());
    let placement = Arc::new(Placement::new(SelectionStrategy::Random));
    let stats = Arc::new(StatsAccumulator::new());
    let engine = Arc::new(SchedulingEngine::new(db, producer, placement, stats, None, 5, 300));
    Arc::new(AppState::new(engine))
}

#[actix_web::test]
async fn submit_then_get_job_round_trips() {
    let state = test_state().await;
    let app = test::init_service(
        App::new()
            .app_data(web::Data::from(state.clone()))
            .configure(crate::configure),
    )
    .await;

    let req = test::TestRequest::post()
        .uri("/api/jobs")
        .set_json(json!({
            "name": "say hello",
            "command": "echo hello",
            "job_type": "ONCE",
        }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert!(resp.status().is_success());
    let job: ds_db::Job = test::read_body_json(resp).await;
    assert_eq!(job.command, "echo hello");
    assert_eq!(job.job_type, JobType::Once);

    let req = test::TestRequest::get()
        .uri(&format!("/api/jobs/{}", job.job_id))
        .to_request();
    let fetched: ds_db::Job = test::call_and_read_body_json(&app, req).await;
    assert_eq!(fetched.job_id, job.job_id);
}

#[actix_web::test]
async fn get_missing_job_is_404_with_error_envelope() {
    let state = test_state().await;
    let app = test::init_service(
        App::new()
            .app_data(web::Data::from(state.clone()))
            .configure(crate::configure),
    )
    .await;

    let req = test::TestRequest::get().uri("/api/jobs/does-not-exist").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 404);
    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(body["status"], 404);
    assert!(body["error"].as_str().unwrap().contains("does-not-exist"));
}

#[actix_web::test]
async fn execute_job_defers_with_503_when_no_executor_is_live() {
    let state = test_state().await;
    state
        .engine
        .db()
        .jobs()
        .save(ds_db::CreateJobRequest {
            job_id: "job-exec".to_string(),
            name: "lonely job".to_string(),
            command: "echo hi".to_string(),
            job_type: JobType::Once,
            priority: 0,
            cron_expression: None,
            timeout_seconds: 5,
            retry_count: 0,
            retry_interval_seconds: 0,
        })
        .await
        .unwrap();

    let app = test::init_service(
        App::new()
            .app_data(web::Data::from(state.clone()))
            .configure(crate::configure),
    )
    .await;

    let req = test::TestRequest::post().uri("/api/jobs/job-exec/execute").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 503);
}

#[actix_web::test]
async fn executor_status_and_load_round_trip() {
    let state = test_state().await;
    state
        .engine
        .db()
        .executors()
        .register("exec-1", "127.0.0.1", 9000, 5)
        .await
        .unwrap();

    let app = test::init_service(
        App::new()
            .app_data(web::Data::from(state.clone()))
            .configure(crate::configure),
    )
    .await;

    let req = test::TestRequest::put()
        .uri("/api/executors/exec-1/load")
        .set_json(json!({ "max_load": 42 }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert!(resp.status().is_success());

    let req = test::TestRequest::put()
        .uri("/api/executors/exec-1/status")
        .set_json(json!({ "online": false }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert!(resp.status().is_success());

    let executor = state.engine.db().executors().get("exec-1").await.unwrap().unwrap();
    assert_eq!(executor.max_load, 42);
    assert_eq!(executor.status, ds_db::ExecutorStatus::Offline);
}

#[actix_web::test]
async fn stats_overview_starts_at_zero_and_metrics_is_plaintext() {
    let state = test_state().await;
    let app = test::init_service(
        App::new()
            .app_data(web::Data::from(state.clone()))
            .configure(crate::configure),
    )
    .await;

    let req = test::TestRequest::get().uri("/api/stats").to_request();
    let snapshot: serde_json::Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(snapshot["scheduler_cycles"], 0);
    assert_eq!(snapshot["jobs_dispatched"], 0);

    let req = test::TestRequest::get().uri("/metrics").to_request();
    let resp = test::call_service(&app, req).await;
    assert!(resp.status().is_success());
    let content_type = resp.headers().get("content-type").unwrap().to_str().unwrap();
    assert!(content_type.starts_with("text/plain"));
}
