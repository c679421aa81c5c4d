//! ABOUTME: Admin HTTP API — §6's JSON surface over jobs, executors, and stats
//! ABOUTME: Thin handlers over the same `SchedulingEngine` the scheduler tick loop drives

pub mod error;
pub mod metrics;
pub mod models;
pub mod routes;

#[cfg(test)]
mod tests;

use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use ds_scheduler::SchedulingEngine;
use std::sync::Arc;

/// Shared state behind every handler. Wraps the same [`SchedulingEngine`]
/// instance the leader's tick loop owns, so `/api/jobs/{id}/execute`
/// dispatches through the identical placement/store/producer path instead
/// of standing up a second copy of that wiring.
pub struct AppState {
    pub engine: Arc<SchedulingEngine>,
    pub metrics: metrics::Metrics,
}

impl AppState {
    pub fn new(engine: Arc<SchedulingEngine>) -> Self {
        Self {
            engine,
            metrics: metrics::Metrics::new(),
        }
    }
}

/// Mounts every route from §6 onto `cfg`, scoped under `/api`, plus a
/// top-level `/metrics`. Kept as a free function (rather than building the
/// `App` directly) so `ds_app`'s binary owns the `HttpServer` lifecycle.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api")
            .service(
                web::resource("/stats")
                    .route(web::get().to(routes::stats_overview)),
            )
            .service(web::resource("/stats/jobs").route(web::get().to(routes::stats_jobs)))
            .service(
                web::resource("/stats/executors").route(web::get().to(routes::stats_executors)),
            )
            .service(web::resource("/stats/system").route(web::get().to(routes::stats_system)))
            .service(web::resource("/stats/reset").route(web::get().to(routes::stats_reset)))
            .service(
                web::resource("/jobs")
                    .route(web::get().to(routes::list_jobs))
                    .route(web::post().to(routes::submit_job)),
            )
            .service(
                web::resource("/jobs/{id}")
                    .route(web::get().to(routes::get_job))
                    .route(web::put().to(routes::update_job))
                    .route(web::delete().to(routes::delete_job)),
            )
            .service(
                web::resource("/jobs/{id}/execute").route(web::post().to(routes::execute_job)),
            )
            .service(
                web::resource("/jobs/{id}/executions")
                    .route(web::get().to(routes::job_executions)),
            )
            .service(web::resource("/executors").route(web::get().to(routes::list_executors)))
            .service(
                web::resource("/executors/{id}").route(web::get().to(routes::get_executor)),
            )
            .service(
                web::resource("/executors/{id}/tasks")
                    .route(web::get().to(routes::executor_tasks)),
            )
            .service(
                web::resource("/executors/{id}/load")
                    .route(web::put().to(routes::set_executor_load)),
            )
            .service(
                web::resource("/executors/{id}/status")
                    .route(web::put().to(routes::set_executor_status)),
            ),
    )
    .service(web::resource("/metrics").route(web::get().to(routes::metrics)));
}

/// Runs the admin API on `port`. CORS is permissive on every method;
/// `actix-cors` answers `OPTIONS` preflights with an empty 200 without a
/// handler of our own.
pub async fn run(state: Arc<AppState>, port: u16) -> std::io::Result<()> {
    tracing::info!(port, "starting admin API");
    HttpServer::new(move || {
        App::new()
            .wrap(Cors::permissive())
            .app_data(web::Data::from(state.clone()))
            .configure(configure)
    })
    .bind(("0.0.0.0", port))?
    .run()
    .await
}
