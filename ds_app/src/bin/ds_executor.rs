//! ABOUTME: `ds-executor` binary — registers itself, then runs intake + runner + heartbeat

use ds_app::{coordination_endpoints, runtime_env, Runtime};
use ds_broker::{BrokerConsumer, TOPIC_JOB_CANCEL, TOPIC_JOB_SUBMIT};
use ds_coord::{ExecutorRecord, MembershipRegistry};
use ds_core::telemetry::init_tracing;
use ds_executor::{CancelSet, Heartbeat, Intake, Runner, RunnerQueue};
use std::process;
use std::sync::Arc;

const CONFIG_PATH_ENV: &str = "EXECUTOR_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "executor.conf";
const REGISTRY_LEASE_TTL_SECONDS: i64 = 30;
const DEFAULT_PORT: u16 = 7070;
const DEFAULT_SCRATCH_DIR: &str = "/tmp/ds-executor";

#[tokio::main]
async fn main() {
    init_tracing(&runtime_env(), "ds-executor");

    let config_path =
        std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    let runtime = match Runtime::bootstrap(&config_path).await {
        Ok(runtime) => runtime,
        Err(e) => {
            tracing::error!(error = %e, "failed to bootstrap executor runtime");
            process::exit(1);
        }
    };

    let executor_id = std::env::var("EXECUTOR_ID").unwrap_or_else(|_| ds_core::Id::new().to_string());
    let host = std::env::var("EXECUTOR_HOST").unwrap_or_else(|_| {
        hostname::get()
            .map(|h| h.to_string_lossy().into_owned())
            .unwrap_or_else(|_| "127.0.0.1".to_string())
    });
    let port: u16 = std::env::var("EXECUTOR_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(DEFAULT_PORT);
    let max_load = i64::from(runtime.config.executor.default_max_load);

    if let Err(e) = runtime
        .db
        .executors()
        .register(&executor_id, &host, i64::from(port), max_load)
        .await
    {
        tracing::error!(error = %e, "failed to register executor in store");
        process::exit(1);
    }

    let registry = match ds_coord::connect(&coordination_endpoints()).await {
        Ok(client) => {
            let registry = Arc::new(MembershipRegistry::new(client, REGISTRY_LEASE_TTL_SECONDS));
            let record = ExecutorRecord::new(&executor_id, &host, port, max_load);
            if let Err(e) = registry.register(&record).await {
                tracing::warn!(error = %e, "failed to register executor in coordination service");
            }
            Some(registry)
        }
        Err(e) => {
            tracing::warn!(error = %e, "coordination service unavailable, registering in store only");
            None
        }
    };

    let queue = Arc::new(RunnerQueue::new());
    let cancel_set = Arc::new(CancelSet::new());

    let runner = Runner::new(
        queue.clone(),
        cancel_set.clone(),
        runtime.producer.clone(),
        runtime.db.clone(),
        std::path::PathBuf::from(DEFAULT_SCRATCH_DIR),
    );
    if let Err(e) = tokio::fs::create_dir_all(DEFAULT_SCRATCH_DIR).await {
        tracing::warn!(error = %e, scratch_dir = DEFAULT_SCRATCH_DIR, "failed to create scratch directory");
    }
    tokio::spawn(runner.run());

    let heartbeat = Heartbeat::new(
        runtime.db.clone(),
        runtime.producer.clone(),
        executor_id.clone(),
        runtime.config.executor.heartbeat_interval,
    );
    tokio::spawn(heartbeat.run());

    let intake = Intake::new(queue, cancel_set, runtime.producer.clone());
    let group_id = format!("executor-{executor_id}");
    let kafka_brokers = runtime.config.kafka.brokers.clone();
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    let consumer_handle = tokio::spawn(async move {
        match BrokerConsumer::new(
            &kafka_brokers,
            &group_id,
            &[TOPIC_JOB_SUBMIT, TOPIC_JOB_CANCEL],
        ) {
            Ok(consumer) => consumer.run(&intake, shutdown_rx).await,
            Err(e) => tracing::error!(error = %e, "failed to start job-submit/job-cancel consumer"),
        }
    });

    if tokio::signal::ctrl_c().await.is_ok() {
        tracing::info!(executor_id, "shutdown signal received, deregistering executor");
    }
    let _ = shutdown_tx.send(true);
    let _ = consumer_handle.await;

    if let Err(e) = runtime
        .db
        .executors()
        .update_status(&executor_id, ds_db::ExecutorStatus::Offline)
        .await
    {
        tracing::warn!(error = %e, "failed to mark executor offline in store");
    }
    if let Some(registry) = registry {
        if let Err(e) = registry.unregister(&executor_id).await {
            tracing::warn!(error = %e, "failed to unregister executor from coordination service");
        }
    }
}
