//! ABOUTME: `ds-scheduler` binary — leader election, tick loop, reconciler, reaper, admin API

use ds_app::{coordination_endpoints, runtime_env, Runtime};
use ds_broker::{BrokerConsumer, TOPIC_JOB_RESULT};
use ds_coord::{LeaderElection, LeaderState, MembershipRegistry};
use ds_core::telemetry::init_tracing;
use ds_scheduler::{LockSweeper, LostExecutionReaper, Placement, ResultReconciler, SchedulingEngine};
use ds_web::AppState;
use std::process;
use std::sync::Arc;
use tokio::sync::watch;

const CONFIG_PATH_ENV: &str = "SCHEDULER_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "scheduler.conf";
const RESULT_CONSUMER_GROUP: &str = "scheduler-result-reconciler";
const REGISTRY_LEASE_TTL_SECONDS: i64 = 30;

#[tokio::main]
async fn main() {
    init_tracing(&runtime_env(), "ds-scheduler");

    let config_path =
        std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    let runtime = match Runtime::bootstrap(&config_path).await {
        Ok(runtime) => runtime,
        Err(e) => {
            tracing::error!(error = %e, "failed to bootstrap scheduler runtime");
            process::exit(1);
        }
    };

    let node_id = hostname::get()
        .map(|h| h.to_string_lossy().into_owned())
        .unwrap_or_else(|_| ds_core::Id::new().to_string());

    let registry = match ds_coord::connect(&coordination_endpoints()).await {
        Ok(client) => Some(Arc::new(MembershipRegistry::new(
            client,
            REGISTRY_LEASE_TTL_SECONDS,
        ))),
        Err(e) => {
            tracing::warn!(error = %e, "coordination service unavailable, running without membership mirroring");
            None
        }
    };

    let election_client = match ds_coord::connect(&coordination_endpoints()).await {
        Ok(client) => client,
        Err(e) => {
            tracing::error!(error = %e, "failed to connect to coordination service for leader election");
            process::exit(1);
        }
    };

    let (leader_tx, leader_rx) = watch::channel(LeaderState::Follower);
    let election = LeaderElection::new(election_client, node_id.clone(), REGISTRY_LEASE_TTL_SECONDS);
    tokio::spawn(async move {
        if let Err(e) = election.run(leader_tx).await {
            tracing::error!(error = %e, "leader election loop exited");
        }
    });

    let placement = Arc::new(Placement::new(
        runtime.config.scheduler.executor_selection_strategy,
    ));
    let stats = Arc::new(ds_scheduler::StatsAccumulator::new());
    let live_window_seconds = ds_db::repositories::executors::LIVE_WINDOW_SECONDS;

    let engine = Arc::new(SchedulingEngine::new(
        runtime.db.clone(),
        runtime.producer.clone(),
        placement,
        stats.clone(),
        registry.clone(),
        runtime.config.scheduler.check_interval,
        live_window_seconds,
    ));

    let tick_engine = engine.clone();
    let tick_leader_rx = leader_rx.clone();
    tokio::spawn(async move {
        tick_engine.run(tick_leader_rx).await;
    });

    let reaper = LostExecutionReaper::new(runtime.db.clone(), runtime.config.scheduler.check_interval);
    tokio::spawn(reaper.run());

    let lock_sweeper = LockSweeper::new(runtime.db.clone(), runtime.config.scheduler.check_interval);
    tokio::spawn(lock_sweeper.run());

    let reconciler = ResultReconciler::new(runtime.db.clone(), stats, registry);
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    let kafka_brokers = runtime.config.kafka.brokers.clone();
    tokio::spawn(async move {
        match BrokerConsumer::new(&kafka_brokers, RESULT_CONSUMER_GROUP, &[TOPIC_JOB_RESULT]) {
            Ok(consumer) => consumer.run(&reconciler, shutdown_rx).await,
            Err(e) => tracing::error!(error = %e, "failed to start job-result consumer"),
        }
    });

    let admin_port = runtime.config.stats.api.port;
    let admin_state = Arc::new(AppState::new(engine));
    if let Err(e) = ds_web::run(admin_state, admin_port).await {
        tracing::error!(error = %e, "admin API server exited");
        process::exit(1);
    }
}
