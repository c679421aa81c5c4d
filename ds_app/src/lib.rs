//! ABOUTME: Shared process wiring for both binaries — config, store, broker producer
//! ABOUTME: Kept as an explicit value per §9's design note, not a singleton or global

use ds_broker::BrokerProducer;
use ds_config::Config;
use ds_core::Result;
use ds_db::Db;
use std::sync::Arc;

/// Everything both `ds-scheduler` and `ds-executor` need before they
/// diverge into their own wiring: validated config, a migrated store
/// connection, and a broker producer handle.
pub struct Runtime {
    pub config: Config,
    pub db: Db,
    pub producer: Arc<BrokerProducer>,
}

impl Runtime {
    /// Loads the config file at `config_path`, connects (with retry) to
    /// the relational store, and builds the broker producer. The sqlite
    /// file backing the store is named after `db.name` from the config —
    /// the generic SQL-backend naming is interpreted as the on-disk file
    /// for the sqlite engine the store repositories target.
    pub async fn bootstrap(config_path: &str) -> Result<Self> {
        let config = Config::load(config_path)?;
        tracing::debug!(?config, "configuration loaded");

        let db_path = format!("{}.db", config.db.name);
        let db = Db::new(&db_path).await?;
        db.health_check().await?;

        let producer = Arc::new(BrokerProducer::new(&config.kafka.brokers)?);

        Ok(Self {
            config,
            db,
            producer,
        })
    }
}

/// Coordination-service endpoints, comma-separated in `ETCD_ENDPOINTS`.
/// Not a `ds_config` key: the coordination service is an external
/// collaborator with no config-file section, so its connection string is
/// left to the environment.
pub fn coordination_endpoints() -> Vec<String> {
    std::env::var("ETCD_ENDPOINTS")
        .unwrap_or_else(|_| "127.0.0.1:2379".to_string())
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// `RUST_ENV`-style environment tag consulted by `ds_core::telemetry`
/// (json logs in production, pretty logs otherwise).
pub fn runtime_env() -> String {
    std::env::var("RUST_ENV").unwrap_or_else(|_| "development".to_string())
}
