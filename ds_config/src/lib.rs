//! ABOUTME: Configuration management with validation and environment loading
//! ABOUTME: Parses the scheduler's key=value config file and DB_*/KAFKA_* env overrides

mod kv;

use ds_core::{Error, Result};
use serde::Deserialize;
use std::path::Path;
use validator::Validate;

/// Placement policy recognized by `scheduler.executor_selection_strategy`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SelectionStrategy {
    Random,
    RoundRobin,
    LeastLoad,
}

impl Default for SelectionStrategy {
    fn default() -> Self {
        SelectionStrategy::Random
    }
}

fn default_check_interval() -> u64 {
    5
}

fn default_strategy() -> SelectionStrategy {
    SelectionStrategy::Random
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct SchedulerSection {
    #[serde(default = "default_check_interval")]
    #[validate(range(min = 1, message = "scheduler.check_interval must be >= 1"))]
    pub check_interval: u64,

    #[serde(default = "default_strategy")]
    pub executor_selection_strategy: SelectionStrategy,
}

impl Default for SchedulerSection {
    fn default() -> Self {
        Self {
            check_interval: default_check_interval(),
            executor_selection_strategy: default_strategy(),
        }
    }
}

fn default_max_load() -> u32 {
    10
}

fn default_heartbeat_interval() -> u64 {
    30
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct ExecutorSection {
    #[serde(default = "default_max_load")]
    #[validate(range(min = 1, message = "executor.default_max_load must be >= 1"))]
    pub default_max_load: u32,

    #[serde(default = "default_heartbeat_interval")]
    #[validate(range(min = 1, message = "executor.heartbeat_interval must be >= 1"))]
    pub heartbeat_interval: u64,
}

impl Default for ExecutorSection {
    fn default() -> Self {
        Self {
            default_max_load: default_max_load(),
            heartbeat_interval: default_heartbeat_interval(),
        }
    }
}

fn default_db_host() -> String {
    "127.0.0.1".to_string()
}

fn default_db_port() -> u16 {
    5432
}

fn default_db_name() -> String {
    "scheduler".to_string()
}

fn default_db_pool_size() -> u32 {
    10
}

#[derive(Clone, Deserialize, Validate)]
pub struct DbSection {
    #[serde(default = "default_db_host")]
    #[validate(length(min = 1, message = "db.host must not be empty"))]
    pub host: String,

    #[serde(default = "default_db_port")]
    pub port: u16,

    #[serde(default)]
    pub user: String,

    #[serde(default)]
    pub password: String,

    #[serde(default = "default_db_name")]
    #[validate(length(min = 1, message = "db.name must not be empty"))]
    pub name: String,

    #[serde(default = "default_db_pool_size")]
    #[validate(range(min = 1, message = "db.pool_size must be >= 1"))]
    pub pool_size: u32,
}

impl Default for DbSection {
    fn default() -> Self {
        Self {
            host: default_db_host(),
            port: default_db_port(),
            user: String::new(),
            password: String::new(),
            name: default_db_name(),
            pool_size: default_db_pool_size(),
        }
    }
}

/// Manual `Debug` so a logged `Config` never leaks the database password.
impl std::fmt::Debug for DbSection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DbSection")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"***")
            .field("name", &self.name)
            .field("pool_size", &self.pool_size)
            .finish()
    }
}

fn default_kafka_brokers() -> String {
    "127.0.0.1:9092".to_string()
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct KafkaSection {
    #[serde(default = "default_kafka_brokers")]
    #[validate(length(min = 1, message = "kafka.brokers must not be empty"))]
    pub brokers: String,
}

impl Default for KafkaSection {
    fn default() -> Self {
        Self {
            brokers: default_kafka_brokers(),
        }
    }
}

fn default_stats_api_port() -> u16 {
    8080
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct StatsApiSection {
    #[serde(default = "default_stats_api_port")]
    pub port: u16,
}

impl Default for StatsApiSection {
    fn default() -> Self {
        Self {
            port: default_stats_api_port(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct StatsSection {
    #[serde(default)]
    #[validate(nested)]
    pub api: StatsApiSection,
}

/// Root configuration, assembled from a `key=value` file (if present) and
/// then overridden by recognized environment variables.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct Config {
    #[serde(default)]
    #[validate(nested)]
    pub scheduler: SchedulerSection,

    #[serde(default)]
    #[validate(nested)]
    pub executor: ExecutorSection,

    #[serde(default)]
    #[validate(nested)]
    pub db: DbSection,

    #[serde(default)]
    #[validate(nested)]
    pub kafka: KafkaSection,

    #[serde(default)]
    #[validate(nested)]
    pub stats: StatsSection,
}

/// Environment variables that override config-file values (`db.*` and
/// `kafka.brokers` only — everything else is file-or-default).
const ENV_OVERRIDES: &[(&str, &str)] = &[
    ("DB_HOST", "db.host"),
    ("DB_PORT", "db.port"),
    ("DB_USER", "db.user"),
    ("DB_PASSWORD", "db.password"),
    ("DB_NAME", "db.name"),
    ("KAFKA_BROKERS", "kafka.brokers"),
];

impl Config {
    /// Load configuration from a `key=value` file at `path` (if it exists),
    /// then apply `DB_*`/`KAFKA_BROKERS` environment overrides, then validate.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let flat = if path.exists() {
            let text = std::fs::read_to_string(path).map_err(Error::Io)?;
            kv::parse(&text)
        } else {
            tracing::warn!(path = %path.display(), "config file not found, using defaults");
            Default::default()
        };

        let mut builder = config::Config::builder().add_source(config::File::from_str(
            &kv::nest(&flat).to_string(),
            config::FileFormat::Json,
        ));

        for (env_var, key) in ENV_OVERRIDES {
            if let Ok(value) = std::env::var(env_var) {
                builder = builder.set_override(*key, value)?;
            }
        }

        let built = builder.build()?;
        let config: Config = built.try_deserialize()?;
        config
            .validate()
            .map_err(|e| Error::Validation(e.to_string()))?;
        Ok(config)
    }
}
