//! ABOUTME: System config repository — simple KV table with typed getters
//! ABOUTME: Backs runtime-mutable settings such as the active placement strategy

use crate::metrics::PoolMetrics;
use ds_core::{time::now_iso8601, Error, Result};
use sqlx::SqlitePool;
use tracing::instrument;

pub struct SystemConfigRepository<'a> {
    pool: &'a SqlitePool,
    metrics: &'a PoolMetrics,
}

impl<'a> SystemConfigRepository<'a> {
    pub fn new(pool: &'a SqlitePool, metrics: &'a PoolMetrics) -> Self {
        Self { pool, metrics }
    }

    #[instrument(skip(self))]
    pub async fn get(&self, key: &str) -> Result<Option<String>> {
        let row: Result<Option<(String,)>, sqlx::Error> =
            sqlx::query_as("SELECT value FROM system_config WHERE key = ?1")
                .bind(key)
                .fetch_optional(self.pool)
                .await;
        let row = self
            .metrics
            .trace(row)
            .map_err(|e| Error::Database(format!("failed to read config key {key}: {e}")))?;
        Ok(row.map(|(value,)| value))
    }

    #[instrument(skip(self, value))]
    pub async fn set(&self, key: &str, value: &str) -> Result<()> {
        let now = now_iso8601();
        let result = sqlx::query(
            r#"
            INSERT INTO system_config (key, value, update_time) VALUES (?1, ?2, ?3)
            ON CONFLICT (key) DO UPDATE SET value = excluded.value, update_time = excluded.update_time
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(&now)
        .execute(self.pool)
        .await;
        self.metrics
            .trace(result)
            .map_err(|e| Error::Database(format!("failed to write config key {key}: {e}")))?;
        Ok(())
    }

    pub async fn get_or(&self, key: &str, default: &str) -> Result<String> {
        Ok(self.get(key).await?.unwrap_or_else(|| default.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::create_test_db;

    #[tokio::test]
    async fn set_then_get_roundtrips() {
        let db = create_test_db().await;
        db.system_config()
            .set("scheduler.executor_selection_strategy", "LEAST_LOAD")
            .await
            .unwrap();
        let value = db
            .system_config()
            .get("scheduler.executor_selection_strategy")
            .await
            .unwrap();
        assert_eq!(value.as_deref(), Some("LEAST_LOAD"));
    }

    #[tokio::test]
    async fn get_or_falls_back_to_default() {
        let db = create_test_db().await;
        let value = db.system_config().get_or("missing.key", "fallback").await.unwrap();
        assert_eq!(value, "fallback");
    }

    #[tokio::test]
    async fn set_overwrites_existing_value() {
        let db = create_test_db().await;
        db.system_config().set("k", "v1").await.unwrap();
        db.system_config().set("k", "v2").await.unwrap();
        assert_eq!(db.system_config().get("k").await.unwrap().as_deref(), Some("v2"));
    }
}
