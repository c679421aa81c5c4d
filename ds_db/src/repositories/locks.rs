//! ABOUTME: Store-backed named lock repository — intra-region mutual exclusion
//! ABOUTME: Complements (not replaces) the coordination-service leader lock

use crate::metrics::PoolMetrics;
use ds_core::{time::now_iso8601, Error, Result};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, Row, Sqlite, SqlitePool};
use tracing::instrument;

/// A named lock row (§3 "Lock").
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Lock {
    pub id: String,
    pub lock_name: String,
    pub owner_id: String,
    pub locked_at: String,
    pub lease_expires_at: String,
    pub status: String,
    pub released_at: Option<String>,
}

pub struct LockRepository<'a> {
    pool: &'a SqlitePool,
    metrics: &'a PoolMetrics,
}

impl<'a> LockRepository<'a> {
    pub fn new(pool: &'a SqlitePool, metrics: &'a PoolMetrics) -> Self {
        Self { pool, metrics }
    }

    /// Atomic upsert: inserts if no row with `lock_name` is currently
    /// `acquired`; otherwise takes over only if the prior lease has expired
    /// or is already self-owned. Returns `true` iff this call ended up
    /// holding the lock — callers must re-check the holder afterward to
    /// distinguish success from a silent conflict.
    #[instrument(skip(self))]
    pub async fn acquire(&self, lock_name: &str, owner_id: &str, ttl_seconds: i64) -> Result<bool> {
        let begin = self.pool.begin().await;
        let mut tx = self
            .metrics
            .trace(begin)
            .map_err(|e| Error::Database(format!("failed to begin lock transaction: {e}")))?;

        let existing = sqlx::query(
            "SELECT owner_id, lease_expires_at FROM job_lock WHERE lock_name = ?1 AND status = 'acquired'",
        )
        .bind(lock_name)
        .fetch_optional(&mut *tx)
        .await;
        let existing = self
            .metrics
            .trace(existing)
            .map_err(|e| Error::Database(format!("failed to read lock {lock_name}: {e}")))?;

        if let Some(row) = existing {
            let current_owner: String = row.get("owner_id");
            let expires_at: String = row.get("lease_expires_at");
            let expired = ds_core::time::parse_rfc3339(&expires_at)
                .map(|t| std::time::SystemTime::now() > t)
                .unwrap_or(true);
            if current_owner != owner_id && !expired {
                tx.rollback().await.ok();
                return Ok(false);
            }
            self.expire_row(&mut tx, lock_name).await?;
        }

        let now = now_iso8601();
        let expires_at = ds_core::time::to_rfc3339(
            std::time::SystemTime::now() + std::time::Duration::from_secs(ttl_seconds.max(0) as u64),
        );
        let id = ds_core::Id::new().to_string();
        let inserted = sqlx::query(
            r#"
            INSERT INTO job_lock (id, lock_name, owner_id, locked_at, lease_expires_at, status)
            VALUES (?1, ?2, ?3, ?4, ?5, 'acquired')
            "#,
        )
        .bind(&id)
        .bind(lock_name)
        .bind(owner_id)
        .bind(&now)
        .bind(&expires_at)
        .execute(&mut *tx)
        .await;
        self.metrics
            .trace(inserted)
            .map_err(|e| Error::Database(format!("failed to insert lock {lock_name}: {e}")))?;

        let committed = tx.commit().await;
        self.metrics
            .trace(committed)
            .map_err(|e| Error::Database(format!("failed to commit lock acquisition: {e}")))?;

        // Re-check the holder: under concurrent acquisition this insert may
        // have lost a race to a unique-index conflict that the transaction
        // boundary didn't surface as an error.
        let holder = self.get_active(lock_name).await?;
        Ok(holder.map(|l| l.owner_id == owner_id).unwrap_or(false))
    }

    async fn expire_row(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
        lock_name: &str,
    ) -> Result<()> {
        let updated = sqlx::query(
            "UPDATE job_lock SET status = 'expired' WHERE lock_name = ?1 AND status = 'acquired'",
        )
        .bind(lock_name)
        .execute(&mut **tx)
        .await;
        self.metrics
            .trace(updated)
            .map_err(|e| Error::Database(format!("failed to expire lock {lock_name}: {e}")))?;
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn get_active(&self, lock_name: &str) -> Result<Option<Lock>> {
        let row = sqlx::query_as::<_, Lock>(
            "SELECT * FROM job_lock WHERE lock_name = ?1 AND status = 'acquired'",
        )
        .bind(lock_name)
        .fetch_optional(self.pool)
        .await;
        self.metrics
            .trace(row)
            .map_err(|e| Error::Database(format!("failed to fetch lock {lock_name}: {e}")))
    }

    /// Deletes the row only if `owner_id` matches the current holder.
    #[instrument(skip(self))]
    pub async fn release(&self, lock_name: &str, owner_id: &str) -> Result<bool> {
        let now = now_iso8601();
        let result = sqlx::query(
            r#"
            UPDATE job_lock SET status = 'released', released_at = ?3
            WHERE lock_name = ?1 AND owner_id = ?2 AND status = 'acquired'
            "#,
        )
        .bind(lock_name)
        .bind(owner_id)
        .bind(&now)
        .execute(self.pool)
        .await;
        let result = self
            .metrics
            .trace(result)
            .map_err(|e| Error::Database(format!("failed to release lock {lock_name}: {e}")))?;
        Ok(result.rows_affected() > 0)
    }

    /// Proactively flips leases that have passed `lease_expires_at` to
    /// `'expired'` without waiting for a competing `acquire` to notice.
    /// Keeps `get_active`/listings honest between acquisition attempts.
    #[instrument(skip(self))]
    pub async fn expire_stale_locks(&self) -> Result<u64> {
        let now = now_iso8601();
        let result = sqlx::query(
            "UPDATE job_lock SET status = 'expired' WHERE status = 'acquired' AND lease_expires_at < ?1",
        )
        .bind(&now)
        .execute(self.pool)
        .await;
        let result = self
            .metrics
            .trace(result)
            .map_err(|e| Error::Database(format!("failed to expire stale locks: {e}")))?;
        Ok(result.rows_affected())
    }

    #[instrument(skip(self))]
    pub async fn cleanup_expired(&self, days: i64) -> Result<u64> {
        let result = sqlx::query(
            "DELETE FROM job_lock WHERE status != 'acquired' AND locked_at < datetime('now', ?1)",
        )
        .bind(format!("-{days} days"))
        .execute(self.pool)
        .await;
        let result = self
            .metrics
            .trace(result)
            .map_err(|e| Error::Database(format!("failed to cleanup expired locks: {e}")))?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::create_test_db;

    #[tokio::test]
    async fn second_owner_fails_while_lease_is_live() {
        let db = create_test_db().await;
        assert!(db.locks().acquire("nightly-cleanup", "owner-a", 300).await.unwrap());
        assert!(!db.locks().acquire("nightly-cleanup", "owner-b", 300).await.unwrap());
    }

    #[tokio::test]
    async fn self_owner_can_reacquire() {
        let db = create_test_db().await;
        assert!(db.locks().acquire("nightly-cleanup", "owner-a", 300).await.unwrap());
        assert!(db.locks().acquire("nightly-cleanup", "owner-a", 300).await.unwrap());
    }

    #[tokio::test]
    async fn expired_lease_can_be_taken_over() {
        let db = create_test_db().await;
        assert!(db.locks().acquire("nightly-cleanup", "owner-a", 0).await.unwrap());
        tokio::time::sleep(std::time::Duration::from_millis(1100)).await;
        assert!(db.locks().acquire("nightly-cleanup", "owner-b", 300).await.unwrap());
    }

    #[tokio::test]
    async fn release_requires_matching_owner() {
        let db = create_test_db().await;
        db.locks().acquire("nightly-cleanup", "owner-a", 300).await.unwrap();
        assert!(!db.locks().release("nightly-cleanup", "owner-b").await.unwrap());
        assert!(db.locks().release("nightly-cleanup", "owner-a").await.unwrap());
        assert!(db.locks().get_active("nightly-cleanup").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn expire_stale_locks_clears_holder_without_a_competing_acquire() {
        let db = create_test_db().await;
        assert!(db.locks().acquire("nightly-cleanup", "owner-a", 0).await.unwrap());
        tokio::time::sleep(std::time::Duration::from_millis(1100)).await;
        assert!(db.locks().get_active("nightly-cleanup").await.unwrap().is_some());
        let swept = db.locks().expire_stale_locks().await.unwrap();
        assert_eq!(swept, 1);
        assert!(db.locks().get_active("nightly-cleanup").await.unwrap().is_none());
    }
}
