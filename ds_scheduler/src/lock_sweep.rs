//! ABOUTME: Periodic sweep over `job_lock` — expires stale leases, then prunes old rows
//! ABOUTME: Runs alongside the reaper; `acquire` already self-heals, this just tidies listings

use ds_db::Db;
use tracing::{instrument, warn};

/// Rows older than this many days (by `locked_at`) are pruned once no longer held.
const LOCK_RETENTION_DAYS: i64 = 7;

/// A leader-held lock whose lease lapses without a competing `acquire`
/// would otherwise sit `'acquired'` in listings forever.
pub struct LockSweeper {
    db: Db,
    sweep_interval_seconds: u64,
}

impl LockSweeper {
    pub fn new(db: Db, sweep_interval_seconds: u64) -> Self {
        Self {
            db,
            sweep_interval_seconds,
        }
    }

    pub async fn run(self) {
        let mut ticker =
            tokio::time::interval(std::time::Duration::from_secs(self.sweep_interval_seconds.max(1)));
        loop {
            ticker.tick().await;
            if let Err(e) = self.sweep_once().await {
                warn!(error = %e, "lock sweep failed");
            }
        }
    }

    #[instrument(skip(self))]
    async fn sweep_once(&self) -> ds_core::Result<()> {
        let locks = self.db.locks();
        let expired = locks.expire_stale_locks().await?;
        if expired > 0 {
            tracing::debug!(count = expired, "expired stale locks");
        }
        let pruned = locks.cleanup_expired(LOCK_RETENTION_DAYS).await?;
        if pruned > 0 {
            tracing::debug!(count = pruned, "pruned old lock rows");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_db() -> Db {
        let path = std::env::temp_dir().join(format!("ds_scheduler-locksweep-test-{}.db", ulid::Ulid::new()));
        Db::new(path.to_str().unwrap()).await.unwrap()
    }

    #[tokio::test]
    async fn sweep_clears_a_lapsed_lease_so_a_new_owner_can_acquire() {
        let db = test_db().await;
        assert!(db.locks().acquire("migration", "node-a", 0).await.unwrap());

        // TTL of 0 means the lease has already lapsed; a competing
        // `acquire` would already self-heal this, but the sweeper should
        // clear it proactively without waiting for one.
        let sweeper = LockSweeper::new(db.clone(), 60);
        sweeper.sweep_once().await.unwrap();

        assert!(db.locks().acquire("migration", "node-b", 30).await.unwrap());
        let active = db.locks().get_active("migration").await.unwrap().unwrap();
        assert_eq!(active.owner_id, "node-b");
    }
}
