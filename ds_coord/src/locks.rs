//! ABOUTME: Coordination-service named locks — `/scheduler/locks/<name>`
//! ABOUTME: Overlaps deliberately with the store-backed `ds_db::LockRepository`

use ds_core::{Error, Result};
use etcd_client::Client;
use tracing::instrument;

/// A held coordination-service lock. Dropping this without calling
/// [`CoordLock::release`] still releases the lock once its lease expires,
/// but callers should release explicitly on the happy path.
pub struct CoordLock {
    client: Client,
    key: Vec<u8>,
}

/// Acquire a lock under `/scheduler/locks/<name>`, backed by a lease with
/// `ttl_seconds`. Blocks (server-side, via etcd's lock queue) until this
/// caller is granted the lock — unlike the store-backed lock, there is no
/// immediate "already held" failure; the caller waits its turn.
#[instrument(skip(client))]
pub async fn acquire(client: &Client, name: &str, ttl_seconds: i64) -> Result<CoordLock> {
    let mut client = client.clone();
    let lease = client
        .lease_grant(ttl_seconds, None)
        .await
        .map_err(|e| Error::Coordination(format!("lease_grant for lock {name} failed: {e}")))?;

    let path = format!("{}{}", crate::LOCKS_PREFIX, name);
    let mut lock_client = client.lock_client();
    let resp = lock_client
        .lock(path.as_bytes().to_vec(), Some(etcd_client::LockOptions::new().with_lease(lease.id())))
        .await
        .map_err(|e| Error::Coordination(format!("failed to acquire lock {name}: {e}")))?;

    Ok(CoordLock {
        client,
        key: resp.key().to_vec(),
    })
}

impl CoordLock {
    #[instrument(skip(self))]
    pub async fn release(self) -> Result<()> {
        let mut lock_client = self.client.lock_client();
        lock_client
            .unlock(self.key)
            .await
            .map_err(|e| Error::Coordination(format!("failed to release lock: {e}")))?;
        Ok(())
    }
}
