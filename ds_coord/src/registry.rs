//! ABOUTME: Membership registry — ephemeral executor records, watched for changes
//! ABOUTME: Reconciled into the durable store; the store stays authoritative for load

use crate::EXECUTORS_PREFIX;
use ds_core::{time::now_iso8601, Error, Result};
use etcd_client::{Client, EventType, GetOptions, LeaseGrantOptions, PutOptions, WatchOptions};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{instrument, warn};

/// Serialized executor record stored at `/scheduler/executors/<executor_id>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutorRecord {
    pub executor_id: String,
    pub host: String,
    pub port: u16,
    pub online: bool,
    pub current_load: i64,
    pub max_load: i64,
    pub last_heartbeat: String,
}

impl ExecutorRecord {
    pub fn new(executor_id: &str, host: &str, port: u16, max_load: i64) -> Self {
        Self {
            executor_id: executor_id.to_string(),
            host: host.to_string(),
            port,
            online: true,
            current_load: 0,
            max_load,
            last_heartbeat: now_iso8601(),
        }
    }
}

/// Client-side view of the ephemeral executor roster. Each register() call
/// grants a lease and keeps it alive for the life of this process; losing
/// the session (lease expiry) drops every record this process owns, the
/// same way a ZooKeeper ephemeral node vanishes with its session.
pub struct MembershipRegistry {
    client: Client,
    lease_ttl_seconds: i64,
    leases: Arc<Mutex<HashMap<String, i64>>>,
}

impl MembershipRegistry {
    pub fn new(client: Client, lease_ttl_seconds: i64) -> Self {
        Self {
            client,
            lease_ttl_seconds,
            leases: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn key(executor_id: &str) -> String {
        format!("{EXECUTORS_PREFIX}{executor_id}")
    }

    /// Write a serialized executor record as an ephemeral node (a key
    /// attached to a leased lease). Fails if the session cannot be
    /// established.
    #[instrument(skip(self, record))]
    pub async fn register(&self, record: &ExecutorRecord) -> Result<()> {
        let mut client = self.client.clone();
        let lease = client
            .lease_grant(self.lease_ttl_seconds, None)
            .await
            .map_err(|e| Error::Coordination(format!("lease_grant failed: {e}")))?;
        let lease_id = lease.id();

        let (mut keeper, mut stream) = client
            .lease_keep_alive(lease_id)
            .await
            .map_err(|e| Error::Coordination(format!("lease_keep_alive failed: {e}")))?;

        let payload = serde_json::to_vec(record)
            .map_err(|e| Error::Coordination(format!("failed to serialize executor record: {e}")))?;
        client
            .put(
                Self::key(&record.executor_id),
                payload,
                Some(PutOptions::new().with_lease(lease_id)),
            )
            .await
            .map_err(|e| Error::Coordination(format!("failed to register executor node: {e}")))?;

        self.leases
            .lock()
            .await
            .insert(record.executor_id.clone(), lease_id);

        // Keep the lease alive for the rest of the process lifetime. A
        // dedicated task sends keep-alive pings at roughly a third of the
        // TTL and drains the response stream; if the session is lost the
        // stream ends and the ephemeral record expires server-side.
        let interval = std::time::Duration::from_secs((self.lease_ttl_seconds / 3).max(1) as u64);
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(interval);
            loop {
                tick.tick().await;
                if keeper.keep_alive().await.is_err() {
                    warn!(lease_id, "lease keep-alive send failed, session likely lost");
                    break;
                }
                match stream.message().await {
                    Ok(Some(_)) => continue,
                    Ok(None) | Err(_) => {
                        warn!(lease_id, "lease keep-alive stream closed, session lost");
                        break;
                    }
                }
            }
        });

        Ok(())
    }

    /// Delete this executor's ephemeral node.
    #[instrument(skip(self))]
    pub async fn unregister(&self, executor_id: &str) -> Result<()> {
        let mut client = self.client.clone();
        client
            .delete(Self::key(executor_id), None)
            .await
            .map_err(|e| Error::Coordination(format!("failed to unregister {executor_id}: {e}")))?;
        self.leases.lock().await.remove(executor_id);
        Ok(())
    }

    async fn read_modify_write<F>(&self, executor_id: &str, f: F) -> Result<()>
    where
        F: FnOnce(&mut ExecutorRecord),
    {
        let mut client = self.client.clone();
        let key = Self::key(executor_id);
        let resp = client
            .get(key.clone(), None)
            .await
            .map_err(|e| Error::Coordination(format!("failed to read {executor_id}: {e}")))?;
        let Some(kv) = resp.kvs().first() else {
            return Err(Error::NotFound(format!(
                "executor {executor_id} has no ephemeral record"
            )));
        };
        let mut record: ExecutorRecord = serde_json::from_slice(kv.value())
            .map_err(|e| Error::Coordination(format!("malformed executor record: {e}")))?;
        f(&mut record);

        let lease_id = *self.leases.lock().await.get(executor_id).unwrap_or(&0);
        let payload = serde_json::to_vec(&record)
            .map_err(|e| Error::Coordination(format!("failed to serialize executor record: {e}")))?;
        let options = if lease_id != 0 {
            Some(PutOptions::new().with_lease(lease_id))
        } else {
            None
        };
        client
            .put(key, payload, options)
            .await
            .map_err(|e| Error::Coordination(format!("failed to rewrite {executor_id}: {e}")))?;
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn update_status(&self, executor_id: &str, online: bool) -> Result<()> {
        self.read_modify_write(executor_id, |r| r.online = online).await
    }

    #[instrument(skip(self))]
    pub async fn update_load(&self, executor_id: &str, load: i64) -> Result<()> {
        self.read_modify_write(executor_id, |r| r.current_load = load).await
    }

    #[instrument(skip(self))]
    pub async fn touch_heartbeat(&self, executor_id: &str) -> Result<()> {
        self.read_modify_write(executor_id, |r| r.last_heartbeat = now_iso8601())
            .await
    }

    /// List every child record. Malformed entries are skipped with a
    /// warning rather than failing the whole listing.
    #[instrument(skip(self))]
    pub async fn get_executors(&self) -> Result<Vec<ExecutorRecord>> {
        let mut client = self.client.clone();
        let resp = client
            .get(EXECUTORS_PREFIX, Some(GetOptions::new().with_prefix()))
            .await
            .map_err(|e| Error::Coordination(format!("failed to list executors: {e}")))?;

        let mut records = Vec::with_capacity(resp.kvs().len());
        for kv in resp.kvs() {
            match serde_json::from_slice::<ExecutorRecord>(kv.value()) {
                Ok(record) => records.push(record),
                Err(e) => warn!(key = ?kv.key_str(), error = %e, "skipping malformed executor record"),
            }
        }
        Ok(records)
    }

    /// Install a watch over the executor prefix. On every change event the
    /// registry re-lists the full set and invokes `callback` with the
    /// fresh set before continuing to watch — the callback must be
    /// idempotent. Runs until the watch stream ends (session loss).
    #[instrument(skip(self, callback))]
    pub async fn watch<F>(&self, mut callback: F) -> Result<()>
    where
        F: FnMut(Vec<ExecutorRecord>) + Send + 'static,
    {
        let mut client = self.client.clone();
        let (_watcher, mut stream) = client
            .watch(EXECUTORS_PREFIX, Some(WatchOptions::new().with_prefix()))
            .await
            .map_err(|e| Error::Coordination(format!("failed to install executor watch: {e}")))?;

        let registry = self.clone_for_watch();
        tokio::spawn(async move {
            loop {
                match stream.message().await {
                    Ok(Some(resp)) => {
                        if resp.events().iter().any(|e| e.event_type() == EventType::Put)
                            || resp.events().iter().any(|e| e.event_type() == EventType::Delete)
                        {
                            match registry.get_executors().await {
                                Ok(fresh) => callback(fresh),
                                Err(e) => warn!(error = %e, "watch re-list failed"),
                            }
                        }
                    }
                    Ok(None) => {
                        warn!("executor watch stream closed");
                        break;
                    }
                    Err(e) => {
                        warn!(error = %e, "executor watch stream error");
                        break;
                    }
                }
            }
        });
        Ok(())
    }

    fn clone_for_watch(&self) -> MembershipRegistry {
        MembershipRegistry {
            client: self.client.clone(),
            lease_ttl_seconds: self.lease_ttl_seconds,
            leases: self.leases.clone(),
        }
    }
}
