//! ABOUTME: Leader election — single active scheduler via etcd's election primitive
//! ABOUTME: Failover on session loss; exactly one election loop per process

use ds_core::{Error, Result};
use etcd_client::{Client, LeaderKey};
use tokio::sync::watch;
use tracing::{info, instrument, warn};

/// Whether this process currently holds the `/scheduler/leader` campaign.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeaderState {
    Leader,
    Follower,
}

/// One election loop per process. Wraps etcd's election client: `campaign`
/// blocks until this node wins or the lease backing it expires; `observe`
/// is used by followers to learn when the current leader's session drops
/// so they can re-campaign.
pub struct LeaderElection {
    client: Client,
    node_id: String,
    lease_ttl_seconds: i64,
}

impl LeaderElection {
    pub fn new(client: Client, node_id: String, lease_ttl_seconds: i64) -> Self {
        Self {
            client,
            node_id,
            lease_ttl_seconds,
        }
    }

    /// Run the election loop forever, publishing state transitions on
    /// `state_tx`. Callers drive the scheduling engine off
    /// `state_rx.borrow()` rather than polling this struct directly.
    #[instrument(skip(self, state_tx))]
    pub async fn run(self, state_tx: watch::Sender<LeaderState>) -> Result<()> {
        loop {
            match self.campaign_once().await {
                Ok(leader_key) => {
                    info!(node_id = %self.node_id, "won scheduler leader election");
                    let _ = state_tx.send(LeaderState::Leader);
                    self.hold_until_lost(leader_key).await;
                    info!(node_id = %self.node_id, "lost scheduler leadership");
                    let _ = state_tx.send(LeaderState::Follower);
                }
                Err(e) => {
                    warn!(error = %e, "leader campaign failed, retrying");
                    tokio::time::sleep(std::time::Duration::from_secs(5)).await;
                }
            }
        }
    }

    async fn campaign_once(&self) -> Result<LeaderKey> {
        let mut client = self.client.clone();
        let lease = client
            .lease_grant(self.lease_ttl_seconds, None)
            .await
            .map_err(|e| Error::Coordination(format!("lease_grant for election failed: {e}")))?;

        // Keep the lease alive for as long as this node wants to hold the
        // campaign; losing this task (or the connection) lets the lease
        // expire and the election resolves to the next campaigner.
        let (mut keeper, mut stream) = client
            .lease_keep_alive(lease.id())
            .await
            .map_err(|e| Error::Coordination(format!("lease_keep_alive for election failed: {e}")))?;
        let keepalive_interval =
            std::time::Duration::from_secs((self.lease_ttl_seconds / 3).max(1) as u64);
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(keepalive_interval);
            loop {
                tick.tick().await;
                if keeper.keep_alive().await.is_err() {
                    break;
                }
                if stream.message().await.unwrap_or(None).is_none() {
                    break;
                }
            }
        });

        let mut election = client.election_client();
        let resp = election
            .campaign(crate::LEADER_KEY, self.node_id.as_bytes().to_vec(), lease.id())
            .await
            .map_err(|e| Error::Coordination(format!("campaign failed: {e}")))?;
        resp.leader()
            .cloned()
            .ok_or_else(|| Error::Coordination("campaign returned no leader key".to_string()))
    }

    /// Observe the campaign until the stream reports a leadership change
    /// away from this node's key, which means the underlying lease (and
    /// thus the session) was lost.
    async fn hold_until_lost(&self, leader_key: LeaderKey) {
        let mut client = self.client.clone();
        let mut election = client.election_client();
        let stream = match election.observe(crate::LEADER_KEY).await {
            Ok(s) => s,
            Err(e) => {
                warn!(error = %e, "failed to observe election, assuming leadership lost");
                return;
            }
        };
        tokio::pin!(stream);
        use futures_util::StreamExt;
        while let Some(item) = stream.next().await {
            match item {
                Ok(resp) => {
                    let still_us = resp
                        .kv()
                        .map(|kv| kv.key() == leader_key.key())
                        .unwrap_or(false);
                    if !still_us {
                        return;
                    }
                }
                Err(e) => {
                    warn!(error = %e, "election observe stream error, assuming leadership lost");
                    return;
                }
            }
        }
    }
}
