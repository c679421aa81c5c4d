//! ABOUTME: Coordination-service client: membership registry, leader election, named locks
//! ABOUTME: Ephemeral-znode semantics implemented against etcd leases, watches and locks

pub mod election;
pub mod locks;
pub mod registry;

pub use election::{LeaderElection, LeaderState};
pub use locks::CoordLock;
pub use registry::{ExecutorRecord, MembershipRegistry};

use ds_core::{Error, Result};
use etcd_client::{Client, ConnectOptions};
use std::time::Duration;

/// Root path for every ephemeral record this crate manages.
pub const ROOT: &str = "/scheduler";
pub const EXECUTORS_PREFIX: &str = "/scheduler/executors/";
pub const LEADER_KEY: &str = "/scheduler/leader";
pub const LOCKS_PREFIX: &str = "/scheduler/locks/";

/// Bounded session timeout for coordination-service operations (§5, default 30s).
pub const SESSION_TIMEOUT: Duration = Duration::from_secs(30);

/// Connect to the coordination service (etcd cluster) with the session
/// timeout the rest of this crate assumes.
pub async fn connect(endpoints: &[String]) -> Result<Client> {
    let options = ConnectOptions::new().with_timeout(SESSION_TIMEOUT);
    Client::connect(endpoints, Some(options))
        .await
        .map_err(|e| Error::Coordination(format!("failed to connect to coordination service: {e}")))
}
