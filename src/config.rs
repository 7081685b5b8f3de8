use std::collections::HashMap;
use std::time::Duration;

use crate::error::{Error, Result};

/// Process configuration for a single node, read from the environment the
/// way the teacher's `client_db.rs::Config::new` reads from a file: build a
/// `config::Config`, set defaults, layer an environment source on top, then
/// deserialize. Node processes are twelve-factor services -- unlike the
/// teacher's REPL client there is no config file source here, only env vars.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub node_id: String,
    pub port: u16,
    /// All node identities in the cluster, including this one, in the order
    /// given by `PEERS`. Membership is static for the lifetime of a run.
    pub peers: Vec<String>,
    /// Address of the external per-node list store the queue cluster treats
    /// as an out-of-scope collaborator. Unused by lock/cache nodes.
    pub store_host: String,

    pub election_timeout_min: Duration,
    pub election_timeout_max: Duration,
    pub heartbeat_interval: Duration,
    /// Per-RPC timeout for the Raft transport (request-vote, append-entries).
    /// Spec §5 requires this strictly below `heartbeat_interval`: an
    /// unreachable peer must not be able to stall `start_election`'s inline
    /// `broadcast` (`src/raft/mod.rs`) for longer than a heartbeat period.
    pub raft_rpc_timeout: Duration,

    pub ring_replicas: usize,
    pub queue_scan_interval: Duration,
    pub queue_ack_timeout: Duration,

    pub cache_capacity: usize,
}

impl NodeConfig {
    pub fn from_env() -> Result<Self> {
        let raw = RawConfig::load()?;

        let peers: Vec<String> = if raw.peers.trim().is_empty() {
            Vec::new()
        } else {
            raw.peers.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect()
        };

        if !peers.is_empty() && !peers.iter().any(|p| p == &raw.node_id) {
            return Err(Error::Validation(format!(
                "PEERS ({:?}) does not include NODE_ID ({})",
                peers, raw.node_id
            )));
        }

        validate_raft_rpc_timeout(raw.raft_rpc_timeout_ms, raw.heartbeat_interval_ms)?;

        Ok(NodeConfig {
            node_id: raw.node_id,
            port: raw.port,
            peers,
            store_host: raw.store_host,
            election_timeout_min: Duration::from_millis(raw.election_timeout_min_ms),
            election_timeout_max: Duration::from_millis(raw.election_timeout_max_ms),
            heartbeat_interval: Duration::from_millis(raw.heartbeat_interval_ms),
            raft_rpc_timeout: Duration::from_millis(raw.raft_rpc_timeout_ms),
            ring_replicas: raw.ring_replicas as usize,
            queue_scan_interval: Duration::from_millis(raw.queue_scan_interval_ms),
            queue_ack_timeout: Duration::from_millis(raw.queue_ack_timeout_ms),
            cache_capacity: raw.cache_capacity as usize,
        })
    }

    /// Peer identities excluding `self`, i.e. the nodes this node must
    /// broadcast to and may forward to.
    pub fn peer_ids(&self) -> Vec<String> {
        self.peers.iter().filter(|p| *p != &self.node_id).cloned().collect()
    }

    /// Maps every peer identity to its base URL, assuming every node in the
    /// cluster listens on the same port (the convention the original
    /// docker-compose deployment used: one hostname per node, identical
    /// ports across the fleet).
    pub fn peer_urls(&self) -> HashMap<String, String> {
        self.peer_ids()
            .into_iter()
            .map(|id| {
                let url = format!("http://{}:{}", id, self.port);
                (id, url)
            })
            .collect()
    }
}

#[derive(Debug, serde::Deserialize)]
struct RawConfig {
    node_id: String,
    port: u16,
    #[serde(default)]
    peers: String,
    #[serde(default = "default_store_host")]
    store_host: String,

    #[serde(default = "default_election_timeout_min_ms")]
    election_timeout_min_ms: u64,
    #[serde(default = "default_election_timeout_max_ms")]
    election_timeout_max_ms: u64,
    #[serde(default = "default_heartbeat_interval_ms")]
    heartbeat_interval_ms: u64,
    #[serde(default = "default_raft_rpc_timeout_ms")]
    raft_rpc_timeout_ms: u64,

    #[serde(default = "default_ring_replicas")]
    ring_replicas: u64,
    #[serde(default = "default_queue_scan_interval_ms")]
    queue_scan_interval_ms: u64,
    #[serde(default = "default_queue_ack_timeout_ms")]
    queue_ack_timeout_ms: u64,

    #[serde(default = "default_cache_capacity")]
    cache_capacity: u64,
}

/// Spec §5: the Raft RPC timeout must be strictly below the heartbeat
/// interval, or an unreachable peer could stall `start_election`'s inline
/// broadcast (`src/raft/mod.rs`) for a whole heartbeat period or more.
fn validate_raft_rpc_timeout(raft_rpc_timeout_ms: u64, heartbeat_interval_ms: u64) -> Result<()> {
    if raft_rpc_timeout_ms >= heartbeat_interval_ms {
        return Err(Error::Validation(format!(
            "RAFT_RPC_TIMEOUT_MS ({}) must be strictly less than HEARTBEAT_INTERVAL_MS ({})",
            raft_rpc_timeout_ms, heartbeat_interval_ms
        )));
    }
    Ok(())
}

fn default_store_host() -> String { "localhost".into() }
fn default_election_timeout_min_ms() -> u64 { 150 }
fn default_election_timeout_max_ms() -> u64 { 300 }
fn default_heartbeat_interval_ms() -> u64 { 50 }
fn default_raft_rpc_timeout_ms() -> u64 { 20 }
fn default_ring_replicas() -> u64 { 10 }
fn default_queue_scan_interval_ms() -> u64 { 30_000 }
fn default_queue_ack_timeout_ms() -> u64 { 60_000 }
fn default_cache_capacity() -> u64 { 5 }

impl RawConfig {
    fn load() -> Result<Self> {
        let c = config::Config::builder()
            .set_default("port", 8000)?
            .set_default("peers", "")?
            .set_default("store_host", default_store_host())?
            .set_default("election_timeout_min_ms", default_election_timeout_min_ms())?
            .set_default("election_timeout_max_ms", default_election_timeout_max_ms())?
            .set_default("heartbeat_interval_ms", default_heartbeat_interval_ms())?
            .set_default("raft_rpc_timeout_ms", default_raft_rpc_timeout_ms())?
            .set_default("ring_replicas", default_ring_replicas())?
            .set_default("queue_scan_interval_ms", default_queue_scan_interval_ms())?
            .set_default("queue_ack_timeout_ms", default_queue_ack_timeout_ms())?
            .set_default("cache_capacity", default_cache_capacity())?
            .add_source(config::Environment::default().try_parsing(true))
            .build()?;

        c.try_deserialize().map_err(Error::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peer_urls_excludes_self() {
        let cfg = NodeConfig {
            node_id: "node-a".into(),
            port: 8001,
            peers: vec!["node-a".into(), "node-b".into(), "node-c".into()],
            store_host: "localhost".into(),
            election_timeout_min: Duration::from_millis(150),
            election_timeout_max: Duration::from_millis(300),
            heartbeat_interval: Duration::from_millis(50),
            raft_rpc_timeout: Duration::from_millis(20),
            ring_replicas: 10,
            queue_scan_interval: Duration::from_secs(30),
            queue_ack_timeout: Duration::from_secs(60),
            cache_capacity: 5,
        };
        let urls = cfg.peer_urls();
        assert_eq!(urls.len(), 2);
        assert!(!urls.contains_key("node-a"));
        assert_eq!(urls.get("node-b").unwrap(), "http://node-b:8001");
    }

    #[test]
    fn raft_rpc_timeout_below_heartbeat_interval_is_accepted() {
        assert!(validate_raft_rpc_timeout(20, 50).is_ok());
    }

    #[test]
    fn raft_rpc_timeout_equal_to_heartbeat_interval_is_rejected() {
        assert!(validate_raft_rpc_timeout(50, 50).is_err());
    }

    #[test]
    fn raft_rpc_timeout_above_heartbeat_interval_is_rejected() {
        assert!(validate_raft_rpc_timeout(500, 50).is_err());
    }
}
