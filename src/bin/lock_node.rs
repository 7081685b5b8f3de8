//! Entry point for one lock-manager cluster node: boots a Raft elector over
//! the configured peer set and serves the lock HTTP API on top of it.

use meshcore::config::NodeConfig;
use meshcore::error::Result;
use meshcore::lock::{router, LockNode};
use meshcore::raft::{RaftElector, Timing};
use meshcore::transport::PeerTransport;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let cfg = NodeConfig::from_env()?;
    // Spec §5: the Raft transport timeout must stay strictly below the
    // heartbeat interval, enforced by `NodeConfig::from_env` -- otherwise
    // an unreachable peer could stall the inline `broadcast` in
    // `start_election` for a whole heartbeat period or more.
    let transport = PeerTransport::new(cfg.raft_rpc_timeout);
    let timing = Timing {
        election_timeout_min: cfg.election_timeout_min,
        election_timeout_max: cfg.election_timeout_max,
        heartbeat_interval: cfg.heartbeat_interval,
    };

    let elector = RaftElector::new(cfg.node_id.clone(), cfg.peer_urls(), transport, timing);
    elector.start().await;

    let node = LockNode::new(cfg.node_id.clone(), elector);
    meshcore::http::serve(&cfg.node_id, cfg.port, router(node)).await
}
