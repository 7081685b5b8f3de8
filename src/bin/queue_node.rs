//! Entry point for one queue cluster node: serves the produce/consume/ack
//! API routed by consistent hashing, and runs the background reconciliation
//! loop that requeues unacked deliveries.

use std::time::Duration;

use meshcore::config::NodeConfig;
use meshcore::error::{Error, Result};
use meshcore::queue::{router, QueueNode};
use meshcore::transport::PeerTransport;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let cfg = NodeConfig::from_env()?;
    if cfg.peers.is_empty() {
        return Err(Error::Validation("PEERS must list every queue node, including this one".into()));
    }

    let transport = PeerTransport::new(Duration::from_millis(500));
    let node = QueueNode::new(
        cfg.node_id.clone(),
        cfg.peers.clone(),
        cfg.peer_urls(),
        cfg.ring_replicas,
        transport,
        cfg.queue_ack_timeout,
    );

    tokio::spawn(node.clone().run_reconciliation(cfg.queue_scan_interval));

    meshcore::http::serve(&cfg.node_id, cfg.port, router(node)).await
}
