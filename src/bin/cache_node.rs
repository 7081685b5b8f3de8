//! Entry point for one MESI cache cluster node.

use std::time::Duration;

use meshcore::cache::{router, CacheNode};
use meshcore::config::NodeConfig;
use meshcore::error::Result;
use meshcore::transport::PeerTransport;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let cfg = NodeConfig::from_env()?;
    let transport = PeerTransport::new(Duration::from_millis(500));
    let node = CacheNode::new(cfg.node_id.clone(), cfg.peer_urls(), transport, cfg.cache_capacity);

    meshcore::http::serve(&cfg.node_id, cfg.port, router(node)).await
}
