//! Shared HTTP plumbing used by all three node kinds: binding and serving an
//! `axum::Router`, in the same shape as the reference `axum::serve(listener,
//! app)` pattern used pack-wide for Raft-style HTTP control planes.

use axum::Router;
use log::info;

use crate::error::Result;

/// Binds `router` to `0.0.0.0:port` and serves it until the process is
/// killed. Each node binary calls this once its router is assembled.
pub async fn serve(node_id: &str, port: u16, router: Router) -> Result<()> {
    let addr = format!("0.0.0.0:{}", port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("[{}] listening on http://{}", node_id, addr);
    axum::serve(listener, router.into_make_service())
        .await
        .map_err(|e| crate::error::Error::Internal(e.to_string()))
}
