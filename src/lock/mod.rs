pub mod state;

use std::sync::Arc;

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use log::warn;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::Mutex;

use crate::error::{Error, Result};
use crate::raft::{AppendEntriesArgs, AppendEntriesReply, RaftElector, RequestVoteArgs, RequestVoteReply};

use self::state::{AcquireOutcome, LockManager, LockMode, ReleaseError, ReleaseOutcome};

/// One node of the lock-manager cluster: a Raft elector driving leadership,
/// plus the lock table that is authoritative only while this node leads
/// (spec §3, §4.4). Both are owned here, not exposed as ambient singletons.
pub struct LockNode {
    pub node_id: String,
    pub elector: Arc<RaftElector>,
    pub state: Mutex<LockManager>,
}

impl LockNode {
    pub fn new(node_id: String, elector: Arc<RaftElector>) -> Arc<Self> {
        Arc::new(LockNode { node_id, elector, state: Mutex::new(LockManager::new()) })
    }
}

#[derive(Debug, Deserialize)]
struct AcquireRequest {
    resource_id: String,
    client_id: String,
    lock_type: LockMode,
}

#[derive(Debug, Deserialize)]
struct ReleaseRequest {
    resource_id: String,
    client_id: String,
}

pub fn router(node: Arc<LockNode>) -> Router {
    Router::new()
        .route("/acquire", post(handle_acquire))
        .route("/release", post(handle_release))
        .route("/locks", get(handle_locks))
        .route("/request-vote", post(handle_request_vote))
        .route("/append-entries", post(handle_append_entries))
        .with_state(node)
}

fn require_non_empty(value: &str, field: &str) -> Result<()> {
    if value.trim().is_empty() {
        Err(Error::Validation(format!("{} must not be empty", field)))
    } else {
        Ok(())
    }
}

async fn handle_acquire(
    State(node): State<Arc<LockNode>>,
    Json(req): Json<AcquireRequest>,
) -> Result<Json<Value>> {
    require_non_empty(&req.resource_id, "resource_id")?;
    require_non_empty(&req.client_id, "client_id")?;

    // Checked once before taking the lock-table mutex (cheap rejection of
    // the common case) and once more just before mutating, narrowing the
    // window in which a step-down could race a mutation, per spec §5.
    if !node.elector.is_leader().await {
        return Ok(Json(json!({"status": "error", "message": "not-leader"})));
    }

    let mut table = node.state.lock().await;
    if !node.elector.is_leader().await {
        return Ok(Json(json!({"status": "error", "message": "not-leader"})));
    }

    let outcome = table.acquire(&req.resource_id, &req.client_id, req.lock_type);
    let response = match outcome {
        AcquireOutcome::Granted => json!({"status": "success", "message": "lock granted"}),
        AcquireOutcome::AlreadyHeld => json!({"status": "success", "message": "already held"}),
        AcquireOutcome::Waiting => json!({"status": "waiting", "message": "enqueued"}),
        AcquireOutcome::DeadlockRejected => {
            warn!("[{}] rejected acquire({}, {}) -- would deadlock", node.node_id, req.resource_id, req.client_id);
            json!({"status": "error", "message": "deadlock-rejected"})
        }
    };
    Ok(Json(response))
}

async fn handle_release(
    State(node): State<Arc<LockNode>>,
    Json(req): Json<ReleaseRequest>,
) -> Result<Json<Value>> {
    require_non_empty(&req.resource_id, "resource_id")?;
    require_non_empty(&req.client_id, "client_id")?;

    if !node.elector.is_leader().await {
        return Ok(Json(json!({"status": "error", "message": "not-leader"})));
    }

    let mut table = node.state.lock().await;
    if !node.elector.is_leader().await {
        return Ok(Json(json!({"status": "error", "message": "not-leader"})));
    }

    let response = match table.release(&req.resource_id, &req.client_id) {
        Ok(ReleaseOutcome::Released) => json!({"status": "success", "message": "released"}),
        Err(ReleaseError::UnknownKey) => json!({"status": "error", "message": "unknown-resource"}),
        Err(ReleaseError::NotHolder) => json!({"status": "error", "message": "client-does-not-hold"}),
    };
    Ok(Json(response))
}

async fn handle_locks(State(node): State<Arc<LockNode>>) -> Json<Value> {
    let table = node.state.lock().await;
    Json(json!({
        "node_id": node.node_id,
        "raft_state": node.elector.role().await.as_str(),
        "locks": table.locks_snapshot(),
        "dependencies": table.dependencies_snapshot(),
    }))
}

async fn handle_request_vote(
    State(node): State<Arc<LockNode>>,
    Json(args): Json<RequestVoteArgs>,
) -> Json<RequestVoteReply> {
    Json(node.elector.handle_request_vote(args).await)
}

async fn handle_append_entries(
    State(node): State<Arc<LockNode>>,
    Json(args): Json<AppendEntriesArgs>,
) -> Json<AppendEntriesReply> {
    Json(node.elector.handle_append_entries(args).await)
}
