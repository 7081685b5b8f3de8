pub mod store;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use log::{info, warn};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::hashing::ConsistentHashRing;
use crate::transport::PeerTransport;

use self::store::QueueStore;

struct PendingAck {
    queue: String,
    payload: String,
    #[allow(dead_code)]
    consumer: String,
    delivered_at: Instant,
}

/// One node of the message-queue cluster (spec §4.5): consistent-hash
/// routing over a static node set, at-least-once delivery via a
/// `pendingAcks` table, and a periodic reconciliation task that requeues
/// anything left unacked past the timeout.
pub struct QueueNode {
    pub node_id: String,
    all_nodes: Vec<String>,
    peer_urls: HashMap<String, String>,
    ring: ConsistentHashRing,
    transport: PeerTransport,
    store: QueueStore,
    pending_acks: Mutex<HashMap<Uuid, PendingAck>>,
    ack_timeout: Duration,
}

impl QueueNode {
    pub fn new(
        node_id: String,
        all_nodes: Vec<String>,
        peer_urls: HashMap<String, String>,
        ring_replicas: usize,
        transport: PeerTransport,
        ack_timeout: Duration,
    ) -> Arc<Self> {
        let mut ring = ConsistentHashRing::new(ring_replicas);
        for n in &all_nodes {
            ring.add(n);
        }
        Arc::new(QueueNode {
            node_id,
            all_nodes,
            peer_urls,
            ring,
            transport,
            store: QueueStore::new(),
            pending_acks: Mutex::new(HashMap::new()),
            ack_timeout,
        })
    }

    fn owner_of(&self, queue: &str) -> Option<&str> {
        self.ring.lookup(queue)
    }

    /// Background reconciliation loop (spec §4.5): every `scan_interval`,
    /// any pending ack older than `ack_timeout` is dropped and its payload
    /// is requeued at the head of its list.
    pub async fn run_reconciliation(self: Arc<Self>, scan_interval: Duration) {
        loop {
            tokio::time::sleep(scan_interval).await;
            self.reconcile_once().await;
        }
    }

    async fn reconcile_once(&self) {
        let expired: Vec<Uuid> = {
            let acks = self.pending_acks.lock().await;
            let now = Instant::now();
            acks.iter()
                .filter(|(_, ack)| now.duration_since(ack.delivered_at) > self.ack_timeout)
                .map(|(id, _)| *id)
                .collect()
        };

        if expired.is_empty() {
            return;
        }

        let mut acks = self.pending_acks.lock().await;
        for id in expired {
            if let Some(ack) = acks.remove(&id) {
                warn!("[{}] requeued unacked message {} to '{}'", self.node_id, id, ack.queue);
                self.store.push_head(&ack.queue, ack.payload);
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct ProduceRequest {
    queue: String,
    message: String,
}

#[derive(Debug, Deserialize)]
struct ConsumeRequest {
    queue: String,
    #[serde(default = "default_consumer")]
    consumer_id: String,
}

fn default_consumer() -> String {
    "anonymous".to_string()
}

#[derive(Debug, Deserialize)]
struct AckRequest {
    message_id: String,
}

pub fn router(node: Arc<QueueNode>) -> Router {
    Router::new()
        .route("/produce", post(handle_produce))
        .route("/consume", post(handle_consume))
        .route("/ack", post(handle_ack))
        .route("/status", get(handle_status))
        .with_state(node)
}

async fn handle_produce(
    State(node): State<Arc<QueueNode>>,
    Json(req): Json<ProduceRequest>,
) -> Result<Json<Value>> {
    if req.queue.trim().is_empty() {
        return Err(Error::Validation("queue must not be empty".into()));
    }

    let Some(owner) = node.owner_of(&req.queue) else {
        return Err(Error::Internal("hash ring has no nodes".into()));
    };

    if owner == node.node_id {
        node.store.push_tail(&req.queue, req.message.clone());
        info!("[{}] produced to '{}'", node.node_id, req.queue);
        Ok(Json(json!({"status": "success", "handled_by": node.node_id})))
    } else {
        let url = node.peer_urls.get(owner).ok_or_else(|| {
            Error::Internal(format!("unknown peer url for owner {}", owner))
        })?;
        let reply = node
            .transport
            .send(&format!("{}/produce", url), &json!({"queue": req.queue, "message": req.message}))
            .await?;
        Ok(Json(reply))
    }
}

async fn handle_consume(
    State(node): State<Arc<QueueNode>>,
    Json(req): Json<ConsumeRequest>,
) -> Result<Json<Value>> {
    if req.queue.trim().is_empty() {
        return Err(Error::Validation("queue must not be empty".into()));
    }

    let Some(owner) = node.owner_of(&req.queue) else {
        return Err(Error::Internal("hash ring has no nodes".into()));
    };

    if owner == node.node_id {
        match node.store.pop_head(&req.queue) {
            None => Ok(Json(json!({"status": "empty", "message": Value::Null, "handled_by": node.node_id}))),
            Some(payload) => {
                let message_id = Uuid::new_v4();
                node.pending_acks.lock().await.insert(
                    message_id,
                    PendingAck {
                        queue: req.queue.clone(),
                        payload: payload.clone(),
                        consumer: req.consumer_id.clone(),
                        delivered_at: Instant::now(),
                    },
                );
                Ok(Json(json!({
                    "status": "success",
                    "message": payload,
                    "message_id": message_id.to_string(),
                    "handled_by": node.node_id,
                })))
            }
        }
    } else {
        let url = node.peer_urls.get(owner).ok_or_else(|| {
            Error::Internal(format!("unknown peer url for owner {}", owner))
        })?;
        let reply = node
            .transport
            .send(
                &format!("{}/consume", url),
                &json!({"queue": req.queue, "consumer_id": req.consumer_id}),
            )
            .await?;
        Ok(Json(reply))
    }
}

async fn handle_ack(
    State(node): State<Arc<QueueNode>>,
    Json(req): Json<AckRequest>,
) -> Result<Json<Value>> {
    let message_id = Uuid::parse_str(&req.message_id)
        .map_err(|_| Error::Validation("message_id is not a valid uuid".into()))?;

    let mut acks = node.pending_acks.lock().await;
    match acks.remove(&message_id) {
        Some(_) => Ok(Json(json!({"status": "success", "message": "acknowledged", "handled_by": node.node_id}))),
        None => Ok(Json(json!({"status": "error", "message": "message-not-found"}))),
    }
}

async fn handle_status(State(node): State<Arc<QueueNode>>) -> Json<Value> {
    let pending = node.pending_acks.lock().await.len();
    Json(json!({
        "node_id": node.node_id,
        "queues": node.store.lengths(),
        "pending_acks": pending,
        "hash_ring_nodes": node.all_nodes,
    }))
}
