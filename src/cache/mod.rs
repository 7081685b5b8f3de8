//! The MESI cache engine (spec §4.6): per-key local value and coherence
//! state, local read/write handlers, and bus-snoop handlers for remote
//! read-miss and invalidate, all serialized per node behind one coherence
//! lock -- the node-wide option spec §5 explicitly allows.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Instant;

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::Mutex;

use crate::error::Result;
use crate::transport::{PeerReply, PeerTransport};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CoherenceState {
    M,
    E,
    S,
    I,
}

impl CoherenceState {
    fn is_valid(&self) -> bool {
        !matches!(self, CoherenceState::I)
    }
}

struct CacheLine {
    value: String,
    state: CoherenceState,
}

/// The purely local half of the engine: no network calls here, so it can be
/// held behind one `tokio::sync::Mutex` across an entire broadcast without
/// deadlocking on itself.
struct CacheEngine {
    capacity: usize,
    values: HashMap<String, CacheLine>,
    recency: VecDeque<String>,
}

impl CacheEngine {
    fn new(capacity: usize) -> Self {
        CacheEngine { capacity, values: HashMap::new(), recency: VecDeque::new() }
    }

    fn current_state(&self, key: &str) -> CoherenceState {
        self.values.get(key).map(|l| l.state).unwrap_or(CoherenceState::I)
    }

    fn hit(&mut self, key: &str) -> Option<(String, CoherenceState)> {
        let state = self.values.get(key)?.state;
        if !state.is_valid() {
            return None;
        }
        self.touch(key);
        self.values.get(key).map(|l| (l.value.clone(), l.state))
    }

    fn adopt(&mut self, key: &str, value: String, state: CoherenceState) {
        self.values.insert(key.to_string(), CacheLine { value, state });
        self.touch(key);
        self.evict_if_needed();
    }

    fn touch(&mut self, key: &str) {
        self.recency.retain(|k| k != key);
        self.recency.push_back(key.to_string());
    }

    fn evict_if_needed(&mut self) {
        while self.values.len() > self.capacity {
            match self.recency.pop_front() {
                Some(oldest) => {
                    self.values.remove(&oldest);
                }
                None => break,
            }
        }
    }

    /// Snoop handler for a peer's read-miss: downgrade a valid local line to
    /// `S` and hand back its data; reply `I` if we don't have it. Per spec
    /// §9 this intentionally skips write-back of a dirty `M` line.
    fn snoop_read_miss(&mut self, key: &str) -> Option<String> {
        let line = self.values.get_mut(key)?;
        if !line.state.is_valid() {
            return None;
        }
        line.state = CoherenceState::S;
        Some(line.value.clone())
    }

    /// Snoop handler for a peer's invalidate: mark `I` if present, keeping
    /// the value (eviction is LRU-driven only, never snoop-driven).
    fn snoop_invalidate(&mut self, key: &str) {
        if let Some(line) = self.values.get_mut(key) {
            line.state = CoherenceState::I;
        }
    }

    fn len(&self) -> usize {
        self.values.len()
    }
}

/// Deterministic simulated backing store: every node computes the same
/// "memory" content for a given key without any coordination, matching the
/// spec's "identical seed across nodes" requirement for `mainMemory`.
fn main_memory_value(key: &str) -> String {
    format!("seed::{}", key)
}

pub struct CacheNode {
    pub node_id: String,
    peer_urls: HashMap<String, String>,
    transport: PeerTransport,
    engine: Mutex<CacheEngine>,
}

impl CacheNode {
    pub fn new(
        node_id: String,
        peer_urls: HashMap<String, String>,
        transport: PeerTransport,
        capacity: usize,
    ) -> Arc<Self> {
        Arc::new(CacheNode { node_id, peer_urls, transport, engine: Mutex::new(CacheEngine::new(capacity)) })
    }

    /// Local read (spec §4.6). Holds the coherence lock for the whole
    /// operation, including the read-miss broadcast, so a concurrent snoop
    /// for the same key can never observe a torn transition.
    async fn read(&self, key: &str) -> (String, CoherenceState) {
        let mut engine = self.engine.lock().await;
        if let Some(hit) = engine.hit(key) {
            return hit;
        }

        let replies = self
            .transport
            .broadcast(&format!("/bus/read_miss/{}", key), &self.peer_urls, &json!({"key": key}))
            .await;

        for reply in replies.into_values() {
            if let PeerReply::Ok(value) = reply {
                if let Ok(parsed) = serde_json::from_value::<BusReadMissReply>(value) {
                    if let Some(data) = parsed.data {
                        engine.adopt(key, data.clone(), CoherenceState::S);
                        return (data, CoherenceState::S);
                    }
                }
            }
        }

        let value = main_memory_value(key);
        engine.adopt(key, value.clone(), CoherenceState::E);
        (value, CoherenceState::E)
    }

    /// Local write (spec §4.6). Broadcasts invalidate first when the line
    /// isn't already exclusively ours, under the same node-wide lock.
    async fn write(&self, key: &str, value: String) -> CoherenceState {
        let mut engine = self.engine.lock().await;
        let prior = engine.current_state(key);
        if matches!(prior, CoherenceState::S | CoherenceState::I) {
            self.transport
                .broadcast(&format!("/bus/invalidate/{}", key), &self.peer_urls, &json!({"key": key}))
                .await;
        }
        engine.adopt(key, value, CoherenceState::M);
        CoherenceState::M
    }

    async fn bus_read_miss(&self, key: &str) -> Option<String> {
        let mut engine = self.engine.lock().await;
        engine.snoop_read_miss(key)
    }

    async fn bus_invalidate(&self, key: &str) {
        let mut engine = self.engine.lock().await;
        engine.snoop_invalidate(key);
    }

    async fn len(&self) -> usize {
        self.engine.lock().await.len()
    }
}

#[derive(Debug, Deserialize)]
struct WriteRequest {
    value: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct BusReadMissReply {
    state: CoherenceState,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<String>,
}

pub fn router(node: Arc<CacheNode>) -> Router {
    Router::new()
        .route("/read/:key", get(handle_read))
        .route("/write/:key", post(handle_write))
        .route("/bus/read_miss/:key", post(handle_bus_read_miss))
        .route("/bus/invalidate/:key", post(handle_bus_invalidate))
        .route("/status", get(handle_status))
        .route("/metrics", get(handle_metrics))
        .with_state(node)
}

async fn handle_read(State(node): State<Arc<CacheNode>>, Path(key): Path<String>) -> Json<Value> {
    let start = Instant::now();
    let (value, state) = node.read(&key).await;
    Json(json!({
        "key": key,
        "value": value,
        "state": state,
        "response_time_ms": elapsed_ms(start),
    }))
}

async fn handle_write(
    State(node): State<Arc<CacheNode>>,
    Path(key): Path<String>,
    Json(req): Json<WriteRequest>,
) -> Result<Json<Value>> {
    let start = Instant::now();
    let state = node.write(&key, req.value.clone()).await;
    Ok(Json(json!({
        "key": key,
        "value": req.value,
        "state": state,
        "response_time_ms": elapsed_ms(start),
    })))
}

async fn handle_bus_read_miss(
    State(node): State<Arc<CacheNode>>,
    Path(key): Path<String>,
) -> Json<BusReadMissReply> {
    match node.bus_read_miss(&key).await {
        Some(data) => Json(BusReadMissReply { state: CoherenceState::S, data: Some(data) }),
        None => Json(BusReadMissReply { state: CoherenceState::I, data: None }),
    }
}

async fn handle_bus_invalidate(State(node): State<Arc<CacheNode>>, Path(key): Path<String>) -> Json<Value> {
    node.bus_invalidate(&key).await;
    Json(json!({"status": "acked"}))
}

async fn handle_status(State(node): State<Arc<CacheNode>>) -> Json<Value> {
    Json(json!({
        "node_id": node.node_id,
        "cached_keys": node.len().await,
        "peers": node.peer_urls.keys().collect::<Vec<_>>(),
    }))
}

async fn handle_metrics(State(node): State<Arc<CacheNode>>) -> Json<Value> {
    Json(json!({
        "node_id": node.node_id,
        "cached_keys": node.len().await,
    }))
}

fn elapsed_ms(start: Instant) -> u128 {
    start.elapsed().as_micros().max(1) as u128 / 1000
}
