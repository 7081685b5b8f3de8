//! Peer RPC transport (spec §4.1): `broadcast` fans a JSON payload out to
//! every peer concurrently and returns one slot per peer, never failing the
//! call itself -- an unreachable peer becomes `PeerReply::Unreachable`
//! rather than aborting the broadcast. There are no retries here; callers
//! that need "retry on a different node" (e.g. a lock client after
//! `not-leader`) implement that themselves, the way the teacher's
//! `KvClient::execute` retries against `last_leader` rather than the
//! transport doing it underneath them.

use std::collections::HashMap;
use std::time::Duration;

use futures::future::join_all;
use serde::Serialize;
use serde_json::Value;

use crate::error::{Error, Result};

#[derive(Debug, Clone)]
pub enum PeerReply {
    /// The peer replied 200 with a JSON body.
    Ok(Value),
    /// The peer replied 200 with an empty body.
    Empty,
    /// The peer could not be reached, timed out, or sent something that
    /// doesn't parse as JSON.
    Unreachable,
}

impl PeerReply {
    pub fn as_object(&self) -> Option<&serde_json::Map<String, Value>> {
        match self {
            PeerReply::Ok(Value::Object(map)) => Some(map),
            _ => None,
        }
    }
}

#[derive(Clone)]
pub struct PeerTransport {
    client: reqwest::Client,
    timeout: Duration,
}

impl PeerTransport {
    pub fn new(timeout: Duration) -> Self {
        PeerTransport {
            client: reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .expect("reqwest client builds with a plain timeout"),
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Sends `payload` to `url` and returns the decoded reply. A transport
    /// error here (unreachable peer, timeout) propagates to the caller as
    /// `Error::Transport`, since the caller is usually forwarding a single
    /// client request and has nobody else to sentinel to.
    pub async fn send<T: Serialize + ?Sized>(&self, url: &str, payload: &T) -> Result<Value> {
        let response = self
            .client
            .post(url)
            .json(payload)
            .send()
            .await
            .map_err(|e| Error::Transport(e.to_string()))?;

        if !response.status().is_success() {
            return Err(Error::Transport(format!("{} returned {}", url, response.status())));
        }

        let bytes = response.bytes().await.map_err(|e| Error::Transport(e.to_string()))?;
        if bytes.is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_slice(&bytes).map_err(|e| Error::Transport(e.to_string()))
    }

    /// Broadcasts `payload` to every URL in `peer_urls`, concurrently,
    /// returning one `PeerReply` per peer keyed by node id. Never returns an
    /// `Err`: a peer that fails simply gets `PeerReply::Unreachable`.
    pub async fn broadcast<T: Serialize>(
        &self,
        path: &str,
        peer_urls: &HashMap<String, String>,
        payload: &T,
    ) -> HashMap<String, PeerReply> {
        let calls = peer_urls.iter().map(|(node_id, base_url)| {
            let node_id = node_id.clone();
            let url = format!("{}{}", base_url, path);
            let this = self.clone();
            async move {
                let reply = match this.send(&url, payload).await {
                    Ok(Value::Null) => PeerReply::Empty,
                    Ok(value) => PeerReply::Ok(value),
                    Err(_) => PeerReply::Unreachable,
                };
                (node_id, reply)
            }
        });

        join_all(calls).await.into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn broadcast_to_no_peers_is_empty() {
        let transport = PeerTransport::new(Duration::from_millis(50));
        let replies = transport.broadcast("/ping", &HashMap::new(), &serde_json::json!({})).await;
        assert!(replies.is_empty());
    }

    #[tokio::test]
    async fn broadcast_marks_unreachable_peers() {
        let transport = PeerTransport::new(Duration::from_millis(100));
        let mut peers = HashMap::new();
        // Nothing listens on this port -- every call should come back as
        // Unreachable rather than panicking or propagating an error.
        peers.insert("ghost".to_string(), "http://127.0.0.1:1".to_string());
        let replies = transport.broadcast("/ping", &peers, &serde_json::json!({})).await;
        assert!(matches!(replies.get("ghost"), Some(PeerReply::Unreachable)));
    }
}
