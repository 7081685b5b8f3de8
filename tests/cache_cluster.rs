//! End-to-end MESI scenario (spec §8): write on node 1 goes `M`; a read on
//! node 2 downgrades node 1 to `S` and caches `S/100` on node 2; a write on
//! node 2 invalidates node 1 and goes `M/200` on node 2; node 1's next read
//! misses, fetches from node 2's snoop, and both end at `S/200`.

use std::collections::HashMap;
use std::time::Duration;

use meshcore::cache::{router, CacheNode};
use meshcore::transport::PeerTransport;
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use tokio::net::TcpListener;

async fn bind() -> (TcpListener, String) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    (listener, format!("http://{}", addr))
}

async fn spawn_cache_cluster(ids: &[&str]) -> HashMap<String, String> {
    let mut listeners = Vec::new();
    let mut base_urls = HashMap::new();
    for id in ids {
        let (listener, url) = bind().await;
        base_urls.insert(id.to_string(), url);
        listeners.push((id.to_string(), listener));
    }

    for (id, listener) in listeners {
        let peer_urls: HashMap<String, String> =
            base_urls.iter().filter(|(k, _)| *k != &id).map(|(k, v)| (k.clone(), v.clone())).collect();
        let transport = PeerTransport::new(Duration::from_millis(200));
        let node = CacheNode::new(id.clone(), peer_urls, transport, 5);
        let app = router(node).into_make_service();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
    }

    base_urls
}

async fn write(client: &reqwest::Client, url: &str, key: &str, value: &str) -> Value {
    client
        .post(format!("{}/write/{}", url, key))
        .json(&json!({"value": value}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap()
}

async fn read(client: &reqwest::Client, url: &str, key: &str) -> Value {
    client.get(format!("{}/read/{}", url, key)).send().await.unwrap().json().await.unwrap()
}

#[tokio::test]
async fn mesi_invalidate_walkthrough() {
    let base_urls = spawn_cache_cluster(&["node1", "node2", "node3"]).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    let client = reqwest::Client::new();
    let node1 = &base_urls["node1"];
    let node2 = &base_urls["node2"];

    let w1 = write(&client, node1, "K", "100").await;
    assert_eq!(w1["state"], "M");

    let r1 = read(&client, node2, "K").await;
    assert_eq!(r1["value"], "100");
    assert_eq!(r1["state"], "S");

    // node1 should have been snoop-downgraded to S too.
    let node1_peek: Value = reqwest::Client::new()
        .post(format!("{}/bus/read_miss/K", node1))
        .json(&json!({"key": "K"}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(node1_peek["state"], "S");

    let w2 = write(&client, node2, "K", "200").await;
    assert_eq!(w2["state"], "M");
    assert_eq!(w2["value"], "200");

    // node1's copy is now invalid; its next read misses and pulls 200 from node2.
    let r2 = read(&client, node1, "K").await;
    assert_eq!(r2["value"], "200");
    assert_eq!(r2["state"], "S");

    let r3 = read(&client, node2, "K").await;
    assert_eq!(r3["value"], "200");
    assert_eq!(r3["state"], "S");
}

#[tokio::test]
async fn lru_bound_holds_across_the_http_surface() {
    let base_urls = spawn_cache_cluster(&["solo"]).await;
    let client = reqwest::Client::new();
    let url = &base_urls["solo"];

    for i in 0..10 {
        write(&client, url, &format!("k{}", i), &i.to_string()).await;
    }

    let status: Value = client.get(format!("{}/status", url)).send().await.unwrap().json().await.unwrap();
    assert!(status["cached_keys"].as_u64().unwrap() <= 5);
}
