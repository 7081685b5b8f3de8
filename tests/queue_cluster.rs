//! End-to-end queue-cluster scenarios (spec §8): consistent-hash routing
//! stability across nodes, and at-least-once delivery via reconciliation
//! after an ack timeout.

use std::collections::HashMap;
use std::time::Duration;

use meshcore::queue::{router, QueueNode};
use meshcore::transport::PeerTransport;
use pretty_assertions::{assert_eq, assert_ne};
use serde_json::{json, Value};
use tokio::net::TcpListener;

async fn bind() -> (TcpListener, String) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    (listener, format!("http://{}", addr))
}

async fn spawn_queue_cluster(ids: &[&str], ack_timeout: Duration, scan_interval: Duration) -> HashMap<String, String> {
    let mut listeners = Vec::new();
    let mut base_urls = HashMap::new();
    for id in ids {
        let (listener, url) = bind().await;
        base_urls.insert(id.to_string(), url);
        listeners.push((id.to_string(), listener));
    }

    let all_nodes: Vec<String> = ids.iter().map(|s| s.to_string()).collect();

    for (id, listener) in listeners {
        let peer_urls: HashMap<String, String> =
            base_urls.iter().filter(|(k, _)| *k != &id).map(|(k, v)| (k.clone(), v.clone())).collect();
        let transport = PeerTransport::new(Duration::from_millis(200));
        let node = QueueNode::new(id.clone(), all_nodes.clone(), peer_urls, 10, transport, ack_timeout);
        tokio::spawn(node.clone().run_reconciliation(scan_interval));

        let app = router(node).into_make_service();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
    }

    base_urls
}

#[tokio::test]
async fn hash_routing_is_stable_regardless_of_entry_node() {
    let base_urls = spawn_queue_cluster(&["qa", "qb", "qc"], Duration::from_secs(60), Duration::from_secs(60)).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let client = reqwest::Client::new();
    let mut handled_by = None;
    for (_, url) in &base_urls {
        let body = json!({"queue": "orders", "message": "m1"});
        let reply: Value = client.post(format!("{}/produce", url)).json(&body).send().await.unwrap().json().await.unwrap();
        assert_eq!(reply["status"], "success");
        match &handled_by {
            None => handled_by = Some(reply["handled_by"].clone()),
            Some(first) => assert_eq!(&reply["handled_by"], first, "every entry node should route to the same owner"),
        }
    }
}

#[tokio::test]
async fn at_least_once_redelivers_after_ack_timeout() {
    let ack_timeout = Duration::from_millis(60);
    let scan_interval = Duration::from_millis(20);
    let base_urls = spawn_queue_cluster(&["qa", "qb", "qc"], ack_timeout, scan_interval).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let client = reqwest::Client::new();
    let entry = base_urls.values().next().unwrap().clone();

    let produce = json!({"queue": "jobs", "message": "m1"});
    let reply: Value = client.post(format!("{}/produce", entry)).json(&produce).send().await.unwrap().json().await.unwrap();
    assert_eq!(reply["status"], "success");

    let consume = json!({"queue": "jobs", "consumer_id": "worker-1"});
    let first: Value = client.post(format!("{}/consume", entry)).json(&consume).send().await.unwrap().json().await.unwrap();
    assert_eq!(first["status"], "success");
    assert_eq!(first["message"], "m1");
    let first_id = first["message_id"].as_str().unwrap().to_string();

    // Don't ack -- wait past the ack timeout and a reconciliation scan.
    tokio::time::sleep(ack_timeout + scan_interval * 3).await;

    let second: Value = client.post(format!("{}/consume", entry)).json(&consume).send().await.unwrap().json().await.unwrap();
    assert_eq!(second["status"], "success");
    assert_eq!(second["message"], "m1");
    assert_ne!(second["message_id"].as_str().unwrap(), first_id);
}
