//! Smoke-test driver descended from the out-of-scope `benchmark.py`.
//!
//! This is deliberately NOT a throughput benchmark: the original's
//! requests-per-second formula divided a fixed request count by wall-clock
//! time measured across a warm and cold mix of nodes and isn't reproduced
//! here (see DESIGN.md). What it keeps is the retry-against-last-known-leader
//! idiom from the teacher's `client.rs`: point it at a lock cluster and it
//! hunts for the current leader the same way a real client would.
//!
//! Usage: `bench <lock|queue|cache> <node-url> [node-url ...]`

use std::env;
use std::time::Duration;

use serde_json::{json, Value};

#[tokio::main]
async fn main() {
    env_logger::init();

    let mut args = env::args().skip(1);
    let Some(mode) = args.next() else {
        eprintln!("usage: bench <lock|queue|cache> <node-url> [node-url ...]");
        std::process::exit(2);
    };
    let nodes: Vec<String> = args.collect();
    if nodes.is_empty() {
        eprintln!("need at least one node URL");
        std::process::exit(2);
    }

    let client = reqwest::Client::builder().timeout(Duration::from_secs(2)).build().expect("client builds");

    match mode.as_str() {
        "lock" => smoke_lock(&client, &nodes).await,
        "queue" => smoke_queue(&client, &nodes).await,
        "cache" => smoke_cache(&client, &nodes).await,
        other => {
            eprintln!("unknown mode '{}'", other);
            std::process::exit(2);
        }
    }
}

/// Acquires then releases a lock, trying each node in turn and remembering
/// which one answered last -- the same "stick with `last_leader` until it
/// stops working" idiom as the teacher's KV client.
async fn smoke_lock(client: &reqwest::Client, nodes: &[String]) {
    let mut last_leader = 0usize;
    let body = json!({"resource_id": "bench", "client_id": "bench-client", "lock_type": "exclusive"});

    for attempt in 0..nodes.len() {
        let idx = (last_leader + attempt) % nodes.len();
        let url = format!("{}/acquire", nodes[idx]);
        match client.post(&url).json(&body).send().await {
            Ok(resp) => match resp.json::<Value>().await {
                Ok(reply) if reply["status"] != "error" => {
                    println!("acquire via {} -> {}", nodes[idx], reply);
                    last_leader = idx;
                    release(client, &nodes[idx]).await;
                    return;
                }
                Ok(reply) => println!("{} declined: {}", nodes[idx], reply),
                Err(e) => println!("{} returned unparsable body: {}", nodes[idx], e),
            },
            Err(e) => println!("{} unreachable: {}", nodes[idx], e),
        }
    }
    eprintln!("no node accepted the acquire");
}

async fn release(client: &reqwest::Client, leader_url: &str) {
    let body = json!({"resource_id": "bench", "client_id": "bench-client"});
    let url = format!("{}/release", leader_url);
    match client.post(&url).json(&body).send().await {
        Ok(resp) => println!("release -> {:?}", resp.json::<Value>().await.ok()),
        Err(e) => println!("release failed: {}", e),
    }
}

async fn smoke_queue(client: &reqwest::Client, nodes: &[String]) {
    let produce = json!({"queue": "bench", "message": "hello"});
    let node = &nodes[0];
    let produced = client.post(format!("{}/produce", node)).json(&produce).send().await;
    println!("produce -> {:?}", produced.ok());

    let consume = json!({"queue": "bench", "consumer_id": "bench-client"});
    match client.post(format!("{}/consume", node)).json(&consume).send().await {
        Ok(resp) => {
            let reply: Value = resp.json().await.unwrap_or(Value::Null);
            println!("consume -> {}", reply);
            if let Some(message_id) = reply.get("message_id").and_then(Value::as_str) {
                let ack = json!({"message_id": message_id});
                let acked = client.post(format!("{}/ack", node)).json(&ack).send().await;
                println!("ack -> {:?}", acked.ok());
            }
        }
        Err(e) => println!("consume failed: {}", e),
    }
}

async fn smoke_cache(client: &reqwest::Client, nodes: &[String]) {
    let node = &nodes[0];
    let write = json!({"value": "42"});
    let written = client.post(format!("{}/write/bench-key", node)).json(&write).send().await;
    println!("write -> {:?}", written.ok());

    let read = client.get(format!("{}/read/bench-key", node)).send().await;
    match read {
        Ok(resp) => println!("read -> {:?}", resp.json::<Value>().await.ok()),
        Err(e) => println!("read failed: {}", e),
    }
}
