//! End-to-end tests against a real listener.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use futures::StreamExt;
use serde_json::{Value, json};
use tether_runtime::Collaborators;
use tether_server::TetherServer;
use tether_settings::TetherSettings;
use tokio::task::JoinHandle;

async fn boot() -> (TetherServer, SocketAddr, JoinHandle<()>, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let mut settings = TetherSettings::default();
    settings.server.port = 0;
    settings.orchestrator.tick_interval_ms = 10;
    settings.compaction.checkpoint_path = dir.path().join("checkpoint.json");
    let server = TetherServer::new(settings, Collaborators::none());
    let (addr, handle) = server.listen().await.unwrap();
    (server, addr, handle, dir)
}

#[tokio::test]
async fn health_over_http() {
    let (server, addr, handle, _dir) = boot().await;
    let body: Value = reqwest::get(format!("http://{addr}/health"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["state"], "running");
    server.shutdown();
    handle.await.unwrap();
}

#[tokio::test]
async fn long_poll_wakes_on_emit() {
    let (server, addr, handle, _dir) = boot().await;
    let client = reqwest::Client::new();

    let waiter = {
        let client = client.clone();
        tokio::spawn(async move {
            let started = Instant::now();
            let resp = client
                .get(format!("http://{addr}/events/wait?timeout=5000"))
                .send()
                .await
                .unwrap();
            (resp.status(), resp.json::<Value>().await.unwrap(), started.elapsed())
        })
    };

    tokio::time::sleep(Duration::from_millis(100)).await;
    let resp = client
        .post(format!("http://{addr}/events"))
        .json(&json!({"type": "message", "source": "chat", "payload": {"text": "ping"}}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 202);

    let (status, body, elapsed) = waiter.await.unwrap();
    assert_eq!(status, 200);
    assert_eq!(body["events"][0]["payload"]["text"], "ping");
    assert!(elapsed < Duration::from_secs(3));

    // the watermark now hides the delivered event
    let resp = client
        .get(format!("http://{addr}/events/wait?timeout=50"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 204);

    server.shutdown();
    handle.await.unwrap();
}

#[tokio::test]
async fn websocket_receives_dispatched_events() {
    let (server, addr, handle, _dir) = boot().await;
    let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/ws")).await.unwrap();

    let hello = ws.next().await.unwrap().unwrap();
    let hello: Value = serde_json::from_str(hello.to_text().unwrap()).unwrap();
    assert_eq!(hello["type"], "hello");

    let resp = reqwest::Client::new()
        .post(format!("http://{addr}/events"))
        .json(&json!({"type": "timer", "payload": {"name": "morning-briefing"}}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 202);

    let frame = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let msg = ws.next().await.unwrap().unwrap();
            if msg.is_text() {
                return serde_json::from_str::<Value>(msg.to_text().unwrap()).unwrap();
            }
        }
    })
    .await
    .unwrap();
    assert_eq!(frame["type"], "event");
    assert_eq!(frame["payload"]["type"], "timer");
    assert_eq!(frame["payload"]["payload"]["name"], "morning-briefing");

    server.shutdown();
    handle.await.unwrap();
}

#[tokio::test]
async fn shutdown_releases_blocked_long_poll() {
    let (server, addr, handle, _dir) = boot().await;
    let waiter = tokio::spawn(async move {
        reqwest::get(format!("http://{addr}/events/wait?timeout=60000"))
            .await
            .unwrap()
            .status()
    });
    tokio::time::sleep(Duration::from_millis(100)).await;

    let started = Instant::now();
    server.shutdown();
    let status = tokio::time::timeout(Duration::from_secs(5), waiter).await.unwrap().unwrap();
    assert_eq!(status, 204);
    tokio::time::timeout(Duration::from_secs(5), handle).await.unwrap().unwrap();
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn agent_completion_flows_into_long_poll() {
    let (server, addr, handle, _dir) = boot().await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("http://{addr}/agents"))
        .json(&json!({"id": "builder", "description": "compile docs"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let resp = client
        .post(format!("http://{addr}/agents/builder/complete"))
        .json(&json!({"result": "docs built"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let body: Value = client
        .get(format!("http://{addr}/events/wait?timeout=1000&since=0"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let event = &body["events"][0];
    assert_eq!(event["type"], "agent_completed");
    assert_eq!(event["payload"]["id"], "builder");
    assert_eq!(event["payload"]["result"], "docs built");
    assert_eq!(event["priority"], 10);

    server.shutdown();
    handle.await.unwrap();
}
