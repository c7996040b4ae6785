//! Socket lifecycle for `GET /ws`.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use serde_json::json;
use tether_core::ids::new_prefixed_id;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::broadcast::BroadcastManager;
use super::connection::{CLIENT_BUFFER, ClientConnection};

/// Keepalive ping period.
const PING_INTERVAL: Duration = Duration::from_secs(30);

/// Serve one push client until it disconnects or `shutdown` fires.
pub async fn handle_socket(socket: WebSocket, broadcast: Arc<BroadcastManager>, shutdown: CancellationToken) {
    let conn_id = new_prefixed_id("conn");
    let (tx, mut rx) = mpsc::channel::<Arc<str>>(CLIENT_BUFFER);
    let conn = Arc::new(ClientConnection::new(conn_id.clone(), tx));
    let _ = conn.send_json(&json!({ "type": "hello", "connectionId": conn_id }));
    broadcast.add(Arc::clone(&conn));
    info!(conn_id = %conn_id, clients = broadcast.connection_count(), "push client connected");

    let (mut ws_tx, mut ws_rx) = socket.split();

    let writer_shutdown = shutdown.clone();
    let writer = tokio::spawn(async move {
        let mut ping = tokio::time::interval_at(tokio::time::Instant::now() + PING_INTERVAL, PING_INTERVAL);
        loop {
            tokio::select! {
                frame = rx.recv() => {
                    let Some(text) = frame else { break };
                    if ws_tx.send(Message::Text(text.to_string().into())).await.is_err() {
                        break;
                    }
                }
                _ = ping.tick() => {
                    if ws_tx.send(Message::Ping(Bytes::new())).await.is_err() {
                        break;
                    }
                }
                () = writer_shutdown.cancelled() => {
                    let _ = ws_tx.send(Message::Close(None)).await;
                    break;
                }
            }
        }
    });

    loop {
        tokio::select! {
            msg = ws_rx.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    debug!(conn_id = %conn_id, len = text.len(), "ignoring client text frame");
                }
                Some(Ok(Message::Close(_)) | Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
            () = shutdown.cancelled() => break,
        }
    }

    broadcast.remove(&conn_id);
    let dropped = conn.drop_count();
    drop(conn);
    let _ = writer.await;
    info!(conn_id = %conn_id, dropped, "push client disconnected");
}
