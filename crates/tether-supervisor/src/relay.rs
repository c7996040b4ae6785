//! Relays between the stdio protocol and the backend.
//!
//! [`ToolRelay`] forwards tool calls to `POST {base}/tools/{name}` with a
//! timeout longer than the longest long-poll. [`NotificationRelay`] holds a
//! WebSocket to `{base}/ws` and turns every pushed event into a JSON-RPC
//! notification, reconnecting with backoff.

use std::time::Duration;

use futures::StreamExt;
use serde_json::Value;
use tether_settings::SupervisorSettings;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::backoff::Backoff;
use crate::errors::{Result, SupervisorError};
use crate::protocol::notification;

/// Forwards tool calls to the backend.
#[derive(Clone, Debug)]
pub struct ToolRelay {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl ToolRelay {
    /// Relay to `base_url` with a per-call `timeout`.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout,
        }
    }

    /// Call one backend tool. Non-2xx answers become
    /// [`SupervisorError::Backend`].
    pub async fn call(&self, name: &str, arguments: &Value) -> Result<Value> {
        let url = format!("{}/tools/{name}", self.base_url);
        debug!(tool = name, "relaying tool call");
        let resp = self
            .client
            .post(&url)
            .timeout(self.timeout)
            .json(arguments)
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            warn!(tool = name, status = status.as_u16(), "backend rejected tool call");
            return Err(SupervisorError::Backend {
                status: status.as_u16(),
                body,
            });
        }
        Ok(resp.json().await?)
    }
}

/// `http://host:port` to `ws://host:port/ws`.
pub fn ws_url(base_url: &str) -> String {
    let base = base_url.trim_end_matches('/');
    let base = if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        base.to_string()
    };
    format!("{base}/ws")
}

/// Persistent push connection to the backend.
#[derive(Debug)]
pub struct NotificationRelay {
    url: String,
    backoff: Backoff,
}

impl NotificationRelay {
    /// Relay reading from `url` with the configured reconnect schedule.
    pub fn new(url: impl Into<String>, settings: &SupervisorSettings) -> Self {
        Self {
            url: url.into(),
            backoff: Backoff::new(
                Duration::from_millis(settings.reconnect_initial_ms),
                Duration::from_millis(settings.reconnect_max_ms),
            ),
        }
    }

    /// Forward notifications into `outbox` until `cancel` fires or the
    /// outbox closes.
    pub async fn run(mut self, outbox: mpsc::Sender<Value>, cancel: CancellationToken) {
        loop {
            let connect = tokio::select! {
                () = cancel.cancelled() => break,
                res = tokio_tungstenite::connect_async(self.url.as_str()) => res,
            };
            match connect {
                Ok((mut ws, _)) => {
                    info!(url = %self.url, "notification relay connected");
                    self.backoff.reset();
                    loop {
                        let frame = tokio::select! {
                            () = cancel.cancelled() => return,
                            frame = ws.next() => frame,
                        };
                        match frame {
                            Some(Ok(Message::Text(text))) => {
                                if let Some(note) = to_notification(text.as_str()) {
                                    if outbox.send(note).await.is_err() {
                                        debug!("outbox closed, stopping notification relay");
                                        return;
                                    }
                                }
                            }
                            Some(Ok(Message::Close(_))) | None => break,
                            Some(Ok(_)) => {}
                            Some(Err(e)) => {
                                warn!(error = %e, "notification connection failed");
                                break;
                            }
                        }
                    }
                    warn!(url = %self.url, "notification relay disconnected");
                }
                Err(e) => debug!(url = %self.url, error = %e, "notification connect failed"),
            }

            let delay = self.backoff.next_delay();
            debug!(delay_ms = delay.as_millis() as u64, "reconnecting notification relay");
            tokio::select! {
                () = cancel.cancelled() => break,
                () = tokio::time::sleep(delay) => {}
            }
        }
        debug!("notification relay stopped");
    }
}

/// Map a pushed `{type:"event", payload}` frame to a notification. Other
/// frames (such as `hello`) yield `None`.
pub fn to_notification(frame: &str) -> Option<Value> {
    let value: Value = match serde_json::from_str(frame) {
        Ok(v) => v,
        Err(e) => {
            warn!(error = %e, "unparseable push frame");
            return None;
        }
    };
    if value.get("type").and_then(Value::as_str) != Some("event") {
        return None;
    }
    let payload = value.get("payload")?;
    let event_type = payload.get("type").and_then(Value::as_str)?;
    Some(notification(&format!("notifications/{event_type}"), payload.clone()))
}
