//! Line-delimited JSON-RPC 2.0 over stdio.
//!
//! One request per line in, one response or notification per line out.
//! Requests are handled concurrently (a `wait_for_event` call blocks for up
//! to its timeout), and a single writer task owns the output stream so
//! frames never interleave.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::{Value, json};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::backend::BackendSupervisor;
use crate::relay::ToolRelay;
use crate::tools::{RESTART_TOOL, tool_definitions};

/// Protocol revision reported by `initialize`.
pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// Outbound frames buffered before senders wait.
pub const OUTBOX_CAPACITY: usize = 256;

/// JSON-RPC error codes.
pub mod codes {
    /// Invalid JSON.
    pub const PARSE_ERROR: i64 = -32700;
    /// Not a request object.
    pub const INVALID_REQUEST: i64 = -32600;
    /// Unknown method.
    pub const METHOD_NOT_FOUND: i64 = -32601;
    /// Bad parameters.
    pub const INVALID_PARAMS: i64 = -32602;
}

/// An incoming request or notification (no `id`).
#[derive(Clone, Debug, Deserialize)]
pub struct RpcRequest {
    /// Request id; absent for notifications.
    #[serde(default)]
    pub id: Option<Value>,
    /// Method name.
    pub method: String,
    /// Parameters.
    #[serde(default)]
    pub params: Value,
}

/// Successful response frame.
pub fn success(id: Value, result: Value) -> Value {
    json!({ "jsonrpc": "2.0", "id": id, "result": result })
}

/// Error response frame.
pub fn failure(id: Value, code: i64, message: impl Into<String>) -> Value {
    json!({ "jsonrpc": "2.0", "id": id, "error": { "code": code, "message": message.into() } })
}

/// Notification frame.
pub fn notification(method: &str, params: Value) -> Value {
    json!({ "jsonrpc": "2.0", "method": method, "params": params })
}

/// Text tool result. Objects of the form `{"text": ...}` are unwrapped.
fn tool_result(value: &Value, is_error: bool) -> Value {
    let text = match value {
        Value::String(s) => s.clone(),
        Value::Object(map) if map.len() == 1 && map.get("text").is_some_and(Value::is_string) => {
            map.get("text").and_then(Value::as_str).unwrap_or_default().to_string()
        }
        other => serde_json::to_string_pretty(other).unwrap_or_else(|_| other.to_string()),
    };
    json!({ "content": [{ "type": "text", "text": text }], "isError": is_error })
}

/// Output channel for frames.
pub fn outbox() -> (mpsc::Sender<Value>, mpsc::Receiver<Value>) {
    mpsc::channel(OUTBOX_CAPACITY)
}

/// Write every frame from `rx` as one line. Ends when all senders are gone
/// or the output fails.
pub fn spawn_writer<W>(mut writer: W, mut rx: mpsc::Receiver<Value>) -> JoinHandle<()>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            let mut line = frame.to_string();
            line.push('\n');
            if let Err(e) = writer.write_all(line.as_bytes()).await {
                warn!(error = %e, "protocol output closed");
                break;
            }
            if let Err(e) = writer.flush().await {
                warn!(error = %e, "protocol output flush failed");
                break;
            }
        }
        debug!("protocol writer stopped");
    })
}

#[derive(Deserialize)]
struct ToolCallParams {
    name: String,
    #[serde(default)]
    arguments: Value,
}

/// Answers protocol requests using the supervisor and the tool relay.
#[derive(Debug)]
pub struct ProtocolServer {
    supervisor: Arc<BackendSupervisor>,
    relay: ToolRelay,
}

impl ProtocolServer {
    /// Server over a supervisor and relay.
    pub fn new(supervisor: Arc<BackendSupervisor>, relay: ToolRelay) -> Self {
        Self { supervisor, relay }
    }

    /// Read requests until EOF, answering each on its own task.
    pub async fn read_loop<R>(self: &Arc<Self>, reader: R, outbox: mpsc::Sender<Value>)
    where
        R: AsyncBufRead + Unpin,
    {
        let mut lines = reader.lines();
        loop {
            let line = match lines.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => break,
                Err(e) => {
                    warn!(error = %e, "protocol input failed");
                    break;
                }
            };
            if line.trim().is_empty() {
                continue;
            }
            let server = Arc::clone(self);
            let outbox = outbox.clone();
            drop(tokio::spawn(async move {
                if let Some(frame) = server.handle_line(&line).await {
                    let _ = outbox.send(frame).await;
                }
            }));
        }
        info!("protocol input closed");
    }

    /// Handle one raw line. Returns the response frame, if any.
    pub async fn handle_line(&self, line: &str) -> Option<Value> {
        let value: Value = match serde_json::from_str(line) {
            Ok(v) => v,
            Err(e) => return Some(failure(Value::Null, codes::PARSE_ERROR, format!("parse error: {e}"))),
        };
        let id = value.get("id").cloned();
        let request: RpcRequest = match serde_json::from_value(value) {
            Ok(r) => r,
            Err(e) => {
                return Some(failure(
                    id.unwrap_or(Value::Null),
                    codes::INVALID_REQUEST,
                    format!("invalid request: {e}"),
                ));
            }
        };
        self.handle(request).await
    }

    /// Handle one request. Notifications get no response.
    pub async fn handle(&self, request: RpcRequest) -> Option<Value> {
        let Some(id) = request.id else {
            debug!(method = %request.method, "client notification");
            return None;
        };
        debug!(method = %request.method, "protocol request");
        let frame = match request.method.as_str() {
            "initialize" => success(
                id,
                json!({
                    "protocolVersion": PROTOCOL_VERSION,
                    "capabilities": { "tools": {} },
                    "serverInfo": { "name": "tether", "version": env!("CARGO_PKG_VERSION") },
                }),
            ),
            "ping" => success(id, json!({})),
            "tools/list" => success(id, json!({ "tools": tool_definitions() })),
            "tools/call" => match serde_json::from_value::<ToolCallParams>(request.params) {
                Ok(params) => success(id, self.call_tool(&params.name, params.arguments).await),
                Err(e) => failure(id, codes::INVALID_PARAMS, format!("invalid tool call: {e}")),
            },
            other => failure(id, codes::METHOD_NOT_FOUND, format!("method not found: {other}")),
        };
        Some(frame)
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> Value {
        if name == RESTART_TOOL {
            return match self.supervisor.restart().await {
                Ok(()) => tool_result(&json!("backend restarted"), false),
                Err(e) => tool_result(&Value::String(e.to_string()), true),
            };
        }
        let arguments = if arguments.is_null() { json!({}) } else { arguments };
        match self.relay.call(name, &arguments).await {
            Ok(value) => tool_result(&value, false),
            Err(e) => {
                warn!(tool = name, error = %e, "tool call failed");
                tool_result(&Value::String(e.to_string()), true)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tether_settings::SupervisorSettings;
    use tokio::io::{AsyncReadExt, BufReader};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn server(base: &str) -> Arc<ProtocolServer> {
        let supervisor = Arc::new(BackendSupervisor::new(SupervisorSettings::default(), base));
        Arc::new(ProtocolServer::new(supervisor, ToolRelay::new(base, Duration::from_secs(5))))
    }

    #[tokio::test]
    async fn initialize_and_ping() {
        let s = server("http://127.0.0.1:1");
        let resp = s.handle_line(r#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{}}"#).await.unwrap();
        assert_eq!(resp["id"], 1);
        assert_eq!(resp["result"]["protocolVersion"], PROTOCOL_VERSION);
        assert_eq!(resp["result"]["serverInfo"]["name"], "tether");

        let resp = s.handle_line(r#"{"jsonrpc":"2.0","id":"p","method":"ping"}"#).await.unwrap();
        assert_eq!(resp["id"], "p");
        assert_eq!(resp["result"], json!({}));
    }

    #[tokio::test]
    async fn notifications_get_no_reply() {
        let s = server("http://127.0.0.1:1");
        assert!(s.handle_line(r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#).await.is_none());
    }

    #[tokio::test]
    async fn malformed_input_errors() {
        let s = server("http://127.0.0.1:1");
        let resp = s.handle_line("{oops").await.unwrap();
        assert_eq!(resp["error"]["code"], codes::PARSE_ERROR);
        assert_eq!(resp["id"], Value::Null);

        let resp = s.handle_line(r#"{"id":3}"#).await.unwrap();
        assert_eq!(resp["error"]["code"], codes::INVALID_REQUEST);
        assert_eq!(resp["id"], 3);

        let resp = s.handle_line(r#"{"id":4,"method":"resources/list"}"#).await.unwrap();
        assert_eq!(resp["error"]["code"], codes::METHOD_NOT_FOUND);

        let resp = s.handle_line(r#"{"id":5,"method":"tools/call","params":{}}"#).await.unwrap();
        assert_eq!(resp["error"]["code"], codes::INVALID_PARAMS);
    }

    #[tokio::test]
    async fn tools_list_includes_restart() {
        let s = server("http://127.0.0.1:1");
        let resp = s.handle_line(r#"{"id":1,"method":"tools/list"}"#).await.unwrap();
        let names: Vec<&str> = resp["result"]["tools"]
            .as_array()
            .unwrap()
            .iter()
            .map(|t| t["name"].as_str().unwrap())
            .collect();
        assert!(names.contains(&"wait_for_event"));
        assert!(names.contains(&RESTART_TOOL));
    }

    #[tokio::test]
    async fn tool_call_is_relayed() {
        let backend = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/tools/pre_compact"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"text": "save your state"})))
            .mount(&backend)
            .await;
        Mock::given(method("POST"))
            .and(path("/tools/status"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"orchestrator": {"state": "running"}})))
            .mount(&backend)
            .await;

        let s = server(&backend.uri());
        let resp = s
            .handle_line(r#"{"id":7,"method":"tools/call","params":{"name":"pre_compact"}}"#)
            .await
            .unwrap();
        assert_eq!(resp["result"]["content"][0]["text"], "save your state");
        assert_eq!(resp["result"]["isError"], false);

        let resp = s
            .handle_line(r#"{"id":8,"method":"tools/call","params":{"name":"status","arguments":{}}}"#)
            .await
            .unwrap();
        let text = resp["result"]["content"][0]["text"].as_str().unwrap();
        assert!(text.contains("\"running\""));
    }

    #[tokio::test]
    async fn relay_failure_is_tool_error() {
        let s = server("http://127.0.0.1:1");
        let resp = s
            .handle_line(r#"{"id":9,"method":"tools/call","params":{"name":"status"}}"#)
            .await
            .unwrap();
        assert_eq!(resp["result"]["isError"], true);
    }

    #[tokio::test]
    async fn stdio_roundtrip() {
        let s = server("http://127.0.0.1:1");
        let (mut client_in, server_in) = tokio::io::duplex(4096);
        let (server_out, mut client_out) = tokio::io::duplex(4096);

        let (tx, rx) = outbox();
        let writer = spawn_writer(server_out, rx);
        client_in
            .write_all(b"{\"id\":1,\"method\":\"ping\"}\n\n{\"id\":2,\"method\":\"ping\"}\n")
            .await
            .unwrap();
        drop(client_in);

        s.read_loop(BufReader::new(server_in), tx).await;
        tokio::time::timeout(Duration::from_secs(5), writer).await.unwrap().unwrap();

        let mut out = String::new();
        let _ = client_out.read_to_string(&mut out).await.unwrap();
        let mut ids: Vec<i64> = out
            .lines()
            .map(|l| serde_json::from_str::<Value>(l).unwrap()["id"].as_i64().unwrap())
            .collect();
        ids.sort_unstable();
        assert_eq!(ids, vec![1, 2]);
    }
}
