//! Server error type and its HTTP mapping.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use tether_runtime::RuntimeError;

/// Errors surfaced by the HTTP layer.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// No agent with this id.
    #[error("agent not found: {0}")]
    AgentNotFound(String),

    /// No tool with this name.
    #[error("unknown tool: {0}")]
    UnknownTool(String),

    /// Malformed request body or arguments.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// The agent registry is at its concurrency cap.
    #[error("agent registry at capacity ({0} running)")]
    AgentsAtCapacity(usize),

    /// The event queue refused the event.
    #[error("event queue is full")]
    QueueFull,

    /// Orchestrator failure.
    #[error("runtime error: {0}")]
    Runtime(#[from] RuntimeError),

    /// Response serialization failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Listener or socket error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ServerError {
    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::AgentNotFound(_) => "AGENT_NOT_FOUND",
            Self::UnknownTool(_) => "UNKNOWN_TOOL",
            Self::BadRequest(_) => "BAD_REQUEST",
            Self::AgentsAtCapacity(_) => "AGENTS_AT_CAPACITY",
            Self::QueueFull => "QUEUE_FULL",
            Self::Runtime(_) => "RUNTIME_ERROR",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
            Self::Io(_) => "IO_ERROR",
        }
    }

    /// HTTP status for this error.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::AgentNotFound(_) | Self::UnknownTool(_) => StatusCode::NOT_FOUND,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::AgentsAtCapacity(_) => StatusCode::TOO_MANY_REQUESTS,
            Self::QueueFull => StatusCode::SERVICE_UNAVAILABLE,
            Self::Runtime(_) | Self::Serialization(_) | Self::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let body = json!({
            "error": self.code(),
            "message": self.to_string(),
        });
        (self.status(), Json(body)).into_response()
    }
}

/// Result alias for handlers.
pub type Result<T> = std::result::Result<T, ServerError>;
