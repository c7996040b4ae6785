//! `GET /events/wait` and `POST /events`.

use axum::Json;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use serde_json::{Value, json};
use tether_core::Event;
use tracing::{info, warn};

use crate::delivery::wait_and_deliver;
use crate::errors::{Result, ServerError};
use crate::state::AppState;

/// Long-poll parameters.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct WaitParams {
    /// Milliseconds to block; defaults to (and is clamped to) the configured maximum.
    pub timeout: Option<u64>,
    /// Only events newer than this epoch-ms timestamp.
    pub since: Option<i64>,
}

/// An externally normalized event.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmitRequest {
    /// Event type.
    #[serde(rename = "type")]
    pub event_type: String,
    /// Producer name.
    #[serde(default = "default_source")]
    pub source: String,
    /// Structured payload.
    #[serde(default)]
    pub payload: Value,
    /// Queue priority.
    #[serde(default)]
    pub priority: i32,
    /// Reply routing hint.
    #[serde(default)]
    pub reply_to: Option<String>,
}

fn default_source() -> String {
    "http".to_string()
}

/// `GET /events/wait`: `200` with a delivery, `204` when nothing arrived.
pub async fn wait_events(State(state): State<AppState>, Query(params): Query<WaitParams>) -> Response {
    let timeout = params.timeout.unwrap_or(state.settings.orchestrator.max_wait_timeout_ms);
    match wait_and_deliver(&state, timeout, params.since).await {
        Some(delivery) => Json(delivery).into_response(),
        None => StatusCode::NO_CONTENT.into_response(),
    }
}

/// `POST /events`.
pub async fn emit_event(State(state): State<AppState>, Json(req): Json<EmitRequest>) -> Result<(StatusCode, Json<Value>)> {
    let body = emit(&state, req)?;
    Ok((StatusCode::ACCEPTED, Json(body)))
}

/// Emit an event. A refused event maps to [`ServerError::QueueFull`].
pub fn emit(state: &AppState, req: EmitRequest) -> Result<Value> {
    if req.event_type.trim().is_empty() {
        return Err(ServerError::BadRequest("event type must not be empty".into()));
    }
    let mut event = Event::new(req.event_type, req.source, req.payload).with_priority(req.priority);
    if let Some(reply_to) = req.reply_to {
        event = event.with_reply_to(reply_to);
    }
    let id = event.id.clone();
    let event_type = event.event_type.clone();
    if !state.orchestrator.emit(event) {
        warn!(event_type = %event_type, "event refused by queue");
        return Err(ServerError::QueueFull);
    }
    info!(event_id = %id, event_type = %event_type, "external event accepted");
    Ok(json!({ "accepted": true, "id": id }))
}
