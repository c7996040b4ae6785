//! `GET /health` and `GET /status`.

use axum::Json;
use axum::extract::State;
use serde_json::{Value, json};

use crate::health::{HealthResponse, health_check};
use crate::state::AppState;

/// `GET /health`.
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(health_check(
        state.start_time,
        state.orchestrator.state(),
        state.broadcast.connection_count(),
    ))
}

/// `GET /status`.
pub async fn status(State(state): State<AppState>) -> Json<Value> {
    Json(snapshot(&state))
}

/// Orchestrator, agent, and compaction projections in one object.
pub fn snapshot(state: &AppState) -> Value {
    json!({
        "orchestrator": state.orchestrator.status(),
        "agents": {
            "active": state.agents.active_count(),
            "maxConcurrent": state.agents.settings().max_concurrent,
            "entries": state.agents.list(),
        },
        "compaction": state.compaction.stats(),
        "eventLoopActive": state.compaction.is_event_loop_active(),
        "connections": state.broadcast.connection_count(),
        "uptimeSecs": state.start_time.elapsed().as_secs(),
    })
}
