//! Background agent lifecycle endpoints.

use std::path::PathBuf;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tether_runtime::{AgentEntry, AgentStatus};

use crate::errors::{Result, ServerError};
use crate::state::AppState;

/// `POST /agents` body.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterAgentRequest {
    /// Caller-chosen id.
    pub id: String,
    /// What the agent is doing.
    #[serde(default)]
    pub description: String,
    /// Output file watched by the completion poller.
    #[serde(default)]
    pub output_file: Option<PathBuf>,
}

/// `PATCH /agents/{id}` body.
#[derive(Clone, Debug, Deserialize)]
pub struct UpdateAgentRequest {
    /// Target status: `completed` or `failed`.
    pub status: AgentStatus,
    /// Completion summary.
    #[serde(default)]
    pub result: Option<String>,
    /// Failure description.
    #[serde(default)]
    pub error: Option<String>,
}

/// `POST /agents/{id}/complete` body. An `error` marks the agent failed.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct CompleteAgentRequest {
    /// Completion summary.
    #[serde(default)]
    pub result: Option<String>,
    /// Failure description.
    #[serde(default)]
    pub error: Option<String>,
}

/// Outcome of a terminal transition.
#[derive(Clone, Debug, Serialize)]
pub struct TransitionResponse {
    /// Whether this call moved the agent out of `running`.
    pub changed: bool,
    /// Entry after the call.
    pub agent: AgentEntry,
}

/// `POST /agents`.
pub async fn register_agent(
    State(state): State<AppState>,
    Json(req): Json<RegisterAgentRequest>,
) -> Result<Json<AgentEntry>> {
    register(&state, req).map(Json)
}

/// `GET /agents`.
pub async fn list_agents(State(state): State<AppState>) -> Json<Value> {
    Json(list(&state))
}

/// `GET /agents/{id}`.
pub async fn get_agent(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<AgentEntry>> {
    state.agents.get(&id).map(Json).ok_or(ServerError::AgentNotFound(id))
}

/// `PATCH /agents/{id}`.
pub async fn update_agent(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<UpdateAgentRequest>,
) -> Result<Json<TransitionResponse>> {
    let req = match req.status {
        AgentStatus::Running => {
            return Err(ServerError::BadRequest("status must be completed or failed".into()));
        }
        AgentStatus::Completed => CompleteAgentRequest {
            result: req.result,
            error: None,
        },
        AgentStatus::Failed => CompleteAgentRequest {
            result: None,
            error: Some(req.error.unwrap_or_else(|| "unknown error".to_string())),
        },
    };
    finish(&state, &id, req).map(Json)
}

/// `POST /agents/{id}/complete`.
pub async fn complete_agent(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<CompleteAgentRequest>,
) -> Result<Json<TransitionResponse>> {
    finish(&state, &id, req).map(Json)
}

/// `DELETE /agents/{id}`.
pub async fn delete_agent(State(state): State<AppState>, Path(id): Path<String>) -> Result<StatusCode> {
    if state.agents.cleanup(&id) {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ServerError::AgentNotFound(id))
    }
}

/// Register an agent, mapping the cap to [`ServerError::AgentsAtCapacity`].
pub fn register(state: &AppState, req: RegisterAgentRequest) -> Result<AgentEntry> {
    if req.id.trim().is_empty() {
        return Err(ServerError::BadRequest("agent id must not be empty".into()));
    }
    if !state.agents.register(&req.id, &req.description, req.output_file) {
        return Err(ServerError::AgentsAtCapacity(state.agents.active_count()));
    }
    state.agents.get(&req.id).ok_or(ServerError::AgentNotFound(req.id))
}

/// Every entry plus capacity numbers.
pub fn list(state: &AppState) -> Value {
    json!({
        "agents": state.agents.list(),
        "active": state.agents.active_count(),
        "maxConcurrent": state.agents.settings().max_concurrent,
    })
}

/// Complete or fail an agent. Already-finished agents report `changed: false`.
pub fn finish(state: &AppState, id: &str, req: CompleteAgentRequest) -> Result<TransitionResponse> {
    if state.agents.get(id).is_none() {
        return Err(ServerError::AgentNotFound(id.to_string()));
    }
    let changed = match req.error {
        Some(error) => state.agents.fail(id, &error),
        None => state.agents.complete(id, req.result.as_deref().unwrap_or_default()),
    };
    let agent = state.agents.get(id).ok_or_else(|| ServerError::AgentNotFound(id.to_string()))?;
    Ok(TransitionResponse { changed, agent })
}
