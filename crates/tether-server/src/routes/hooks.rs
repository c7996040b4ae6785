//! Compaction hooks and the session checkpoint.

use axum::Json;
use axum::extract::State;
use serde::Deserialize;
use tether_runtime::compaction::SessionCheckpoint;

use crate::errors::{Result, ServerError};
use crate::state::AppState;

/// Checkpoint update body.
#[derive(Clone, Debug, Deserialize)]
pub struct CheckpointRequest {
    /// Free-text session summary.
    pub summary: String,
    /// Short points worth keeping.
    #[serde(default)]
    pub highlights: Vec<String>,
}

/// `GET /hooks/pre-compact`.
pub async fn pre_compact(State(state): State<AppState>) -> String {
    state.compaction.handle_pre_compact()
}

/// `GET /hooks/post-compact`.
pub async fn post_compact(State(state): State<AppState>) -> String {
    state.compaction.handle_post_compact()
}

/// `GET /checkpoint`.
pub async fn get_checkpoint(State(state): State<AppState>) -> Json<SessionCheckpoint> {
    Json(state.compaction.checkpoint())
}

/// `POST /checkpoint`.
pub async fn save_checkpoint(
    State(state): State<AppState>,
    Json(req): Json<CheckpointRequest>,
) -> Result<Json<SessionCheckpoint>> {
    update_checkpoint(&state, req).await.map(Json)
}

/// Replace and persist the checkpoint.
pub async fn update_checkpoint(state: &AppState, req: CheckpointRequest) -> Result<SessionCheckpoint> {
    if req.summary.trim().is_empty() && req.highlights.is_empty() {
        return Err(ServerError::BadRequest("checkpoint needs a summary or highlights".into()));
    }
    Ok(state.compaction.update_checkpoint(req.summary, req.highlights).await)
}
