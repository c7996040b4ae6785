//! `POST /tools/{name}`: the tool surface relayed by the supervisor.
//!
//! Every tool takes a JSON object of arguments and returns a JSON value.
//! `restart_backend` is not listed: the supervisor handles it itself.

use axum::Json;
use axum::extract::{Path, State};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::debug;

use crate::delivery::wait_and_deliver;
use crate::errors::{Result, ServerError};
use crate::routes::agents::{self, CompleteAgentRequest, RegisterAgentRequest};
use crate::routes::events::{self, EmitRequest, WaitParams};
use crate::routes::hooks::{self, CheckpointRequest};
use crate::routes::{parse_args, status};
use crate::state::AppState;

/// Tools this backend answers.
pub const TOOL_NAMES: [&str; 9] = [
    "wait_for_event",
    "pre_compact",
    "post_compact",
    "status",
    "emit_event",
    "register_agent",
    "complete_agent",
    "list_agents",
    "save_checkpoint",
];

#[derive(Deserialize)]
struct CompleteAgentArgs {
    id: String,
    #[serde(flatten)]
    outcome: CompleteAgentRequest,
}

/// `POST /tools/{name}`.
pub async fn call_tool(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(args): Json<Value>,
) -> Result<Json<Value>> {
    dispatch(&state, &name, args).await.map(Json)
}

/// Run one tool.
pub async fn dispatch(state: &AppState, name: &str, args: Value) -> Result<Value> {
    debug!(tool = name, "tool call");
    match name {
        "wait_for_event" => {
            let params: WaitParams = parse_args(args)?;
            let timeout = params.timeout.unwrap_or(state.settings.orchestrator.max_wait_timeout_ms);
            match wait_and_deliver(state, timeout, params.since).await {
                Some(delivery) => Ok(serde_json::to_value(delivery)?),
                None => Ok(json!({
                    "events": [],
                    "cursor": state.orchestrator.delivery_watermark(),
                    "timedOut": true,
                })),
            }
        }
        "pre_compact" => Ok(json!({ "text": state.compaction.handle_pre_compact() })),
        "post_compact" => Ok(json!({ "text": state.compaction.handle_post_compact() })),
        "status" => Ok(status::snapshot(state)),
        "emit_event" => events::emit(state, parse_args::<EmitRequest>(args)?),
        "register_agent" => {
            let entry = agents::register(state, parse_args::<RegisterAgentRequest>(args)?)?;
            Ok(json!({ "registered": true, "agent": entry }))
        }
        "complete_agent" => {
            let CompleteAgentArgs { id, outcome } = parse_args(args)?;
            let resp = agents::finish(state, &id, outcome)?;
            Ok(json!({ "changed": resp.changed, "agent": resp.agent }))
        }
        "list_agents" => Ok(agents::list(state)),
        "save_checkpoint" => {
            let checkpoint = hooks::update_checkpoint(state, parse_args::<CheckpointRequest>(args)?).await?;
            Ok(json!({ "checkpoint": checkpoint }))
        }
        other => Err(ServerError::UnknownTool(other.to_string())),
    }
}
