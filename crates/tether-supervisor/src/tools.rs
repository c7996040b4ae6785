//! Tool catalog advertised through `tools/list`.

use serde_json::{Value, json};

/// Handled by the supervisor itself; every other tool goes to the backend.
pub const RESTART_TOOL: &str = "restart_backend";

fn tool(name: &str, description: &str, properties: Value, required: &[&str]) -> Value {
    json!({
        "name": name,
        "description": description,
        "inputSchema": {
            "type": "object",
            "properties": properties,
            "required": required,
        },
    })
}

/// Every tool with its JSON input schema.
pub fn tool_definitions() -> Vec<Value> {
    vec![
        tool(
            "wait_for_event",
            "Block until new events arrive or the timeout elapses. Call again in a loop.",
            json!({
                "timeout": { "type": "integer", "description": "Milliseconds to wait (capped)." },
                "since": { "type": "integer", "description": "Only events newer than this epoch-ms timestamp." },
            }),
            &[],
        ),
        tool(
            "pre_compact",
            "Call before your context is compacted. Returns what to save.",
            json!({}),
            &[],
        ),
        tool(
            "post_compact",
            "Call after your context was compacted. Returns the recovery block.",
            json!({}),
            &[],
        ),
        tool("status", "Orchestrator, agent, and compaction status.", json!({}), &[]),
        tool(
            "emit_event",
            "Inject an event into the queue.",
            json!({
                "type": { "type": "string" },
                "source": { "type": "string" },
                "payload": { "type": "object" },
                "priority": { "type": "integer" },
                "replyTo": { "type": "string" },
            }),
            &["type"],
        ),
        tool(
            "register_agent",
            "Track a background agent. Fails when the concurrency cap is reached.",
            json!({
                "id": { "type": "string" },
                "description": { "type": "string" },
                "outputFile": { "type": "string", "description": "File watched for completion markers." },
            }),
            &["id"],
        ),
        tool(
            "complete_agent",
            "Report a background agent as finished. Pass `error` to mark it failed.",
            json!({
                "id": { "type": "string" },
                "result": { "type": "string" },
                "error": { "type": "string" },
            }),
            &["id"],
        ),
        tool("list_agents", "List tracked background agents.", json!({}), &[]),
        tool(
            "save_checkpoint",
            "Persist a session summary that survives compaction.",
            json!({
                "summary": { "type": "string" },
                "highlights": { "type": "array", "items": { "type": "string" } },
            }),
            &["summary"],
        ),
        tool(RESTART_TOOL, "Restart the backend process.", json!({}), &[]),
    ]
}
