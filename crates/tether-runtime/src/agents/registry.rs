//! Bounded background agent registry.
//!
//! Every status check and its mutation happen under one lock acquisition, so
//! concurrent `complete`/`fail` calls (explicit callback racing the poller)
//! transition an agent at most once. Events are emitted after the lock is
//! released.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tether_core::events::{truncate_chars, types};
use tether_core::time::now_ms;
use tether_core::{Event, EventPriority};
use tether_settings::AgentSettings;
use tracing::{debug, info, warn};

/// Sink for completion/failure events (normally `Orchestrator::emit`).
pub type EmitFn = Arc<dyn Fn(Event) + Send + Sync>;

const SOURCE: &str = "agent-registry";

/// Agent lifecycle status.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    /// Still working.
    Running,
    /// Finished successfully.
    Completed,
    /// Finished with an error.
    Failed,
}

impl fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        })
    }
}

/// One tracked background agent.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentEntry {
    /// Caller-chosen id.
    pub id: String,
    /// What the agent is doing.
    pub description: String,
    /// Current status.
    pub status: AgentStatus,
    /// Epoch ms of registration.
    pub start_time: i64,
    /// Epoch ms of the terminal transition.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<i64>,
    /// File the agent writes its output to, watched by the poller.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_file: Option<PathBuf>,
    /// Completion summary.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    /// Failure description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Registry of background agents with a concurrency cap on running entries.
pub struct AgentRegistry {
    settings: AgentSettings,
    entries: Mutex<HashMap<String, AgentEntry>>,
    emit: EmitFn,
}

impl AgentRegistry {
    /// Create an empty registry.
    pub fn new(settings: AgentSettings, emit: EmitFn) -> Self {
        Self {
            settings,
            entries: Mutex::new(HashMap::new()),
            emit,
        }
    }

    /// Registry settings.
    pub fn settings(&self) -> &AgentSettings {
        &self.settings
    }

    /// Track a new running agent. Returns `false` when the running count is
    /// at the cap. Re-registering an existing id replaces the old entry.
    pub fn register(&self, id: &str, description: &str, output_file: Option<PathBuf>) -> bool {
        let mut entries = self.entries.lock();
        let active = entries.values().filter(|e| e.status == AgentStatus::Running).count();
        if active >= self.settings.max_concurrent {
            warn!(
                agent_id = id,
                active,
                max = self.settings.max_concurrent,
                "agent registry at capacity"
            );
            return false;
        }
        let entry = AgentEntry {
            id: id.to_string(),
            description: description.to_string(),
            status: AgentStatus::Running,
            start_time: now_ms(),
            end_time: None,
            output_file,
            result: None,
            error: None,
        };
        if entries.insert(id.to_string(), entry).is_some() {
            debug!(agent_id = id, "replaced existing agent entry");
        }
        info!(agent_id = id, description, "agent registered");
        true
    }

    /// Mark a running agent completed and emit `agent_completed`. No-op
    /// (returns `false`) for unknown or already-terminal agents.
    pub fn complete(&self, id: &str, result: &str) -> bool {
        let Some(entry) = self.transition(id, AgentStatus::Completed, |e| {
            e.result = Some(result.to_string());
        }) else {
            return false;
        };
        info!(agent_id = id, "agent completed");
        (self.emit)(terminal_event(types::AGENT_COMPLETED, &entry, "result", result));
        true
    }

    /// Mark a running agent failed and emit `agent_failed`. No-op (returns
    /// `false`) for unknown or already-terminal agents.
    pub fn fail(&self, id: &str, error: &str) -> bool {
        let Some(entry) = self.transition(id, AgentStatus::Failed, |e| {
            e.error = Some(error.to_string());
        }) else {
            return false;
        };
        warn!(agent_id = id, error, "agent failed");
        (self.emit)(terminal_event(types::AGENT_FAILED, &entry, "error", error));
        true
    }

    fn transition(
        &self,
        id: &str,
        to: AgentStatus,
        apply: impl FnOnce(&mut AgentEntry),
    ) -> Option<AgentEntry> {
        let mut entries = self.entries.lock();
        let entry = entries.get_mut(id)?;
        if entry.status != AgentStatus::Running {
            debug!(agent_id = id, status = %entry.status, "ignoring transition of finished agent");
            return None;
        }
        entry.status = to;
        entry.end_time = Some(now_ms());
        apply(entry);
        Some(entry.clone())
    }

    /// Remove an entry. Returns whether it existed.
    pub fn cleanup(&self, id: &str) -> bool {
        let removed = self.entries.lock().remove(id).is_some();
        if removed {
            debug!(agent_id = id, "agent entry removed");
        }
        removed
    }

    /// Look up one entry.
    pub fn get(&self, id: &str) -> Option<AgentEntry> {
        self.entries.lock().get(id).cloned()
    }

    /// All entries ordered by start time.
    pub fn list(&self) -> Vec<AgentEntry> {
        let mut list: Vec<AgentEntry> = self.entries.lock().values().cloned().collect();
        list.sort_by(|a, b| a.start_time.cmp(&b.start_time).then_with(|| a.id.cmp(&b.id)));
        list
    }

    /// Running entries ordered by start time.
    pub fn running(&self) -> Vec<AgentEntry> {
        self.list()
            .into_iter()
            .filter(|e| e.status == AgentStatus::Running)
            .collect()
    }

    /// Number of running entries.
    pub fn active_count(&self) -> usize {
        self.entries
            .lock()
            .values()
            .filter(|e| e.status == AgentStatus::Running)
            .count()
    }
}

fn terminal_event(event_type: &str, entry: &AgentEntry, key: &str, detail: &str) -> Event {
    let duration_ms = entry.end_time.unwrap_or(entry.start_time) - entry.start_time;
    Event::new(
        event_type,
        SOURCE,
        json!({
            "id": entry.id,
            "description": entry.description,
            key: truncate_chars(detail, 2_000),
            "durationMs": duration_ms,
        }),
    )
    .with_priority(EventPriority::High)
}

impl fmt::Debug for AgentRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgentRegistry")
            .field("max_concurrent", &self.settings.max_concurrent)
            .field("entries", &self.entries.lock().len())
            .finish_non_exhaustive()
    }
}
