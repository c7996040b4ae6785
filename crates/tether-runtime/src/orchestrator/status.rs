//! Orchestrator state machine and status projection.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle state: `stopped -> starting -> running -> stopping -> stopped`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrchestratorState {
    /// Not running (initial and final state).
    #[default]
    Stopped,
    /// Collaborators are being initialized.
    Starting,
    /// The dispatch ticker is active.
    Running,
    /// Shutdown in progress.
    Stopping,
}

impl fmt::Display for OrchestratorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Stopped => "stopped",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
        };
        f.write_str(s)
    }
}

/// Health of one wired collaborator.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollaboratorHealth {
    /// Collaborator name.
    pub name: String,
    /// Started successfully and currently reports healthy.
    pub healthy: bool,
}

/// Read-only snapshot for status reporting.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrchestratorStatus {
    /// Current lifecycle state.
    pub state: OrchestratorState,
    /// Events waiting for dispatch.
    pub queue_size: usize,
    /// Events in the rolling history.
    pub history_size: usize,
    /// Blocked long-poll callers.
    pub pending_waiters: usize,
    /// Events accepted by `emit`.
    pub events_emitted: u64,
    /// Events dequeued and dispatched.
    pub events_dispatched: u64,
    /// Events evicted or refused by the queue.
    pub events_dropped: u64,
    /// Current delivery watermark (epoch ms).
    pub watermark: i64,
    /// Event types with registered handlers.
    pub handler_types: Vec<String>,
    /// Wired collaborators in start order.
    pub collaborators: Vec<CollaboratorHealth>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_serializes_lowercase() {
        let json = serde_json::to_string(&OrchestratorState::Stopping).unwrap();
        assert_eq!(json, "\"stopping\"");
        assert_eq!(OrchestratorState::Running.to_string(), "running");
    }

    #[test]
    fn status_uses_camel_case() {
        let status = OrchestratorStatus {
            state: OrchestratorState::Running,
            queue_size: 1,
            history_size: 2,
            pending_waiters: 0,
            events_emitted: 2,
            events_dispatched: 1,
            events_dropped: 0,
            watermark: 0,
            handler_types: vec![],
            collaborators: vec![],
        };
        let v = serde_json::to_value(&status).unwrap();
        assert_eq!(v["queueSize"], 1);
        assert_eq!(v["pendingWaiters"], 0);
        assert_eq!(v["state"], "running");
    }
}
