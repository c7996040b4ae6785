//! `/health` endpoint body.

use std::time::Instant;

use serde::Serialize;
use tether_runtime::OrchestratorState;

/// Health check response.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    /// `"ok"` whenever the listener answers.
    pub status: &'static str,
    /// Seconds since the server was built.
    pub uptime_secs: u64,
    /// Orchestrator lifecycle state.
    pub state: OrchestratorState,
    /// Open WebSocket connections.
    pub connections: usize,
}

/// Build a health response.
pub fn health_check(start_time: Instant, state: OrchestratorState, connections: usize) -> HealthResponse {
    HealthResponse {
        status: "ok",
        uptime_secs: start_time.elapsed().as_secs(),
        state,
        connections,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn reports_uptime() {
        let start = Instant::now().checked_sub(Duration::from_secs(90)).unwrap();
        let resp = health_check(start, OrchestratorState::Running, 2);
        assert_eq!(resp.status, "ok");
        assert!(resp.uptime_secs >= 89);
        assert_eq!(resp.connections, 2);
    }

    #[test]
    fn serializes_camel_case() {
        let v = serde_json::to_value(health_check(Instant::now(), OrchestratorState::Stopped, 0)).unwrap();
        assert_eq!(v["state"], "stopped");
        assert!(v.get("uptimeSecs").is_some());
    }
}
