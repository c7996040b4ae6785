//! Settings types with compiled defaults.
//!
//! Every section is `#[serde(default)]` so a partial settings file only
//! needs the keys it overrides.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Root settings object.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TetherSettings {
    /// HTTP listener for the backend process.
    pub server: ServerSettings,
    /// Event queue, history, and dispatch loop.
    pub orchestrator: OrchestratorSettings,
    /// Background agent registry.
    pub agents: AgentSettings,
    /// Context-reset recovery.
    pub compaction: CompactionSettings,
    /// Backend process supervision.
    pub supervisor: SupervisorSettings,
    /// Log output.
    pub logging: LoggingSettings,
}

/// Backend HTTP listener settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Bind port.
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 7437,
        }
    }
}

impl ServerSettings {
    /// Base URL clients use to reach the backend.
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

/// What the event queue does when it is full.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Evict the lowest-priority tail event, then insert.
    #[default]
    DropLowest,
    /// Refuse the new event.
    Reject,
    /// Insert past capacity with a warning, up to a hard ceiling.
    Delay,
}

impl fmt::Display for OverflowPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DropLowest => write!(f, "drop_lowest"),
            Self::Reject => write!(f, "reject"),
            Self::Delay => write!(f, "delay"),
        }
    }
}

impl FromStr for OverflowPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "drop_lowest" => Ok(Self::DropLowest),
            "reject" => Ok(Self::Reject),
            "delay" => Ok(Self::Delay),
            other => Err(format!("unknown overflow policy: {other}")),
        }
    }
}

/// Orchestrator settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OrchestratorSettings {
    /// Rolling event history size.
    pub history_capacity: usize,
    /// Queue capacity before the overflow policy applies.
    pub queue_max_size: usize,
    /// Overflow policy.
    pub overflow_policy: OverflowPolicy,
    /// Dispatch tick interval.
    pub tick_interval_ms: u64,
    /// Upper bound for a single long-poll wait.
    pub max_wait_timeout_ms: u64,
    /// Lookback used when a long-poll carries no `since`.
    pub default_lookback_ms: i64,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            history_capacity: 100,
            queue_max_size: 1000,
            overflow_policy: OverflowPolicy::DropLowest,
            tick_interval_ms: 50,
            max_wait_timeout_ms: 120_000,
            default_lookback_ms: 100,
        }
    }
}

/// Background agent registry settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AgentSettings {
    /// Maximum number of agents in `running` state.
    pub max_concurrent: usize,
    /// Output-file poll interval.
    pub poll_interval_ms: u64,
    /// An output file unmodified for this long counts as finished.
    pub stale_threshold_ms: u64,
    /// Bytes read from the end of an output file when looking for markers.
    pub tail_bytes: u64,
    /// Maximum characters kept in a completion summary.
    pub summary_chars: usize,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            max_concurrent: 3,
            poll_interval_ms: 10_000,
            stale_threshold_ms: 60_000,
            tail_bytes: 2048,
            summary_chars: 500,
        }
    }
}

/// Compaction recovery settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CompactionSettings {
    /// Where the session checkpoint is persisted.
    pub checkpoint_path: PathBuf,
    /// Recent events listed in recovery prompts.
    pub recent_events: usize,
    /// Recent memory keys listed in recovery prompts.
    pub recent_memory_keys: usize,
}

impl Default for CompactionSettings {
    fn default() -> Self {
        Self {
            checkpoint_path: tether_home().join("checkpoint.json"),
            recent_events: 10,
            recent_memory_keys: 10,
        }
    }
}

/// Backend supervisor settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SupervisorSettings {
    /// Program used to start the backend. Empty means the current executable.
    pub backend_command: String,
    /// Arguments passed to the backend program.
    pub backend_args: Vec<String>,
    /// Health probe path, expected to answer HTTP 200.
    pub health_path: String,
    /// Delay between health probes during startup.
    pub health_interval_ms: u64,
    /// Startup deadline for the backend to become healthy.
    pub startup_timeout_ms: u64,
    /// Grace period between SIGTERM and force kill.
    pub stop_grace_ms: u64,
    /// Timeout for relayed tool calls (must exceed the longest long-poll).
    pub tool_timeout_ms: u64,
    /// First reconnect delay for the notification connection.
    pub reconnect_initial_ms: u64,
    /// Reconnect delay ceiling.
    pub reconnect_max_ms: u64,
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            backend_command: String::new(),
            backend_args: vec!["serve".to_string()],
            health_path: "/health".to_string(),
            health_interval_ms: 500,
            startup_timeout_ms: 30_000,
            stop_grace_ms: 5_000,
            tool_timeout_ms: 130_000,
            reconnect_initial_ms: 1_000,
            reconnect_max_ms: 30_000,
        }
    }
}

/// Log output settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default filter when `RUST_LOG` is unset.
    pub level: String,
    /// Emit JSON lines instead of compact text.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// `~/.tether` (falls back to `/tmp/.tether` without `HOME`).
pub fn tether_home() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".tether")
}
