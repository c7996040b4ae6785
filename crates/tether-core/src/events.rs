//! The `Event` record.
//!
//! Every input source (chat channels, timers, background agents, lifecycle
//! hooks) normalizes what happened into an [`Event`] before handing it to the
//! orchestrator. Events are immutable once emitted; the payload is opaque to
//! the queue and bus and only interpreted by handlers.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::new_event_id;
use crate::time::now_ms;

/// Well-known event type strings.
pub mod types {
    /// Inbound chat message from a channel adapter.
    pub const MESSAGE: &str = "message";
    /// A scheduled timer fired.
    pub const TIMER: &str = "timer";
    /// A background agent finished successfully.
    pub const AGENT_COMPLETED: &str = "agent_completed";
    /// A background agent failed.
    pub const AGENT_FAILED: &str = "agent_failed";
    /// The upstream session is about to reset its context.
    pub const PRE_COMPACT: &str = "pre_compact";
    /// The upstream session has reset its context.
    pub const POST_COMPACT: &str = "post_compact";
    /// Internal system notice.
    pub const SYSTEM: &str = "system";
}

/// Priority presets. Any `i32` is a valid priority; higher dequeues first.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventPriority {
    /// Background noise.
    Low,
    /// Default.
    Normal,
    /// Completion signals and user-facing input.
    High,
    /// Must jump the queue.
    Urgent,
}

impl EventPriority {
    /// Numeric value used for queue ordering.
    #[must_use]
    pub const fn value(self) -> i32 {
        match self {
            Self::Low => -10,
            Self::Normal => 0,
            Self::High => 10,
            Self::Urgent => 100,
        }
    }
}

impl From<EventPriority> for i32 {
    fn from(p: EventPriority) -> Self {
        p.value()
    }
}

/// An immutable, typed record describing something that happened.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    /// Opaque unique id.
    pub id: String,
    /// Event type used for handler lookup (e.g. `message`).
    #[serde(rename = "type")]
    pub event_type: String,
    /// Component that produced the event.
    pub source: String,
    /// Epoch milliseconds at creation.
    pub timestamp: i64,
    /// Arbitrary structured payload, validated by handlers only.
    #[serde(default)]
    pub payload: Value,
    /// Queue priority; higher dequeues first.
    #[serde(default)]
    pub priority: i32,
    /// Optional routing hint for replies (e.g. a channel/chat id).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
}

impl Event {
    /// Create a new event stamped with a fresh id and the current time.
    pub fn new(event_type: impl Into<String>, source: impl Into<String>, payload: Value) -> Self {
        Self {
            id: new_event_id(),
            event_type: event_type.into(),
            source: source.into(),
            timestamp: now_ms(),
            payload,
            priority: EventPriority::Normal.value(),
            reply_to: None,
        }
    }

    /// Set the priority.
    #[must_use]
    pub fn with_priority(mut self, priority: impl Into<i32>) -> Self {
        self.priority = priority.into();
        self
    }

    /// Set the reply-to routing hint.
    #[must_use]
    pub fn with_reply_to(mut self, reply_to: impl Into<String>) -> Self {
        self.reply_to = Some(reply_to.into());
        self
    }

    /// Override the timestamp.
    #[must_use]
    pub fn with_timestamp(mut self, timestamp: i64) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// One-line human readable summary, payload truncated to `max_chars`.
    pub fn summary(&self, max_chars: usize) -> String {
        let payload = match &self.payload {
            Value::Null => String::new(),
            Value::String(s) => s.clone(),
            Value::Object(map) => map
                .get("text")
                .or_else(|| map.get("message"))
                .or_else(|| map.get("description"))
                .and_then(Value::as_str)
                .map_or_else(|| self.payload.to_string(), ToString::to_string),
            other => other.to_string(),
        };
        let payload = truncate_chars(&payload, max_chars);
        if payload.is_empty() {
            format!("[{}] from {}", self.event_type, self.source)
        } else {
            format!("[{}] from {}: {payload}", self.event_type, self.source)
        }
    }
}

/// Truncate to at most `max` characters, appending `...` when cut.
pub fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let mut out: String = s.chars().take(max).collect();
    out.push_str("...");
    out
}
