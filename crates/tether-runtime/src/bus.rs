//! Event bus.
//!
//! Maps event-type strings to two separately tracked handler classes:
//!
//! - **Direct handlers** ([`EventHandler`]) run inline during dispatch.
//! - **Agent handler configs** ([`AgentHandlerConfig`]) are never executed by
//!   the bus. Their presence tells the orchestrator to forward the event to
//!   the upstream session.
//!
//! The bus is a plain registry object owned by the orchestrator; there is no
//! process-wide handler table.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tether_core::Event;
use tracing::debug;

use crate::errors::RuntimeError;

/// A handler executed inline when an event of its type is dispatched.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Handler id, unique per event type.
    fn id(&self) -> &str;

    /// Handle one event. Errors are logged by the dispatcher and never stop
    /// the remaining handlers.
    async fn handle(&self, event: &Event) -> Result<(), RuntimeError>;
}

/// Adapter turning a synchronous closure into an [`EventHandler`].
pub struct FnHandler<F> {
    id: String,
    f: F,
}

impl<F> FnHandler<F>
where
    F: Fn(&Event) -> Result<(), RuntimeError> + Send + Sync,
{
    /// Wrap `f` under the given handler id.
    pub fn new(id: impl Into<String>, f: F) -> Self {
        Self { id: id.into(), f }
    }
}

#[async_trait]
impl<F> EventHandler for FnHandler<F>
where
    F: Fn(&Event) -> Result<(), RuntimeError> + Send + Sync,
{
    fn id(&self) -> &str {
        &self.id
    }

    async fn handle(&self, event: &Event) -> Result<(), RuntimeError> {
        (self.f)(event)
    }
}

/// Descriptor marking an event type as relevant to the upstream session.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentHandlerConfig {
    /// Handler id, unique per event type.
    pub id: String,
    /// What the upstream session is expected to do with the event.
    pub description: String,
}

impl AgentHandlerConfig {
    /// Build a config.
    pub fn new(id: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
        }
    }
}

/// Handlers registered for one event type.
#[derive(Clone, Default)]
pub struct HandlerSet {
    /// Inline handlers, in registration order.
    pub direct: Vec<Arc<dyn EventHandler>>,
    /// Upstream-relevance descriptors, in registration order.
    pub agent: Vec<AgentHandlerConfig>,
}

impl HandlerSet {
    fn is_empty(&self) -> bool {
        self.direct.is_empty() && self.agent.is_empty()
    }
}

impl std::fmt::Debug for HandlerSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerSet")
            .field("direct", &self.direct.iter().map(|h| h.id()).collect::<Vec<_>>())
            .field("agent", &self.agent)
            .finish()
    }
}

/// Registry of handlers keyed by event type.
#[derive(Default, Debug)]
pub struct EventBus {
    handlers: HashMap<String, HandlerSet>,
}

impl EventBus {
    /// Create an empty bus.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an inline handler. A handler with the same id for the same
    /// type is replaced.
    pub fn register_direct(&mut self, event_type: &str, handler: Arc<dyn EventHandler>) {
        let set = self.handlers.entry(event_type.to_string()).or_default();
        set.direct.retain(|h| h.id() != handler.id());
        debug!(event_type, handler_id = handler.id(), "registering direct handler");
        set.direct.push(handler);
    }

    /// Register an agent handler config. A config with the same id for the
    /// same type is replaced.
    pub fn register_agent(&mut self, event_type: &str, config: AgentHandlerConfig) {
        let set = self.handlers.entry(event_type.to_string()).or_default();
        set.agent.retain(|c| c.id != config.id);
        debug!(event_type, handler_id = %config.id, "registering agent handler");
        set.agent.push(config);
    }

    /// Remove a handler (either class) by id. Returns whether anything was removed.
    pub fn unregister(&mut self, event_type: &str, handler_id: &str) -> bool {
        let Some(set) = self.handlers.get_mut(event_type) else {
            return false;
        };
        let before = set.direct.len() + set.agent.len();
        set.direct.retain(|h| h.id() != handler_id);
        set.agent.retain(|c| c.id != handler_id);
        let removed = set.direct.len() + set.agent.len() < before;
        if set.is_empty() {
            let _ = self.handlers.remove(event_type);
        }
        removed
    }

    /// Snapshot of the handlers for a type (empty when none).
    pub fn get_handlers(&self, event_type: &str) -> HandlerSet {
        self.handlers.get(event_type).cloned().unwrap_or_default()
    }

    /// Whether any handler of either class is registered for a type.
    pub fn has_handlers(&self, event_type: &str) -> bool {
        self.handlers.get(event_type).is_some_and(|s| !s.is_empty())
    }

    /// Event types with at least one handler, sorted.
    pub fn handler_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.handlers.keys().cloned().collect();
        types.sort();
        types
    }

    /// Remove every handler.
    pub fn clear(&mut self) {
        self.handlers.clear();
    }
}
