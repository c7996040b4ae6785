//! Fan-out of orchestrator notifications to push clients.
//!
//! Called synchronously from the orchestrator's notification callback, so
//! sends never block: a slow client loses frames instead of stalling
//! dispatch.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::json;
use tether_core::Event;
use tracing::{debug, warn};

use super::connection::ClientConnection;

/// Registry of connected push clients.
#[derive(Debug, Default)]
pub struct BroadcastManager {
    connections: RwLock<HashMap<String, Arc<ClientConnection>>>,
}

impl BroadcastManager {
    /// Empty manager.
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a connection.
    pub fn add(&self, connection: Arc<ClientConnection>) {
        let _ = self.connections.write().insert(connection.id.clone(), connection);
    }

    /// Forget a connection.
    pub fn remove(&self, connection_id: &str) {
        let _ = self.connections.write().remove(connection_id);
    }

    /// Connected clients.
    pub fn connection_count(&self) -> usize {
        self.connections.read().len()
    }

    /// Push `{type:"event", payload}` to every client. Returns how many
    /// clients accepted the frame.
    pub fn broadcast_event(&self, event: &Event) -> usize {
        let text: Arc<str> = match serde_json::to_string(&json!({ "type": "event", "payload": event })) {
            Ok(t) => Arc::from(t),
            Err(e) => {
                warn!(event_type = %event.event_type, error = %e, "failed to serialize event");
                return 0;
            }
        };
        let conns = self.connections.read();
        let mut delivered = 0;
        for conn in conns.values() {
            if conn.send(Arc::clone(&text)) {
                delivered += 1;
            } else {
                warn!(conn_id = %conn.id, dropped = conn.drop_count(), "push client not keeping up");
            }
        }
        debug!(event_type = %event.event_type, recipients = conns.len(), delivered, "pushed event");
        delivered
    }
}
