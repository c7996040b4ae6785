//! One connected push client.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use tokio::sync::mpsc;

/// Outbound queue depth per client before messages are dropped.
pub const CLIENT_BUFFER: usize = 256;

/// Sending half of a connected client. The socket writer task owns the
/// receiving half.
#[derive(Debug)]
pub struct ClientConnection {
    /// Connection id (`conn_...`).
    pub id: String,
    /// When the socket was accepted.
    pub connected_at: Instant,
    tx: mpsc::Sender<Arc<str>>,
    dropped: AtomicU64,
}

impl ClientConnection {
    /// Wrap the sending half of a client's outbound queue.
    pub fn new(id: String, tx: mpsc::Sender<Arc<str>>) -> Self {
        Self {
            id,
            connected_at: Instant::now(),
            tx,
            dropped: AtomicU64::new(0),
        }
    }

    /// Queue a text frame. A full or closed queue counts as a drop.
    pub fn send(&self, text: Arc<str>) -> bool {
        if self.tx.try_send(text).is_ok() {
            true
        } else {
            let _ = self.dropped.fetch_add(1, Ordering::Relaxed);
            false
        }
    }

    /// Serialize and queue a JSON value.
    pub fn send_json(&self, value: &serde_json::Value) -> bool {
        match serde_json::to_string(value) {
            Ok(text) => self.send(Arc::from(text)),
            Err(_) => false,
        }
    }

    /// Frames dropped so far.
    pub fn drop_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Whether the writer side has gone away.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}
