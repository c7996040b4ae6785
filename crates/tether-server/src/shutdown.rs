//! Shutdown signalling shared by the listener, the agent poller, and
//! WebSocket connections.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// How long [`ShutdownCoordinator::drain`] waits when no timeout is given.
const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Owns the root cancellation token of a running backend.
#[derive(Clone, Debug, Default)]
pub struct ShutdownCoordinator {
    token: CancellationToken,
}

impl ShutdownCoordinator {
    /// Fresh, untriggered coordinator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Child token for one background task.
    pub fn token(&self) -> CancellationToken {
        self.token.child_token()
    }

    /// Trigger shutdown. Idempotent.
    pub fn shutdown(&self) {
        if !self.token.is_cancelled() {
            info!("shutdown requested");
        }
        self.token.cancel();
    }

    /// Whether shutdown has been triggered.
    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once shutdown is triggered.
    pub async fn cancelled(&self) {
        self.token.cancelled().await;
    }

    /// Trigger shutdown on Ctrl-C.
    pub async fn shutdown_on_ctrl_c(&self) {
        tokio::select! {
            res = tokio::signal::ctrl_c() => {
                if let Err(e) = res {
                    warn!(error = %e, "failed to listen for ctrl-c");
                    return;
                }
                info!("ctrl-c received");
                self.shutdown();
            }
            () = self.token.cancelled() => {}
        }
    }

    /// Trigger shutdown, then wait up to `timeout` for `handles` to finish.
    /// Tasks still running afterwards are aborted.
    pub async fn drain(&self, handles: Vec<JoinHandle<()>>, timeout: Option<Duration>) {
        let timeout = timeout.unwrap_or(DEFAULT_DRAIN_TIMEOUT);
        self.shutdown();
        let aborts: Vec<_> = handles.iter().map(JoinHandle::abort_handle).collect();
        if tokio::time::timeout(timeout, futures::future::join_all(handles))
            .await
            .is_err()
        {
            warn!(timeout_ms = timeout.as_millis() as u64, "tasks did not stop in time, aborting");
            for handle in aborts {
                handle.abort();
            }
        }
    }
}
