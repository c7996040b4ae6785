//! # tether-supervisor
//!
//! Front process between the upstream session and the backend.
//!
//! - [`backend::BackendSupervisor`]: spawn, health-check, stop, restart
//! - [`relay::ToolRelay`] / [`relay::NotificationRelay`]: tool calls out,
//!   pushed events back as notifications
//! - [`protocol`]: newline-delimited JSON-RPC on stdio
//! - [`run_stdio`]: wires everything together for the `supervise` command

#![deny(unsafe_code)]

pub mod backend;
pub mod backoff;
pub mod errors;
pub mod health;
pub mod protocol;
pub mod relay;
pub mod tools;

use std::sync::Arc;
use std::time::Duration;

use tether_settings::TetherSettings;
use tokio::io::BufReader;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub use backend::BackendSupervisor;
pub use errors::SupervisorError;
pub use protocol::ProtocolServer;
pub use relay::{NotificationRelay, ToolRelay};

/// How long buffered output may take to drain at exit.
const WRITER_DRAIN: Duration = Duration::from_secs(2);

/// Start the backend, then serve the protocol on stdin/stdout until stdin
/// closes or `cancel` fires. The backend is stopped on the way out.
pub async fn run_stdio(settings: &TetherSettings, cancel: CancellationToken) -> errors::Result<()> {
    let base_url = settings.server.base_url();
    let supervisor = Arc::new(BackendSupervisor::new(settings.supervisor.clone(), base_url.clone()));
    supervisor.spawn().await?;

    let (tx, rx) = protocol::outbox();
    let writer = protocol::spawn_writer(tokio::io::stdout(), rx);

    let relay_cancel = cancel.child_token();
    let notifications = tokio::spawn(
        NotificationRelay::new(relay::ws_url(&base_url), &settings.supervisor).run(tx.clone(), relay_cancel.clone()),
    );

    let tools = ToolRelay::new(base_url, Duration::from_millis(settings.supervisor.tool_timeout_ms));
    let server = Arc::new(ProtocolServer::new(Arc::clone(&supervisor), tools));
    info!("supervisor serving on stdio");
    tokio::select! {
        () = server.read_loop(BufReader::new(tokio::io::stdin()), tx) => {}
        () = cancel.cancelled() => info!("supervisor cancelled"),
    }

    relay_cancel.cancel();
    if let Err(e) = notifications.await {
        warn!(error = %e, "notification relay task failed");
    }
    supervisor.stop().await?;
    if tokio::time::timeout(WRITER_DRAIN, writer).await.is_err() {
        warn!("protocol writer did not drain in time");
    }
    Ok(())
}
