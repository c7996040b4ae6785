//! Router construction and the listener lifecycle.

use std::net::SocketAddr;

use axum::Router;
use axum::extract::{State, WebSocketUpgrade};
use axum::response::Response;
use axum::routing::{get, post};
use tether_runtime::Collaborators;
use tether_settings::TetherSettings;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::errors::Result;
use crate::routes::{agents, events, hooks, status, tools};
use crate::state::AppState;
use crate::websocket::handle_socket;

/// Build the router over `state`.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(status::health))
        .route("/status", get(status::status))
        .route("/events", post(events::emit_event))
        .route("/events/wait", get(events::wait_events))
        .route("/hooks/pre-compact", get(hooks::pre_compact))
        .route("/hooks/post-compact", get(hooks::post_compact))
        .route("/checkpoint", get(hooks::get_checkpoint).post(hooks::save_checkpoint))
        .route("/agents", get(agents::list_agents).post(agents::register_agent))
        .route(
            "/agents/{id}",
            get(agents::get_agent)
                .patch(agents::update_agent)
                .delete(agents::delete_agent),
        )
        .route("/agents/{id}/complete", post(agents::complete_agent))
        .route("/tools/{name}", post(tools::call_tool))
        .route("/ws", get(ws_upgrade))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn ws_upgrade(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    let broadcast = state.broadcast.clone();
    let shutdown = state.shutdown.token();
    ws.on_upgrade(move |socket| handle_socket(socket, broadcast, shutdown))
}

/// The backend process: orchestrator, agent poller, and HTTP listener.
pub struct TetherServer {
    state: AppState,
}

impl TetherServer {
    /// Wire every component. Nothing runs until [`listen`](Self::listen).
    pub fn new(settings: TetherSettings, collaborators: Collaborators) -> Self {
        Self {
            state: AppState::new(settings, collaborators),
        }
    }

    /// Shared state (for embedding and tests).
    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Router over this server's state.
    pub fn router(&self) -> Router {
        build_router(self.state.clone())
    }

    /// Start the orchestrator and agent poller, bind the configured address,
    /// and serve until shutdown is triggered. Returns the bound address and
    /// the serve task, which finishes after everything has stopped.
    pub async fn listen(&self) -> Result<(SocketAddr, JoinHandle<()>)> {
        let server = &self.state.settings.server;
        let listener = TcpListener::bind((server.host.as_str(), server.port)).await?;
        let addr = listener.local_addr()?;

        self.state.orchestrator.start().await?;
        let poller = self.state.agents.spawn_poller(self.state.shutdown.token());

        let router = self.router();
        let shutdown = self.state.shutdown.clone();
        let orchestrator = self.state.orchestrator.clone();
        let handle = tokio::spawn(async move {
            // stopping the orchestrator releases in-flight long-polls so the
            // graceful drain does not wait out their timeouts
            let signal = {
                let orchestrator = orchestrator.clone();
                async move {
                    shutdown.cancelled().await;
                    orchestrator.stop().await;
                }
            };
            if let Err(e) = axum::serve(listener, router).with_graceful_shutdown(signal).await {
                error!(error = %e, "server error");
            }
            orchestrator.stop().await;
            if let Err(e) = poller.await {
                error!(error = %e, "agent poller task failed");
            }
            info!("server stopped");
        });

        info!(%addr, "tether backend listening");
        Ok((addr, handle))
    }

    /// Trigger shutdown.
    pub fn shutdown(&self) {
        self.state.shutdown.shutdown();
    }

    /// Serve until Ctrl-C, then shut down gracefully.
    pub async fn run(self) -> Result<()> {
        let (_addr, handle) = self.listen().await?;
        self.state.shutdown.shutdown_on_ctrl_c().await;
        self.state.shutdown.drain(vec![handle], None).await;
        Ok(())
    }
}
