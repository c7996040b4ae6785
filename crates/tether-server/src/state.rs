//! Shared handler state.

use std::sync::Arc;
use std::time::Instant;

use tether_core::Event;
use tether_runtime::{AgentRegistry, CompactionManager, Orchestrator};
use tether_settings::TetherSettings;

use crate::shutdown::ShutdownCoordinator;
use crate::websocket::BroadcastManager;

/// Everything a request handler can reach. Cheap to clone.
#[derive(Clone)]
pub struct AppState {
    /// Event queue, history, waiters.
    pub orchestrator: Arc<Orchestrator>,
    /// Context-reset recovery.
    pub compaction: Arc<CompactionManager>,
    /// Background agents.
    pub agents: Arc<AgentRegistry>,
    /// Push clients.
    pub broadcast: Arc<BroadcastManager>,
    /// Root shutdown signal.
    pub shutdown: ShutdownCoordinator,
    /// Resolved settings.
    pub settings: Arc<TetherSettings>,
    /// When the server was built.
    pub start_time: Instant,
}

impl AppState {
    /// Wire the runtime components from settings. Agent completion events
    /// go straight into the orchestrator; notification-callback events are
    /// pushed to WebSocket clients.
    pub fn new(settings: TetherSettings, collaborators: tether_runtime::Collaborators) -> Self {
        let orchestrator = Orchestrator::new(settings.orchestrator.clone(), collaborators);

        let sink = Arc::clone(&orchestrator);
        let agents = Arc::new(AgentRegistry::new(
            settings.agents.clone(),
            Arc::new(move |event: Event| {
                let _ = sink.emit(event);
            }),
        ));

        let compaction = Arc::new(
            CompactionManager::new(Arc::clone(&orchestrator), settings.compaction.clone())
                .with_agents(Arc::clone(&agents)),
        );

        let broadcast = Arc::new(BroadcastManager::new());
        let push = Arc::clone(&broadcast);
        orchestrator.set_notification_callback(Arc::new(move |event: &Event| {
            let _ = push.broadcast_event(event);
        }));

        Self {
            orchestrator,
            compaction,
            agents,
            broadcast,
            shutdown: ShutdownCoordinator::new(),
            settings: Arc::new(settings),
            start_time: Instant::now(),
        }
    }
}
