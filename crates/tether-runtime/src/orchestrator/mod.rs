//! Orchestrator modules: lifecycle, emit/long-poll, dispatch, status.

#[allow(clippy::module_inception)]
pub mod orchestrator;
pub mod status;
mod waiters;

pub use orchestrator::{NotificationCallback, Orchestrator, UPSTREAM_HANDLER_ID};
pub use status::{CollaboratorHealth, OrchestratorState, OrchestratorStatus};
