//! Runtime error types.
//!
//! Capacity outcomes (queue full under `reject`, agent registry at its cap)
//! are not errors: they surface as `false` from the operation itself.

use crate::orchestrator::OrchestratorState;

/// Errors raised by the orchestration runtime.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    /// A direct event handler failed.
    #[error("Handler error: {0}")]
    Handler(String),

    /// An external collaborator failed to start, stop, or flush.
    #[error("Collaborator {name} failed: {message}")]
    Collaborator {
        /// Collaborator name.
        name: String,
        /// Error description.
        message: String,
    },

    /// The orchestrator is not in a state that allows the operation.
    #[error("Orchestrator is {0}")]
    InvalidState(OrchestratorState),

    /// Checkpoint persistence error.
    #[error("Checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),
}

impl RuntimeError {
    /// Shorthand for a collaborator failure.
    pub fn collaborator(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Collaborator {
            name: name.into(),
            message: message.into(),
        }
    }
}

/// Errors reading or writing the session checkpoint file.
#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    /// Filesystem error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
