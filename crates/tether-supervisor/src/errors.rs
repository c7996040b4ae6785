//! Supervisor error types.

/// Errors raised while supervising or talking to the backend.
#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    /// The backend process could not be started.
    #[error("failed to spawn backend `{command}`: {source}")]
    Spawn {
        /// Program that was executed.
        command: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The backend never answered its health probe.
    #[error("backend not healthy at {url} after {timeout_ms} ms")]
    HealthTimeout {
        /// Probed URL.
        url: String,
        /// Startup deadline.
        timeout_ms: u64,
    },

    /// The backend exited before it became healthy.
    #[error("backend exited during startup: {0}")]
    ExitedDuringStartup(String),

    /// Another restart is still running.
    #[error("a backend restart is already in progress")]
    RestartInProgress,

    /// The backend answered a relayed call with a non-success status.
    #[error("backend returned {status}: {body}")]
    Backend {
        /// HTTP status code.
        status: u16,
        /// Response body.
        body: String,
    },

    /// HTTP transport error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result alias for supervisor operations.
pub type Result<T> = std::result::Result<T, SupervisorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn health_timeout_message() {
        let err = SupervisorError::HealthTimeout {
            url: "http://127.0.0.1:7437/health".into(),
            timeout_ms: 30_000,
        };
        assert_eq!(
            err.to_string(),
            "backend not healthy at http://127.0.0.1:7437/health after 30000 ms"
        );
    }

    #[test]
    fn spawn_error_keeps_source() {
        let err = SupervisorError::Spawn {
            command: "missing-bin".into(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "no such file"),
        };
        assert!(std::error::Error::source(&err).is_some());
        assert!(err.to_string().contains("missing-bin"));
    }
}
