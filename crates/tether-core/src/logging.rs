//! Structured logging setup.
//!
//! All output goes to stderr: the supervisor speaks its protocol on stdout,
//! and the backend's stderr is the only stream the supervisor forwards.

use tracing_subscriber::EnvFilter;

/// Initialize the global tracing subscriber.
///
/// `level` is used when `RUST_LOG` is unset. With `json == true` each line is
/// a JSON object. Subsequent calls are no-ops.
pub fn init_subscriber(level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr);

    // try_init fails if a global subscriber is already set
    let _ = if json {
        builder.json().try_init()
    } else {
        builder.compact().try_init()
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_subscriber_is_idempotent() {
        init_subscriber("warn", false);
        init_subscriber("debug", true);
    }
}
