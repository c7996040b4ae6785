//! Backend health probing.

use std::time::Duration;

use reqwest::{Client, StatusCode};
use tracing::debug;

use crate::errors::{Result, SupervisorError};

/// Upper bound for a single probe request.
const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// One probe: `true` only for HTTP 200.
pub async fn probe(client: &Client, url: &str) -> bool {
    match client.get(url).timeout(PROBE_TIMEOUT).send().await {
        Ok(resp) => resp.status() == StatusCode::OK,
        Err(e) => {
            debug!(url, error = %e, "health probe failed");
            false
        }
    }
}

/// Probe every `interval` until the backend answers 200 or `deadline`
/// elapses.
pub async fn wait_until_healthy(client: &Client, url: &str, interval: Duration, deadline: Duration) -> Result<()> {
    let poll = async {
        let mut attempts = 0u32;
        loop {
            attempts += 1;
            if probe(client, url).await {
                debug!(url, attempts, "backend healthy");
                return;
            }
            tokio::time::sleep(interval).await;
        }
    };
    tokio::time::timeout(deadline, poll)
        .await
        .map_err(|_| SupervisorError::HealthTimeout {
            url: url.to_string(),
            timeout_ms: deadline.as_millis() as u64,
        })
}
