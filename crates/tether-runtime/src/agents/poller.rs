//! Output-file completion heuristic.
//!
//! Best effort only: the explicit completion callback is authoritative and
//! this poller is the fallback for agents that exit without calling it. For
//! every running agent with an output file, the tail of the file is checked
//! for a completion marker; a file that has not been written for longer than
//! the stale threshold also counts as finished.

use std::io::SeekFrom;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::agents::registry::AgentRegistry;

/// Substrings that mark an output file as finished.
pub const COMPLETION_MARKERS: [&str; 5] = [
    "TASK_COMPLETE",
    "TASK COMPLETE",
    "## Summary",
    "\"type\":\"result\"",
    "All tasks completed",
];

/// Why an output file was judged finished.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompletionSignal {
    /// The tail contained a completion marker.
    Marker,
    /// The file stopped changing.
    Stale,
}

/// Outcome of inspecting one output file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Inspection {
    /// Missing, empty, or still being written.
    Pending,
    /// Finished, with a summary taken from the tail.
    Finished {
        /// Which signal fired.
        signal: CompletionSignal,
        /// Truncated tail of the file.
        summary: String,
    },
}

/// Inspect one output file.
pub async fn inspect_output(
    path: &Path,
    tail_bytes: u64,
    stale_threshold: Duration,
    summary_chars: usize,
) -> std::io::Result<Inspection> {
    let metadata = match tokio::fs::metadata(path).await {
        Ok(m) => m,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Inspection::Pending),
        Err(e) => return Err(e),
    };
    let len = metadata.len();
    if len == 0 {
        return Ok(Inspection::Pending);
    }

    let mut file = tokio::fs::File::open(path).await?;
    let _ = file.seek(SeekFrom::Start(len.saturating_sub(tail_bytes))).await?;
    let mut buf = Vec::with_capacity(tail_bytes.min(len) as usize);
    let _ = file.read_to_end(&mut buf).await?;
    let tail = String::from_utf8_lossy(&buf);

    let signal = if COMPLETION_MARKERS.iter().any(|m| tail.contains(m)) {
        Some(CompletionSignal::Marker)
    } else {
        let idle = SystemTime::now()
            .duration_since(metadata.modified()?)
            .unwrap_or_default();
        (idle > stale_threshold).then_some(CompletionSignal::Stale)
    };

    Ok(match signal {
        Some(signal) => Inspection::Finished {
            signal,
            summary: tail_summary(&tail, summary_chars),
        },
        None => Inspection::Pending,
    })
}

/// Last `max_chars` characters of the trimmed tail, prefixed with `...` when cut.
pub fn tail_summary(tail: &str, max_chars: usize) -> String {
    let trimmed = tail.trim();
    let count = trimmed.chars().count();
    if count <= max_chars {
        return trimmed.to_string();
    }
    let kept: String = trimmed.chars().skip(count - max_chars).collect();
    format!("...{kept}")
}

impl AgentRegistry {
    /// Inspect every running agent's output file once. Returns how many
    /// agents were completed. I/O errors are logged per agent.
    pub async fn poll_agents(&self) -> usize {
        let settings = self.settings().clone();
        let stale = Duration::from_millis(settings.stale_threshold_ms);
        let mut completed = 0;

        for agent in self.running() {
            let Some(path) = agent.output_file.as_deref() else {
                continue;
            };
            match inspect_output(path, settings.tail_bytes, stale, settings.summary_chars).await {
                Ok(Inspection::Pending) => {}
                Ok(Inspection::Finished { signal, summary }) => {
                    debug!(agent_id = %agent.id, ?signal, "output file looks finished");
                    if self.complete(&agent.id, &summary) {
                        completed += 1;
                    }
                }
                Err(e) => warn!(
                    agent_id = %agent.id,
                    path = %path.display(),
                    error = %e,
                    "failed to inspect agent output"
                ),
            }
        }
        completed
    }

    /// Poll on the configured interval until `cancel` fires. The task holds
    /// the registry alive; cancel it at shutdown.
    pub fn spawn_poller(self: &Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        let registry = Arc::clone(self);
        let period = Duration::from_millis(self.settings().poll_interval_ms.max(1));
        tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            info!(interval_ms = period.as_millis() as u64, "agent poller started");
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    _ = interval.tick() => {}
                }
                let completed = registry.poll_agents().await;
                if completed > 0 {
                    info!(completed, "poller completed agents");
                }
            }
            debug!("agent poller stopped");
        })
    }
}
