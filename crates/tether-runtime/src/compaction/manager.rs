//! Compaction recovery manager.
//!
//! Brackets a context reset of the upstream session. `handle_pre_compact`
//! returns what to persist before the reset; `handle_post_compact` returns
//! the recovery block afterwards, anchored on the delivery watermark so the
//! caller knows polling can resume without replays.
//!
//! The pending [`CompactionRecord`] is diagnostic only: a record that is
//! still pending when the next pre-reset signal arrives means the caller
//! never resumed polling, and it is counted as a loop failure.

use std::fmt::Write as _;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tether_core::events::types;
use tether_core::time::{format_ms, now_ms};
use tether_core::Event;
use tether_settings::CompactionSettings;
use tracing::{debug, info, warn};

use crate::agents::AgentRegistry;
use crate::compaction::checkpoint::{CheckpointStore, SessionCheckpoint};
use crate::orchestrator::Orchestrator;

/// Records kept for diagnostics.
const MAX_HISTORY: usize = 100;

/// Characters of each event summary shown in the pre-reset block.
const EVENT_SUMMARY_CHARS: usize = 120;

const SOURCE: &str = "compaction";

/// One context-reset cycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompactionRecord {
    /// Epoch ms of the pre-reset signal.
    pub timestamp: i64,
    /// Whether a delivery consumed the cycle (the caller resumed polling).
    pub loop_restarted: bool,
}

/// Counters exposed in long-poll responses and status output.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompactionStats {
    /// Pre-reset cycles observed.
    pub count: usize,
    /// Cycles that ended without the caller resuming its loop.
    pub loop_failures: usize,
    /// Whether a cycle is waiting to be consumed.
    pub pending: bool,
}

#[derive(Default)]
struct CycleState {
    flushed_this_cycle: bool,
    compacted_since_last_wake: bool,
    pending: Option<CompactionRecord>,
    history: Vec<CompactionRecord>,
    count: usize,
    loop_failures: usize,
}

impl CycleState {
    fn archive(&mut self, record: CompactionRecord) {
        if !record.loop_restarted {
            self.loop_failures += 1;
        }
        self.history.push(record);
        if self.history.len() > MAX_HISTORY {
            let _ = self.history.remove(0);
        }
    }
}

/// Produces the save/restore instruction blocks around a context reset.
pub struct CompactionManager {
    orchestrator: Arc<Orchestrator>,
    agents: Option<Arc<AgentRegistry>>,
    store: CheckpointStore,
    settings: CompactionSettings,
    state: Mutex<CycleState>,
    checkpoint: Mutex<SessionCheckpoint>,
    write_lock: tokio::sync::Mutex<()>,
    event_loop_active: AtomicBool,
}

impl CompactionManager {
    /// Create a manager, loading the persisted checkpoint.
    pub fn new(orchestrator: Arc<Orchestrator>, settings: CompactionSettings) -> Self {
        let store = CheckpointStore::new(settings.checkpoint_path.clone());
        let checkpoint = store.load();
        Self {
            orchestrator,
            agents: None,
            store,
            settings,
            state: Mutex::new(CycleState::default()),
            checkpoint: Mutex::new(checkpoint),
            write_lock: tokio::sync::Mutex::new(()),
            event_loop_active: AtomicBool::new(false),
        }
    }

    /// Include running background agents in recovery blocks.
    #[must_use]
    pub fn with_agents(mut self, agents: Arc<AgentRegistry>) -> Self {
        self.agents = Some(agents);
        self
    }

    /// Latch the event loop as active. Returns `true` only on the first call.
    pub fn set_event_loop_active(&self) -> bool {
        let first = !self.event_loop_active.swap(true, Ordering::SeqCst);
        if first {
            info!("event loop marked active");
        }
        first
    }

    /// Whether the event loop latch is set.
    pub fn is_event_loop_active(&self) -> bool {
        self.event_loop_active.load(Ordering::SeqCst)
    }

    /// Handle the pre-reset signal and return the save instructions.
    pub fn handle_pre_compact(&self) -> String {
        let first_in_cycle = {
            let mut state = self.state.lock();
            if state.flushed_this_cycle {
                false
            } else {
                state.flushed_this_cycle = true;
                if let Some(stale) = state.pending.take() {
                    warn!(timestamp = stale.timestamp, "previous compaction never resumed the event loop");
                    state.archive(stale);
                }
                state.pending = Some(CompactionRecord {
                    timestamp: now_ms(),
                    loop_restarted: false,
                });
                state.count += 1;
                true
            }
        };

        if first_in_cycle {
            let _ = self.orchestrator.emit(Event::new(types::PRE_COMPACT, SOURCE, json!({})));
            self.flush_transcript();
        } else {
            debug!("duplicate pre-compact signal, skipping flush");
        }

        self.pre_compact_message()
    }

    /// Handle the post-reset signal and return the recovery block.
    pub fn handle_post_compact(&self) -> String {
        {
            let mut state = self.state.lock();
            state.flushed_this_cycle = false;
            // only a cycle opened by a pre-reset signal can be consumed
            if state.pending.is_some() {
                state.compacted_since_last_wake = true;
            } else {
                debug!("post-compact signal without an open cycle");
            }
        }
        let watermark = self.orchestrator.delivery_watermark();
        let _ = self.orchestrator.emit(Event::new(
            types::POST_COMPACT,
            SOURCE,
            json!({ "watermark": watermark }),
        ));
        self.post_compact_message(watermark)
    }

    /// One-shot: whether a reset happened since the last delivery. Consuming
    /// it closes the pending record as restarted.
    pub fn consume_compaction_flag(&self) -> bool {
        let mut state = self.state.lock();
        if !state.compacted_since_last_wake {
            return false;
        }
        state.compacted_since_last_wake = false;
        if let Some(mut record) = state.pending.take() {
            record.loop_restarted = true;
            state.archive(record);
        }
        true
    }

    /// Cycle counters.
    pub fn stats(&self) -> CompactionStats {
        let state = self.state.lock();
        CompactionStats {
            count: state.count,
            loop_failures: state.loop_failures,
            pending: state.pending.is_some(),
        }
    }

    /// Closed cycles, oldest first.
    pub fn history(&self) -> Vec<CompactionRecord> {
        self.state.lock().history.clone()
    }

    /// Current checkpoint.
    pub fn checkpoint(&self) -> SessionCheckpoint {
        self.checkpoint.lock().clone()
    }

    /// Replace the checkpoint and persist it on the blocking pool. A failed
    /// write is logged and the new checkpoint is kept in memory.
    ///
    /// Updates are serialized so the file and the in-memory copy always end
    /// on the same checkpoint.
    pub async fn update_checkpoint(&self, summary: String, highlights: Vec<String>) -> SessionCheckpoint {
        let _writing = self.write_lock.lock().await;
        let checkpoint = SessionCheckpoint {
            summary,
            highlights,
            updated_at: now_ms(),
        };

        let store = self.store.clone();
        let to_save = checkpoint.clone();
        match tokio::task::spawn_blocking(move || store.save(&to_save)).await {
            Ok(Ok(())) => debug!(path = %self.store.path().display(), "checkpoint saved"),
            Ok(Err(e)) => {
                warn!(path = %self.store.path().display(), error = %e, "checkpoint not persisted, keeping in memory");
            }
            Err(e) => warn!(error = %e, "checkpoint writer task failed, keeping in memory"),
        }

        *self.checkpoint.lock() = checkpoint.clone();
        checkpoint
    }

    fn flush_transcript(&self) {
        let Some(sink) = self.orchestrator.collaborators().transcript.clone() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => drop(handle.spawn(async move {
                if let Err(e) = sink.flush().await {
                    warn!(error = %e, "transcript flush failed");
                }
            })),
            Err(_) => warn!("no async runtime, transcript flush skipped"),
        }
    }

    fn pre_compact_message(&self) -> String {
        let c = self.orchestrator.collaborators();
        let mut out = String::from("## Context reset imminent\n\n");
        out.push_str("Your context is about to be cleared. Persist anything you need now.\n");

        write_list(&mut out, "Active timers", &c.active_timers());
        if let Some(stats) = c.memory_stats() {
            let _ = writeln!(out, "\nMemory: {} documents, {} chunks", stats.documents, stats.chunks);
        }

        let recent: Vec<String> = self
            .orchestrator
            .recent_events(self.settings.recent_events)
            .iter()
            .map(|e| format!("{} {}", format_ms(e.timestamp), e.summary(EVENT_SUMMARY_CHARS)))
            .collect();
        write_list(&mut out, "Recent events", &recent);

        let checkpoint = self.checkpoint();
        write_list(&mut out, "Checkpoint highlights", &checkpoint.highlights);

        out.push_str(
            "\nSave a short session summary and highlights through the checkpoint \
             endpoint before the reset.\n",
        );
        if self.is_event_loop_active() {
            out.push_str(
                "\nAfter the reset, restart the event loop: call wait_for_event again and keep polling.\n",
            );
        }
        out
    }

    fn post_compact_message(&self, watermark: i64) -> String {
        let c = self.orchestrator.collaborators();
        let mut out = String::from("## Context restored\n\n");
        if watermark > 0 {
            let _ = writeln!(
                out,
                "Delivery watermark: {watermark} ({}). Events at or before it were already \
                 delivered and will not be replayed; it is safe to resume polling.",
                format_ms(watermark)
            );
        } else {
            out.push_str("No events have been delivered yet; it is safe to resume polling.\n");
        }

        write_list(&mut out, "Active timers", &c.active_timers());
        if let Some(stats) = c.memory_stats() {
            let _ = writeln!(out, "\nMemory: {} documents, {} chunks", stats.documents, stats.chunks);
        }
        write_list(
            &mut out,
            "Recent memory keys",
            &c.recent_memory_keys(self.settings.recent_memory_keys),
        );

        let checkpoint = self.checkpoint();
        if !checkpoint.summary.is_empty() {
            let _ = writeln!(out, "\nSession summary:\n{}", checkpoint.summary);
        }

        if let Some(agents) = &self.agents {
            let now = now_ms();
            let running: Vec<String> = agents
                .running()
                .iter()
                .map(|a| {
                    format!(
                        "{}: {} (running {}s)",
                        a.id,
                        a.description,
                        (now - a.start_time).max(0) / 1000
                    )
                })
                .collect();
            write_list(&mut out, "Running background agents", &running);
        }

        if self.is_event_loop_active() {
            out.push_str("\nRestart the event loop now: call wait_for_event.\n");
        }
        out
    }
}

fn write_list(out: &mut String, title: &str, items: &[String]) {
    if items.is_empty() {
        let _ = writeln!(out, "\n{title}: none");
        return;
    }
    let _ = writeln!(out, "\n{title}:");
    for item in items {
        let _ = writeln!(out, "- {item}");
    }
}

impl std::fmt::Debug for CompactionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompactionManager")
            .field("stats", &self.stats())
            .field("event_loop_active", &self.is_event_loop_active())
            .finish_non_exhaustive()
    }
}
