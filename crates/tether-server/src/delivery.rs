//! Long-poll delivery shared by `GET /events/wait` and the
//! `wait_for_event` tool.
//!
//! A delivery latches the event loop as active, waits on the orchestrator,
//! advances the delivery watermark to the newest returned timestamp, and
//! attaches either the full identity (once per compaction cycle) or the
//! short digest.

use serde::Serialize;
use tether_core::Event;
use tether_runtime::CompactionStats;
use tracing::debug;

use crate::state::AppState;

/// Identity block attached to a delivery.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum IdentityPayload {
    /// Sent exactly once after each context reset.
    Full {
        /// Persona definition.
        soul: String,
        /// What is known about the user.
        user: String,
        /// Mutable working state.
        state: String,
        /// Always `true`.
        full: bool,
    },
    /// Sent with every other delivery.
    Digest {
        /// Short identity digest.
        digest: String,
    },
}

/// Non-empty long-poll response.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Delivery {
    /// Identity block.
    pub identity: IdentityPayload,
    /// Events newer than the effective `since`, oldest first.
    pub events: Vec<Event>,
    /// Delivery watermark after this response.
    pub cursor: i64,
    /// Compaction counters.
    pub compaction: CompactionStats,
}

/// Wait up to `timeout_ms` for events. `since` overrides the server-held
/// watermark. Returns `None` when the wait produced nothing.
pub async fn wait_and_deliver(state: &AppState, timeout_ms: u64, since: Option<i64>) -> Option<Delivery> {
    let _ = state.compaction.set_event_loop_active();

    let since = since.or_else(|| {
        let watermark = state.orchestrator.delivery_watermark();
        (watermark > 0).then_some(watermark)
    });
    let events = state.orchestrator.wait_for_event(timeout_ms, since).await;
    let newest = events.iter().map(|e| e.timestamp).max()?;

    let cursor = state.orchestrator.advance_watermark(newest);
    let identity = identity_payload(state, state.compaction.consume_compaction_flag());
    debug!(
        count = events.len(),
        cursor,
        full_identity = matches!(identity, IdentityPayload::Full { .. }),
        "delivering events"
    );

    Some(Delivery {
        identity,
        events,
        cursor,
        compaction: state.compaction.stats(),
    })
}

fn identity_payload(state: &AppState, full: bool) -> IdentityPayload {
    let source = state.orchestrator.collaborators().identity.clone();
    if full {
        let identity = source.map(|s| s.full()).unwrap_or_default();
        IdentityPayload::Full {
            soul: identity.soul,
            user: identity.user,
            state: identity.state,
            full: true,
        }
    } else {
        IdentityPayload::Digest {
            digest: source.map(|s| s.digest()).unwrap_or_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tether_settings::TetherSettings;

    fn state() -> (AppState, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = TetherSettings::default();
        settings.compaction.checkpoint_path = dir.path().join("checkpoint.json");
        settings.orchestrator.tick_interval_ms = 3_600_000;
        (AppState::new(settings, tether_runtime::Collaborators::none()), dir)
    }

    #[tokio::test]
    async fn empty_wait_is_none() {
        let (state, _dir) = state();
        assert!(wait_and_deliver(&state, 10, None).await.is_none());
        assert!(state.compaction.is_event_loop_active());
    }

    #[tokio::test]
    async fn delivery_advances_watermark_and_skips_replays() {
        let (state, _dir) = state();
        let first = Event::new("message", "test", json!({"n": 1})).with_timestamp(1_000);
        assert!(state.orchestrator.emit(first));

        let d = wait_and_deliver(&state, 10, Some(0)).await.unwrap();
        assert_eq!(d.events.len(), 1);
        assert_eq!(d.cursor, 1_000);
        assert_eq!(state.orchestrator.delivery_watermark(), 1_000);

        // no since: the watermark hides the already-delivered event
        assert!(wait_and_deliver(&state, 10, None).await.is_none());

        let second = Event::new("message", "test", json!({"n": 2})).with_timestamp(2_000);
        assert!(state.orchestrator.emit(second));
        let d = wait_and_deliver(&state, 10, None).await.unwrap();
        assert_eq!(d.events.len(), 1);
        assert_eq!(d.events[0].payload["n"], 2);
        assert_eq!(d.cursor, 2_000);
    }

    #[tokio::test]
    async fn same_millisecond_completions_are_both_delivered() {
        let (state, _dir) = state();
        let _ = state.orchestrator.advance_watermark(1_000);

        let parked = {
            let state = state.clone();
            tokio::spawn(async move { wait_and_deliver(&state, 1_000, None).await })
        };
        while state.orchestrator.status().pending_waiters < 1 {
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        for id in ["a", "b"] {
            let e = Event::new("agent_completed", "agent-registry", json!({"id": id})).with_timestamp(2_000);
            assert!(state.orchestrator.emit(e));
        }

        let first = parked.await.unwrap().unwrap();
        let ids: Vec<&str> = first.events.iter().filter_map(|e| e.payload["id"].as_str()).collect();
        assert_eq!(ids, vec!["a"]);

        let second = wait_and_deliver(&state, 10, None).await.unwrap();
        let ids: Vec<&str> = second.events.iter().filter_map(|e| e.payload["id"].as_str()).collect();
        assert_eq!(ids, vec!["b"]);
        assert!(second.cursor > first.cursor);

        assert!(wait_and_deliver(&state, 10, None).await.is_none());
    }

    #[tokio::test]
    async fn full_identity_once_per_compaction() {
        let (state, _dir) = state();
        let _ = state.compaction.handle_pre_compact();
        let _ = state.compaction.handle_post_compact();

        assert!(state.orchestrator.emit(Event::new("message", "t", json!({}))));
        let d = wait_and_deliver(&state, 10, Some(0)).await.unwrap();
        assert!(matches!(d.identity, IdentityPayload::Full { full: true, .. }));
        assert_eq!(d.compaction.count, 1);
        assert_eq!(d.compaction.loop_failures, 0);

        assert!(state.orchestrator.emit(Event::new("message", "t", json!({}))));
        let d = wait_and_deliver(&state, 10, Some(0)).await.unwrap();
        assert_eq!(d.identity, IdentityPayload::Digest { digest: String::new() });
    }

    #[test]
    fn identity_shapes_serialize_flat() {
        let full = serde_json::to_value(IdentityPayload::Full {
            soul: "s".into(),
            user: "u".into(),
            state: "st".into(),
            full: true,
        })
        .unwrap();
        assert_eq!(full, json!({"soul": "s", "user": "u", "state": "st", "full": true}));
        let digest = serde_json::to_value(IdentityPayload::Digest { digest: "d".into() }).unwrap();
        assert_eq!(digest, json!({"digest": "d"}));
    }
}
