//! Orchestrator: queue + bus + history + long-poll waiters + dispatch ticker.

use std::collections::{HashSet, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Weak};
use std::time::Duration;

use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tether_core::events::types;
use tether_core::time::now_ms;
use tether_core::Event;
use tether_settings::OrchestratorSettings;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::bus::{AgentHandlerConfig, EventBus, EventHandler, FnHandler};
use crate::collaborators::{Collaborators, Lifecycle};
use crate::errors::RuntimeError;
use crate::orchestrator::status::{CollaboratorHealth, OrchestratorState, OrchestratorStatus};
use crate::orchestrator::waiters::{WaiterSet, events_since};
use crate::queue::EventQueue;

/// Receives every event that should reach the upstream session.
pub type NotificationCallback = Arc<dyn Fn(&Event) + Send + Sync>;

/// Id of the agent handler configs registered by default.
pub const UPSTREAM_HANDLER_ID: &str = "upstream";

/// Event types forwarded to the upstream session by default.
const UPSTREAM_TYPES: [&str; 4] = [
    types::MESSAGE,
    types::TIMER,
    types::AGENT_COMPLETED,
    types::AGENT_FAILED,
];

/// Event types handled locally (logged) by default.
const LOCAL_TYPES: [&str; 3] = [types::PRE_COMPACT, types::POST_COMPACT, types::SYSTEM];

struct Inner {
    state: OrchestratorState,
    /// Set by `stop`, cleared by `start`: new long-polls return at once.
    halted: bool,
    queue: EventQueue,
    history: VecDeque<Event>,
    waiters: WaiterSet,
    /// Timestamp of the last accepted event. Accepted events are stamped
    /// strictly after it so the ms cursor never ties.
    last_stamp: Option<i64>,
    watermark: i64,
    emitted: u64,
    dispatched: u64,
}

/// Owns the event queue, bus, history, and long-poll waiters.
///
/// Always held in an `Arc`: the dispatch ticker keeps a weak reference, so
/// dropping the last strong reference ends it.
pub struct Orchestrator {
    settings: OrchestratorSettings,
    collaborators: Collaborators,
    bus: RwLock<EventBus>,
    inner: Mutex<Inner>,
    notify: RwLock<Option<NotificationCallback>>,
    failed: Mutex<HashSet<String>>,
    cancel: Mutex<Option<CancellationToken>>,
}

impl Orchestrator {
    /// Create a stopped orchestrator.
    pub fn new(settings: OrchestratorSettings, collaborators: Collaborators) -> Arc<Self> {
        let queue = EventQueue::new(settings.queue_max_size, settings.overflow_policy);
        Arc::new(Self {
            settings,
            collaborators,
            bus: RwLock::new(EventBus::new()),
            inner: Mutex::new(Inner {
                state: OrchestratorState::Stopped,
                halted: false,
                queue,
                history: VecDeque::new(),
                waiters: WaiterSet::default(),
                last_stamp: None,
                watermark: 0,
                emitted: 0,
                dispatched: 0,
            }),
            notify: RwLock::new(None),
            failed: Mutex::new(HashSet::new()),
            cancel: Mutex::new(None),
        })
    }

    // ── Lifecycle ───────────────────────────────────────────────────────────

    /// Start collaborators, register default handlers, and begin ticking.
    pub async fn start(self: &Arc<Self>) -> Result<(), RuntimeError> {
        {
            let mut inner = self.inner.lock();
            if inner.state != OrchestratorState::Stopped {
                return Err(RuntimeError::InvalidState(inner.state));
            }
            inner.state = OrchestratorState::Starting;
            inner.halted = false;
        }
        info!("orchestrator starting");

        let c = &self.collaborators;
        if let Some(memory) = &c.memory {
            self.start_one(memory.as_ref()).await;
        }
        if let Some(identity) = &c.identity {
            self.start_one(identity.as_ref()).await;
        }
        if let Some(timers) = &c.timers {
            self.start_one(timers.as_ref()).await;
        }
        if let Some(channels) = &c.channels {
            self.start_one(channels.as_ref()).await;
        }
        if let Some(skills) = &c.skills {
            self.start_one(skills.as_ref()).await;
        }

        self.register_default_handlers();

        let token = CancellationToken::new();
        *self.cancel.lock() = Some(token.clone());
        self.inner.lock().state = OrchestratorState::Running;
        self.spawn_ticker(token);

        info!(
            tick_ms = self.settings.tick_interval_ms,
            queue_max = self.settings.queue_max_size,
            policy = %self.settings.overflow_policy,
            "orchestrator running"
        );
        Ok(())
    }

    /// Stop ticking, release every waiter, stop collaborators, drain the queue.
    pub async fn stop(&self) {
        let released = {
            let mut inner = self.inner.lock();
            match inner.state {
                OrchestratorState::Stopping => return,
                OrchestratorState::Stopped => {
                    let _ = inner.waiters.resolve_all_empty();
                    return;
                }
                OrchestratorState::Starting | OrchestratorState::Running => {}
            }
            inner.state = OrchestratorState::Stopping;
            inner.halted = true;
            inner.waiters.resolve_all_empty()
        };
        info!(released_waiters = released, "orchestrator stopping");

        if let Some(token) = self.cancel.lock().take() {
            token.cancel();
        }

        let c = &self.collaborators;
        if let Some(skills) = &c.skills {
            stop_one(skills.as_ref()).await;
        }
        if let Some(channels) = &c.channels {
            stop_one(channels.as_ref()).await;
        }
        if let Some(timers) = &c.timers {
            stop_one(timers.as_ref()).await;
        }
        if let Some(identity) = &c.identity {
            stop_one(identity.as_ref()).await;
        }
        if let Some(memory) = &c.memory {
            stop_one(memory.as_ref()).await;
        }

        let drained = {
            let mut inner = self.inner.lock();
            // waiters registered while collaborators were stopping
            let late = inner.waiters.resolve_all_empty();
            if late > 0 {
                debug!(count = late, "released late waiters");
            }
            inner.state = OrchestratorState::Stopped;
            inner.queue.clear()
        };
        if drained.is_empty() {
            info!("orchestrator stopped");
        } else {
            warn!(drained = drained.len(), "orchestrator stopped with undispatched events");
        }
    }

    async fn start_one<C: Lifecycle + ?Sized>(&self, collaborator: &C) {
        let name = collaborator.name().to_string();
        match collaborator.start().await {
            Ok(()) => {
                let _ = self.failed.lock().remove(&name);
                info!(collaborator = %name, "collaborator started");
            }
            Err(e) => {
                error!(collaborator = %name, error = %e, "collaborator failed to start");
                let _ = self.failed.lock().insert(name);
            }
        }
    }

    fn health_of<C: Lifecycle + ?Sized>(&self, collaborator: &C) -> CollaboratorHealth {
        let name = collaborator.name().to_string();
        let healthy = !self.failed.lock().contains(&name) && collaborator.is_healthy();
        CollaboratorHealth { name, healthy }
    }

    fn register_default_handlers(&self) {
        let mut bus = self.bus.write();
        for event_type in UPSTREAM_TYPES {
            bus.register_agent(
                event_type,
                AgentHandlerConfig::new(UPSTREAM_HANDLER_ID, "forward to the upstream session"),
            );
        }
        for event_type in LOCAL_TYPES {
            bus.register_direct(
                event_type,
                Arc::new(FnHandler::new("log", |event: &Event| {
                    info!(
                        event_type = %event.event_type,
                        source = %event.source,
                        event_id = %event.id,
                        "lifecycle event"
                    );
                    Ok(())
                })),
            );
        }
    }

    fn spawn_ticker(self: &Arc<Self>, token: CancellationToken) {
        let weak: Weak<Self> = Arc::downgrade(self);
        let period = Duration::from_millis(self.settings.tick_interval_ms.max(1));
        drop(tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    () = token.cancelled() => break,
                    _ = interval.tick() => {}
                }
                let Some(this) = weak.upgrade() else { break };
                let _ = this.dispatch_next().await;
            }
            debug!("dispatch ticker stopped");
        }));
    }

    // ── Emit / long-poll ────────────────────────────────────────────────────

    /// Enqueue an event, record it in history, and release matching waiters.
    ///
    /// Accepted events get a timestamp strictly greater than the previous
    /// accepted one (bumped by 1 ms on a tie or a backwards clock), so a
    /// delivery cursor never hides a later event stamped in the same
    /// millisecond.
    ///
    /// Returns `false` when the queue refused the event; a refused event is
    /// neither recorded nor delivered.
    pub fn emit(&self, mut event: Event) -> bool {
        let mut inner = self.inner.lock();
        if let Some(last) = inner.last_stamp.filter(|last| event.timestamp <= *last) {
            event.timestamp = last + 1;
        }
        if !inner.queue.enqueue(event.clone()) {
            return false;
        }
        inner.emitted += 1;

        let timestamp = event.timestamp;
        inner.last_stamp = Some(timestamp);
        debug!(event_id = %event.id, event_type = %event.event_type, priority = event.priority, "event emitted");
        inner.history.push_back(event);
        while inner.history.len() > self.settings.history_capacity {
            let _ = inner.history.pop_front();
        }

        let Inner {
            waiters, history, ..
        } = &mut *inner;
        let resolved = waiters.resolve_newer(timestamp, history);
        if resolved > 0 {
            debug!(resolved, "released long-poll waiters");
        }
        true
    }

    /// Build an event and [`emit`](Self::emit) it.
    pub fn emit_new(&self, event_type: &str, source: &str, payload: Value) -> bool {
        self.emit(Event::new(event_type, source, payload))
    }

    /// Wait for events newer than `since` (default: now minus the lookback).
    ///
    /// Returns immediately when history already has newer events; otherwise
    /// blocks until an emit releases this caller or `timeout_ms` (clamped to
    /// the configured maximum) elapses, yielding an empty list.
    pub async fn wait_for_event(&self, timeout_ms: u64, since: Option<i64>) -> Vec<Event> {
        let timeout = Duration::from_millis(timeout_ms.min(self.settings.max_wait_timeout_ms));
        let since = since.unwrap_or_else(|| now_ms() - self.settings.default_lookback_ms);

        let (id, mut rx) = {
            let mut inner = self.inner.lock();
            let existing = events_since(&inner.history, since);
            if !existing.is_empty() {
                return existing;
            }
            if inner.halted {
                return Vec::new();
            }
            inner.waiters.register(since)
        };

        match tokio::time::timeout(timeout, &mut rx).await {
            Ok(Ok(events)) => events,
            Ok(Err(_)) => Vec::new(),
            Err(_) => {
                let was_pending = self.inner.lock().waiters.remove(id);
                if was_pending {
                    Vec::new()
                } else {
                    // resolved between the deadline and the removal
                    rx.try_recv().unwrap_or_default()
                }
            }
        }
    }

    // ── Dispatch ────────────────────────────────────────────────────────────

    /// Dequeue and dispatch at most one event. Returns whether one was dispatched.
    pub async fn dispatch_next(&self) -> bool {
        let event = {
            let mut inner = self.inner.lock();
            if inner.state != OrchestratorState::Running {
                return false;
            }
            inner.queue.dequeue()
        };
        let Some(event) = event else {
            return false;
        };
        self.dispatch(&event).await;
        true
    }

    async fn dispatch(&self, event: &Event) {
        let handlers = self.bus.read().get_handlers(&event.event_type);

        for handler in &handlers.direct {
            match AssertUnwindSafe(handler.handle(event)).catch_unwind().await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(
                    event_type = %event.event_type,
                    handler_id = handler.id(),
                    error = %e,
                    "event handler failed"
                ),
                Err(_) => error!(
                    event_type = %event.event_type,
                    handler_id = handler.id(),
                    "event handler panicked"
                ),
            }
        }

        if !handlers.agent.is_empty() || handlers.direct.is_empty() {
            let callback = self.notify.read().clone();
            match callback {
                Some(cb) => cb(event),
                None => debug!(event_type = %event.event_type, "no notification callback set"),
            }
        }

        self.inner.lock().dispatched += 1;
    }

    /// Set the callback receiving upstream-bound events.
    pub fn set_notification_callback(&self, callback: NotificationCallback) {
        *self.notify.write() = Some(callback);
    }

    // ── Handlers ────────────────────────────────────────────────────────────

    /// Register an inline handler.
    pub fn register_direct(&self, event_type: &str, handler: Arc<dyn EventHandler>) {
        self.bus.write().register_direct(event_type, handler);
    }

    /// Register an agent handler config.
    pub fn register_agent(&self, event_type: &str, config: AgentHandlerConfig) {
        self.bus.write().register_agent(event_type, config);
    }

    /// Remove a handler by id.
    pub fn unregister(&self, event_type: &str, handler_id: &str) -> bool {
        self.bus.write().unregister(event_type, handler_id)
    }

    /// Whether any handler is registered for a type.
    pub fn has_handlers(&self, event_type: &str) -> bool {
        self.bus.read().has_handlers(event_type)
    }

    // ── Projections ─────────────────────────────────────────────────────────

    /// Current lifecycle state.
    pub fn state(&self) -> OrchestratorState {
        self.inner.lock().state
    }

    /// The newest `n` history entries, oldest first.
    pub fn recent_events(&self, n: usize) -> Vec<Event> {
        let inner = self.inner.lock();
        let skip = inner.history.len().saturating_sub(n);
        inner.history.iter().skip(skip).cloned().collect()
    }

    /// Timestamp of the newest event handed out by a long-poll response.
    pub fn delivery_watermark(&self) -> i64 {
        self.inner.lock().watermark
    }

    /// Move the watermark forward. Lower values are ignored. Returns the
    /// resulting watermark.
    pub fn advance_watermark(&self, timestamp: i64) -> i64 {
        let mut inner = self.inner.lock();
        if timestamp > inner.watermark {
            inner.watermark = timestamp;
        }
        inner.watermark
    }

    /// Wired collaborators.
    pub fn collaborators(&self) -> &Collaborators {
        &self.collaborators
    }

    /// Health of every wired collaborator, in start order.
    pub fn collaborator_health(&self) -> Vec<CollaboratorHealth> {
        let c = &self.collaborators;
        let mut out = Vec::new();
        if let Some(memory) = &c.memory {
            out.push(self.health_of(memory.as_ref()));
        }
        if let Some(identity) = &c.identity {
            out.push(self.health_of(identity.as_ref()));
        }
        if let Some(timers) = &c.timers {
            out.push(self.health_of(timers.as_ref()));
        }
        if let Some(channels) = &c.channels {
            out.push(self.health_of(channels.as_ref()));
        }
        if let Some(skills) = &c.skills {
            out.push(self.health_of(skills.as_ref()));
        }
        out
    }

    /// Read-only status snapshot.
    pub fn status(&self) -> OrchestratorStatus {
        let collaborators = self.collaborator_health();
        let handler_types = self.bus.read().handler_types();
        let inner = self.inner.lock();
        OrchestratorStatus {
            state: inner.state,
            queue_size: inner.queue.size(),
            history_size: inner.history.len(),
            pending_waiters: inner.waiters.len(),
            events_emitted: inner.emitted,
            events_dispatched: inner.dispatched,
            events_dropped: inner.queue.dropped_count(),
            watermark: inner.watermark,
            handler_types,
            collaborators,
        }
    }
}

async fn stop_one<C: Lifecycle + ?Sized>(collaborator: &C) {
    match collaborator.stop().await {
        Ok(()) => debug!(collaborator = collaborator.name(), "collaborator stopped"),
        Err(e) => warn!(collaborator = collaborator.name(), error = %e, "collaborator failed to stop"),
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("state", &self.state())
            .field("collaborators", &self.collaborators)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::fakes;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tether_settings::OverflowPolicy;

    fn settings(tick_interval_ms: u64) -> OrchestratorSettings {
        OrchestratorSettings {
            tick_interval_ms,
            ..OrchestratorSettings::default()
        }
    }

    /// Started orchestrator whose ticker never fires during a test.
    async fn manual() -> Arc<Orchestrator> {
        let orch = Orchestrator::new(settings(3_600_000), Collaborators::none());
        orch.start().await.unwrap();
        orch
    }

    fn capture(orch: &Orchestrator) -> Arc<Mutex<Vec<String>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        orch.set_notification_callback(Arc::new(move |e: &Event| {
            sink.lock().push(e.event_type.clone());
        }));
        seen
    }

    #[tokio::test]
    async fn start_transitions_to_running() {
        let orch = manual().await;
        assert_eq!(orch.state(), OrchestratorState::Running);
        assert!(orch.has_handlers("message"));
        assert!(orch.has_handlers("system"));
        let err = orch.start().await.unwrap_err();
        assert!(matches!(err, RuntimeError::InvalidState(OrchestratorState::Running)));
    }

    #[tokio::test]
    async fn wait_returns_existing_history_immediately() {
        let orch = manual().await;
        assert!(orch.emit_new("message", "test", Value::Null));
        let events = orch.wait_for_event(5_000, Some(0)).await;
        assert_eq!(events.len(), 1);
    }

    #[tokio::test]
    async fn wait_resolves_on_emit() {
        let orch = manual().await;
        let waiter = {
            let orch = Arc::clone(&orch);
            tokio::spawn(async move { orch.wait_for_event(1_000, None).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        let started = std::time::Instant::now();
        let e = Event::new("message", "test", serde_json::json!({"text": "hi"}));
        let id = e.id.clone();
        assert!(orch.emit(e));
        let events = waiter.await.unwrap();
        assert!(started.elapsed() < Duration::from_millis(500));
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].id, id);
    }

    #[tokio::test]
    async fn wait_times_out_empty() {
        let orch = manual().await;
        let events = orch.wait_for_event(30, None).await;
        assert!(events.is_empty());
        assert_eq!(orch.status().pending_waiters, 0);
    }

    #[tokio::test]
    async fn wait_timeout_is_clamped() {
        let s = OrchestratorSettings {
            tick_interval_ms: 3_600_000,
            max_wait_timeout_ms: 20,
            ..OrchestratorSettings::default()
        };
        let orch = Orchestrator::new(s, Collaborators::none());
        let started = std::time::Instant::now();
        let events = orch.wait_for_event(60_000, None).await;
        assert!(events.is_empty());
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn waiter_is_not_released_by_older_event() {
        let orch = manual().await;
        let waiter = {
            let orch = Arc::clone(&orch);
            tokio::spawn(async move { orch.wait_for_event(100, Some(1_000)).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(orch.emit(Event::new("message", "t", Value::Null).with_timestamp(500)));
        assert!(waiter.await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn stop_releases_all_waiters() {
        let orch = manual().await;
        let mut handles = Vec::new();
        for _ in 0..3 {
            let orch = Arc::clone(&orch);
            handles.push(tokio::spawn(async move { orch.wait_for_event(60_000, None).await }));
        }
        while orch.status().pending_waiters < 3 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        orch.stop().await;
        for h in handles {
            assert!(h.await.unwrap().is_empty());
        }
        assert_eq!(orch.state(), OrchestratorState::Stopped);
    }

    #[tokio::test]
    async fn wait_after_stop_returns_immediately() {
        let orch = manual().await;
        orch.stop().await;
        let started = std::time::Instant::now();
        assert!(orch.wait_for_event(60_000, None).await.is_empty());
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn stop_drains_queue() {
        let orch = manual().await;
        let _ = orch.emit_new("message", "t", Value::Null);
        let _ = orch.emit_new("message", "t", Value::Null);
        orch.stop().await;
        assert_eq!(orch.status().queue_size, 0);
    }

    #[tokio::test]
    async fn rejected_event_is_not_recorded() {
        let s = OrchestratorSettings {
            tick_interval_ms: 3_600_000,
            queue_max_size: 1,
            overflow_policy: OverflowPolicy::Reject,
            ..OrchestratorSettings::default()
        };
        let orch = Orchestrator::new(s, Collaborators::none());
        assert!(orch.emit_new("message", "t", Value::Null));
        assert!(!orch.emit_new("message", "t", Value::Null));
        let status = orch.status();
        assert_eq!(status.history_size, 1);
        assert_eq!(status.events_emitted, 1);
        assert_eq!(status.events_dropped, 1);
    }

    #[tokio::test]
    async fn history_is_bounded() {
        let s = OrchestratorSettings {
            history_capacity: 3,
            ..settings(3_600_000)
        };
        let orch = Orchestrator::new(s, Collaborators::none());
        for i in 0..5 {
            let _ = orch.emit(Event::new("message", "t", Value::Null).with_timestamp(i));
        }
        let ts: Vec<i64> = orch.recent_events(10).iter().map(|e| e.timestamp).collect();
        assert_eq!(ts, vec![2, 3, 4]);
        let ts: Vec<i64> = orch.recent_events(2).iter().map(|e| e.timestamp).collect();
        assert_eq!(ts, vec![3, 4]);
    }

    #[tokio::test]
    async fn agent_relevant_events_are_forwarded() {
        let orch = manual().await;
        let seen = capture(&orch);
        let _ = orch.emit_new("message", "t", Value::Null);
        assert!(orch.dispatch_next().await);
        assert_eq!(*seen.lock(), vec!["message"]);
    }

    #[tokio::test]
    async fn unhandled_events_are_forwarded() {
        let orch = manual().await;
        let seen = capture(&orch);
        let _ = orch.emit_new("custom", "t", Value::Null);
        assert!(orch.dispatch_next().await);
        assert_eq!(*seen.lock(), vec!["custom"]);
    }

    #[tokio::test]
    async fn locally_handled_events_are_not_forwarded() {
        let orch = manual().await;
        let seen = capture(&orch);
        let _ = orch.emit_new("system", "t", Value::Null);
        assert!(orch.dispatch_next().await);
        assert!(seen.lock().is_empty());
    }

    #[tokio::test]
    async fn failing_handler_does_not_block_others() {
        let orch = manual().await;
        let calls = Arc::new(AtomicUsize::new(0));
        orch.register_direct(
            "job",
            Arc::new(FnHandler::new("bad", |_: &Event| Err(RuntimeError::Handler("nope".into())))),
        );
        orch.register_direct(
            "job",
            Arc::new(FnHandler::new("panics", |_: &Event| panic!("handler bug"))),
        );
        let c = Arc::clone(&calls);
        orch.register_direct(
            "job",
            Arc::new(FnHandler::new("good", move |_: &Event| {
                let _ = c.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })),
        );
        let _ = orch.emit_new("job", "t", Value::Null);
        assert!(orch.dispatch_next().await);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(orch.status().events_dispatched, 1);
    }

    #[tokio::test]
    async fn dispatch_is_priority_ordered() {
        let orch = manual().await;
        let seen = capture(&orch);
        let _ = orch.emit(Event::new("low", "t", Value::Null).with_priority(-10));
        let _ = orch.emit(Event::new("urgent", "t", Value::Null).with_priority(100));
        while orch.dispatch_next().await {}
        assert_eq!(*seen.lock(), vec!["urgent", "low"]);
    }

    #[tokio::test]
    async fn dispatch_requires_running() {
        let orch = Orchestrator::new(settings(3_600_000), Collaborators::none());
        let _ = orch.emit_new("message", "t", Value::Null);
        assert!(!orch.dispatch_next().await);
        assert_eq!(orch.status().queue_size, 1);
    }

    #[tokio::test]
    async fn ticker_dispatches_in_background() {
        let orch = Orchestrator::new(settings(5), Collaborators::none());
        orch.start().await.unwrap();
        let seen = capture(&orch);
        let _ = orch.emit_new("message", "t", Value::Null);
        let _ = orch.emit_new("timer", "t", Value::Null);
        for _ in 0..100 {
            if seen.lock().len() == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(seen.lock().len(), 2);
        orch.stop().await;
    }

    #[tokio::test]
    async fn watermark_is_monotonic() {
        let orch = manual().await;
        assert_eq!(orch.advance_watermark(100), 100);
        assert_eq!(orch.advance_watermark(50), 100);
        assert_eq!(orch.delivery_watermark(), 100);
    }

    #[tokio::test]
    async fn collaborators_start_in_order_and_stop_reversed() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let orch = Orchestrator::new(settings(3_600_000), fakes::full_set(&log));
        orch.start().await.unwrap();
        orch.stop().await;
        assert_eq!(
            *log.lock(),
            vec![
                "start:memory",
                "start:identity",
                "start:timers",
                "start:channels",
                "start:skills",
                "stop:skills",
                "stop:channels",
                "stop:timers",
                "stop:identity",
                "stop:memory",
            ]
        );
    }

    #[tokio::test]
    async fn collaborator_start_failure_marks_unhealthy() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut c = fakes::full_set(&log);
        c.channels = Some(Arc::new(fakes::lifecycle("channels", &log, true)));
        let orch = Orchestrator::new(settings(3_600_000), c);
        orch.start().await.unwrap();
        assert_eq!(orch.state(), OrchestratorState::Running);
        let health = orch.status().collaborators;
        assert_eq!(health.len(), 5);
        let channels = health.iter().find(|h| h.name == "channels").unwrap();
        assert!(!channels.healthy);
        assert!(health.iter().filter(|h| h.name != "channels").all(|h| h.healthy));
    }

    #[tokio::test]
    async fn each_waiter_resolved_once_across_emits() {
        let orch = manual().await;
        let waiter = {
            let orch = Arc::clone(&orch);
            tokio::spawn(async move { orch.wait_for_event(1_000, Some(0)).await })
        };
        while orch.status().pending_waiters < 1 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        let _ = orch.emit(Event::new("message", "t", Value::Null).with_timestamp(10));
        let _ = orch.emit(Event::new("message", "t", Value::Null).with_timestamp(20));
        let events = waiter.await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].timestamp, 10);
        assert_eq!(orch.status().pending_waiters, 0);
    }

    #[tokio::test]
    async fn tied_timestamps_are_bumped_forward() {
        let orch = manual().await;
        let _ = orch.emit(Event::new("message", "t", Value::Null).with_timestamp(2_000));
        let _ = orch.emit(Event::new("message", "t", Value::Null).with_timestamp(2_000));
        let _ = orch.emit(Event::new("message", "t", Value::Null).with_timestamp(1_500));
        let _ = orch.emit(Event::new("message", "t", Value::Null).with_timestamp(3_000));
        let ts: Vec<i64> = orch.recent_events(10).iter().map(|e| e.timestamp).collect();
        assert_eq!(ts, vec![2_000, 2_001, 2_002, 3_000]);
    }

    #[tokio::test]
    async fn refused_event_does_not_consume_a_stamp() {
        let s = OrchestratorSettings {
            tick_interval_ms: 3_600_000,
            queue_max_size: 1,
            overflow_policy: OverflowPolicy::Reject,
            ..OrchestratorSettings::default()
        };
        let orch = Orchestrator::new(s, Collaborators::none());
        assert!(orch.emit(Event::new("message", "t", Value::Null).with_timestamp(100)));
        assert!(!orch.emit(Event::new("message", "t", Value::Null).with_timestamp(100)));
        let _ = orch.inner.lock().queue.clear();
        assert!(orch.emit(Event::new("message", "t", Value::Null).with_timestamp(100)));
        let ts: Vec<i64> = orch.recent_events(10).iter().map(|e| e.timestamp).collect();
        assert_eq!(ts, vec![100, 101]);
    }

    #[tokio::test]
    async fn same_millisecond_burst_survives_cursor_handoff() {
        let orch = manual().await;
        let waiter = {
            let orch = Arc::clone(&orch);
            tokio::spawn(async move { orch.wait_for_event(1_000, Some(1_000)).await })
        };
        while orch.status().pending_waiters < 1 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        let _ = orch.emit(Event::new("agent_completed", "t", serde_json::json!({"id": "a"})).with_timestamp(2_000));
        let _ = orch.emit(Event::new("agent_completed", "t", serde_json::json!({"id": "b"})).with_timestamp(2_000));

        let first = waiter.await.unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].payload["id"], "a");

        let cursor = first[0].timestamp;
        let second = orch.wait_for_event(10, Some(cursor)).await;
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].payload["id"], "b");
        assert!(orch.wait_for_event(10, Some(second[0].timestamp)).await.is_empty());
    }

    #[tokio::test]
    async fn concurrent_waiters_resolve_once_each() {
        let orch = manual().await;
        let handles: Vec<_> = (0..5)
            .map(|_| {
                let orch = Arc::clone(&orch);
                tokio::spawn(async move { orch.wait_for_event(1_000, Some(0)).await })
            })
            .collect();
        while orch.status().pending_waiters < 5 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        for ts in [10, 20, 30] {
            let _ = orch.emit(Event::new("message", "t", Value::Null).with_timestamp(ts));
        }
        assert_eq!(orch.status().pending_waiters, 0);
        for h in handles {
            let events = h.await.unwrap();
            // released by the first emit, with exactly what existed then
            assert_eq!(events.len(), 1);
            assert_eq!(events[0].timestamp, 10);
        }
    }
}
