//! Long-poll waiter bookkeeping.
//!
//! A waiter is a oneshot sender plus the `since` cursor it is waiting past.
//! Removing a waiter from the set before sending is what guarantees it is
//! resolved at most once.

use std::collections::VecDeque;

use tether_core::Event;
use tokio::sync::oneshot;

struct Waiter {
    id: u64,
    since: i64,
    tx: oneshot::Sender<Vec<Event>>,
}

/// Pending long-poll registrations.
#[derive(Default)]
pub(crate) struct WaiterSet {
    next_id: u64,
    waiters: Vec<Waiter>,
}

impl WaiterSet {
    /// Register a waiter for events newer than `since`.
    pub(crate) fn register(&mut self, since: i64) -> (u64, oneshot::Receiver<Vec<Event>>) {
        let (tx, rx) = oneshot::channel();
        self.next_id += 1;
        let id = self.next_id;
        self.waiters.push(Waiter { id, since, tx });
        (id, rx)
    }

    /// Drop a waiter (timeout path). Returns whether it was still pending.
    pub(crate) fn remove(&mut self, id: u64) -> bool {
        let before = self.waiters.len();
        self.waiters.retain(|w| w.id != id);
        self.waiters.len() < before
    }

    /// Resolve every waiter whose `since` predates `timestamp` with the
    /// history entries newer than its own `since`. Returns how many were
    /// resolved.
    pub(crate) fn resolve_newer(&mut self, timestamp: i64, history: &VecDeque<Event>) -> usize {
        let (ready, pending): (Vec<Waiter>, Vec<Waiter>) =
            self.waiters.drain(..).partition(|w| w.since < timestamp);
        self.waiters = pending;
        let count = ready.len();
        for waiter in ready {
            // receiver gone means the caller already timed out
            let _ = waiter.tx.send(events_since(history, waiter.since));
        }
        count
    }

    /// Resolve every waiter with an empty list.
    pub(crate) fn resolve_all_empty(&mut self) -> usize {
        let count = self.waiters.len();
        for waiter in self.waiters.drain(..) {
            let _ = waiter.tx.send(Vec::new());
        }
        count
    }

    pub(crate) fn len(&self) -> usize {
        self.waiters.len()
    }
}

/// History entries strictly newer than `since`, in non-decreasing timestamp order.
pub(crate) fn events_since(history: &VecDeque<Event>, since: i64) -> Vec<Event> {
    let mut events: Vec<Event> = history.iter().filter(|e| e.timestamp > since).cloned().collect();
    events.sort_by_key(|e| e.timestamp);
    events
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::Value;

    fn at(ts: i64) -> Event {
        Event::new("message", "t", Value::Null).with_timestamp(ts)
    }

    #[test]
    fn events_since_filters_and_sorts() {
        let history: VecDeque<Event> = [at(30), at(10), at(20)].into_iter().collect();
        let ts: Vec<i64> = events_since(&history, 10).iter().map(|e| e.timestamp).collect();
        assert_eq!(ts, vec![20, 30]);
    }

    #[test]
    fn resolve_only_older_waiters() {
        let mut set = WaiterSet::default();
        let (_, mut old_rx) = set.register(5);
        let (_, mut new_rx) = set.register(50);
        let history: VecDeque<Event> = [at(10)].into_iter().collect();

        assert_eq!(set.resolve_newer(10, &history), 1);
        assert_eq!(set.len(), 1);
        assert_eq!(old_rx.try_recv().unwrap().len(), 1);
        assert!(new_rx.try_recv().is_err());
    }

    #[test]
    fn resolved_waiter_is_not_resolved_again() {
        let mut set = WaiterSet::default();
        let (_, _rx) = set.register(0);
        let history: VecDeque<Event> = [at(1), at(2)].into_iter().collect();
        assert_eq!(set.resolve_newer(1, &history), 1);
        assert_eq!(set.resolve_newer(2, &history), 0);
        assert_eq!(set.resolve_all_empty(), 0);
    }

    #[test]
    fn remove_reports_pending() {
        let mut set = WaiterSet::default();
        let (id, _rx) = set.register(0);
        assert!(set.remove(id));
        assert!(!set.remove(id));
    }

    #[test]
    fn resolve_all_empty_sends_nothing() {
        let mut set = WaiterSet::default();
        let (_, mut a) = set.register(0);
        let (_, mut b) = set.register(0);
        assert_eq!(set.resolve_all_empty(), 2);
        assert!(a.try_recv().unwrap().is_empty());
        assert!(b.try_recv().unwrap().is_empty());
        assert_eq!(set.len(), 0);
    }

    proptest! {
        #[test]
        fn every_waiter_resolved_exactly_once(
            sinces in prop::collection::vec(0i64..50, 1..12),
            stamps in prop::collection::vec(0i64..60, 0..20),
        ) {
            let mut set = WaiterSet::default();
            let mut receivers: Vec<_> = sinces.iter().map(|s| set.register(*s).1).collect();
            let mut history = VecDeque::new();
            let mut resolved = 0;
            for ts in &stamps {
                history.push_back(at(*ts));
                resolved += set.resolve_newer(*ts, &history);
            }
            resolved += set.resolve_all_empty();
            prop_assert_eq!(resolved, sinces.len());
            for (rx, since) in receivers.iter_mut().zip(&sinces) {
                let events = rx.try_recv().unwrap();
                prop_assert!(events.iter().all(|e| e.timestamp > *since));
                // sender was consumed by the single resolution
                prop_assert!(rx.try_recv().is_err());
            }
        }
    }
}
