//! Bounded priority event queue.
//!
//! Events dequeue in descending priority; equal priorities keep insertion
//! order. When the queue is full the configured [`OverflowPolicy`] decides
//! what happens to the new event.

use std::collections::VecDeque;

use tether_core::Event;
use tether_settings::OverflowPolicy;
use tracing::warn;

/// Under [`OverflowPolicy::Delay`] the queue grows past `max_size` up to
/// `max_size * DELAY_CEILING_FACTOR`, then refuses further events.
pub const DELAY_CEILING_FACTOR: usize = 2;

/// Priority-ordered buffer of pending events.
#[derive(Debug)]
pub struct EventQueue {
    items: VecDeque<Event>,
    max_size: usize,
    policy: OverflowPolicy,
    dropped: u64,
}

impl EventQueue {
    /// Create an empty queue.
    pub fn new(max_size: usize, policy: OverflowPolicy) -> Self {
        Self {
            items: VecDeque::new(),
            max_size,
            policy,
            dropped: 0,
        }
    }

    /// Insert an event in priority order.
    ///
    /// Returns `false` only when the event was refused (`reject`, or `delay`
    /// past its hard ceiling). Under `drop_lowest` insertion always succeeds
    /// and the evicted event is logged.
    pub fn enqueue(&mut self, event: Event) -> bool {
        if self.is_full() {
            match self.policy {
                OverflowPolicy::DropLowest => {
                    if let Some(evicted) = self.items.pop_back() {
                        self.dropped += 1;
                        warn!(
                            evicted_id = %evicted.id,
                            evicted_type = %evicted.event_type,
                            evicted_priority = evicted.priority,
                            "event queue full, dropped lowest-priority event"
                        );
                    }
                }
                OverflowPolicy::Reject => {
                    self.dropped += 1;
                    warn!(
                        event_id = %event.id,
                        event_type = %event.event_type,
                        max_size = self.max_size,
                        "event queue full, rejected event"
                    );
                    return false;
                }
                OverflowPolicy::Delay => {
                    let ceiling = self.max_size.saturating_mul(DELAY_CEILING_FACTOR);
                    if self.items.len() >= ceiling {
                        self.dropped += 1;
                        warn!(
                            event_id = %event.id,
                            event_type = %event.event_type,
                            ceiling,
                            "event queue at hard ceiling, rejected event"
                        );
                        return false;
                    }
                    warn!(
                        size = self.items.len() + 1,
                        max_size = self.max_size,
                        "event queue over capacity"
                    );
                }
            }
        }

        let idx = self.items.partition_point(|e| e.priority >= event.priority);
        self.items.insert(idx, event);
        true
    }

    /// Remove and return the highest-priority event.
    pub fn dequeue(&mut self) -> Option<Event> {
        self.items.pop_front()
    }

    /// The event `dequeue` would return next.
    pub fn peek(&self) -> Option<&Event> {
        self.items.front()
    }

    /// Number of queued events.
    pub fn size(&self) -> usize {
        self.items.len()
    }

    /// Whether the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Whether `size >= max_size`.
    pub fn is_full(&self) -> bool {
        self.items.len() >= self.max_size
    }

    /// Events evicted or refused since creation.
    pub fn dropped_count(&self) -> u64 {
        self.dropped
    }

    /// Configured overflow policy.
    pub fn policy(&self) -> OverflowPolicy {
        self.policy
    }

    /// Drain all queued events in dequeue order.
    pub fn clear(&mut self) -> Vec<Event> {
        self.items.drain(..).collect()
    }
}
