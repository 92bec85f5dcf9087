//! Bounded buffer between emitting threads and the worker.

use std::collections::VecDeque;

use parking_lot::Mutex;

use crate::record::LogRecord;

/// One queued emission.
#[derive(Debug)]
pub(crate) struct Event {
    /// Whole seconds since the Unix epoch, captured when the event was
    /// emitted.
    pub timestamp: u64,
    /// Optional sub-tag appended to the sender's tag as `"{tag}.{label}"`.
    pub label: Option<String>,
    pub record: LogRecord,
}

/// Bounded FIFO where the newest entry displaces the oldest when full.
///
/// Critical sections cover a single deque operation; no network or
/// encoding work happens under the lock.
pub(crate) struct EmitQueue {
    events: Mutex<VecDeque<Event>>,
    capacity: usize,
}

impl EmitQueue {
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        debug_assert!(capacity > 0, "queue capacity must be positive");
        Self {
            events: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    /// Append `event`, returning the displaced oldest event when the queue
    /// was already full.
    pub(crate) fn push(&self, event: Event) -> Option<Event> {
        let mut events = self.events.lock();
        let displaced = if events.len() == self.capacity {
            events.pop_front()
        } else {
            None
        };
        events.push_back(event);
        displaced
    }

    pub(crate) fn pop(&self) -> Option<Event> {
        self.events.lock().pop_front()
    }

    /// Put a dequeued event back at the front after a transient send
    /// failure. The event is surrendered (returned) when emitters have
    /// refilled the queue in the meantime.
    pub(crate) fn requeue(&self, event: Event) -> Option<Event> {
        let mut events = self.events.lock();
        if events.len() == self.capacity {
            return Some(event);
        }
        events.push_front(event);
        None
    }

    pub(crate) fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }
}
