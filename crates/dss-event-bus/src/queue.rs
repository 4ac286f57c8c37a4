//! FIFO queue of events ready for dispatch

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use dss_core::Event;
use tokio::sync::Notify;
use tracing::{debug, trace};

/// Events waiting for the dispatch loop
///
/// Pushing never blocks. Only the dispatch loop is expected to wait.
#[derive(Debug, Default)]
pub struct EventQueue {
    events: Mutex<VecDeque<Arc<Event>>>,
    ready: Notify,
    shutdown: AtomicBool,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an event and wake the dispatcher
    ///
    /// An event that replaces one still waiting in the queue is merged into
    /// it instead of being appended.
    pub fn push(&self, event: Event) {
        {
            let mut events = self.events.lock().unwrap_or_else(PoisonError::into_inner);
            if event.unique_key().is_some() {
                if let Some(slot) = events.iter_mut().find(|e| event.is_replacement_for(e)) {
                    debug!(event = %event.name(), "Merging unique event into queued one");
                    let mut merged = Event::clone(slot);
                    merged.merge_replacement(&event);
                    *slot = Arc::new(merged);
                    return;
                }
            }
            trace!(event = %event.name(), "New event in queue");
            events.push_back(Arc::new(event));
        }
        self.ready.notify_waiters();
    }

    /// Remove the oldest event
    pub fn pop(&self) -> Option<Arc<Event>> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
    }

    pub fn len(&self) -> usize {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Wait until an event is ready, `timeout` passes, or the queue shuts
    /// down. Returns whether an event is ready.
    pub async fn wait_for_event(&self, timeout: Duration) -> bool {
        let notified = self.ready.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        if !self.is_empty() {
            return true;
        }
        if self.is_shutdown() {
            return false;
        }

        let _ = tokio::time::timeout(timeout, notified).await;
        !self.is_empty()
    }

    /// Wake every waiter; subsequent waits return immediately
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
        self.ready.notify_waiters();
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }
}
