//! Delayed-event scheduler
//!
//! The runner keeps every [`ScheduledEvent`] until it is due, then hands a
//! copy without its scheduling properties to the [`EventQueue`]. One-shot
//! entries are dropped after they fire; recurring ones stay until their
//! recurrence is exhausted.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use dss_core::{props, Event, SharedClock};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

use crate::queue::EventQueue;
use crate::schedule::Schedule;

/// Identifier of a scheduled event, `{counter}-{unix seconds}_{event name}`
pub type ScheduledEventId = String;

/// An event waiting for its fire time
#[derive(Debug, Clone)]
pub struct ScheduledEvent {
    id: ScheduledEventId,
    name: String,
    event: Event,
    schedule: Schedule,
}

impl ScheduledEvent {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Name used by [`EventRunner::remove_event_by_name`]
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn event(&self) -> &Event {
        &self.event
    }

    pub fn schedule(&self) -> &Schedule {
        &self.schedule
    }

    pub fn next_occurrence(&self) -> Option<DateTime<Utc>> {
        self.schedule.next_occurrence()
    }
}

struct RunnerInner {
    events: Mutex<Vec<ScheduledEvent>>,
    wakeup: Notify,
    shutdown: AtomicBool,
    counter: AtomicU64,
    queue: Arc<EventQueue>,
    clock: SharedClock,
    max_sleep: Duration,
}

impl RunnerInner {
    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<ScheduledEvent>> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Move every due event into the queue. Returns whether anything fired.
    fn raise_pending_events(&self) -> bool {
        let now = self.clock.now();
        let mut due: Vec<(DateTime<Utc>, Event)> = Vec::new();

        {
            let mut events = self.lock();
            events.retain_mut(|scheduled| {
                let Some(next) = scheduled.schedule.next_occurrence() else {
                    debug!(scheduled_id = %scheduled.id, "Scheduled event has no further occurrence");
                    return false;
                };
                if next > now {
                    return true;
                }

                let mut event = scheduled.event.clone();
                for name in [props::TIME, props::ICAL_START_TIME, props::ICAL_RRULE] {
                    event.unset_property(name);
                }
                due.push((next, event));

                let (skipped, again) = scheduled.schedule.fired(now);
                if skipped > 0 {
                    warn!(scheduled_id = %scheduled.id, skipped, "Scheduled event skipped executions");
                }
                if !again {
                    debug!(scheduled_id = %scheduled.id, "Scheduled event has no further schedule");
                }
                again
            });
        }

        // stable: equal fire times keep insertion order
        due.sort_by_key(|(when, _)| *when);
        let fired = !due.is_empty();
        for (_, event) in due {
            trace!(event = %event.name(), "Raising scheduled event");
            self.queue.push(event);
        }
        fired
    }

    fn time_until_next(&self) -> Duration {
        let now = self.clock.now();
        self.lock()
            .iter()
            .filter_map(ScheduledEvent::next_occurrence)
            .min()
            .map(|next| (next - now).to_std().unwrap_or(Duration::ZERO))
            .map_or(self.max_sleep, |wait| wait.min(self.max_sleep))
    }

    async fn run(self: Arc<Self>) {
        debug!("Event runner started");
        while !self.shutdown.load(Ordering::Acquire) {
            self.raise_pending_events();
            let wait = self.time_until_next();
            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = self.wakeup.notified() => {}
            }
        }
        let dropped = {
            let mut events = self.lock();
            let count = events.len();
            events.clear();
            count
        };
        debug!(dropped, "Event runner stopped");
    }
}

/// Owns the pending scheduled events and the loop that releases them
pub struct EventRunner {
    inner: Arc<RunnerInner>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl EventRunner {
    /// Create a runner feeding `queue`. It stays idle until [`start`](Self::start).
    pub fn new(queue: Arc<EventQueue>, clock: SharedClock, max_sleep: Duration) -> Self {
        Self {
            inner: Arc::new(RunnerInner {
                events: Mutex::new(Vec::new()),
                wakeup: Notify::new(),
                shutdown: AtomicBool::new(false),
                counter: AtomicU64::new(0),
                queue,
                clock,
                max_sleep,
            }),
            worker: Mutex::new(None),
        }
    }

    /// Spawn the scheduler loop. Calling it again is a no-op.
    pub fn start(&self) {
        let mut worker = self.worker.lock().unwrap_or_else(PoisonError::into_inner);
        if worker.is_none() && !self.inner.shutdown.load(Ordering::Acquire) {
            *worker = Some(tokio::spawn(Arc::clone(&self.inner).run()));
        }
    }

    /// Add an event with the given schedule, returning its id
    ///
    /// If a pending entry is replaced by `event` (see
    /// [`Event::is_replacement_for`]) the entry is updated in place and
    /// keeps its id.
    pub fn add(&self, event: Event, schedule: Schedule) -> ScheduledEventId {
        let id = {
            let mut events = self.inner.lock();

            let merged = if event.unique_key().is_some() {
                events
                    .iter_mut()
                    .find(|scheduled| event.is_replacement_for(&scheduled.event))
                    .map(|scheduled| {
                        scheduled.event.merge_replacement(&event);
                        if event.time().is_some() {
                            scheduled.schedule = schedule.clone();
                        }
                        debug!(scheduled_id = %scheduled.id, "Merged unique scheduled event");
                        scheduled.id.clone()
                    })
            } else {
                None
            };

            match merged {
                Some(id) => id,
                None => {
                    let counter = self.inner.counter.fetch_add(1, Ordering::Relaxed);
                    let id = format!(
                        "{}-{}_{}",
                        counter,
                        self.inner.clock.now().timestamp(),
                        event.name()
                    );
                    info!(scheduled_id = %id, next = ?schedule.next_occurrence(), "New timed event");
                    events.push(ScheduledEvent {
                        id: id.clone(),
                        name: event.name().to_string(),
                        event,
                        schedule,
                    });
                    id
                }
            }
        };
        self.inner.wakeup.notify_one();
        id
    }

    /// Cancel a scheduled event. Unknown ids are ignored.
    pub fn remove_event(&self, id: &str) -> bool {
        let removed = {
            let mut events = self.inner.lock();
            let before = events.len();
            events.retain(|scheduled| scheduled.id != id);
            before != events.len()
        };
        if removed {
            debug!(scheduled_id = id, "Removed scheduled event");
            self.inner.wakeup.notify_one();
        } else {
            debug!(scheduled_id = id, "No pending scheduled event to remove");
        }
        removed
    }

    /// Cancel every scheduled event with the given name
    pub fn remove_event_by_name(&self, name: &str) -> usize {
        let removed = {
            let mut events = self.inner.lock();
            let before = events.len();
            events.retain(|scheduled| scheduled.name != name);
            before - events.len()
        };
        if removed > 0 {
            debug!(name, removed, "Removed scheduled events by name");
            self.inner.wakeup.notify_one();
        }
        removed
    }

    /// Fire everything that is due now, without waiting for the loop
    pub fn raise_pending_events(&self) -> bool {
        self.inner.raise_pending_events()
    }

    pub fn size(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn event_ids(&self) -> Vec<ScheduledEventId> {
        self.inner.lock().iter().map(|s| s.id.clone()).collect()
    }

    pub fn get_event(&self, id: &str) -> Option<ScheduledEvent> {
        self.inner.lock().iter().find(|s| s.id == id).cloned()
    }

    /// Stop the loop, wait for it, and drop every pending entry
    pub async fn shutdown(&self) {
        self.inner.shutdown.store(true, Ordering::Release);
        self.inner.wakeup.notify_one();
        let worker = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match worker {
            Some(worker) => {
                if let Err(e) = worker.await {
                    error!(error = %e, "Event runner task failed");
                }
            }
            None => self.inner.lock().clear(),
        }
    }
}

impl Drop for EventRunner {
    fn drop(&mut self) {
        self.inner.shutdown.store(true, Ordering::Release);
        self.inner.wakeup.notify_one();
    }
}
