//! Producer-facing handle to the queue and the scheduler

use std::sync::Arc;

use chrono::Duration;
use dss_core::{props, Event, SharedClock};
use tracing::{debug, error};

use crate::queue::EventQueue;
use crate::runner::{EventRunner, ScheduledEventId};
use crate::schedule::Schedule;

/// Cloneable handle used by producers and plugins to raise events
///
/// Events carrying a `time` or an iCal recurrence go to the
/// [`EventRunner`]; everything else goes straight to the [`EventQueue`].
#[derive(Clone)]
pub struct EventBus {
    queue: Arc<EventQueue>,
    runner: Arc<EventRunner>,
    clock: SharedClock,
}

impl EventBus {
    pub fn new(queue: Arc<EventQueue>, runner: Arc<EventRunner>, clock: SharedClock) -> Self {
        Self {
            queue,
            runner,
            clock,
        }
    }

    pub fn queue(&self) -> &Arc<EventQueue> {
        &self.queue
    }

    pub fn runner(&self) -> &Arc<EventRunner> {
        &self.runner
    }

    pub fn clock(&self) -> &SharedClock {
        &self.clock
    }

    /// Raise an event, scheduling it when it asks for a later fire time
    ///
    /// Events with an unusable `time` are logged and dropped.
    pub fn push_event(&self, event: Event) {
        match Schedule::from_event(&event, self.clock.now()) {
            Ok(Some(schedule)) => {
                self.runner.add(event, schedule);
            }
            Ok(None) => {
                if event.time().is_some() {
                    debug!(event = %event.name(), "Zero offset, raising event directly");
                }
                let mut event = event;
                event.unset_property(props::TIME);
                self.queue.push(event);
            }
            Err(e) => error!(event = %event.name(), error = %e, "Dropping event with invalid time"),
        }
    }

    /// Schedule an event from its `time` property
    ///
    /// Returns `None` (and logs) when the event has no usable schedule.
    pub fn push_timed_event(&self, event: Event) -> Option<ScheduledEventId> {
        match Schedule::from_event(&event, self.clock.now()) {
            Ok(Some(schedule)) => Some(self.runner.add(event, schedule)),
            Ok(None) => {
                error!(event = %event.name(), "Failed to schedule timed event: no delay");
                None
            }
            Err(e) => {
                error!(event = %event.name(), error = %e, "Failed to schedule timed event");
                None
            }
        }
    }

    /// Schedule an event `delay` from now, ignoring its own `time`
    ///
    /// Returns `None` (and logs) when the fire time is out of range.
    pub fn push_delayed(&self, mut event: Event, delay: Duration) -> Option<ScheduledEventId> {
        match Schedule::after(self.clock.now(), delay) {
            Ok(schedule) => {
                event.set_time(format!("+{}", delay.num_seconds()));
                Some(self.runner.add(event, schedule))
            }
            Err(e) => {
                error!(event = %event.name(), error = %e, "Failed to schedule delayed event");
                None
            }
        }
    }

    /// Cancel a scheduled event by id
    pub fn remove_event(&self, id: &str) -> bool {
        self.runner.remove_event(id)
    }

    /// Cancel every scheduled event with the given name
    pub fn remove_event_by_name(&self, name: &str) -> usize {
        self.runner.remove_event_by_name(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dss_core::{Clock, ManualClock};

    fn bus() -> (EventBus, ManualClock) {
        let clock = ManualClock::new(chrono::Utc::now());
        let shared: SharedClock = Arc::new(clock.clone());
        let queue = Arc::new(EventQueue::new());
        let runner = Arc::new(EventRunner::new(
            Arc::clone(&queue),
            Arc::clone(&shared),
            std::time::Duration::from_millis(500),
        ));
        (EventBus::new(queue, runner, shared), clock)
    }

    #[test]
    fn test_plain_event_goes_to_queue() {
        let (bus, _) = bus();
        bus.push_event(Event::new("now").unwrap());
        assert_eq!(bus.queue().len(), 1);
        assert_eq!(bus.runner().size(), 0);
    }

    #[test]
    fn test_timed_event_goes_to_runner() {
        let (bus, clock) = bus();
        bus.push_event(Event::new("later").unwrap().with_property("time", "+3"));
        assert!(bus.queue().is_empty());
        assert_eq!(bus.runner().size(), 1);

        clock.advance_seconds(3);
        bus.runner().raise_pending_events();
        assert_eq!(bus.queue().pop().unwrap().name(), "later");
    }

    #[test]
    fn test_zero_offset_pushes_directly() {
        let (bus, _) = bus();
        bus.push_event(Event::new("now").unwrap().with_property("time", "+0"));
        let event = bus.queue().pop().unwrap();
        assert!(!event.has_property("time"));
    }

    #[test]
    fn test_invalid_time_is_dropped() {
        let (bus, _) = bus();
        bus.push_event(Event::new("bad").unwrap().with_property("time", "+-1"));
        assert!(bus.queue().is_empty());
        assert_eq!(bus.runner().size(), 0);
    }

    #[test]
    fn test_push_timed_event_needs_delay() {
        let (bus, _) = bus();
        assert!(bus.push_timed_event(Event::new("x").unwrap()).is_none());
        let id = bus
            .push_timed_event(Event::new("x").unwrap().with_property("time", "+1"))
            .unwrap();
        assert!(bus.remove_event(&id));
    }

    #[test]
    fn test_push_delayed() {
        let (bus, clock) = bus();
        let id = bus
            .push_delayed(Event::new("x").unwrap(), Duration::seconds(7))
            .unwrap();
        let entry = bus.runner().get_event(&id).unwrap();
        assert_eq!(entry.event().time(), Some("+7"));
        assert_eq!(entry.next_occurrence(), Some(clock.now() + Duration::seconds(7)));
    }

    #[test]
    fn test_out_of_range_delays_are_dropped() {
        let (bus, _) = bus();
        bus.push_event(Event::new("huge").unwrap().with_property("time", "+99999999999999999"));
        assert!(bus
            .push_timed_event(Event::new("huge").unwrap().with_property("time", "+10000000000000"))
            .is_none());
        assert!(bus
            .push_delayed(Event::new("huge").unwrap(), Duration::days(1_000_000_000))
            .is_none());
        assert!(bus.queue().is_empty());
        assert_eq!(bus.runner().size(), 0);
    }
}
