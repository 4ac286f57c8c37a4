//! Event bus for the dSS event core
//!
//! This crate provides the [`EventQueue`] of events ready for dispatch, the
//! [`EventRunner`] that holds delayed and recurring events until they are
//! due, the [`EventBus`] handle producers use to raise events, and the
//! [`EventInterpreter`] that delivers events to [`Plugin`]s through
//! subscriptions.

mod bus;
mod interpreter;
mod plugin;
mod queue;
mod runner;
mod schedule;

pub use bus::EventBus;
pub use interpreter::{EventInterpreter, InterpreterOptions};
pub use plugin::{OffloadedPlugin, Plugin, PluginError, PluginResult};
pub use queue::EventQueue;
pub use runner::{EventRunner, ScheduledEvent, ScheduledEventId};
pub use schedule::{
    parse_time, Frequency, Recurrence, RecurrenceRule, Schedule, ScheduleError, ScheduleResult,
};

/// Thread-safe handle to an interpreter
pub type SharedEventInterpreter = std::sync::Arc<EventInterpreter>;
