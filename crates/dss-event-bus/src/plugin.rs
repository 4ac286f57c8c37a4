//! Event handler plugins

use std::sync::Arc;

use dss_core::{Event, EventError, Subscription, SubscriptionError};
use dss_tasks::{TaskError, TaskFn, WorkerPool};
use thiserror::Error;

use crate::interpreter::EventInterpreter;

/// Errors returned by plugins
#[derive(Debug, Error)]
pub enum PluginError {
    #[error("{0}")]
    Failed(String),

    #[error(transparent)]
    Event(#[from] EventError),

    #[error(transparent)]
    Subscription(#[from] SubscriptionError),

    #[error(transparent)]
    Task(#[from] TaskError),
}

/// Result type for plugin operations
pub type PluginResult<T> = Result<T, PluginError>;

/// A named event handler
///
/// `handle_event` runs on the dispatch loop and blocks it while it runs.
/// Slow handlers should be wrapped in an [`OffloadedPlugin`].
pub trait Plugin: Send + Sync + 'static {
    /// Handler name that subscriptions refer to
    fn name(&self) -> &str;

    /// Handle one event delivered through `subscription`
    fn handle_event(&self, event: &Event, subscription: &Subscription) -> PluginResult<()>;

    /// Called once when the interpreter starts, to install the plugin's own
    /// subscriptions
    fn subscribe(&self, _interpreter: &EventInterpreter) -> PluginResult<()> {
        Ok(())
    }
}

/// Runs another plugin's `handle_event` on a dedicated [`WorkerPool`]
///
/// The dispatch loop only pays for queueing; the wrapped handler sees events
/// in delivery order, one at a time.
pub struct OffloadedPlugin<P: Plugin> {
    plugin: Arc<P>,
    pool: WorkerPool,
}

impl<P: Plugin> OffloadedPlugin<P> {
    /// Wrap `plugin`; the pool is named after it. Requires a tokio runtime.
    pub fn new(plugin: P) -> Self {
        let pool = WorkerPool::new(format!("plugin:{}", plugin.name()));
        Self {
            plugin: Arc::new(plugin),
            pool,
        }
    }

    pub fn inner(&self) -> &Arc<P> {
        &self.plugin
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }
}

impl<P: Plugin> Plugin for OffloadedPlugin<P> {
    fn name(&self) -> &str {
        self.plugin.name()
    }

    fn handle_event(&self, event: &Event, subscription: &Subscription) -> PluginResult<()> {
        let plugin = Arc::clone(&self.plugin);
        let event = event.clone();
        let subscription = subscription.clone();
        self.pool.submit(TaskFn::arc("offloaded-event", move || {
            plugin
                .handle_event(&event, &subscription)
                .map_err(|e| TaskError::Failed(e.to_string()))
        }))?;
        Ok(())
    }

    fn subscribe(&self, interpreter: &EventInterpreter) -> PluginResult<()> {
        self.plugin.subscribe(interpreter)
    }
}
