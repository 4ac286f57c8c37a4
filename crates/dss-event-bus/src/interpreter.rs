//! Subscription dispatch
//!
//! The [`EventInterpreter`] owns the queue, the scheduler and the plugin
//! table. Its dispatch loop pops one event at a time and calls every plugin
//! whose subscription matches, in subscription order.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use dashmap::DashMap;
use dss_core::{Event, SharedClock, Subscription, SubscriptionConfig, SubscriptionError, SubscriptionResult};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, trace, warn};

use crate::bus::EventBus;
use crate::plugin::Plugin;
use crate::queue::EventQueue;
use crate::runner::EventRunner;

/// Timing knobs for the dispatch and scheduler loops
#[derive(Debug, Clone)]
pub struct InterpreterOptions {
    /// How long one dispatch iteration waits for an event
    pub wait_timeout: Duration,
    /// Upper bound on how long the scheduler sleeps between checks
    pub runner_max_sleep: Duration,
}

impl Default for InterpreterOptions {
    fn default() -> Self {
        Self {
            wait_timeout: Duration::from_millis(1000),
            runner_max_sleep: Duration::from_millis(500),
        }
    }
}

/// Dispatches queued events to subscribed plugins
pub struct EventInterpreter {
    bus: EventBus,
    plugins: DashMap<String, Arc<dyn Plugin>>,
    subscriptions: RwLock<Vec<Arc<Subscription>>>,
    events_processed: AtomicU64,
    wait_timeout: Duration,
    shutdown: AtomicBool,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl EventInterpreter {
    pub fn new(options: InterpreterOptions, clock: SharedClock) -> Self {
        let queue = Arc::new(EventQueue::new());
        let runner = Arc::new(EventRunner::new(
            Arc::clone(&queue),
            Arc::clone(&clock),
            options.runner_max_sleep,
        ));
        Self {
            bus: EventBus::new(queue, runner, clock),
            plugins: DashMap::new(),
            subscriptions: RwLock::new(Vec::new()),
            events_processed: AtomicU64::new(0),
            wait_timeout: options.wait_timeout,
            shutdown: AtomicBool::new(false),
            dispatcher: Mutex::new(None),
        }
    }

    /// Handle for raising events
    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Register a plugin under its name, replacing any previous one
    pub fn add_plugin(&self, plugin: Arc<dyn Plugin>) {
        let name = plugin.name().to_string();
        if self.plugins.insert(name.clone(), plugin).is_some() {
            warn!(plugin = %name, "Replacing already registered plugin");
        } else {
            debug!(plugin = %name, "Registered plugin");
        }
    }

    pub fn get_plugin_by_name(&self, name: &str) -> Option<Arc<dyn Plugin>> {
        self.plugins.get(name).map(|p| Arc::clone(p.value()))
    }

    pub fn plugin_count(&self) -> usize {
        self.plugins.len()
    }

    /// Add a subscription. Its id must not be taken yet.
    pub fn subscribe(&self, subscription: Subscription) -> SubscriptionResult<()> {
        let mut subscriptions = self
            .subscriptions
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if subscriptions.iter().any(|s| s.id() == subscription.id()) {
            return Err(SubscriptionError::DuplicateId(subscription.id().to_string()));
        }
        debug!(subscription = %subscription, "Subscribed");
        subscriptions.push(Arc::new(subscription));
        Ok(())
    }

    /// Remove a subscription by id. Returns whether it existed.
    pub fn unsubscribe(&self, id: &str) -> bool {
        let mut subscriptions = self
            .subscriptions
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let before = subscriptions.len();
        subscriptions.retain(|s| s.id() != id);
        before != subscriptions.len()
    }

    pub fn subscription_by_id(&self, id: &str) -> Option<Arc<Subscription>> {
        self.snapshot().into_iter().find(|s| s.id() == id)
    }

    /// `proposal` if free, otherwise `proposal1`, `proposal2`, ...
    pub fn unique_subscription_id(&self, proposal: &str) -> String {
        let taken: Vec<String> = self.snapshot().iter().map(|s| s.id().to_string()).collect();
        let mut candidate = proposal.to_string();
        let mut index = 1;
        while taken.contains(&candidate) {
            candidate = format!("{proposal}{index}");
            index += 1;
        }
        candidate
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Current subscriptions, in dispatch order
    pub fn subscriptions(&self) -> Vec<Arc<Subscription>> {
        self.snapshot()
    }

    fn snapshot(&self) -> Vec<Arc<Subscription>> {
        self.subscriptions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Create subscriptions from configuration, returning how many were
    /// added. Entries without an event or handler name are skipped.
    pub fn load_subscriptions(&self, configs: &[SubscriptionConfig]) -> usize {
        let mut loaded = 0;
        for config in configs {
            if config.event_name.is_empty() {
                warn!("Skipping subscription with empty event-name");
                continue;
            }
            if config.handler_name.is_empty() {
                warn!(event = %config.event_name, "Skipping subscription with empty handler-name");
                continue;
            }
            if self.get_plugin_by_name(&config.handler_name).is_none() {
                warn!(
                    handler = %config.handler_name,
                    "No plugin registered for handler, subscribing anyway"
                );
            }

            let id = self.unique_subscription_id(&config.proposed_id());
            match config.build(id).and_then(|s| self.subscribe(s)) {
                Ok(()) => loaded += 1,
                Err(e) => warn!(event = %config.event_name, error = %e, "Failed to load subscription"),
            }
        }
        info!(loaded, "Loaded subscriptions");
        loaded
    }

    /// Number of events taken off the queue so far
    pub fn events_processed(&self) -> u64 {
        self.events_processed.load(Ordering::Relaxed)
    }

    /// Wait for one event and dispatch it. Returns whether an event was
    /// handled.
    pub async fn execute_pending_event(&self) -> bool {
        if !self.bus.queue().wait_for_event(self.wait_timeout).await {
            return false;
        }
        match self.bus.queue().pop() {
            Some(event) => {
                self.dispatch(&event);
                true
            }
            None => false,
        }
    }

    #[instrument(skip(self, event), fields(event = %event.name()))]
    fn dispatch(&self, event: &Event) {
        self.events_processed.fetch_add(1, Ordering::Relaxed);

        for subscription in self.snapshot().iter().filter(|s| s.matches(event)) {
            trace!(subscription = subscription.id(), "Subscription matches event");

            let Some(plugin) = self.get_plugin_by_name(subscription.handler_name()) else {
                error!(
                    subscription = subscription.id(),
                    handler = subscription.handler_name(),
                    "Could not find plugin for handler"
                );
                continue;
            };

            let outcome = catch_unwind(AssertUnwindSafe(|| plugin.handle_event(event, subscription)));
            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!(
                    subscription = subscription.id(),
                    handler = subscription.handler_name(),
                    error = %e,
                    "Handler failed"
                ),
                Err(_) => error!(
                    subscription = subscription.id(),
                    handler = subscription.handler_name(),
                    "Handler panicked"
                ),
            }
        }
    }

    /// Run plugin subscription hooks, then start the scheduler and the
    /// dispatch loop. Requires a tokio runtime; calling it twice is a no-op.
    pub fn start(self: &Arc<Self>) {
        let mut dispatcher = self.dispatcher.lock().unwrap_or_else(PoisonError::into_inner);
        if dispatcher.is_some() || self.shutdown.load(Ordering::Acquire) {
            return;
        }

        let plugins: Vec<Arc<dyn Plugin>> =
            self.plugins.iter().map(|p| Arc::clone(p.value())).collect();
        for plugin in plugins {
            if let Err(e) = plugin.subscribe(self) {
                error!(plugin = plugin.name(), error = %e, "Plugin failed to subscribe");
            }
        }

        self.bus.runner().start();
        let this = Arc::clone(self);
        *dispatcher = Some(tokio::spawn(async move {
            debug!("Event dispatch loop started");
            while !this.shutdown.load(Ordering::Acquire) {
                this.execute_pending_event().await;
            }
            debug!("Event dispatch loop stopped");
        }));
        info!(
            plugins = self.plugin_count(),
            subscriptions = self.subscription_count(),
            "Event interpreter started"
        );
    }

    /// Stop dispatching and scheduling and wait for both loops
    pub async fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
        self.bus.queue().shutdown();
        self.bus.runner().shutdown().await;

        let dispatcher = self
            .dispatcher
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(dispatcher) = dispatcher {
            if let Err(e) = dispatcher.await {
                error!(error = %e, "Event dispatch loop failed");
            }
        }
        info!(processed = self.events_processed(), "Event interpreter stopped");
    }
}
