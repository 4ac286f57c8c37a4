//! System trigger plugin
//!
//! Relay entries live under a root node (default `/usr/triggers`). Each one
//! names a `triggerPath` whose `triggers` node holds the conditions plus the
//! optional `damping` and `action-lag` state. When an event matches one of
//! the conditions, a relay event named `relayedEventName` is raised, subject
//! to reschedule-on-retrigger and damping.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dss_core::{events, json_to_string, props, Event, Subscription};
use dss_event_bus::{EventBus, EventInterpreter, Plugin, PluginResult};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, error, info, instrument, trace, warn};

use crate::bookkeeping::{read_node, ActionLagState, DampingState, ACTION_LAG_NODE, DAMPING_NODE};
use crate::model::ModelView;
use crate::rule_store::RuleStore;
use crate::trigger::{TriggerCondition, TriggerError, TriggerResult};
use crate::trigger_eval::{EventSource, TriggerEvaluator};

/// Event names the plugin subscribes to when auto-subscription is on
///
/// Generic `event` triggers can match any name; their events need an
/// explicit subscription to `system_trigger`.
pub const TRIGGER_EVENTS: &[&str] = &[
    events::CALL_SCENE,
    events::CALL_SCENE_BUS,
    events::UNDO_SCENE,
    events::BUTTON_CLICK,
    events::DEVICE_SENSOR_EVENT,
    events::DEVICE_BINARY_INPUT_EVENT,
    events::DEVICE_ACTION_EVENT,
    events::DEVICE_EVENT_EVENT,
    events::DEVICE_SENSOR_VALUE,
    events::ZONE_SENSOR_VALUE,
    events::HIGH_LEVEL_EVENT,
    events::STATE_CHANGE,
    events::ADDON_STATE_CHANGE,
];

/// One entry under the relay root
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RelayEntry {
    trigger_path: String,
    relayed_event_name: String,
    #[serde(default)]
    additional_relaying_parameter: Option<Value>,
}

/// What happened to one relay entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    NoMatch,
    Damped,
    Relayed,
    Scheduled,
    Rescheduled,
}

/// Counters for one evaluation pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EvaluationSummary {
    /// Entries whose conditions matched
    pub matched: usize,
    /// Relays raised immediately
    pub relayed: usize,
    /// Relays scheduled after the action lag
    pub scheduled: usize,
    /// Pending relays replaced by a retrigger
    pub rescheduled: usize,
    /// Matches suppressed by damping
    pub damped: usize,
    /// Entries skipped because of a configuration or store error
    pub failed: usize,
}

/// Evaluates trigger rules and raises relay events
pub struct SystemTriggerPlugin {
    bus: EventBus,
    store: Arc<dyn RuleStore>,
    root: String,
    model: Option<Arc<dyn ModelView>>,
    auto_subscribe: bool,
}

impl SystemTriggerPlugin {
    /// Handler name used in subscriptions
    pub const NAME: &'static str = "system_trigger";

    /// Default location of the relay entries
    pub const DEFAULT_ROOT: &'static str = "/usr/triggers";

    pub fn new(bus: EventBus, store: Arc<dyn RuleStore>) -> Self {
        Self {
            bus,
            store,
            root: Self::DEFAULT_ROOT.to_string(),
            model: None,
            auto_subscribe: true,
        }
    }

    pub fn with_root(mut self, root: impl Into<String>) -> Self {
        self.root = root.into();
        self
    }

    /// Resolve device zones through `model` when relaying
    pub fn with_model(mut self, model: Arc<dyn ModelView>) -> Self {
        self.model = Some(model);
        self
    }

    /// Subscribe to [`TRIGGER_EVENTS`] when the interpreter starts
    pub fn with_auto_subscribe(mut self, enabled: bool) -> Self {
        self.auto_subscribe = enabled;
        self
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    /// Run `event` against every relay entry
    #[instrument(skip(self, event), fields(event = %event))]
    pub fn evaluate(&self, event: &Event) -> EvaluationSummary {
        let mut summary = EvaluationSummary::default();
        let entries = match self.store.get(&self.root) {
            Some(Value::Array(items)) => items,
            Some(Value::Object(map)) => map.into_iter().map(|(_, v)| v).collect(),
            Some(Value::Null) | None => {
                trace!(root = %self.root, "No relay entries");
                return summary;
            }
            Some(other) => {
                warn!(root = %self.root, "Relay root is not a list: {}", other);
                return summary;
            }
        };

        let now = self.bus.clock().now();
        for (index, node) in entries.iter().enumerate() {
            let entry: RelayEntry = match serde_json::from_value(node.clone()) {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(index, error = %e, "Skipping malformed relay entry");
                    summary.failed += 1;
                    continue;
                }
            };
            match self.process_entry(&entry, event, now) {
                Ok(Outcome::NoMatch) => {}
                Ok(outcome) => {
                    summary.matched += 1;
                    match outcome {
                        Outcome::Damped => summary.damped += 1,
                        Outcome::Relayed => summary.relayed += 1,
                        Outcome::Scheduled => summary.scheduled += 1,
                        Outcome::Rescheduled => summary.rescheduled += 1,
                        Outcome::NoMatch => {}
                    }
                }
                Err(e) => {
                    error!(
                        trigger_path = %entry.trigger_path,
                        relay = %entry.relayed_event_name,
                        error = %e,
                        "Failed to process trigger rule"
                    );
                    summary.failed += 1;
                }
            }
        }
        summary
    }

    fn process_entry(&self, entry: &RelayEntry, event: &Event, now: DateTime<Utc>) -> TriggerResult<Outcome> {
        let triggers_path = format!("{}/triggers", entry.trigger_path.trim_end_matches('/'));
        let Some(triggers) = self.store.get(&triggers_path) else {
            debug!(path = %triggers_path, "Rule has no triggers");
            return Ok(Outcome::NoMatch);
        };
        if !Self::any_condition_matches(&triggers, event) {
            return Ok(Outcome::NoMatch);
        }
        debug!(path = %entry.trigger_path, "Trigger matched");

        let mut lag = read_node(&triggers, ACTION_LAG_NODE, ActionLagState::from_node);
        let delay = match lag.as_ref() {
            Some(state) => state.checked_delay(now)?,
            None => 0,
        };

        if let Some(state) = lag.as_mut() {
            if let Some(previous) = state.pending_reschedule(now).map(str::to_string) {
                self.bus.remove_event(&previous);
                let id = self.schedule_relay(entry, event, delay)?;
                info!(previous = %previous, id = %id, "Rescheduled pending relay");
                state.record(id, now);
                self.store
                    .set(&format!("{triggers_path}/{ACTION_LAG_NODE}"), state.to_node())?;
                return Ok(Outcome::Rescheduled);
            }
        }

        if let Some(mut damping) = read_node(&triggers, DAMPING_NODE, DampingState::from_node) {
            let outcome = damping.apply(now)?;
            if outcome.updated {
                self.store
                    .set(&format!("{triggers_path}/{DAMPING_NODE}"), damping.to_node())?;
            }
            if outcome.suppressed {
                debug!(path = %entry.trigger_path, "Relay suppressed by damping");
                return Ok(Outcome::Damped);
            }
        }

        match lag {
            Some(mut state) if delay > 0 => {
                let id = self.schedule_relay(entry, event, delay)?;
                debug!(id = %id, delay, "Scheduled relay");
                state.record(id, now);
                self.store
                    .set(&format!("{triggers_path}/{ACTION_LAG_NODE}"), state.to_node())?;
                Ok(Outcome::Scheduled)
            }
            _ => {
                let relay = self.relay_event(entry, event)?;
                debug!(relay = %relay.name(), "Relaying event");
                self.bus.push_event(relay);
                Ok(Outcome::Relayed)
            }
        }
    }

    fn any_condition_matches(triggers: &Value, event: &Event) -> bool {
        let nodes: Vec<&Value> = match triggers {
            Value::Object(map) => map
                .iter()
                .filter(|(key, _)| key.as_str() != DAMPING_NODE && key.as_str() != ACTION_LAG_NODE)
                .map(|(_, v)| v)
                .collect(),
            Value::Array(items) => items.iter().collect(),
            _ => return false,
        };

        nodes.into_iter().any(|node| match TriggerCondition::from_node(node) {
            Ok(Some(condition)) => TriggerEvaluator::matches(&condition, event),
            Ok(None) => {
                debug!("Skipping trigger of unknown type: {}", node);
                false
            }
            Err(e) => {
                warn!(error = %e, "Skipping malformed trigger");
                false
            }
        })
    }

    fn schedule_relay(&self, entry: &RelayEntry, event: &Event, delay: i64) -> TriggerResult<String> {
        let mut relay = self.relay_event(entry, event)?;
        relay.set_time(format!("+{delay}"));
        self.bus.push_timed_event(relay).ok_or_else(|| {
            TriggerError::InvalidConfig(format!("could not schedule relay with delay {delay}"))
        })
    }

    /// Build the relay for `event` according to `entry`
    fn relay_event(&self, entry: &RelayEntry, event: &Event) -> TriggerResult<Event> {
        let mut relay = Event::new(entry.relayed_event_name.as_str())?;
        relay.apply_properties(event.properties());
        relay.unset_property(props::ICAL_START_TIME);
        relay.unset_property(props::ICAL_RRULE);
        relay.set_property("path", entry.trigger_path.as_str());

        let source = EventSource::of(event);
        let zone_id = source.zone_id.or_else(|| {
            let dsid = source.dsid.as_deref()?;
            self.model
                .as_ref()
                .and_then(|model| model.device_zone(dsid))
                .map(i64::from)
        });
        if let Some(zone) = zone_id {
            relay.set_property("source_zoneID", zone.to_string());
        }
        if let Some(group) = source.group_id {
            relay.set_property("source_groupID", group.to_string());
        }
        if let Some(dsid) = &source.dsid {
            relay.set_property("source_dsid", dsid.as_str());
        }
        if let Some(state) = &source.state_name {
            relay.set_property("source_statename", state.as_str());
        }

        if let Some(extra) = &entry.additional_relaying_parameter {
            apply_additional_parameters(&mut relay, extra);
        }
        Ok(relay)
    }
}

/// Merge `additionalRelayingParameter` into the relay; bad content is logged
fn apply_additional_parameters(relay: &mut Event, extra: &Value) {
    let parsed;
    let params = match extra {
        Value::Object(map) => map,
        Value::String(s) if s.trim().is_empty() => return,
        Value::String(s) => match serde_json::from_str::<Value>(s) {
            Ok(Value::Object(map)) => {
                parsed = map;
                &parsed
            }
            Ok(other) => {
                warn!("additionalRelayingParameter is not an object: {}", other);
                return;
            }
            Err(e) => {
                warn!(error = %e, "Failed to parse additionalRelayingParameter");
                return;
            }
        },
        Value::Null => return,
        other => {
            warn!("additionalRelayingParameter is not an object: {}", other);
            return;
        }
    };
    for (key, value) in params {
        relay.set_property(key.as_str(), json_to_string(value));
    }
}

impl Plugin for SystemTriggerPlugin {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn handle_event(&self, event: &Event, _subscription: &Subscription) -> PluginResult<()> {
        let summary = self.evaluate(event);
        trace!(?summary, "Trigger evaluation done");
        Ok(())
    }

    fn subscribe(&self, interpreter: &EventInterpreter) -> PluginResult<()> {
        if !self.auto_subscribe {
            return Ok(());
        }
        for name in TRIGGER_EVENTS {
            let id = interpreter.unique_subscription_id(&format!("{name}_{}", Self::NAME));
            interpreter.subscribe(Subscription::new(id, *name, Self::NAME)?)?;
        }
        info!(events = TRIGGER_EVENTS.len(), "System trigger subscriptions installed");
        Ok(())
    }
}
