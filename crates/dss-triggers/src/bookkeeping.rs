//! Per-rule damping and action-lag state, stored next to the trigger conditions

use std::collections::HashMap;

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::trigger::{lenient_flag, lenient_i64, TriggerError, TriggerResult};

/// Node name of the damping state under `{triggerPath}/triggers`
pub const DAMPING_NODE: &str = "damping";

/// Node name of the action-lag state under `{triggerPath}/triggers`
pub const ACTION_LAG_NODE: &str = "action-lag";

/// Outcome of checking a match against the damping interval
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DampingOutcome {
    /// The relay must not fire
    pub suppressed: bool,
    /// `last-trigger` changed and has to be written back
    pub updated: bool,
}

/// Rate limit for one rule
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct DampingState {
    /// Minimum seconds between two relays
    #[serde(default, with = "lenient_i64")]
    pub interval: i64,

    /// Restart the interval on every match, suppressed or not
    #[serde(default, with = "lenient_flag")]
    pub rewind: bool,

    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "iso_timestamp"
    )]
    pub last_trigger: Option<DateTime<Utc>>,

    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

impl DampingState {
    /// Parse the stored node
    pub fn from_node(node: &serde_json::Value) -> TriggerResult<Self> {
        serde_json::from_value(node.clone())
            .map_err(|e| TriggerError::InvalidConfig(format!("{DAMPING_NODE}: {e}")))
    }

    pub fn to_node(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }

    /// Record a match at `now`
    pub fn apply(&mut self, now: DateTime<Utc>) -> TriggerResult<DampingOutcome> {
        if self.interval < 0 {
            return Err(TriggerError::InvalidConfig(format!(
                "negative damping interval {}",
                self.interval
            )));
        }
        let interval = Duration::try_seconds(self.interval).ok_or_else(|| {
            TriggerError::InvalidConfig(format!("damping interval {} out of range", self.interval))
        })?;
        let within = self.last_trigger.is_some_and(|last| now - last < interval);

        let update = self.rewind || !within;
        if update {
            self.last_trigger = Some(now);
        }
        Ok(DampingOutcome {
            suppressed: within,
            updated: update,
        })
    }
}

/// Delayed relay with optional reschedule on retrigger
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ActionLagState {
    /// Seconds to delay the relay
    #[serde(default, with = "lenient_i64")]
    pub delay: i64,

    /// A match while the relay is pending replaces it
    #[serde(default, with = "lenient_flag")]
    pub reschedule: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_scheduled_event_id: Option<String>,

    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "iso_timestamp"
    )]
    pub last_scheduled_timestamp: Option<DateTime<Utc>>,

    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

impl ActionLagState {
    pub fn from_node(node: &serde_json::Value) -> TriggerResult<Self> {
        serde_json::from_value(node.clone())
            .map_err(|e| TriggerError::InvalidConfig(format!("{ACTION_LAG_NODE}: {e}")))
    }

    pub fn to_node(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }

    /// The relay delay in seconds, checked against `now`
    ///
    /// A negative delay, or one whose fire time cannot be represented, is a
    /// configuration error.
    pub fn checked_delay(&self, now: DateTime<Utc>) -> TriggerResult<i64> {
        if self.delay < 0 {
            return Err(TriggerError::InvalidConfig(format!(
                "negative action delay {}",
                self.delay
            )));
        }
        Duration::try_seconds(self.delay)
            .and_then(|delay| now.checked_add_signed(delay))
            .map(|_| self.delay)
            .ok_or_else(|| {
                TriggerError::InvalidConfig(format!("action delay {} out of range", self.delay))
            })
    }

    /// Id of a relay that is still pending at `now` and should be replaced
    pub fn pending_reschedule(&self, now: DateTime<Utc>) -> Option<&str> {
        if !self.reschedule || self.delay <= 0 {
            return None;
        }
        let id = self.last_scheduled_event_id.as_deref()?;
        let due = self
            .last_scheduled_timestamp?
            .checked_add_signed(Duration::try_seconds(self.delay)?)?;
        (now < due).then_some(id)
    }

    pub fn record(&mut self, id: impl Into<String>, now: DateTime<Utc>) {
        self.last_scheduled_event_id = Some(id.into());
        self.last_scheduled_timestamp = Some(now);
    }
}

/// Optional ISO-8601 timestamps; unparseable values read as absent
pub(crate) mod iso_timestamp {
    use chrono::{DateTime, SecondsFormat, Utc};
    use serde::{Deserialize, Deserializer, Serializer};
    use tracing::warn;

    pub fn serialize<S>(value: &Option<DateTime<Utc>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(ts) => serializer.serialize_str(&ts.to_rfc3339_opts(SecondsFormat::Millis, true)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw: Option<String> = Option::deserialize(deserializer)?;
        Ok(raw.and_then(|s| match DateTime::parse_from_rfc3339(&s) {
            Ok(ts) => Some(ts.with_timezone(&Utc)),
            Err(e) => {
                warn!("Ignoring unparseable timestamp '{}': {}", s, e);
                None
            }
        }))
    }
}

/// Render a timestamp the way it is written to the store
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Read the node at `key` of a `triggers` object, tolerating bad content
pub(crate) fn read_node<T, F>(triggers: &serde_json::Value, key: &str, parse: F) -> Option<T>
where
    F: FnOnce(&serde_json::Value) -> TriggerResult<T>,
{
    let node = triggers.get(key)?;
    match parse(node) {
        Ok(state) => Some(state),
        Err(e) => {
            warn!("Ignoring malformed {} node: {}", key, e);
            None
        }
    }
}
