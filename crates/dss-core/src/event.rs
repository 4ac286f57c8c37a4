//! Event type carried through the event queue, the scheduler and every handler

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::props;

/// Errors raised while building or reading an event
#[derive(Debug, Error)]
pub enum EventError {
    #[error("event name must not be empty")]
    EmptyName,

    #[error("property '{name}' has invalid value '{value}'")]
    InvalidProperty { name: String, value: String },
}

/// Result type for event operations
pub type EventResult<T> = Result<T, EventError>;

/// String key/value properties attached to an event
pub type Properties = HashMap<String, String>;

/// The part of the installation that raised an event
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum RaiseLocation {
    /// Apartment-wide, no specific source
    #[default]
    Apartment,
    /// A group inside a zone
    Group { zone_id: i32, group_id: i32 },
    /// A single device, optionally with its zone when the producer knows it
    Device {
        dsid: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        zone_id: Option<i32>,
    },
    /// A named state
    State { name: String },
}

impl fmt::Display for RaiseLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RaiseLocation::Apartment => write!(f, "apartment"),
            RaiseLocation::Group { zone_id, group_id } => {
                write!(f, "group({zone_id}/{group_id})")
            }
            RaiseLocation::Device { dsid, .. } => write!(f, "device({dsid})"),
            RaiseLocation::State { name } => write!(f, "state({name})"),
        }
    }
}

/// An event flowing through the event core
///
/// `location`, `context` and `time` are kept apart from the property map so
/// that "set to an empty string" and "not set" stay distinguishable. They are
/// still reachable through [`Event::property`] and [`Event::set_property`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    name: String,
    #[serde(default)]
    properties: Properties,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    context: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    time: Option<String>,
    #[serde(default)]
    raise_location: RaiseLocation,
    created_at: DateTime<Utc>,
}

impl Event {
    /// Create a new apartment-wide event
    pub fn new(name: impl Into<String>) -> EventResult<Self> {
        let name = name.into();
        if name.is_empty() {
            return Err(EventError::EmptyName);
        }
        Ok(Self {
            name,
            properties: Properties::new(),
            location: None,
            context: None,
            time: None,
            raise_location: RaiseLocation::Apartment,
            created_at: Utc::now(),
        })
    }

    /// Set the raise location
    pub fn with_raise_location(mut self, location: RaiseLocation) -> Self {
        self.raise_location = location;
        self
    }

    /// Set a property, builder style
    pub fn with_property(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_property(name, value);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn raise_location(&self) -> &RaiseLocation {
        &self.raise_location
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn location(&self) -> Option<&str> {
        self.location.as_deref()
    }

    pub fn context(&self) -> Option<&str> {
        self.context.as_deref()
    }

    pub fn time(&self) -> Option<&str> {
        self.time.as_deref()
    }

    pub fn set_time(&mut self, time: impl Into<String>) {
        self.time = Some(time.into());
    }

    /// The plain property map, without the reserved pseudo-properties
    pub fn properties(&self) -> &Properties {
        &self.properties
    }

    /// Look up a property, including the reserved `name`, `location`,
    /// `context` and `time` entries
    pub fn property(&self, name: &str) -> Option<&str> {
        match name {
            props::NAME => Some(&self.name),
            props::LOCATION => self.location(),
            props::CONTEXT => self.context(),
            props::TIME => self.time(),
            _ => self.properties.get(name).map(String::as_str),
        }
    }

    /// Whether a property has been set (an empty value still counts)
    pub fn has_property(&self, name: &str) -> bool {
        match name {
            props::NAME => true,
            props::LOCATION => self.location.is_some(),
            props::CONTEXT => self.context.is_some(),
            props::TIME => self.time.is_some(),
            _ => self.properties.contains_key(name),
        }
    }

    /// Set a property. Returns `false` when the key is empty or names the
    /// immutable event name.
    pub fn set_property(&mut self, name: impl Into<String>, value: impl Into<String>) -> bool {
        let name = name.into();
        let value = value.into();
        match name.as_str() {
            "" | props::NAME => false,
            props::LOCATION => {
                self.location = Some(value);
                true
            }
            props::CONTEXT => {
                self.context = Some(value);
                true
            }
            props::TIME => {
                self.time = Some(value);
                true
            }
            _ => {
                self.properties.insert(name, value);
                true
            }
        }
    }

    /// Remove a property, resetting the "is set" flag of reserved entries
    pub fn unset_property(&mut self, name: &str) {
        match name {
            props::NAME => {}
            props::LOCATION => self.location = None,
            props::CONTEXT => self.context = None,
            props::TIME => self.time = None,
            _ => {
                self.properties.remove(name);
            }
        }
    }

    /// Set every property from `others`, overwriting existing values
    pub fn apply_properties(&mut self, others: &Properties) {
        for (name, value) in others {
            self.set_property(name.clone(), value.clone());
        }
    }

    /// Replace the plain property map wholesale
    pub fn set_properties(&mut self, properties: Properties) {
        self.properties = properties;
    }

    /// Parse a property into a typed value. `Ok(None)` when it is not set.
    pub fn property_as<T: FromStr>(&self, name: &str) -> EventResult<Option<T>> {
        match self.property(name) {
            None => Ok(None),
            Some(raw) => raw
                .trim()
                .parse::<T>()
                .map(Some)
                .map_err(|_| EventError::InvalidProperty {
                    name: name.to_string(),
                    value: raw.to_string(),
                }),
        }
    }

    /// The boolean `forced` flag of scene calls
    pub fn is_forced(&self) -> bool {
        matches!(self.property(props::FORCED), Some("true") | Some("1"))
    }

    /// Sensor type of sensor events; `None` when unset, empty or not a number
    pub fn sensor_type(&self) -> Option<i32> {
        self.property(props::SENSOR_TYPE)
            .filter(|v| !v.is_empty())
            .and_then(|v| v.trim().parse().ok())
    }

    /// Value of the `unique` property when it is set and non-empty
    pub fn unique_key(&self) -> Option<&str> {
        self.property(props::UNIQUE).filter(|v| !v.is_empty())
    }

    /// Whether this event supersedes `other` while both are still pending
    ///
    /// Both must carry the same non-empty `unique` value and agree on name,
    /// `context` and `location`.
    pub fn is_replacement_for(&self, other: &Event) -> bool {
        match (self.unique_key(), other.unique_key()) {
            (Some(mine), Some(theirs)) if mine == theirs => {
                self.name == other.name
                    && self.context == other.context
                    && self.location == other.location
            }
            _ => false,
        }
    }

    /// Fold a replacement into this pending event: its properties win, and
    /// its `time` is taken when it has one
    pub fn merge_replacement(&mut self, replacement: &Event) {
        self.properties = replacement.properties.clone();
        if let Some(time) = replacement.time() {
            self.time = Some(time.to_string());
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.raise_location)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_name_rejected() {
        assert!(matches!(Event::new(""), Err(EventError::EmptyName)));
    }

    #[test]
    fn test_reserved_properties_have_set_flag() {
        let mut event = Event::new("callScene").unwrap();
        assert!(!event.has_property("time"));
        assert_eq!(event.property("name"), Some("callScene"));

        event.set_property("time", "");
        assert!(event.has_property("time"));
        assert_eq!(event.time(), Some(""));
        assert!(!event.properties().contains_key("time"));

        event.unset_property("time");
        assert!(!event.has_property("time"));
    }

    #[test]
    fn test_set_property_refuses_empty_key_and_name() {
        let mut event = Event::new("test").unwrap();
        assert!(!event.set_property("", "x"));
        assert!(!event.set_property("name", "other"));
        assert_eq!(event.name(), "test");
        assert!(event.set_property("zoneID", "5"));
        assert_eq!(event.property("zoneID"), Some("5"));
    }

    #[test]
    fn test_apply_properties_routes_reserved_names() {
        let mut event = Event::new("test").unwrap();
        let mut props = Properties::new();
        props.insert("location".into(), "kitchen".into());
        props.insert("sceneID".into(), "5".into());
        event.apply_properties(&props);

        assert_eq!(event.location(), Some("kitchen"));
        assert_eq!(event.property("sceneID"), Some("5"));
        assert_eq!(event.properties().len(), 1);
    }

    #[test]
    fn test_property_as() {
        let event = Event::new("deviceSensorValue")
            .unwrap()
            .with_property("sensorValueFloat", "21.5")
            .with_property("sensorType", "abc");

        assert_eq!(event.property_as::<f64>("sensorValueFloat").unwrap(), Some(21.5));
        assert_eq!(event.property_as::<i32>("missing").unwrap(), None);
        assert!(event.property_as::<i32>("sensorType").is_err());
    }

    #[test]
    fn test_replacement_requires_matching_unique() {
        let a = Event::new("model_changed")
            .unwrap()
            .with_property("unique", "model")
            .with_property("n", "1");
        let b = Event::new("model_changed")
            .unwrap()
            .with_property("unique", "model")
            .with_property("n", "2");
        let c = Event::new("model_changed").unwrap();
        let d = Event::new("model_changed")
            .unwrap()
            .with_property("unique", "model")
            .with_property("context", "other");

        assert!(b.is_replacement_for(&a));
        assert!(!c.is_replacement_for(&a));
        assert!(!a.is_replacement_for(&c));
        assert!(!d.is_replacement_for(&a));
    }

    #[test]
    fn test_merge_replacement_takes_time_when_set() {
        let mut pending = Event::new("x")
            .unwrap()
            .with_property("time", "+5")
            .with_property("a", "1");
        let newer = Event::new("x").unwrap().with_property("b", "2");
        pending.merge_replacement(&newer);
        assert_eq!(pending.time(), Some("+5"));
        assert_eq!(pending.property("a"), None);
        assert_eq!(pending.property("b"), Some("2"));

        let timed = Event::new("x").unwrap().with_property("time", "+9");
        pending.merge_replacement(&timed);
        assert_eq!(pending.time(), Some("+9"));
    }

    #[test]
    fn test_is_forced() {
        let forced = Event::new("callScene").unwrap().with_property("forced", "true");
        let plain = Event::new("callScene").unwrap();
        assert!(forced.is_forced());
        assert!(!plain.is_forced());
    }

    #[test]
    fn test_sensor_type() {
        let event = Event::new("deviceSensorValue").unwrap();
        assert_eq!(event.sensor_type(), None);
        assert_eq!(event.clone().with_property("sensorType", "").sensor_type(), None);
        assert_eq!(event.with_property("sensorType", "9").sensor_type(), Some(9));
    }
}
