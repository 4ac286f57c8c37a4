//! Trigger condition types
//!
//! A trigger condition is one child of a rule's `triggers` node. The `type`
//! tag selects the matcher; the remaining fields are its parameters. Numeric
//! parameters accept a negative value as "any", device ids accept `-1` or an
//! empty string.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::rule_store::RuleStoreError;

/// Trigger errors
#[derive(Debug, Error)]
pub enum TriggerError {
    #[error("Invalid trigger configuration: {0}")]
    InvalidConfig(String),

    #[error("Rule store error: {0}")]
    Store(#[from] RuleStoreError),

    #[error("Event error: {0}")]
    Event(#[from] dss_core::EventError),
}

/// Result type for trigger operations
pub type TriggerResult<T> = Result<T, TriggerError>;

/// Every `type` tag the engine understands
pub const TRIGGER_TYPES: &[&str] = &[
    "zone-scene",
    "undo-zone-scene",
    "device-scene",
    "device-sensor",
    "device-binary-input",
    "device-msg",
    "device-action",
    "device-named-event",
    "custom-event",
    "state-change",
    "addon-state-change",
    "device-sensor-value",
    "zone-sensor-value",
    "event",
];

/// A single trigger condition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum TriggerCondition {
    /// Scene called on a zone/group (`callScene`, `callSceneBus`)
    ZoneScene(ZoneSceneTrigger),

    /// Scene call undone on a zone/group
    UndoZoneScene(ZoneSceneTrigger),

    /// Scene called on a single device
    DeviceScene(DeviceSceneTrigger),

    /// Device sensor event, by index or by name
    DeviceSensor(DeviceSensorTrigger),

    /// Binary input state change on a device
    DeviceBinaryInput(DeviceBinaryInputTrigger),

    /// Button click on a device
    DeviceMsg(DeviceMsgTrigger),

    /// Direct device action
    DeviceAction(DeviceActionTrigger),

    /// Named device event
    DeviceNamedEvent(DeviceNamedEventTrigger),

    /// User-defined high level event
    CustomEvent(CustomEventTrigger),

    /// System state change
    StateChange(StateChangeTrigger),

    /// State change published by an add-on
    AddonStateChange(AddonStateChangeTrigger),

    /// Device sensor value crossing a threshold
    DeviceSensorValue(DeviceSensorValueTrigger),

    /// Zone sensor value crossing a threshold
    ZoneSensorValue(ZoneSensorValueTrigger),

    /// Any event by name with exact parameter values
    Event(GenericEventTrigger),
}

impl TriggerCondition {
    /// Parse a trigger node
    ///
    /// `Ok(None)` for nodes without a `type` or with a type this engine does
    /// not know; `Err` for known types with malformed parameters.
    pub fn from_node(node: &serde_json::Value) -> TriggerResult<Option<Self>> {
        let Some(kind) = node.get("type").and_then(serde_json::Value::as_str) else {
            return Ok(None);
        };
        if !TRIGGER_TYPES.contains(&kind) {
            return Ok(None);
        }
        serde_json::from_value(node.clone())
            .map(Some)
            .map_err(|e| TriggerError::InvalidConfig(format!("{kind}: {e}")))
    }

    /// The `type` tag
    pub fn kind(&self) -> &'static str {
        match self {
            TriggerCondition::ZoneScene(_) => "zone-scene",
            TriggerCondition::UndoZoneScene(_) => "undo-zone-scene",
            TriggerCondition::DeviceScene(_) => "device-scene",
            TriggerCondition::DeviceSensor(_) => "device-sensor",
            TriggerCondition::DeviceBinaryInput(_) => "device-binary-input",
            TriggerCondition::DeviceMsg(_) => "device-msg",
            TriggerCondition::DeviceAction(_) => "device-action",
            TriggerCondition::DeviceNamedEvent(_) => "device-named-event",
            TriggerCondition::CustomEvent(_) => "custom-event",
            TriggerCondition::StateChange(_) => "state-change",
            TriggerCondition::AddonStateChange(_) => "addon-state-change",
            TriggerCondition::DeviceSensorValue(_) => "device-sensor-value",
            TriggerCondition::ZoneSensorValue(_) => "zone-sensor-value",
            TriggerCondition::Event(_) => "event",
        }
    }
}

/// Zone/group scene trigger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZoneSceneTrigger {
    pub zone: IdMatch,

    #[serde(default)]
    pub group: IdMatch,

    #[serde(default)]
    pub scene: IdMatch,

    /// Device that originated the call
    #[serde(default)]
    pub dsid: TextMatch,

    /// Only match calls with this `forced` flag
    #[serde(default, skip_serializing_if = "Option::is_none", with = "lenient_bool")]
    pub forced: Option<bool>,
}

/// Device scene trigger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceSceneTrigger {
    pub dsid: TextMatch,
    pub scene: IdMatch,
}

/// Device sensor event trigger
///
/// Matches by `eventid` (sensor index) when present, otherwise by `evt`
/// (sensor event name). With neither it never matches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceSensorTrigger {
    pub dsid: TextMatch,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eventid: Option<IdMatch>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evt: Option<TextMatch>,
}

/// Binary input trigger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct DeviceBinaryInputTrigger {
    pub dsid: TextMatch,

    #[serde(default)]
    pub index: IdMatch,

    #[serde(default)]
    pub input_type: IdMatch,

    #[serde(default)]
    pub state: IdMatch,
}

/// Button click trigger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceMsgTrigger {
    pub dsid: TextMatch,
    /// Click type
    pub msg: IdMatch,
}

/// Device action trigger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceActionTrigger {
    pub dsid: TextMatch,
    pub action: IdMatch,
}

/// Named device event trigger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceNamedEventTrigger {
    pub dsid: TextMatch,
    pub event: TextMatch,
}

/// High level event trigger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomEventTrigger {
    pub event: TextMatch,
}

/// State change trigger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateChangeTrigger {
    pub name: String,

    /// State as text (e.g. `active`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<TextMatch>,

    /// State as number
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<TextMatch>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oldvalue: Option<TextMatch>,
}

/// Add-on state change trigger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct AddonStateChangeTrigger {
    pub addon_id: String,

    #[serde(flatten)]
    pub state: StateChangeTrigger,
}

/// Threshold comparison
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Comparison {
    #[serde(alias = ">")]
    Greater,
    #[serde(alias = "<")]
    Lower,
}

impl Comparison {
    pub fn holds(&self, actual: f64, threshold: f64) -> bool {
        match self {
            Comparison::Greater => actual > threshold,
            Comparison::Lower => actual < threshold,
        }
    }
}

/// Device sensor value trigger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct DeviceSensorValueTrigger {
    pub dsid: TextMatch,

    pub sensor_type: IdMatch,

    #[serde(with = "lenient_f64")]
    pub value: f64,

    pub operator: Comparison,
}

/// Zone sensor value trigger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ZoneSensorValueTrigger {
    pub zone: IdMatch,

    #[serde(default)]
    pub group: IdMatch,

    pub sensor_type: IdMatch,

    #[serde(with = "lenient_f64")]
    pub value: f64,

    pub operator: Comparison,
}

/// Generic event trigger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenericEventTrigger {
    pub name: String,

    /// Properties that must be present with exactly these values
    #[serde(default)]
    pub parameter: HashMap<String, serde_json::Value>,
}

/// Raw scalar as found in a rule tree
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub(crate) enum Scalar {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

/// Numeric parameter where any negative value means "any"
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Scalar", into = "i64")]
pub enum IdMatch {
    #[default]
    Any,
    Exact(i64),
}

impl IdMatch {
    /// `actual` is `None` when the event lacks the field; only `Any` matches then
    pub fn matches(&self, actual: Option<i64>) -> bool {
        match self {
            IdMatch::Any => true,
            IdMatch::Exact(expected) => actual == Some(*expected),
        }
    }

    fn from_i64(value: i64) -> Self {
        if value < 0 {
            IdMatch::Any
        } else {
            IdMatch::Exact(value)
        }
    }
}

impl TryFrom<Scalar> for IdMatch {
    type Error = String;

    fn try_from(value: Scalar) -> Result<Self, Self::Error> {
        match value {
            Scalar::Int(i) => Ok(IdMatch::from_i64(i)),
            Scalar::Float(f) if f.fract() == 0.0 => Ok(IdMatch::from_i64(f as i64)),
            Scalar::Text(s) => s
                .trim()
                .parse::<i64>()
                .map(IdMatch::from_i64)
                .map_err(|_| format!("expected a number, got '{s}'")),
            other => Err(format!("expected a number, got {other:?}")),
        }
    }
}

impl From<IdMatch> for i64 {
    fn from(value: IdMatch) -> Self {
        match value {
            IdMatch::Any => -1,
            IdMatch::Exact(v) => v,
        }
    }
}

impl fmt::Display for IdMatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IdMatch::Any => write!(f, "*"),
            IdMatch::Exact(v) => write!(f, "{v}"),
        }
    }
}

/// Text parameter where `-1` or an empty string means "any"
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Scalar", into = "String")]
pub enum TextMatch {
    #[default]
    Any,
    Exact(String),
}

impl TextMatch {
    pub fn matches(&self, actual: Option<&str>) -> bool {
        match self {
            TextMatch::Any => true,
            TextMatch::Exact(expected) => actual == Some(expected.as_str()),
        }
    }
}

impl From<Scalar> for TextMatch {
    fn from(value: Scalar) -> Self {
        let text = match value {
            Scalar::Bool(b) => b.to_string(),
            Scalar::Int(i) => i.to_string(),
            Scalar::Float(f) => f.to_string(),
            Scalar::Text(s) => s,
        };
        match text.trim() {
            "" | "-1" => TextMatch::Any,
            _ => TextMatch::Exact(text),
        }
    }
}

impl From<TextMatch> for String {
    fn from(value: TextMatch) -> Self {
        match value {
            TextMatch::Any => "-1".to_string(),
            TextMatch::Exact(s) => s,
        }
    }
}

impl fmt::Display for TextMatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TextMatch::Any => write!(f, "*"),
            TextMatch::Exact(s) => write!(f, "{s}"),
        }
    }
}

/// Booleans stored as `true`, `"true"`, `1` or `"1"`
pub(crate) mod lenient_bool {
    use serde::{Deserialize, Deserializer, Serializer};

    use super::Scalar;

    pub fn serialize<S>(value: &Option<bool>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(b) => serializer.serialize_bool(*b),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<bool>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let opt: Option<Scalar> = Option::deserialize(deserializer)?;
        opt.map(to_bool).transpose().map_err(serde::de::Error::custom)
    }

    pub(crate) fn to_bool(value: Scalar) -> Result<bool, String> {
        match value {
            Scalar::Bool(b) => Ok(b),
            Scalar::Int(i) => Ok(i != 0),
            Scalar::Text(s) => match s.trim() {
                "true" | "1" => Ok(true),
                "false" | "0" | "" => Ok(false),
                other => Err(format!("expected a boolean, got '{other}'")),
            },
            other => Err(format!("expected a boolean, got {other:?}")),
        }
    }
}

/// Floats stored as numbers or numeric strings
pub(crate) mod lenient_f64 {
    use serde::{Deserialize, Deserializer, Serializer};

    use super::Scalar;

    pub fn serialize<S>(value: &f64, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_f64(*value)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<f64, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Scalar::deserialize(deserializer)? {
            Scalar::Int(i) => Ok(i as f64),
            Scalar::Float(f) => Ok(f),
            Scalar::Text(s) => s
                .trim()
                .parse::<f64>()
                .map_err(|_| serde::de::Error::custom(format!("expected a number, got '{s}'"))),
            Scalar::Bool(b) => Err(serde::de::Error::custom(format!(
                "expected a number, got {b}"
            ))),
        }
    }
}

/// Integers stored as numbers or numeric strings; absent means 0
pub(crate) mod lenient_i64 {
    use serde::{Deserialize, Deserializer, Serializer};

    use super::Scalar;

    pub fn serialize<S>(value: &i64, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_i64(*value)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<i64, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Scalar::deserialize(deserializer)? {
            Scalar::Int(i) => Ok(i),
            Scalar::Float(f) => Ok(f as i64),
            Scalar::Text(s) => s
                .trim()
                .parse::<i64>()
                .map_err(|_| serde::de::Error::custom(format!("expected an integer, got '{s}'"))),
            Scalar::Bool(b) => Err(serde::de::Error::custom(format!(
                "expected an integer, got {b}"
            ))),
        }
    }
}

/// Required boolean in the lenient format
pub(crate) mod lenient_flag {
    use serde::{Deserialize, Deserializer, Serializer};

    use super::lenient_bool::to_bool;
    use super::Scalar;

    pub fn serialize<S>(value: &bool, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_bool(*value)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<bool, D::Error>
    where
        D: Deserializer<'de>,
    {
        to_bool(Scalar::deserialize(deserializer)?).map_err(serde::de::Error::custom)
    }
}
