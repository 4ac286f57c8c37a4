//! Core types for the dSS event core
//!
//! This crate provides the types shared by the event bus, the task pool and
//! the trigger engine: [`Event`], [`Subscription`] with its property filters,
//! and the [`Clock`] used for every time-based decision.

mod clock;
mod event;
mod subscription;

pub use clock::{Clock, ManualClock, MonotonicClock, SharedClock};
pub use event::{Event, EventError, EventResult, Properties, RaiseLocation};
pub use subscription::{
    json_to_string, FilterConfig, FilterMode, FilterPropertyConfig, PropertyFilter, Subscription,
    SubscriptionConfig, SubscriptionError, SubscriptionOptions, SubscriptionResult,
};

/// Well-known event names
pub mod events {
    /// Scene called on a group
    pub const CALL_SCENE: &str = "callScene";

    /// Scene called on the bus, not necessarily by a user
    pub const CALL_SCENE_BUS: &str = "callSceneBus";

    /// Last scene call undone
    pub const UNDO_SCENE: &str = "undoScene";

    /// Button press on a device
    pub const BUTTON_CLICK: &str = "buttonClick";

    pub const DEVICE_SENSOR_EVENT: &str = "deviceSensorEvent";
    pub const DEVICE_BINARY_INPUT_EVENT: &str = "deviceBinaryInputEvent";
    pub const DEVICE_ACTION_EVENT: &str = "deviceActionEvent";
    pub const DEVICE_EVENT_EVENT: &str = "deviceEventEvent";
    pub const DEVICE_SENSOR_VALUE: &str = "deviceSensorValue";
    pub const ZONE_SENSOR_VALUE: &str = "zoneSensorValue";

    /// User-defined high level event
    pub const HIGH_LEVEL_EVENT: &str = "highlevelevent";

    pub const STATE_CHANGE: &str = "stateChange";
    pub const ADDON_STATE_CHANGE: &str = "addonStateChange";

    /// Raised once every subsystem is up
    pub const RUNNING: &str = "running";
}

/// Well-known property names
pub mod props {
    pub const NAME: &str = "name";
    pub const LOCATION: &str = "location";
    pub const CONTEXT: &str = "context";
    pub const TIME: &str = "time";

    /// Marks model-refresh notifications that supersede earlier ones
    pub const UNIQUE: &str = "unique";

    /// Recurrence start for scheduled events
    pub const ICAL_START_TIME: &str = "iCalStartTime";

    /// Recurrence rule for scheduled events
    pub const ICAL_RRULE: &str = "iCalRRule";

    pub const ZONE_ID: &str = "zoneID";
    pub const GROUP_ID: &str = "groupID";
    pub const SCENE_ID: &str = "sceneID";
    pub const ORIGIN_DEVICE_ID: &str = "originDeviceID";

    /// Device id for events raised without a device location
    pub const DSID: &str = "dsid";
    pub const FORCED: &str = "forced";
    pub const SENSOR_EVENT: &str = "sensorEvent";
    pub const SENSOR_INDEX: &str = "sensorIndex";
    pub const SENSOR_TYPE: &str = "sensorType";
    pub const SENSOR_VALUE_FLOAT: &str = "sensorValueFloat";
    pub const INPUT_INDEX: &str = "inputIndex";
    pub const INPUT_TYPE: &str = "inputType";
    pub const INPUT_STATE: &str = "inputState";
    pub const CLICK_TYPE: &str = "clickType";
    pub const ACTION_ID: &str = "actionID";
    pub const EVENT_ID: &str = "eventID";
    pub const ID: &str = "id";
    pub const STATE_NAME: &str = "statename";
    pub const STATE: &str = "state";
    pub const VALUE: &str = "value";
    pub const OLD_VALUE: &str = "oldvalue";
    pub const SCRIPT_ID: &str = "scriptID";
}
