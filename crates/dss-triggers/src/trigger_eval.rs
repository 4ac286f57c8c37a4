//! Matching trigger conditions against events

use dss_core::{events, json_to_string, props, Event, RaiseLocation};
use tracing::trace;

use crate::trigger::{
    AddonStateChangeTrigger, Comparison, DeviceSensorTrigger, StateChangeTrigger,
    TextMatch, TriggerCondition, ZoneSceneTrigger,
};

/// Identity of the event source, taken from the raise location and falling
/// back to the well-known properties
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventSource {
    pub zone_id: Option<i64>,
    pub group_id: Option<i64>,
    pub dsid: Option<String>,
    pub state_name: Option<String>,
    /// Raised by a group rather than a single device
    pub is_group: bool,
}

impl EventSource {
    pub fn of(event: &Event) -> Self {
        let mut source = Self {
            zone_id: int_property(event, props::ZONE_ID),
            group_id: int_property(event, props::GROUP_ID),
            dsid: event.property(props::DSID).map(str::to_string),
            state_name: event.property(props::STATE_NAME).map(str::to_string),
            is_group: false,
        };
        match event.raise_location() {
            RaiseLocation::Group { zone_id, group_id } => {
                source.zone_id = Some(i64::from(*zone_id));
                source.group_id = Some(i64::from(*group_id));
                source.is_group = true;
            }
            RaiseLocation::Device { dsid, zone_id } => {
                source.dsid = Some(dsid.clone());
                if let Some(zone) = zone_id {
                    source.zone_id = Some(i64::from(*zone));
                }
            }
            RaiseLocation::State { name } => source.state_name = Some(name.clone()),
            RaiseLocation::Apartment => {}
        }
        source
    }

    fn is_device(&self) -> bool {
        !self.is_group && self.dsid.is_some()
    }
}

fn int_property(event: &Event, name: &str) -> Option<i64> {
    event.property_as::<i64>(name).ok().flatten()
}

fn float_property(event: &Event, name: &str) -> Option<f64> {
    event.property_as::<f64>(name).ok().flatten()
}

/// Stateless matcher for [`TriggerCondition`]s
pub struct TriggerEvaluator;

impl TriggerEvaluator {
    /// Whether `condition` matches `event`
    pub fn matches(condition: &TriggerCondition, event: &Event) -> bool {
        let source = EventSource::of(event);
        let matched = match condition {
            TriggerCondition::ZoneScene(t) => {
                matches!(event.name(), events::CALL_SCENE | events::CALL_SCENE_BUS)
                    && Self::eval_zone_scene(t, event, &source)
                    && t.forced.map_or(true, |forced| forced == event.is_forced())
            }
            TriggerCondition::UndoZoneScene(t) => {
                event.name() == events::UNDO_SCENE && Self::eval_zone_scene(t, event, &source)
            }
            TriggerCondition::DeviceScene(t) => {
                event.name() == events::CALL_SCENE
                    && source.is_device()
                    && t.dsid.matches(source.dsid.as_deref())
                    && t.scene.matches(int_property(event, props::SCENE_ID))
            }
            TriggerCondition::DeviceSensor(t) => {
                event.name() == events::DEVICE_SENSOR_EVENT
                    && Self::eval_device_sensor(t, event, &source)
            }
            TriggerCondition::DeviceBinaryInput(t) => {
                event.name() == events::DEVICE_BINARY_INPUT_EVENT
                    && t.dsid.matches(source.dsid.as_deref())
                    && t.index.matches(int_property(event, props::INPUT_INDEX))
                    && t.input_type.matches(int_property(event, props::INPUT_TYPE))
                    && t.state.matches(int_property(event, props::INPUT_STATE))
            }
            TriggerCondition::DeviceMsg(t) => {
                event.name() == events::BUTTON_CLICK
                    && t.dsid.matches(source.dsid.as_deref())
                    && t.msg.matches(int_property(event, props::CLICK_TYPE))
            }
            TriggerCondition::DeviceAction(t) => {
                event.name() == events::DEVICE_ACTION_EVENT
                    && t.dsid.matches(source.dsid.as_deref())
                    && t.action.matches(int_property(event, props::ACTION_ID))
            }
            TriggerCondition::DeviceNamedEvent(t) => {
                event.name() == events::DEVICE_EVENT_EVENT
                    && t.dsid.matches(source.dsid.as_deref())
                    && t.event.matches(event.property(props::EVENT_ID))
            }
            TriggerCondition::CustomEvent(t) => {
                event.name() == events::HIGH_LEVEL_EVENT && t.event.matches(event.property(props::ID))
            }
            TriggerCondition::StateChange(t) => {
                event.name() == events::STATE_CHANGE && Self::eval_state(t, event, &source)
            }
            TriggerCondition::AddonStateChange(t) => {
                event.name() == events::ADDON_STATE_CHANGE && Self::eval_addon_state(t, event, &source)
            }
            TriggerCondition::DeviceSensorValue(t) => {
                event.name() == events::DEVICE_SENSOR_VALUE
                    && t.dsid.matches(source.dsid.as_deref())
                    && t.sensor_type.matches(event.sensor_type().map(i64::from))
                    && Self::eval_threshold(t.operator, t.value, event)
            }
            TriggerCondition::ZoneSensorValue(t) => {
                event.name() == events::ZONE_SENSOR_VALUE
                    && source.zone_id.is_some()
                    && t.zone.matches(source.zone_id)
                    && t.group.matches(source.group_id)
                    && t.sensor_type.matches(event.sensor_type().map(i64::from))
                    && Self::eval_threshold(t.operator, t.value, event)
            }
            TriggerCondition::Event(t) => {
                event.name() == t.name
                    && t
                        .parameter
                        .iter()
                        .all(|(key, value)| event.property(key) == Some(json_to_string(value).as_str()))
            }
        };

        trace!(
            trigger = condition.kind(),
            event = %event,
            matched,
            "Evaluated trigger condition"
        );
        matched
    }

    fn eval_zone_scene(t: &ZoneSceneTrigger, event: &Event, source: &EventSource) -> bool {
        source.is_group
            && t.zone.matches(source.zone_id)
            && t.group.matches(source.group_id)
            && t.scene.matches(int_property(event, props::SCENE_ID))
            && t.dsid.matches(event.property(props::ORIGIN_DEVICE_ID))
    }

    fn eval_device_sensor(t: &DeviceSensorTrigger, event: &Event, source: &EventSource) -> bool {
        if !t.dsid.matches(source.dsid.as_deref()) {
            return false;
        }
        match (&t.eventid, &t.evt) {
            (Some(index), _) => index.matches(int_property(event, props::SENSOR_INDEX)),
            (None, Some(name)) => name.matches(event.property(props::SENSOR_EVENT)),
            (None, None) => false,
        }
    }

    fn eval_state(t: &StateChangeTrigger, event: &Event, source: &EventSource) -> bool {
        if source.state_name.as_deref() != Some(t.name.as_str()) {
            return false;
        }
        let check = |expected: &Option<TextMatch>, name: &str| {
            expected
                .as_ref()
                .map_or(true, |m| m.matches(event.property(name)))
        };
        check(&t.state, props::STATE) && check(&t.value, props::VALUE) && check(&t.oldvalue, props::OLD_VALUE)
    }

    fn eval_addon_state(t: &AddonStateChangeTrigger, event: &Event, source: &EventSource) -> bool {
        event.property(props::SCRIPT_ID) == Some(t.addon_id.as_str()) && Self::eval_state(&t.state, event, source)
    }

    fn eval_threshold(operator: Comparison, threshold: f64, event: &Event) -> bool {
        float_property(event, props::SENSOR_VALUE_FLOAT)
            .is_some_and(|actual| operator.holds(actual, threshold))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn condition(node: serde_json::Value) -> TriggerCondition {
        TriggerCondition::from_node(&node).unwrap().unwrap()
    }

    fn group_event(name: &str, zone: i32, group: i32, scene: i32) -> Event {
        Event::new(name)
            .unwrap()
            .with_raise_location(RaiseLocation::Group {
                zone_id: zone,
                group_id: group,
            })
            .with_property(props::SCENE_ID, scene.to_string())
    }

    fn device_event(name: &str, dsid: &str) -> Event {
        Event::new(name).unwrap().with_raise_location(RaiseLocation::Device {
            dsid: dsid.to_string(),
            zone_id: None,
        })
    }

    #[test]
    fn test_zone_scene() {
        let t = condition(json!({"type": "zone-scene", "zone": 9492, "group": 1, "scene": 11}));
        assert!(TriggerEvaluator::matches(&t, &group_event("callScene", 9492, 1, 11)));
        assert!(TriggerEvaluator::matches(&t, &group_event("callSceneBus", 9492, 1, 11)));
        assert!(!TriggerEvaluator::matches(&t, &group_event("callScene", 9492, 1, 12)));
        assert!(!TriggerEvaluator::matches(&t, &group_event("callScene", 1, 1, 11)));
        assert!(!TriggerEvaluator::matches(&t, &group_event("undoScene", 9492, 1, 11)));
    }

    #[test]
    fn test_zone_scene_wildcards_and_origin() {
        let t = condition(json!({"type": "zone-scene", "zone": -1, "dsid": "3504175fe0000000000017d6"}));
        let event = group_event("callScene", 4, 2, 5).with_property(props::ORIGIN_DEVICE_ID, "3504175fe0000000000017d6");
        assert!(TriggerEvaluator::matches(&t, &event));
        let other = group_event("callScene", 4, 2, 5).with_property(props::ORIGIN_DEVICE_ID, "other");
        assert!(!TriggerEvaluator::matches(&t, &other));
    }

    #[test]
    fn test_zone_scene_ignores_device_calls() {
        let t = condition(json!({"type": "zone-scene", "zone": -1}));
        let event = device_event("callScene", "abc").with_property(props::SCENE_ID, "5");
        assert!(!TriggerEvaluator::matches(&t, &event));
    }

    #[test]
    fn test_zone_scene_forced() {
        let t = condition(json!({"type": "zone-scene", "zone": 1, "forced": true}));
        assert!(!TriggerEvaluator::matches(&t, &group_event("callScene", 1, 0, 5)));
        let forced = group_event("callScene", 1, 0, 5).with_property(props::FORCED, "true");
        assert!(TriggerEvaluator::matches(&t, &forced));
    }

    #[test]
    fn test_device_scene() {
        let t = condition(json!({"type": "device-scene", "dsid": "abc", "scene": -1}));
        let event = device_event("callScene", "abc").with_property(props::SCENE_ID, "5");
        assert!(TriggerEvaluator::matches(&t, &event));
        assert!(!TriggerEvaluator::matches(&t, &group_event("callScene", 1, 1, 5)));
    }

    #[test]
    fn test_device_sensor_by_index_or_name() {
        let by_index = condition(json!({"type": "device-sensor", "dsid": "-1", "eventid": 2}));
        let by_name = condition(json!({"type": "device-sensor", "dsid": "abc", "evt": "smoke"}));
        let neither = condition(json!({"type": "device-sensor", "dsid": "abc"}));

        let event = device_event(events::DEVICE_SENSOR_EVENT, "abc")
            .with_property(props::SENSOR_INDEX, "2")
            .with_property(props::SENSOR_EVENT, "smoke");
        assert!(TriggerEvaluator::matches(&by_index, &event));
        assert!(TriggerEvaluator::matches(&by_name, &event));
        assert!(!TriggerEvaluator::matches(&neither, &event));
    }

    #[test]
    fn test_device_msg_and_action() {
        let msg = condition(json!({"type": "device-msg", "dsid": "abc", "msg": 1}));
        let click = device_event(events::BUTTON_CLICK, "abc").with_property(props::CLICK_TYPE, "1");
        assert!(TriggerEvaluator::matches(&msg, &click));

        let action = condition(json!({"type": "device-action", "dsid": "", "action": "3"}));
        let event = device_event(events::DEVICE_ACTION_EVENT, "xyz").with_property(props::ACTION_ID, "3");
        assert!(TriggerEvaluator::matches(&action, &event));
    }

    #[test]
    fn test_binary_input() {
        let t = condition(json!({"type": "device-binary-input", "dsid": "abc", "index": 0, "state": 1}));
        let event = device_event(events::DEVICE_BINARY_INPUT_EVENT, "abc")
            .with_property(props::INPUT_INDEX, "0")
            .with_property(props::INPUT_TYPE, "7")
            .with_property(props::INPUT_STATE, "1");
        assert!(TriggerEvaluator::matches(&t, &event));
    }

    #[test]
    fn test_custom_event() {
        let t = condition(json!({"type": "custom-event", "event": 1234}));
        let event = Event::new(events::HIGH_LEVEL_EVENT).unwrap().with_property(props::ID, "1234");
        assert!(TriggerEvaluator::matches(&t, &event));
    }

    #[test]
    fn test_state_and_addon_state() {
        let t = condition(json!({"type": "state-change", "name": "presence", "state": "present"}));
        let event = Event::new(events::STATE_CHANGE)
            .unwrap()
            .with_raise_location(RaiseLocation::State {
                name: "presence".into(),
            })
            .with_property(props::STATE, "present");
        assert!(TriggerEvaluator::matches(&t, &event));

        let addon = condition(json!({
            "type": "addon-state-change",
            "addon-id": "heating",
            "name": "mode",
            "value": 2
        }));
        let event = Event::new(events::ADDON_STATE_CHANGE)
            .unwrap()
            .with_property(props::STATE_NAME, "mode")
            .with_property(props::SCRIPT_ID, "heating")
            .with_property(props::VALUE, "2");
        assert!(TriggerEvaluator::matches(&addon, &event));
    }

    #[test]
    fn test_sensor_thresholds() {
        let t = condition(json!({
            "type": "device-sensor-value",
            "dsid": "abc",
            "sensor-type": 9,
            "value": 20,
            "operator": "lower"
        }));
        let cold = device_event(events::DEVICE_SENSOR_VALUE, "abc")
            .with_property(props::SENSOR_TYPE, "9")
            .with_property(props::SENSOR_VALUE_FLOAT, "18.5");
        assert!(TriggerEvaluator::matches(&t, &cold));
        let warm = device_event(events::DEVICE_SENSOR_VALUE, "abc")
            .with_property(props::SENSOR_TYPE, "9")
            .with_property(props::SENSOR_VALUE_FLOAT, "22");
        assert!(!TriggerEvaluator::matches(&t, &warm));

        let zone = condition(json!({
            "type": "zone-sensor-value",
            "zone": 3,
            "sensor-type": 9,
            "value": 20,
            "operator": "greater"
        }));
        let event = Event::new(events::ZONE_SENSOR_VALUE)
            .unwrap()
            .with_raise_location(RaiseLocation::Group {
                zone_id: 3,
                group_id: 0,
            })
            .with_property(props::SENSOR_TYPE, "9")
            .with_property(props::SENSOR_VALUE_FLOAT, "22");
        assert!(TriggerEvaluator::matches(&zone, &event));
    }

    #[test]
    fn test_generic_event_parameters() {
        let t = condition(json!({"type": "event", "name": "doorbell", "parameter": {"floor": 2, "door": "front"}}));
        let event = Event::new("doorbell")
            .unwrap()
            .with_property("floor", "2")
            .with_property("door", "front");
        assert!(TriggerEvaluator::matches(&t, &event));
        let wrong = Event::new("doorbell").unwrap().with_property("floor", "2");
        assert!(!TriggerEvaluator::matches(&t, &wrong));
    }
}
