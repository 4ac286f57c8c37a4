//! Trigger rules driven through a running interpreter

use std::sync::Arc;
use std::time::Duration;

use dss_core::{props, Event, MonotonicClock, RaiseLocation, Subscription};
use dss_event_bus::{EventInterpreter, InterpreterOptions, Plugin, PluginResult};
use dss_triggers::{MemoryRuleStore, SystemTriggerPlugin};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout, Instant};

struct Recorder {
    tx: mpsc::UnboundedSender<(String, Instant)>,
}

impl Plugin for Recorder {
    fn name(&self) -> &str {
        "recorder"
    }

    fn handle_event(&self, event: &Event, _subscription: &Subscription) -> PluginResult<()> {
        let _ = self.tx.send((event.name().to_string(), Instant::now()));
        Ok(())
    }
}

fn call_scene() -> Event {
    Event::new("callScene")
        .unwrap()
        .with_raise_location(RaiseLocation::Group {
            zone_id: 9492,
            group_id: 1,
        })
        .with_property(props::SCENE_ID, "11")
}

fn rules(extra: Value) -> Value {
    let mut triggers = json!({
        "1": {"type": "zone-scene", "zone": 9492, "group": 1, "scene": 11}
    });
    if let (Some(map), Value::Object(extra)) = (triggers.as_object_mut(), extra) {
        map.extend(extra);
    }
    json!({
        "usr": {
            "triggers": [{"triggerPath": "/usr/states/hall", "relayedEventName": "hall_light"}],
            "states": {"hall": {"triggers": triggers}}
        }
    })
}

fn start(rules: Value) -> (Arc<EventInterpreter>, mpsc::UnboundedReceiver<(String, Instant)>) {
    let interp = Arc::new(EventInterpreter::new(
        InterpreterOptions::default(),
        MonotonicClock::shared(),
    ));
    let store = Arc::new(MemoryRuleStore::from_value(rules));
    interp.add_plugin(Arc::new(SystemTriggerPlugin::new(
        interp.bus().clone(),
        store,
    )));

    let (tx, rx) = mpsc::unbounded_channel();
    interp.add_plugin(Arc::new(Recorder { tx }));
    interp
        .subscribe(Subscription::new("relay", "hall_light", "recorder").unwrap())
        .unwrap();
    interp.start();
    (interp, rx)
}

#[tokio::test(start_paused = true)]
async fn test_damped_burst_relays_once() {
    let (interp, mut rx) = start(rules(json!({"damping": {"interval": 5}})));

    for _ in 0..10 {
        interp.bus().push_event(call_scene());
    }
    let (name, _) = timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("no relay")
        .expect("closed");
    assert_eq!(name, "hall_light");
    assert!(timeout(Duration::from_secs(2), rx.recv()).await.is_err());

    sleep(Duration::from_secs(4)).await;
    interp.bus().push_event(call_scene());
    assert!(timeout(Duration::from_secs(5), rx.recv()).await.is_ok());

    interp.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_retrigger_delivers_one_relay_after_last_delay() {
    let (interp, mut rx) = start(rules(json!({
        "action-lag": {"delay": 10, "reschedule": true}
    })));
    let started = Instant::now();

    interp.bus().push_event(call_scene());
    sleep(Duration::from_secs(3)).await;
    interp.bus().push_event(call_scene());

    let (name, at) = timeout(Duration::from_secs(60), rx.recv())
        .await
        .expect("no relay")
        .expect("closed");
    assert_eq!(name, "hall_light");
    let elapsed = at - started;
    assert!(elapsed >= Duration::from_secs(13), "relayed after {elapsed:?}");
    assert!(elapsed < Duration::from_secs(14), "relayed after {elapsed:?}");

    assert!(timeout(Duration::from_secs(30), rx.recv()).await.is_err());
    interp.shutdown().await;
}
