//! End-to-end dispatch through a running interpreter

use std::sync::{Arc, Mutex};
use std::time::Duration;

use dss_core::{Event, MonotonicClock, Subscription};
use dss_event_bus::{EventInterpreter, InterpreterOptions, OffloadedPlugin, Plugin, PluginResult};
use tokio::sync::mpsc;

struct Forward {
    name: &'static str,
    tx: mpsc::UnboundedSender<String>,
    delay: Duration,
}

impl Plugin for Forward {
    fn name(&self) -> &str {
        self.name
    }

    fn handle_event(&self, event: &Event, _subscription: &Subscription) -> PluginResult<()> {
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        let label = match event.property("seq") {
            Some(seq) => format!("{}#{}", event.name(), seq),
            None => event.name().to_string(),
        };
        let _ = self.tx.send(label);
        Ok(())
    }
}

fn interpreter() -> Arc<EventInterpreter> {
    Arc::new(EventInterpreter::new(
        InterpreterOptions {
            wait_timeout: Duration::from_millis(20),
            runner_max_sleep: Duration::from_millis(20),
        },
        MonotonicClock::shared(),
    ))
}

async fn recv_n(rx: &mut mpsc::UnboundedReceiver<String>, n: usize) -> Vec<String> {
    let mut out = Vec::new();
    while out.len() < n {
        let next = tokio::time::timeout(Duration::from_secs(10), rx.recv())
            .await
            .expect("timed out")
            .expect("closed");
        out.push(next);
    }
    out
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_events_are_dispatched_in_push_order() {
    let interp = interpreter();
    let (tx, mut rx) = mpsc::unbounded_channel();
    interp.add_plugin(Arc::new(Forward {
        name: "forward",
        tx,
        delay: Duration::ZERO,
    }));
    interp
        .subscribe(Subscription::new("s", "step", "forward").unwrap())
        .unwrap();
    interp.start();

    for i in 0..100 {
        interp
            .bus()
            .push_event(Event::new("step").unwrap().with_property("seq", i.to_string()));
    }

    let seen = recv_n(&mut rx, 100).await;
    let expected: Vec<_> = (0..100).map(|i| format!("step#{i}")).collect();
    assert_eq!(seen, expected);
    interp.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_delayed_event_arrives_after_immediate_ones() {
    let interp = interpreter();
    let (tx, mut rx) = mpsc::unbounded_channel();
    interp.add_plugin(Arc::new(Forward {
        name: "forward",
        tx,
        delay: Duration::ZERO,
    }));
    for name in ["now", "later"] {
        let id = interp.unique_subscription_id(&format!("{name}_forward"));
        interp
            .subscribe(Subscription::new(id, name, "forward").unwrap())
            .unwrap();
    }
    interp.start();

    interp
        .bus()
        .push_event(Event::new("later").unwrap().with_property("time", "+1"));
    interp.bus().push_event(Event::new("now").unwrap());

    assert_eq!(recv_n(&mut rx, 2).await, ["now", "later"]);
    interp.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_offloaded_plugin_keeps_dispatch_free() {
    let interp = interpreter();
    let (slow_tx, mut slow_rx) = mpsc::unbounded_channel();
    let (fast_tx, mut fast_rx) = mpsc::unbounded_channel();

    interp.add_plugin(Arc::new(OffloadedPlugin::new(Forward {
        name: "slow",
        tx: slow_tx,
        delay: Duration::from_millis(200),
    })));
    interp.add_plugin(Arc::new(Forward {
        name: "fast",
        tx: fast_tx,
        delay: Duration::ZERO,
    }));
    interp
        .subscribe(Subscription::new("slow", "tick", "slow").unwrap())
        .unwrap();
    interp
        .subscribe(Subscription::new("fast", "tick", "fast").unwrap())
        .unwrap();
    interp.start();

    let started = std::time::Instant::now();
    for i in 0..3 {
        interp
            .bus()
            .push_event(Event::new("tick").unwrap().with_property("seq", i.to_string()));
    }

    // the fast handler sees all three before the slow pool finishes
    recv_n(&mut fast_rx, 3).await;
    assert!(started.elapsed() < Duration::from_millis(400));

    let slow = recv_n(&mut slow_rx, 3).await;
    assert_eq!(slow, ["tick#0", "tick#1", "tick#2"]);
    interp.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_producers_on_many_threads() {
    let interp = interpreter();
    let (tx, mut rx) = mpsc::unbounded_channel();
    interp.add_plugin(Arc::new(Forward {
        name: "forward",
        tx,
        delay: Duration::ZERO,
    }));
    interp
        .subscribe(Subscription::new("s", "p", "forward").unwrap())
        .unwrap();
    interp.start();

    let pushed = Arc::new(Mutex::new(0usize));
    let producers: Vec<_> = (0..4)
        .map(|t| {
            let bus = interp.bus().clone();
            let pushed = Arc::clone(&pushed);
            std::thread::spawn(move || {
                for i in 0..25 {
                    bus.push_event(
                        Event::new("p")
                            .unwrap()
                            .with_property("seq", format!("{t}-{i}")),
                    );
                    *pushed.lock().unwrap() += 1;
                }
            })
        })
        .collect();
    for p in producers {
        p.join().unwrap();
    }

    let seen = recv_n(&mut rx, 100).await;
    for t in 0..4 {
        let own: Vec<_> = seen
            .iter()
            .filter(|l| l.starts_with(&format!("p#{t}-")))
            .cloned()
            .collect();
        let expected: Vec<_> = (0..25).map(|i| format!("p#{t}-{i}")).collect();
        assert_eq!(own, expected);
    }
    assert_eq!(*pushed.lock().unwrap(), 100);
    interp.shutdown().await;
}
