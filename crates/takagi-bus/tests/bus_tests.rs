//! Event bus tests: wildcard routing, round-robin point-to-point delivery,
//! request-reply timeouts, buffering, and ordering.

use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};
use takagi_bus::{BufferConfig, BusError, BusMessage, EventBus, Scope};
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};

fn collector(bus: &EventBus, address: &str) -> mpsc::UnboundedReceiver<BusMessage> {
    let (tx, rx) = mpsc::unbounded_channel();
    bus.consumer(address, move |msg| {
        let _ = tx.send(msg);
    });
    rx
}

#[tokio::test]
async fn test_exact_delivery() {
    let bus = EventBus::new();
    let mut rx = collector(&bus, "sensor.temp");

    bus.publish("sensor.temp", json!(21.5));

    let msg = timeout(Duration::from_secs(1), rx.recv()).await.unwrap().unwrap();
    assert_eq!(msg.body, json!(21.5));
    assert_eq!(msg.address, "sensor.temp");
}

#[tokio::test]
async fn test_wildcard_matches_one_segment() {
    let bus = EventBus::new();
    let mut rx = collector(&bus, "sensor.*.room1");

    bus.publish("sensor.temp.room1", json!(1));
    bus.publish("sensor.temp.room2", json!(2));
    bus.publish("sensor.temp.a.room1", json!(3));

    let msg = timeout(Duration::from_secs(1), rx.recv()).await.unwrap().unwrap();
    assert_eq!(msg.body, json!(1));

    // Nothing else may arrive.
    sleep(Duration::from_millis(50)).await;
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn test_publish_order_per_handler() {
    let bus = EventBus::new();
    let mut rx = collector(&bus, "q");

    for i in 0..20 {
        bus.publish("q", json!(i));
    }

    for i in 0..20 {
        let msg = timeout(Duration::from_secs(1), rx.recv()).await.unwrap().unwrap();
        assert_eq!(msg.body, json!(i));
    }
}

#[tokio::test]
async fn test_round_robin_send() {
    let bus = EventBus::new();

    let (tx_a, mut rx_a) = mpsc::unbounded_channel();
    bus.consumer("q", move |msg| {
        let _ = tx_a.send(("a", msg.body));
    });
    let (tx_b, mut rx_b) = mpsc::unbounded_channel();
    bus.consumer("q", move |msg| {
        let _ = tx_b.send(("b", msg.body));
    });

    bus.send("q", json!(1)).await;
    bus.send("q", json!(2)).await;
    bus.send("q", json!(3)).await;
    sleep(Duration::from_millis(100)).await;

    // Three sends alternate A, B, A.
    let a: Vec<_> = std::iter::from_fn(|| rx_a.try_recv().ok()).collect();
    let b: Vec<_> = std::iter::from_fn(|| rx_b.try_recv().ok()).collect();
    assert_eq!(a.len(), 2);
    assert_eq!(b.len(), 1);
    assert_eq!(a[0].1, json!(1));
    assert_eq!(b[0].1, json!(2));
    assert_eq!(a[1].1, json!(3));
}

#[tokio::test]
async fn test_send_sync_timeout() {
    let bus = Arc::new(EventBus::new());

    let started = Instant::now();
    let result = bus
        .send_sync("nobody.home", json!({}), Duration::from_millis(100))
        .await;

    assert!(matches!(result, Err(BusError::Timeout)));
    assert!(started.elapsed() < Duration::from_millis(200));
}

#[tokio::test]
async fn test_send_sync_reply() {
    let bus = Arc::new(EventBus::new());

    let bus_for_handler = bus.clone();
    bus.consumer("math.double", move |msg| {
        let bus = bus_for_handler.clone();
        let n = msg.body.as_i64().unwrap();
        tokio::spawn(async move {
            bus.reply(&msg, json!(n * 2)).await;
        });
    });

    let reply = bus
        .send_sync("math.double", json!(21), Duration::from_secs(1))
        .await
        .unwrap();
    assert_eq!(reply.body, json!(42));
}

#[tokio::test]
async fn test_send_async_resolves() {
    let bus = Arc::new(EventBus::new());

    let bus_for_handler = bus.clone();
    bus.consumer("echo", move |msg| {
        let bus = bus_for_handler.clone();
        tokio::spawn(async move {
            let body = msg.body.clone();
            bus.reply(&msg, body).await;
        });
    });

    let reply = bus.send_async("echo", json!("hi")).await.unwrap();
    assert_eq!(reply.body, json!("hi"));
}

#[tokio::test]
async fn test_unregister_stops_delivery() {
    let bus = EventBus::new();

    let (tx, mut rx) = mpsc::unbounded_channel();
    let id = bus.consumer("x", move |msg| {
        let _ = tx.send(msg);
    });

    bus.publish("x", json!(1));
    timeout(Duration::from_secs(1), rx.recv()).await.unwrap().unwrap();

    assert!(bus.unregister(id));
    assert!(!bus.unregister(id));
    bus.publish("x", json!(2));
    sleep(Duration::from_millis(50)).await;
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn test_replay_since() {
    let bus = EventBus::with_buffer(BufferConfig::default());

    bus.publish("events", json!("first"));
    sleep(Duration::from_millis(10)).await;
    let cut = Instant::now();
    bus.publish("events", json!("second"));

    let all = bus.replay("events", None);
    assert_eq!(all.len(), 2);

    let recent = bus.replay("events", Some(cut));
    assert_eq!(recent.len(), 1);
    assert_eq!(recent[0].body, json!("second"));
}

#[tokio::test]
async fn test_global_scope_updates_latest() {
    let bus = EventBus::new();

    bus.publish_scoped("sensors.temp", json!(19.0), Scope::Global);
    assert_eq!(bus.latest("sensors.temp"), Some(json!(19.0)));

    // LOCAL publishes do not touch the cache.
    bus.publish("sensors.temp", json!(99.0));
    assert_eq!(bus.latest("sensors.temp"), Some(json!(19.0)));
}

#[tokio::test]
async fn test_handler_error_does_not_reach_publisher() {
    let bus = EventBus::new();
    bus.consumer("fragile", |_| panic!("handler bug"));

    // Publishing must not panic or error.
    bus.publish("fragile", json!(1));
    sleep(Duration::from_millis(50)).await;

    // The handler task survives its panic for subsequent messages.
    bus.publish("fragile", json!(2));
    sleep(Duration::from_millis(50)).await;
}
