//! Event bus unit tests

use std::time::Duration;

use ployer::bus::EventBus;
use ployer::models::Event;

fn log_event(deployment_id: &str, line: &str) -> Event {
    Event::DeploymentLog {
        deployment_id: deployment_id.to_string(),
        line: line.to_string(),
    }
}

fn line_of(event: &Event) -> String {
    match event {
        Event::DeploymentLog { line, .. } => line.clone(),
        other => panic!("unexpected event: {:?}", other),
    }
}

#[tokio::test]
async fn test_delivery_preserves_emission_order() {
    let bus = EventBus::new();
    let sub = bus.subscribe("deployment:d1");

    for i in 0..32 {
        bus.publish(log_event("d1", &format!("line-{:02}", i)));
    }

    for i in 0..32 {
        let event = sub.recv().await;
        assert_eq!(line_of(&event), format!("line-{:02}", i));
    }
}

#[tokio::test]
async fn test_topic_isolation() {
    let bus = EventBus::new();
    let sub = bus.subscribe("deployment:d1");

    bus.publish(log_event("other", "not for us"));
    bus.publish(log_event("d1", "ours"));

    assert_eq!(line_of(&sub.recv().await), "ours");
    assert!(sub.try_recv().is_none());
}

#[tokio::test]
async fn test_overflow_drops_oldest_and_flags_lagging() {
    let bus = EventBus::with_capacity(4);
    let sub = bus.subscribe("deployment:d1");

    for i in 0..6 {
        bus.publish(log_event("d1", &format!("line-{}", i)));
    }

    // Two oldest were dropped
    assert_eq!(line_of(&sub.recv().await), "line-2");
    assert!(sub.take_lagging());
    // Reading clears the flag
    assert!(!sub.take_lagging());
}

#[tokio::test]
async fn test_slow_subscriber_does_not_block_others() {
    let bus = EventBus::with_capacity(2);
    let slow = bus.subscribe("deployment:d1");
    let fast = bus.subscribe("deployment:d1");

    // Way past the slow subscriber's capacity; publish never blocks
    for i in 0..64 {
        bus.publish(log_event("d1", &format!("line-{}", i)));
        let event = fast.recv().await;
        assert_eq!(line_of(&event), format!("line-{}", i));
    }

    assert!(slow.take_lagging());
}

#[tokio::test]
async fn test_drop_unsubscribes() {
    let bus = EventBus::new();
    let sub = bus.subscribe("deployment:d1");
    assert_eq!(bus.subscriber_count("deployment:d1"), 1);

    drop(sub);
    assert_eq!(bus.subscriber_count("deployment:d1"), 0);

    // Publishing to a topic with only dead subscribers sweeps them silently
    bus.publish(log_event("d1", "into the void"));
}

#[tokio::test]
async fn test_recv_waits_for_publication() {
    let bus = std::sync::Arc::new(EventBus::new());
    let sub = bus.subscribe("deployment:d1");

    let publisher = {
        let bus = bus.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            bus.publish(log_event("d1", "late"));
        })
    };

    let event = tokio::time::timeout(Duration::from_secs(1), sub.recv())
        .await
        .expect("recv timed out");
    assert_eq!(line_of(&event), "late");

    publisher.await.unwrap();
}
