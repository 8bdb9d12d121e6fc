//! End-to-end: simulated mixer ↔ StateBridge ↔ recording MQTT link.

mod common;

use common::{Harness, RecordingLink, ScriptedConnector};
use pc_volume_mqtt::audio::SimulatedBackend;
use pc_volume_mqtt::bridge::{BridgeState, StateBridge, TopicBinding};
use pc_volume_mqtt::mqtt::MqttEvent;
use serde_json::Value;
use std::sync::Arc;

fn speakers() -> SimulatedBackend {
    SimulatedBackend::with_device("a", "Speakers", 35.0)
}

#[tokio::test]
async fn publishes_discovery_once_before_first_state() {
    let h = Harness::start(speakers()).await;

    let published = h.link.published();
    assert_eq!(published.len(), 2);
    assert_eq!(published[0].0, "homeassistant/number/my_pc_volume/config");
    assert_eq!(published[1], ("pc/my_pc/volume/state".to_string(), "35".to_string()));

    let doc: Value = serde_json::from_str(&published[0].1).unwrap();
    assert_eq!(doc["state_topic"], "pc/my_pc/volume/state");
    assert_eq!(doc["command_topic"], "pc/my_pc/volume/set");
    assert_eq!(doc["min"], 0);
    assert_eq!(doc["max"], 100);

    assert_eq!(h.link.subscriptions(), vec!["pc/my_pc/volume/set".to_string()]);
    h.stop().await.unwrap();
}

#[tokio::test]
async fn command_sets_volume_and_echo_is_published() {
    let h = Harness::start(speakers()).await;

    h.command("42.7");
    h.settle().await;

    let scalar = h.backend.scalar("a").unwrap();
    assert!((scalar - 0.427).abs() < 1e-4, "scalar was {}", scalar);
    assert_eq!(h.backend.set_volume_calls("a"), 1);
    // Our own set comes back through the OS notification and is published
    assert_eq!(h.states(), vec!["35".to_string(), "42".to_string()]);
    h.stop().await.unwrap();
}

#[tokio::test]
async fn unparseable_command_is_dropped() {
    let h = Harness::start(speakers()).await;
    let before = h.link.published().len();

    h.command("abc");
    h.command("");
    h.settle().await;

    assert_eq!(h.backend.set_volume_calls("a"), 0);
    assert_eq!(h.link.published().len(), before);
    h.stop().await.unwrap();
}

#[tokio::test]
async fn out_of_range_commands_are_clamped() {
    let h = Harness::start(speakers()).await;

    h.command("150");
    h.settle().await;
    assert_eq!(h.backend.scalar("a"), Some(1.0));
    assert_eq!(h.last_state().as_deref(), Some("100"));

    h.command("-20");
    h.settle().await;
    assert_eq!(h.backend.scalar("a"), Some(0.0));
    assert_eq!(h.last_state().as_deref(), Some("0"));
    h.stop().await.unwrap();
}

#[tokio::test]
async fn external_changes_publish_truncated_in_order() {
    let h = Harness::start(speakers()).await;

    h.backend.change_volume_externally("a", 50.9);
    h.backend.change_volume_externally("a", 30.0);
    h.backend.change_volume_externally("a", 60.0);
    h.settle().await;

    assert_eq!(
        h.states(),
        vec!["35".to_string(), "50".to_string(), "30".to_string(), "60".to_string()]
    );
    h.stop().await.unwrap();
}

#[tokio::test]
async fn rebind_publishes_new_device_volume_without_user_change() {
    let backend = speakers();
    backend.add_device("b", "Headset", 70.0);
    let h = Harness::start(backend).await;

    h.backend.set_default("b");
    h.settle().await;

    assert_eq!(h.last_state().as_deref(), Some("70"));
    assert_eq!(h.backend.listener_count("a"), 0);
    assert_eq!(h.backend.listener_count("b"), 1);
    assert_eq!(h.handle.status().device.as_deref(), Some("Headset"));
    assert_eq!(h.handle.status().volume, Some(70));

    // Commands now reach the new device
    h.command("12");
    h.settle().await;
    assert_eq!(h.backend.set_volume_calls("a"), 0);
    assert_eq!(h.backend.set_volume_calls("b"), 1);
    assert_eq!(h.last_state().as_deref(), Some("12"));
    h.stop().await.unwrap();
}

#[tokio::test]
async fn stale_reading_from_previous_device_is_not_published() {
    let backend = speakers();
    backend.add_device("b", "Headset", 70.0);
    let h = Harness::start(backend).await;

    // Device change is queued first, then a late reading from the old device
    h.backend.set_default("b");
    h.backend.change_volume_externally("a", 30.0);
    h.settle().await;

    let states = h.states();
    assert!(!states.contains(&"30".to_string()), "stale publish in {:?}", states);
    assert_eq!(h.last_state().as_deref(), Some("70"));
    h.stop().await.unwrap();
}

#[tokio::test]
async fn losing_every_device_is_recoverable() {
    let h = Harness::start(speakers()).await;
    let before = h.states().len();

    h.backend.remove_device("a");
    h.settle().await;

    assert_eq!(h.handle.status().state, BridgeState::BoundListening);
    assert_eq!(h.handle.status().device, None);
    assert_eq!(h.states().len(), before);

    // Commands while unbound are dropped without touching anything
    h.command("80");
    h.settle().await;
    assert_eq!(h.states().len(), before);

    h.backend.add_device("c", "USB DAC", 12.0);
    h.backend.set_default("c");
    h.settle().await;

    assert_eq!(h.last_state().as_deref(), Some("12"));
    assert_eq!(h.handle.status().device.as_deref(), Some("USB DAC"));
    h.stop().await.unwrap();
}

#[tokio::test]
async fn restored_session_resubscribes_and_republishes_state() {
    let h = Harness::start(speakers()).await;

    h.mqtt.send(MqttEvent::SessionLost { attempt: 1 }).unwrap();
    h.settle().await;
    assert_eq!(h.handle.status().state, BridgeState::Disconnected);

    // Held back while offline
    h.backend.change_volume_externally("a", 44.0);
    h.settle().await;
    assert_eq!(h.states(), vec!["35".to_string()]);

    h.mqtt.send(MqttEvent::SessionRestored).unwrap();
    h.settle().await;

    assert_eq!(h.handle.status().state, BridgeState::BoundListening);
    assert_eq!(h.link.subscriptions().len(), 2);
    assert_eq!(h.states(), vec!["35".to_string(), "44".to_string()]);
    assert_eq!(
        h.link
            .payloads_on("homeassistant/number/my_pc_volume/config")
            .len(),
        1
    );
    h.stop().await.unwrap();
}

#[tokio::test]
async fn messages_on_other_topics_are_ignored() {
    let h = Harness::start(speakers()).await;

    h.mqtt
        .send(MqttEvent::Message {
            topic: "pc/other_pc/volume/set".to_string(),
            payload: "10".into(),
        })
        .unwrap();
    h.settle().await;

    assert_eq!(h.backend.set_volume_calls("a"), 0);
    h.stop().await.unwrap();
}

#[tokio::test]
async fn shutdown_stops_events_before_disconnecting() {
    let h = Harness::start(speakers()).await;
    let backend = h.backend.clone();
    let link = Arc::clone(&h.link);
    let status = h.handle.subscribe_status();
    let before = link.published().len();

    h.stop().await.unwrap();

    assert!(link.is_disconnected());
    assert_eq!(backend.watcher_count(), 0);
    assert_eq!(backend.listener_count("a"), 0);
    assert_eq!(status.borrow().state, BridgeState::Disconnected);

    backend.change_volume_externally("a", 90.0);
    assert_eq!(link.published().len(), before);
}

#[tokio::test]
async fn unreachable_broker_fails_startup_without_publishing() {
    let backend = speakers();
    let (handle, task) = StateBridge::spawn(
        TopicBinding::new("My-PC", None),
        Arc::new(backend.clone()),
        ScriptedConnector::unreachable(),
    );

    let result = task.await.unwrap();

    assert!(result.is_err());
    assert_eq!(handle.status().state, BridgeState::Disconnected);
    assert_eq!(backend.watcher_count(), 0);
}

#[tokio::test]
async fn device_variant_uses_device_topics() {
    let link = Arc::new(RecordingLink::default());
    let (connector, _mqtt) = ScriptedConnector::new(Arc::clone(&link));
    let topics = TopicBinding::new("My-PC", Some("Headset"));
    let backend = speakers();
    let (handle, task) = StateBridge::spawn(topics, Arc::new(backend.clone()), connector);

    let mut status = handle.subscribe_status();
    status
        .wait_for(|s| s.state == BridgeState::BoundListening)
        .await
        .unwrap();

    assert_eq!(
        link.payloads_on("pc/my_pc/headset/volume/state"),
        vec!["35".to_string()]
    );
    assert_eq!(
        link.subscriptions(),
        vec!["pc/my_pc/headset/volume/set".to_string()]
    );

    // The device segment only names the topics; the default device is followed
    backend.add_device("b", "Speakers 2", 60.0);
    backend.set_default("b");
    handle.sync().await.unwrap();
    assert_eq!(
        link.payloads_on("pc/my_pc/headset/volume/state"),
        vec!["35".to_string(), "60".to_string()]
    );

    handle.shutdown();
    task.await.unwrap().unwrap();
}
