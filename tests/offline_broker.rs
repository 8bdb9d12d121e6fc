//! The bridge stays responsive while the broker is gone.

use pc_volume_mqtt::audio::SimulatedBackend;
use pc_volume_mqtt::bridge::{BridgeState, StateBridge, TopicBinding};
use pc_volume_mqtt::mqtt::{RumqttConnector, SessionSettings};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::time::timeout;

/// Accepts one client, acknowledges it, then shuts down for good
async fn vanishing_broker() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        let (mut client, _) = listener.accept().await.unwrap();
        let mut buf = [0u8; 256];
        let _ = client.read(&mut buf).await;
        client.write_all(&[0x20, 0x02, 0x00, 0x00]).await.unwrap();
        client.flush().await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        drop(client);
        drop(listener);
    });

    port
}

#[tokio::test]
async fn volume_changes_while_offline_do_not_stall_the_bridge() {
    let port = vanishing_broker().await;
    let backend = SimulatedBackend::with_device("a", "Speakers", 35.0);
    let connector = RumqttConnector::new(SessionSettings {
        host: "127.0.0.1".to_string(),
        port,
        username: None,
        password: None,
        client_id: "pc-volume-mqtt-offline".to_string(),
        keep_alive: Duration::from_secs(30),
    });

    let (handle, task) = StateBridge::spawn(
        TopicBinding::new("My-PC", None),
        Arc::new(backend.clone()),
        connector,
    );

    // Initial state was published, then the session dropped
    let mut status = handle.subscribe_status();
    timeout(
        Duration::from_secs(10),
        status.wait_for(|s| s.state == BridgeState::Disconnected && s.volume.is_some()),
    )
    .await
    .expect("session loss was never reported")
    .unwrap();

    for i in 0..200 {
        backend.change_volume_externally("a", (i % 100) as f32);
    }

    timeout(Duration::from_secs(3), handle.sync())
        .await
        .expect("bridge stalled while offline")
        .unwrap();

    assert_eq!(handle.status().state, BridgeState::Disconnected);
    assert_eq!(handle.status().volume, Some(35));

    handle.shutdown();
    let result = timeout(Duration::from_secs(10), task)
        .await
        .expect("bridge did not stop while offline")
        .unwrap();

    assert!(result.is_ok());
    assert_eq!(backend.watcher_count(), 0);
    assert_eq!(backend.listener_count("a"), 0);
}
