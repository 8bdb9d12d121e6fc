//! Shared harness: a recording broker link and a scripted connector.

#![allow(dead_code)]

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use pc_volume_mqtt::audio::SimulatedBackend;
use pc_volume_mqtt::bridge::{BridgeHandle, BridgeState, StateBridge, TopicBinding};
use pc_volume_mqtt::mqtt::{Connection, MqttConnector, MqttEvent, MqttLink};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Records every retained publish and subscription
#[derive(Default)]
pub struct RecordingLink {
    published: Mutex<Vec<(String, String)>>,
    subscriptions: Mutex<Vec<String>>,
    disconnected: AtomicBool,
}

impl RecordingLink {
    pub fn published(&self) -> Vec<(String, String)> {
        self.published.lock().clone()
    }

    /// Payloads published on `topic`, oldest first
    pub fn payloads_on(&self, topic: &str) -> Vec<String> {
        self.published
            .lock()
            .iter()
            .filter(|(t, _)| t == topic)
            .map(|(_, p)| p.clone())
            .collect()
    }

    pub fn subscriptions(&self) -> Vec<String> {
        self.subscriptions.lock().clone()
    }

    pub fn is_disconnected(&self) -> bool {
        self.disconnected.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MqttLink for RecordingLink {
    async fn publish_retained(&self, topic: &str, payload: Vec<u8>) -> Result<()> {
        if self.is_disconnected() {
            return Err(anyhow!("publish after disconnect"));
        }
        let payload = String::from_utf8(payload)?;
        self.published.lock().push((topic.to_string(), payload));
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<()> {
        self.subscriptions.lock().push(topic.to_string());
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.disconnected.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Hands out a prepared connection once
pub struct ScriptedConnector {
    connection: Option<Connection>,
}

impl ScriptedConnector {
    pub fn new(link: Arc<RecordingLink>) -> (Self, mpsc::UnboundedSender<MqttEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let connector = Self {
            connection: Some(Connection {
                link,
                events: rx,
            }),
        };
        (connector, tx)
    }

    /// A connector whose broker is unreachable
    pub fn unreachable() -> Self {
        Self { connection: None }
    }
}

#[async_trait]
impl MqttConnector for ScriptedConnector {
    async fn connect(&mut self) -> Result<Connection> {
        self.connection
            .take()
            .ok_or_else(|| anyhow!("connection refused"))
    }
}

/// A running bridge wired to the simulated mixer and a recording link
pub struct Harness {
    pub backend: SimulatedBackend,
    pub link: Arc<RecordingLink>,
    pub mqtt: mpsc::UnboundedSender<MqttEvent>,
    pub handle: BridgeHandle,
    pub task: JoinHandle<Result<()>>,
    pub topics: TopicBinding,
}

impl Harness {
    /// Start a bridge for machine "My-PC" and wait until it is listening
    pub async fn start(backend: SimulatedBackend) -> Self {
        let topics = TopicBinding::new("My-PC", None);
        let link = Arc::new(RecordingLink::default());
        let (connector, mqtt) = ScriptedConnector::new(Arc::clone(&link));

        let (handle, task) =
            StateBridge::spawn(topics.clone(), Arc::new(backend.clone()), connector);

        let mut status = handle.subscribe_status();
        tokio::time::timeout(
            Duration::from_secs(5),
            status.wait_for(|s| s.state == BridgeState::BoundListening),
        )
        .await
        .expect("bridge did not start in time")
        .expect("bridge stopped during startup");

        Self {
            backend,
            link,
            mqtt,
            handle,
            task,
            topics,
        }
    }

    /// Deliver a command payload on the command topic
    pub fn command(&self, payload: &str) {
        self.mqtt
            .send(MqttEvent::Message {
                topic: self.topics.command_topic.clone(),
                payload: payload.as_bytes().to_vec().into(),
            })
            .expect("bridge dropped its MQTT receiver");
    }

    /// Wait until the bridge has handled everything queued so far
    pub async fn settle(&self) {
        tokio::time::timeout(Duration::from_secs(5), self.handle.sync())
            .await
            .expect("bridge did not settle in time")
            .expect("bridge is not running");
    }

    pub fn states(&self) -> Vec<String> {
        self.link.payloads_on(&self.topics.state_topic)
    }

    pub fn last_state(&self) -> Option<String> {
        self.states().pop()
    }

    pub async fn stop(self) -> Result<()> {
        self.handle.shutdown();
        tokio::time::timeout(Duration::from_secs(5), self.task)
            .await
            .expect("bridge did not stop in time")
            .expect("bridge task panicked")
    }
}
