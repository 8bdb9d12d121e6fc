//! MQTT transport seam
//!
//! The bridge only needs three things from a broker connection: retained
//! publishes, a subscription, and a clean disconnect. [`MqttLink`] is that
//! surface; [`MqttConnector`] establishes it and hands back the stream of
//! inbound [`MqttEvent`]s.

pub mod session;

use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use tokio::sync::mpsc;

pub use session::{reconnect_delay, RumqttConnector, SessionSettings};

/// Inbound traffic and session lifecycle from the broker connection
#[derive(Debug, Clone, PartialEq)]
pub enum MqttEvent {
    /// Application message received on a subscribed topic
    Message { topic: String, payload: Bytes },
    /// The session dropped; reconnection attempt number `attempt` is pending
    SessionLost { attempt: usize },
    /// The session came back after a loss (subscriptions must be renewed)
    SessionRestored,
}

/// Established broker session
#[async_trait]
pub trait MqttLink: Send + Sync {
    /// Publish with the retain flag set
    async fn publish_retained(&self, topic: &str, payload: Vec<u8>) -> Result<()>;

    async fn subscribe(&self, topic: &str) -> Result<()>;

    /// Request a clean disconnect, letting queued publishes flush first
    async fn disconnect(&self) -> Result<()>;
}

/// Connected session plus its inbound event stream
pub struct Connection {
    pub link: Arc<dyn MqttLink>,
    pub events: mpsc::UnboundedReceiver<MqttEvent>,
}

/// Establishes the broker session
///
/// An error means the broker could not be reached at all; the bridge treats
/// it as fatal to startup.
#[async_trait]
pub trait MqttConnector: Send {
    async fn connect(&mut self) -> Result<Connection>;
}
