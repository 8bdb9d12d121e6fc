//! rumqttc-backed broker session
//!
//! The event loop is polled inline until the first ConnAck so that an
//! unreachable broker surfaces as a startup error. After that it is driven
//! by a background task which forwards publishes and reconnects with a
//! linear backoff capped at 30 s.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use rumqttc::{AsyncClient, ConnectionError, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, trace, warn};

use super::{Connection, MqttConnector, MqttEvent, MqttLink};

/// Request queue depth between the client handle and the event loop
const REQUEST_CAPACITY: usize = 64;

/// Upper bound on the reconnect backoff
const MAX_RECONNECT_DELAY_MS: u64 = 30_000;

/// How long the initial connection may take before startup fails
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// How long the event loop may keep flushing after a disconnect request
const FLUSH_GRACE: Duration = Duration::from_secs(2);

/// Delay before reconnection attempt `attempt` (1-based)
pub fn reconnect_delay(attempt: usize) -> Duration {
    let ms = (attempt.max(1) as u64).saturating_mul(1000);
    Duration::from_millis(ms.min(MAX_RECONNECT_DELAY_MS))
}

/// Broker connection parameters
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSettings {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub client_id: String,
    pub keep_alive: Duration,
}

impl SessionSettings {
    fn to_options(&self) -> MqttOptions {
        let mut options = MqttOptions::new(&self.client_id, &self.host, self.port);
        // rumqttc rejects keep-alive intervals below 5 s
        options.set_keep_alive(self.keep_alive.max(Duration::from_secs(5)));
        options.set_clean_session(true);

        if let Some(username) = self.username.as_deref().filter(|u| !u.is_empty()) {
            options.set_credentials(username, self.password.clone().unwrap_or_default());
        }
        options
    }
}

/// Live session handle
pub struct MqttSession {
    client: AsyncClient,
    driver: Mutex<Option<JoinHandle<()>>>,
}

#[async_trait]
impl MqttLink for MqttSession {
    // The request queue is only drained while the broker is reachable, so
    // requests never wait for room in it.
    async fn publish_retained(&self, topic: &str, payload: Vec<u8>) -> Result<()> {
        self.client
            .try_publish(topic, QoS::AtLeastOnce, true, payload)
            .with_context(|| format!("Failed to publish to {}", topic))
    }

    async fn subscribe(&self, topic: &str) -> Result<()> {
        self.client
            .try_subscribe(topic, QoS::AtLeastOnce)
            .with_context(|| format!("Failed to subscribe to {}", topic))
    }

    async fn disconnect(&self) -> Result<()> {
        let requested = self
            .client
            .try_disconnect()
            .context("Failed to request MQTT disconnect");

        let driver = self.driver.lock().take();
        if let Some(mut driver) = driver {
            if timeout(FLUSH_GRACE, &mut driver).await.is_err() {
                warn!("MQTT event loop still busy after {:?}, stopping it", FLUSH_GRACE);
                driver.abort();
            }
        }
        requested
    }
}

/// Connects to a real broker
pub struct RumqttConnector {
    settings: SessionSettings,
}

impl RumqttConnector {
    pub fn new(settings: SessionSettings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl MqttConnector for RumqttConnector {
    async fn connect(&mut self) -> Result<Connection> {
        let (client, mut eventloop) = AsyncClient::new(self.settings.to_options(), REQUEST_CAPACITY);
        let endpoint = format!("{}:{}", self.settings.host, self.settings.port);

        debug!("Connecting to MQTT broker at {}", endpoint);
        match timeout(CONNECT_TIMEOUT, wait_for_connack(&mut eventloop)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                return Err(e).with_context(|| format!("MQTT connection to {} failed", endpoint));
            }
            Err(_) => return Err(anyhow!("MQTT connection to {} timed out", endpoint)),
        }
        info!("✅ Connected to MQTT broker at {}", endpoint);

        let (tx, rx) = mpsc::unbounded_channel();
        let driver = tokio::spawn(drive_event_loop(eventloop, tx));

        Ok(Connection {
            link: Arc::new(MqttSession {
                client,
                driver: Mutex::new(Some(driver)),
            }),
            events: rx,
        })
    }
}

async fn wait_for_connack(eventloop: &mut EventLoop) -> Result<(), ConnectionError> {
    loop {
        if let Event::Incoming(Packet::ConnAck(_)) = eventloop.poll().await? {
            return Ok(());
        }
    }
}

/// Poll the event loop until disconnect, reconnecting after failures
async fn drive_event_loop(mut eventloop: EventLoop, tx: mpsc::UnboundedSender<MqttEvent>) {
    let mut attempt = 0usize;

    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                if attempt > 0 {
                    info!("✅ MQTT session restored after {} attempt(s)", attempt);
                    attempt = 0;
                    if tx.send(MqttEvent::SessionRestored).is_err() {
                        break;
                    }
                }
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                trace!("MQTT <- {} ({} bytes)", publish.topic, publish.payload.len());
                let event = MqttEvent::Message {
                    topic: publish.topic,
                    payload: publish.payload,
                };
                if tx.send(event).is_err() {
                    break;
                }
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                debug!("MQTT disconnect sent, stopping event loop");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                attempt += 1;
                let delay = reconnect_delay(attempt);
                warn!(
                    "⚠️ MQTT connection lost ({}), reconnect #{} in {}ms",
                    e,
                    attempt,
                    delay.as_millis()
                );
                if tx.send(MqttEvent::SessionLost { attempt }).is_err() {
                    break;
                }
                sleep(delay).await;
                if tx.is_closed() {
                    break;
                }
            }
        }
    }

    debug!("MQTT event loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    #[test]
    fn test_reconnect_delay_is_linear_then_capped() {
        assert_eq!(reconnect_delay(1), Duration::from_secs(1));
        assert_eq!(reconnect_delay(2), Duration::from_secs(2));
        assert_eq!(reconnect_delay(29), Duration::from_secs(29));
        assert_eq!(reconnect_delay(30), Duration::from_secs(30));
        assert_eq!(reconnect_delay(500), Duration::from_secs(30));
    }

    #[test]
    fn test_reconnect_delay_zero_attempt_waits_one_second() {
        assert_eq!(reconnect_delay(0), Duration::from_secs(1));
    }

    #[test]
    fn test_options_apply_credentials_and_keep_alive() {
        let settings = SessionSettings {
            host: "broker.local".to_string(),
            port: 1883,
            username: Some("ha".to_string()),
            password: Some("secret".to_string()),
            client_id: "pc-volume-mqtt-desk".to_string(),
            keep_alive: Duration::from_secs(1),
        };

        let options = settings.to_options();

        assert_eq!(options.client_id(), "pc-volume-mqtt-desk");
        assert_eq!(
            options.broker_address(),
            ("broker.local".to_string(), 1883)
        );
        assert_eq!(options.keep_alive(), Duration::from_secs(5));
        assert_eq!(
            options.credentials(),
            Some(("ha".to_string(), "secret".to_string()))
        );
    }

    #[test]
    fn test_blank_username_means_anonymous() {
        let settings = SessionSettings {
            host: "localhost".to_string(),
            port: 1883,
            username: Some(String::new()),
            password: None,
            client_id: "c".to_string(),
            keep_alive: Duration::from_secs(30),
        };

        assert_eq!(settings.to_options().credentials(), None);
    }

    const CONNACK: [u8; 4] = [0x20, 0x02, 0x00, 0x00];

    fn local_settings(port: u16) -> SessionSettings {
        SessionSettings {
            host: "127.0.0.1".to_string(),
            port,
            username: None,
            password: None,
            client_id: "pc-volume-mqtt-test".to_string(),
            keep_alive: Duration::from_secs(30),
        }
    }

    /// QoS 0 PUBLISH packet
    fn publish_packet(topic: &str, payload: &[u8]) -> Vec<u8> {
        let mut packet = vec![0x30, (2 + topic.len() + payload.len()) as u8];
        packet.extend_from_slice(&(topic.len() as u16).to_be_bytes());
        packet.extend_from_slice(topic.as_bytes());
        packet.extend_from_slice(payload);
        packet
    }

    async fn next_event(events: &mut mpsc::UnboundedReceiver<MqttEvent>) -> Option<MqttEvent> {
        timeout(Duration::from_secs(10), events.recv())
            .await
            .expect("no session event in time")
    }

    #[tokio::test]
    async fn test_session_forwards_publishes_and_recovers() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};
        use tokio::net::TcpListener;

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let broker = tokio::spawn(async move {
            let mut buf = [0u8; 256];

            // First session: accept, deliver one message, then drop the link
            let (mut first, _) = listener.accept().await.unwrap();
            let _ = first.read(&mut buf).await.unwrap();
            first.write_all(&CONNACK).await.unwrap();
            first
                .write_all(&publish_packet("pc/desk/volume/set", b"42"))
                .await
                .unwrap();
            first.flush().await.unwrap();
            tokio::time::sleep(Duration::from_millis(200)).await;
            drop(first);

            // Second session stays up until the client disconnects
            let (mut second, _) = listener.accept().await.unwrap();
            let _ = second.read(&mut buf).await.unwrap();
            second.write_all(&CONNACK).await.unwrap();
            while matches!(second.read(&mut buf).await, Ok(n) if n > 0) {}
        });

        let mut connector = RumqttConnector::new(local_settings(port));
        let Connection { link, mut events } = connector.connect().await.unwrap();

        assert_eq!(
            next_event(&mut events).await,
            Some(MqttEvent::Message {
                topic: "pc/desk/volume/set".to_string(),
                payload: Bytes::from_static(b"42"),
            })
        );
        assert_eq!(
            next_event(&mut events).await,
            Some(MqttEvent::SessionLost { attempt: 1 })
        );
        assert_eq!(next_event(&mut events).await, Some(MqttEvent::SessionRestored));

        link.disconnect().await.unwrap();
        assert_eq!(next_event(&mut events).await, None);
        timeout(Duration::from_secs(5), broker).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_connect_fails_when_broker_is_absent() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let mut connector = RumqttConnector::new(local_settings(port));
        assert!(connector.connect().await.is_err());
    }
}
