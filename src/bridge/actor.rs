//! The bridge task

use anyhow::{anyhow, Context, Result};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use super::{BridgeCommand, BridgeHandle, BridgeState, BridgeStatus, DiscoveryDocument, TopicBinding};
use crate::audio::{truncate_percent, AudioBackend, AudioEvent, DeviceRebindManager, VolumeChangeEvent};
use crate::mqtt::{Connection, MqttConnector, MqttEvent, MqttLink};

/// Parse a command payload as a volume percentage
///
/// Surrounding whitespace is ignored. NaN is rejected; anything else that
/// parses as a float is accepted and clamped later by the endpoint.
pub fn parse_command(payload: &[u8]) -> Option<f32> {
    let text = std::str::from_utf8(payload).ok()?;
    text.trim().parse::<f32>().ok().filter(|v| !v.is_nan())
}

/// Single consumer for audio, MQTT and control events
pub struct StateBridge {
    topics: TopicBinding,
    devices: DeviceRebindManager,
    audio_rx: mpsc::UnboundedReceiver<AudioEvent>,
    commands: mpsc::UnboundedReceiver<BridgeCommand>,
    status: watch::Sender<BridgeStatus>,
    discovery_published: bool,
}

impl StateBridge {
    pub fn new(
        topics: TopicBinding,
        backend: Arc<dyn AudioBackend>,
    ) -> (Self, BridgeHandle) {
        let (audio_tx, audio_rx) = mpsc::unbounded_channel();
        let (command_tx, commands) = mpsc::unbounded_channel();
        let (status, status_rx) = watch::channel(BridgeStatus::default());

        let bridge = Self {
            topics,
            devices: DeviceRebindManager::new(backend, audio_tx),
            audio_rx,
            commands,
            status,
            discovery_published: false,
        };
        (bridge, BridgeHandle::new(command_tx, status_rx))
    }

    /// Create the bridge and run it on the current tokio runtime
    pub fn spawn<C>(
        topics: TopicBinding,
        backend: Arc<dyn AudioBackend>,
        connector: C,
    ) -> (BridgeHandle, JoinHandle<Result<()>>)
    where
        C: MqttConnector + 'static,
    {
        let (bridge, handle) = Self::new(topics, backend);
        let task = tokio::spawn(bridge.run(connector));
        (handle, task)
    }

    /// Connect, bind, publish, then process events until shutdown
    ///
    /// Returns an error when the broker cannot be reached at startup or the
    /// session task dies; both leave the bridge `Disconnected`.
    pub async fn run<C: MqttConnector>(mut self, mut connector: C) -> Result<()> {
        self.set_state(BridgeState::Connecting);

        let connected = tokio::select! {
            result = connector.connect() => Some(result),
            _ = wait_for_shutdown(&mut self.commands) => None,
        };
        let Connection { link, mut events } = match connected {
            Some(Ok(connection)) => connection,
            Some(Err(e)) => {
                self.set_state(BridgeState::Disconnected);
                return Err(e.context("Bridge could not reach the MQTT broker"));
            }
            None => {
                info!("Shutdown requested while connecting");
                self.set_state(BridgeState::Disconnected);
                return Ok(());
            }
        };

        let result = match self.start_session(link.as_ref()).await {
            Ok(()) => self.event_loop(link.as_ref(), &mut events).await,
            Err(e) => Err(e),
        };

        // Stop producing before tearing the session down
        self.devices.shutdown();
        if let Err(e) = link.disconnect().await {
            warn!("MQTT disconnect failed: {:#}", e);
        }
        self.set_state(BridgeState::Disconnected);
        info!("Bridge stopped");
        result
    }

    /// Discovery, bind, subscribe, initial state; in that order
    async fn start_session(&mut self, link: &dyn MqttLink) -> Result<()> {
        self.publish_discovery(link).await?;

        match self.devices.start() {
            Ok(device) => self.status.send_modify(|s| s.device = Some(device.name)),
            Err(e) => warn!("⚠️ Starting without a bound render endpoint: {}", e),
        }

        link.subscribe(&self.topics.command_topic)
            .await
            .with_context(|| format!("Failed to subscribe to {}", self.topics.command_topic))?;
        debug!(topic = %self.topics.command_topic, "Subscribed to command topic");

        self.publish_current_state(link).await;
        self.set_state(BridgeState::BoundListening);
        info!(
            state = %self.topics.state_topic,
            command = %self.topics.command_topic,
            "🎧 Bridge listening"
        );
        Ok(())
    }

    async fn event_loop(
        &mut self,
        link: &dyn MqttLink,
        events: &mut mpsc::UnboundedReceiver<MqttEvent>,
    ) -> Result<()> {
        loop {
            // Commands come last so Sync observes everything queued before it
            tokio::select! {
                biased;

                Some(event) = self.audio_rx.recv() => self.handle_audio(link, event).await,

                event = events.recv() => match event {
                    Some(event) => self.handle_mqtt(link, event).await,
                    None => return Err(anyhow!("MQTT session task ended unexpectedly")),
                },

                command = self.commands.recv() => match command {
                    Some(BridgeCommand::Sync { done }) => {
                        let _ = done.send(());
                    }
                    Some(BridgeCommand::Shutdown) | None => {
                        info!("Bridge shutdown requested");
                        return Ok(());
                    }
                },
            }
        }
    }

    async fn handle_audio(&mut self, link: &dyn MqttLink, event: AudioEvent) {
        match event {
            AudioEvent::VolumeChanged(change) => {
                if !self.devices.is_current(&change) {
                    debug!(
                        device = %change.device_id,
                        generation = change.generation,
                        current = self.devices.generation(),
                        "Dropping stale volume reading"
                    );
                    return;
                }
                self.publish_change(link, &change).await;
            }
            AudioEvent::DefaultDeviceChanged(change) => {
                info!(
                    role = ?change.role,
                    device = change.device_id.as_deref().unwrap_or("<none>"),
                    "Default render device changed"
                );
                match self.devices.rebind() {
                    Ok(device) => self.status.send_modify(|s| s.device = Some(device.name)),
                    Err(e) => {
                        warn!("⚠️ Rebind failed, waiting for the next device change: {}", e);
                        self.status.send_modify(|s| s.device = None);
                    }
                }
            }
        }
    }

    async fn handle_mqtt(&mut self, link: &dyn MqttLink, event: MqttEvent) {
        match event {
            MqttEvent::Message { topic, payload } => {
                if topic != self.topics.command_topic {
                    trace!(%topic, "Ignoring message on foreign topic");
                    return;
                }
                let Some(percent) = parse_command(&payload) else {
                    warn!(
                        "Ignoring unparseable volume command {:?}",
                        String::from_utf8_lossy(&payload)
                    );
                    return;
                };
                debug!("Volume command {} received", percent);
                if let Err(e) = self.devices.set_volume(percent) {
                    warn!("⚠️ Could not apply volume {}: {}", percent, e);
                }
            }
            MqttEvent::SessionLost { attempt } => {
                debug!(attempt, "MQTT session lost");
                self.set_state(BridgeState::Disconnected);
            }
            MqttEvent::SessionRestored => {
                self.set_state(BridgeState::Connecting);
                if let Err(e) = link.subscribe(&self.topics.command_topic).await {
                    warn!("Re-subscribe after reconnect failed: {:#}", e);
                }
                self.publish_current_state(link).await;
                self.set_state(BridgeState::BoundListening);
            }
        }
    }

    async fn publish_discovery(&mut self, link: &dyn MqttLink) -> Result<()> {
        if self.discovery_published {
            return Ok(());
        }
        let payload = DiscoveryDocument::for_binding(&self.topics)
            .to_payload()
            .context("Failed to serialize discovery document")?;
        link.publish_retained(&self.topics.discovery_topic, payload)
            .await
            .context("Failed to publish discovery document")?;
        self.discovery_published = true;
        debug!(topic = %self.topics.discovery_topic, "Discovery document published");
        Ok(())
    }

    async fn publish_current_state(&mut self, link: &dyn MqttLink) {
        if !self.devices.is_bound() {
            debug!("No bound endpoint, skipping state publish");
            return;
        }
        let current = self.devices.volume();
        match current {
            Ok(volume) => self.publish_volume(link, volume).await,
            Err(e) => warn!("Could not read current volume: {}", e),
        }
    }

    async fn publish_change(&mut self, link: &dyn MqttLink, change: &VolumeChangeEvent) {
        trace!(
            device = %change.device_id,
            origin = ?change.origin,
            "Volume changed to {}",
            change.volume
        );
        self.publish_volume(link, change.volume).await;
    }

    async fn publish_volume(&mut self, link: &dyn MqttLink, volume: f32) {
        let percent = truncate_percent(volume);
        // A restored session republishes the current volume
        let session_down = self.status.borrow().state == BridgeState::Disconnected;
        if session_down {
            trace!("Session down, not publishing {}", percent);
            return;
        }
        let payload = percent.to_string().into_bytes();
        match link.publish_retained(&self.topics.state_topic, payload).await {
            Ok(()) => {
                debug!(topic = %self.topics.state_topic, "State -> {}", percent);
                self.status.send_modify(|s| s.volume = Some(percent));
            }
            Err(e) => warn!("State publish failed: {:#}", e),
        }
    }

    fn set_state(&self, state: BridgeState) {
        self.status.send_if_modified(|s| {
            if s.state == state {
                return false;
            }
            s.state = state;
            true
        });
    }
}

/// Resolve once a shutdown is requested (or every handle is dropped)
async fn wait_for_shutdown(commands: &mut mpsc::UnboundedReceiver<BridgeCommand>) {
    while let Some(command) = commands.recv().await {
        match command {
            BridgeCommand::Shutdown => return,
            BridgeCommand::Sync { done } => {
                let _ = done.send(());
            }
        }
    }
}
