//! State bridge between the bound audio endpoint and MQTT
//!
//! The bridge runs as a single tokio task (see [`StateBridge`]) that owns the
//! [`DeviceRebindManager`](crate::audio::DeviceRebindManager) and consumes
//! three producers: audio notifications, broker traffic, and control
//! commands. Everything that touches the bound endpoint happens inside that
//! task, one event at a time.

mod actor;
pub mod discovery;
pub mod topics;

use anyhow::{anyhow, Result};
use std::fmt;
use tokio::sync::{mpsc, oneshot, watch};

pub use actor::{parse_command, StateBridge};
pub use discovery::DiscoveryDocument;
pub use topics::{slugify, TopicBinding};

/// Bridge lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BridgeState {
    #[default]
    Disconnected,
    Connecting,
    /// Session established, command topic subscribed, state published
    BoundListening,
}

impl fmt::Display for BridgeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            BridgeState::Disconnected => "Disconnected",
            BridgeState::Connecting => "Connecting",
            BridgeState::BoundListening => "Connected",
        };
        f.write_str(text)
    }
}

/// Snapshot broadcast to observers (tray)
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BridgeStatus {
    pub state: BridgeState,
    /// Friendly name of the bound endpoint
    pub device: Option<String>,
    /// Last published volume
    pub volume: Option<u8>,
}

/// Control messages for the bridge task
#[derive(Debug)]
pub enum BridgeCommand {
    /// Stop producing events, disconnect, and exit the task
    Shutdown,
    /// Reply once every event queued before this command has been handled
    Sync { done: oneshot::Sender<()> },
}

/// Cloneable handle to a running bridge
#[derive(Clone)]
pub struct BridgeHandle {
    commands: mpsc::UnboundedSender<BridgeCommand>,
    status: watch::Receiver<BridgeStatus>,
}

impl BridgeHandle {
    pub(crate) fn new(
        commands: mpsc::UnboundedSender<BridgeCommand>,
        status: watch::Receiver<BridgeStatus>,
    ) -> Self {
        Self { commands, status }
    }

    /// Request an orderly shutdown
    ///
    /// Returns `false` if the bridge task has already exited. Safe to call
    /// from any thread.
    pub fn shutdown(&self) -> bool {
        self.commands.send(BridgeCommand::Shutdown).is_ok()
    }

    /// Wait until the bridge has drained everything queued so far
    pub async fn sync(&self) -> Result<()> {
        let (done, rx) = oneshot::channel();
        self.commands
            .send(BridgeCommand::Sync { done })
            .map_err(|_| anyhow!("bridge task is not running"))?;
        rx.await.map_err(|_| anyhow!("bridge task stopped before sync completed"))
    }

    /// Current status snapshot
    pub fn status(&self) -> BridgeStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<BridgeStatus> {
        self.status.clone()
    }
}
