//! Tray message handler - Tokio task that manages tray updates
//!
//! Bridges the async Tokio runtime with the blocking tray UI thread:
//! bridge status from a `watch` channel goes out over crossbeam, and tray
//! commands are relayed back from a plain OS thread.

use std::thread::JoinHandle;
use tokio::sync::{mpsc, watch};
use tracing::{debug, trace};

use super::{TrayCommand, TrayUpdate};
use crate::bridge::BridgeStatus;

/// Forwards bridge status changes to the tray UI
pub struct TrayMessageHandler {
    /// Sender for updates to the tray UI (crossbeam for cross-thread communication)
    tray_tx: crossbeam::channel::Sender<TrayUpdate>,
    status_rx: watch::Receiver<BridgeStatus>,
}

impl TrayMessageHandler {
    pub fn new(
        tray_tx: crossbeam::channel::Sender<TrayUpdate>,
        status_rx: watch::Receiver<BridgeStatus>,
    ) -> Self {
        Self { tray_tx, status_rx }
    }

    /// Forward the current status, then every change until the bridge is gone
    ///
    /// Sends [`TrayUpdate::Quit`] when the bridge drops its status channel.
    pub async fn run(mut self) {
        let mut last_sent: Option<BridgeStatus> = None;

        loop {
            let status = self.status_rx.borrow_and_update().clone();
            if last_sent.as_ref() != Some(&status) {
                trace!("TrayHandler: forwarding {:?}", status);
                if self.tray_tx.send(TrayUpdate::Status(status.clone())).is_err() {
                    debug!("Tray UI closed, stopping status forwarding");
                    return;
                }
                last_sent = Some(status);
            }

            if self.status_rx.changed().await.is_err() {
                break;
            }
        }

        debug!("Bridge status closed, asking tray to quit");
        let _ = self.tray_tx.send(TrayUpdate::Quit);
    }
}

/// Relay tray commands into the Tokio runtime on a dedicated thread
///
/// The thread ends when the tray drops its command sender or the runtime
/// stops listening.
pub fn spawn_command_listener(
    command_rx: crossbeam::channel::Receiver<TrayCommand>,
    forward: mpsc::UnboundedSender<TrayCommand>,
) -> std::io::Result<JoinHandle<()>> {
    std::thread::Builder::new()
        .name("tray-commands".to_string())
        .spawn(move || {
            while let Ok(command) = command_rx.recv() {
                debug!("Tray command: {:?}", command);
                if forward.send(command).is_err() {
                    break;
                }
            }
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::BridgeState;
    use std::time::Duration;

    #[tokio::test]
    async fn test_forwards_initial_and_changed_status() {
        let (status_tx, status_rx) = watch::channel(BridgeStatus::default());
        let (tray_tx, tray_rx) = crossbeam::channel::unbounded();
        let task = tokio::spawn(TrayMessageHandler::new(tray_tx, status_rx).run());

        let first = tokio::task::spawn_blocking({
            let rx = tray_rx.clone();
            move || rx.recv_timeout(Duration::from_secs(2))
        })
        .await
        .unwrap()
        .unwrap();
        assert_eq!(first, TrayUpdate::Status(BridgeStatus::default()));

        status_tx.send_modify(|s| {
            s.state = BridgeState::BoundListening;
            s.volume = Some(55);
        });
        drop(status_tx);
        task.await.unwrap();

        let rest: Vec<_> = tray_rx.try_iter().collect();
        assert_eq!(
            rest,
            vec![
                TrayUpdate::Status(BridgeStatus {
                    state: BridgeState::BoundListening,
                    device: None,
                    volume: Some(55),
                }),
                TrayUpdate::Quit,
            ]
        );
    }

    #[tokio::test]
    async fn test_command_listener_relays_exit_then_stops() {
        let (command_tx, command_rx) = crossbeam::channel::unbounded();
        let (forward_tx, mut forward_rx) = mpsc::unbounded_channel();
        let listener = spawn_command_listener(command_rx, forward_tx).unwrap();

        command_tx.send(TrayCommand::Shutdown).unwrap();
        let relayed = tokio::time::timeout(Duration::from_secs(2), forward_rx.recv())
            .await
            .unwrap();
        assert_eq!(relayed, Some(TrayCommand::Shutdown));

        drop(command_tx);
        tokio::task::spawn_blocking(move || listener.join())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(forward_rx.recv().await, None);
    }
}
