//! Tray manager - Windows system tray integration
//!
//! Runs on a dedicated OS thread to handle Win32 message loop.

use anyhow::anyhow;
use std::time::Duration;
use tracing::{debug, trace, warn};

use super::icons::{generate_icon_bytes, ICON_SIZE};
use super::{device_line, icon_color, status_line, tooltip, TrayCommand, TrayUpdate};
use crate::bridge::BridgeStatus;
use crate::paths::APP_NAME;

const EXIT_ID: &str = "exit";

/// Tray manager running on dedicated OS thread
pub struct TrayManager {
    /// Receive updates from Tokio runtime
    update_rx: crossbeam::channel::Receiver<TrayUpdate>,
    /// Send commands to Tokio runtime
    command_tx: crossbeam::channel::Sender<TrayCommand>,
    /// Last status received, `None` until the bridge reports
    status: Option<BridgeStatus>,
}

impl TrayManager {
    pub fn new(
        update_rx: crossbeam::channel::Receiver<TrayUpdate>,
        command_tx: crossbeam::channel::Sender<TrayCommand>,
    ) -> Self {
        Self {
            update_rx,
            command_tx,
            status: None,
        }
    }

    /// Run the tray manager (blocks until quit)
    ///
    /// This runs the Win32 message loop on the current thread.
    pub fn run(mut self) -> anyhow::Result<()> {
        debug!("Starting system tray manager...");

        let tray_icon = tray_icon::TrayIconBuilder::new()
            .with_icon(self.icon()?)
            .with_tooltip(tooltip(None))
            .with_menu(Box::new(self.build_menu()?))
            .build()
            .map_err(|e| anyhow!("Failed to create tray icon: {}", e))?;
        debug!("System tray icon created");

        let menu_channel = muda::MenuEvent::receiver();

        loop {
            // Pump Windows messages (required for tray/menu events on Windows)
            pump_windows_messages();

            let mut exit_requested = false;
            while let Ok(event) = menu_channel.try_recv() {
                if event.id.as_ref() == EXIT_ID {
                    debug!("Exit selected from tray menu");
                    let _ = self.command_tx.send(TrayCommand::Shutdown);
                    exit_requested = true;
                } else {
                    trace!("Ignoring menu event {:?}", event.id);
                }
            }
            if exit_requested {
                break;
            }

            let update = match self.update_rx.recv_timeout(Duration::from_millis(50)) {
                Ok(update) => update,
                Err(crossbeam::channel::RecvTimeoutError::Timeout) => continue,
                Err(crossbeam::channel::RecvTimeoutError::Disconnected) => break,
            };

            match update {
                TrayUpdate::Status(status) => {
                    trace!("Tray: status {:?}", status);
                    self.status = Some(status);

                    match self.icon() {
                        Ok(icon) => {
                            let _ = tray_icon.set_icon(Some(icon));
                        }
                        Err(e) => warn!("{}", e),
                    }
                    let _ = tray_icon.set_tooltip(Some(tooltip(self.status.as_ref())));
                    match self.build_menu() {
                        Ok(menu) => tray_icon.set_menu(Some(Box::new(menu))),
                        Err(e) => warn!("Failed to rebuild tray menu: {}", e),
                    }
                }
                TrayUpdate::Quit => break,
            }
        }

        debug!("Tray manager shutting down, removing icon...");

        // Explicitly remove the tray icon to prevent ghost icons
        if let Err(e) = tray_icon.set_visible(false) {
            warn!("Failed to hide tray icon: {}", e);
        }
        drop(tray_icon);

        Ok(())
    }

    fn icon(&self) -> anyhow::Result<tray_icon::Icon> {
        let bytes = generate_icon_bytes(icon_color(self.status.as_ref()));
        tray_icon::Icon::from_rgba(bytes, ICON_SIZE, ICON_SIZE)
            .map_err(|e| anyhow!("Failed to create icon: {}", e))
    }

    /// Title, status, device, separator, Exit
    fn build_menu(&self) -> anyhow::Result<muda::Menu> {
        let menu = muda::Menu::new();
        let status = self.status.as_ref();

        menu.append(&muda::MenuItem::new(APP_NAME, false, None))?;
        menu.append(&muda::PredefinedMenuItem::separator())?;
        menu.append(&muda::MenuItem::new(status_line(status), false, None))?;
        menu.append(&muda::MenuItem::new(device_line(status), false, None))?;
        menu.append(&muda::PredefinedMenuItem::separator())?;
        menu.append(&muda::MenuItem::with_id(EXIT_ID, "Exit", true, None))?;

        Ok(menu)
    }
}

/// Pump Windows messages to process tray/menu events
fn pump_windows_messages() {
    use windows::Win32::UI::WindowsAndMessaging::{
        DispatchMessageW, PeekMessageW, TranslateMessage, MSG, PM_REMOVE,
    };

    unsafe {
        let mut msg = MSG::default();
        while PeekMessageW(&mut msg, None, 0, 0, PM_REMOVE).as_bool() {
            let _ = TranslateMessage(&msg);
            DispatchMessageW(&msg);
        }
    }
}
