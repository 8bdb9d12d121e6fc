//! System tray UI module
//!
//! Shows the bridge state as a colored icon with the bound device and last
//! published volume in the tooltip and menu. "Exit" requests the same
//! orderly shutdown as Ctrl+C.
//!
//! The Win32 message loop runs on a dedicated OS thread ([`TrayManager`]);
//! [`TrayMessageHandler`] forwards bridge status from the Tokio runtime.

pub mod handler;
pub mod icons;
#[cfg(windows)]
pub mod manager;

pub use handler::{spawn_command_listener, TrayMessageHandler};
pub use icons::IconColor;
#[cfg(windows)]
pub use manager::TrayManager;

use crate::bridge::{BridgeState, BridgeStatus};
use crate::paths::APP_NAME;

/// Commands sent from tray UI to the main Tokio runtime
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrayCommand {
    /// Shutdown the application
    Shutdown,
}

/// Updates sent from the main runtime to the tray UI
#[derive(Debug, Clone, PartialEq)]
pub enum TrayUpdate {
    /// Bridge status changed
    Status(BridgeStatus),
    /// Remove the icon and leave the message loop
    Quit,
}

/// Icon color for a status (`None` before the first update)
pub fn icon_color(status: Option<&BridgeStatus>) -> IconColor {
    match status.map(|s| s.state) {
        None => IconColor::Gray,
        Some(BridgeState::BoundListening) => IconColor::Green,
        Some(BridgeState::Connecting) => IconColor::Yellow,
        Some(BridgeState::Disconnected) => IconColor::Red,
    }
}

/// Tooltip text
pub fn tooltip(status: Option<&BridgeStatus>) -> String {
    let Some(status) = status else {
        return format!("{} - Initializing...", APP_NAME);
    };

    match (status.state, &status.device, status.volume) {
        (BridgeState::BoundListening, Some(device), Some(volume)) => {
            format!("{} - {} {}%", APP_NAME, device, volume)
        }
        (BridgeState::BoundListening, Some(device), None) => format!("{} - {}", APP_NAME, device),
        (BridgeState::BoundListening, None, _) => format!("{} - No audio device", APP_NAME),
        (state, _, _) => format!("{} - {}", APP_NAME, state),
    }
}

/// Menu line describing the connection
pub fn status_line(status: Option<&BridgeStatus>) -> String {
    match status.map(|s| s.state) {
        None => "⏳ Initializing...".to_string(),
        Some(BridgeState::BoundListening) => "✓ MQTT: Connected".to_string(),
        Some(BridgeState::Connecting) => "⏳ MQTT: Connecting".to_string(),
        Some(BridgeState::Disconnected) => "✗ MQTT: Disconnected".to_string(),
    }
}

/// Menu line describing the bound device
pub fn device_line(status: Option<&BridgeStatus>) -> String {
    match status {
        Some(BridgeStatus {
            device: Some(device),
            volume,
            ..
        }) => match volume {
            Some(volume) => format!("🔊 {} ({}%)", device, volume),
            None => format!("🔊 {}", device),
        },
        _ => "🔇 No audio device".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(state: BridgeState, device: Option<&str>, volume: Option<u8>) -> BridgeStatus {
        BridgeStatus {
            state,
            device: device.map(str::to_string),
            volume,
        }
    }

    #[test]
    fn test_icon_color_per_state() {
        assert_eq!(icon_color(None), IconColor::Gray);
        assert_eq!(
            icon_color(Some(&status(BridgeState::BoundListening, None, None))),
            IconColor::Green
        );
        assert_eq!(
            icon_color(Some(&status(BridgeState::Connecting, None, None))),
            IconColor::Yellow
        );
        assert_eq!(
            icon_color(Some(&status(BridgeState::Disconnected, None, None))),
            IconColor::Red
        );
    }

    #[test]
    fn test_tooltip() {
        assert_eq!(tooltip(None), "PC Volume MQTT - Initializing...");
        assert_eq!(
            tooltip(Some(&status(BridgeState::BoundListening, Some("Speakers"), Some(42)))),
            "PC Volume MQTT - Speakers 42%"
        );
        assert_eq!(
            tooltip(Some(&status(BridgeState::Disconnected, Some("Speakers"), Some(42)))),
            "PC Volume MQTT - Disconnected"
        );
        assert_eq!(
            tooltip(Some(&status(BridgeState::BoundListening, None, None))),
            "PC Volume MQTT - No audio device"
        );
    }

    #[test]
    fn test_menu_lines() {
        let bound = status(BridgeState::BoundListening, Some("Headset"), Some(7));
        assert_eq!(status_line(Some(&bound)), "✓ MQTT: Connected");
        assert_eq!(device_line(Some(&bound)), "🔊 Headset (7%)");
        assert_eq!(device_line(None), "🔇 No audio device");
    }
}
