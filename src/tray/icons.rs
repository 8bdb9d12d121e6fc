//! Icon generation for system tray
//!
//! Generates simple programmatic icons for the bridge states.

use image::{ImageBuffer, Rgba};

pub const ICON_SIZE: u32 = 16;

/// Icon colors for different states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IconColor {
    /// Bound and listening
    Green,
    /// Connecting / reconnecting
    Yellow,
    /// Disconnected
    Red,
    /// No status received yet
    Gray,
}

impl IconColor {
    fn rgb(self) -> (u8, u8, u8) {
        match self {
            IconColor::Green => (0, 200, 0),
            IconColor::Yellow => (200, 200, 0),
            IconColor::Red => (200, 0, 0),
            IconColor::Gray => (128, 128, 128),
        }
    }
}

/// Generate a 16x16 status icon
///
/// A filled disc, except for `Red` which is drawn as a ring so the
/// disconnected state stays recognisable without color.
pub fn generate_icon(color: IconColor) -> ImageBuffer<Rgba<u8>, Vec<u8>> {
    let (r, g, b) = color.rgb();
    let center = ICON_SIZE as f32 / 2.0;
    let outer = 6.5;
    let inner = if color == IconColor::Red { 3.5 } else { -1.0 };

    ImageBuffer::from_fn(ICON_SIZE, ICON_SIZE, |x, y| {
        let dx = x as f32 + 0.5 - center;
        let dy = y as f32 + 0.5 - center;
        let distance = (dx * dx + dy * dy).sqrt();

        if distance <= outer && distance > inner {
            Rgba([r, g, b, 255])
        } else {
            Rgba([0, 0, 0, 0])
        }
    })
}

/// Generate icon and return as RGBA bytes for tray-icon
pub fn generate_icon_bytes(color: IconColor) -> Vec<u8> {
    generate_icon(color).into_raw()
}
