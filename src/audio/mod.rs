//! Audio endpoint abstraction
//!
//! Wraps the host's master-volume control behind two small traits so the
//! bridge never touches a platform API directly:
//! - [`AudioBackend`] enumerates the default render endpoint and reports
//!   default-device changes
//! - [`AudioEndpoint`] reads/writes the master volume of one bound device
//!   and delivers its change notifications
//!
//! Volumes cross this boundary as percentages (0-100). The OS scalar
//! (0.0-1.0) never leaves the backend implementations.

pub mod rebind;
pub mod simulated;
#[cfg(windows)]
pub mod wasapi;

use std::fmt;
use std::sync::Arc;
use thiserror::Error;

pub use rebind::DeviceRebindManager;
pub use simulated::SimulatedBackend;

/// Errors raised by audio backends and endpoints
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AudioError {
    /// The OS reports no default render device (all outputs removed/disabled)
    #[error("no default render endpoint is available")]
    NoDefaultEndpoint,

    /// The endpoint was disposed and can no longer be used
    #[error("audio endpoint '{0}' has been disposed")]
    Disposed(String),

    /// The endpoint disappeared underneath us
    #[error("audio endpoint '{0}' is no longer present")]
    DeviceGone(String),

    /// Any other platform failure
    #[error("audio platform call failed: {0}")]
    Platform(String),
}

#[cfg(windows)]
impl From<windows::core::Error> for AudioError {
    fn from(err: windows::core::Error) -> Self {
        AudioError::Platform(err.to_string())
    }
}

/// Identity of a bound render endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    /// Opaque OS-assigned identifier
    pub id: String,
    /// Human readable name (e.g. "Speakers (Realtek Audio)")
    pub name: String,
}

impl fmt::Display for DeviceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]", self.name, self.id)
    }
}

/// Device roles reported by default-device notifications
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceRole {
    Console,
    Multimedia,
    Communications,
}

/// Where a volume reading came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeOrigin {
    /// OS volume notification (user, third-party app, or our own set)
    Notification,
    /// Synthetic reading emitted right after a rebind
    Rebind,
}

/// A volume reading for one endpoint binding
#[derive(Debug, Clone, PartialEq)]
pub struct VolumeChangeEvent {
    pub device_id: String,
    /// Volume in percent (0-100)
    pub volume: f32,
    /// Binding generation the reading belongs to
    pub generation: u64,
    pub origin: ChangeOrigin,
}

/// Default render device change reported by the OS
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DefaultDeviceChange {
    pub role: DeviceRole,
    /// New default device id, `None` when no render device is left
    pub device_id: Option<String>,
}

/// Events produced by the audio side of the bridge
#[derive(Debug, Clone, PartialEq)]
pub enum AudioEvent {
    VolumeChanged(VolumeChangeEvent),
    DefaultDeviceChanged(DefaultDeviceChange),
}

/// Volume notification callback, receives the new volume in percent
pub type VolumeCallback = Arc<dyn Fn(f32) + Send + Sync>;

/// Default render device change callback
pub type DefaultDeviceCallback = Arc<dyn Fn(DefaultDeviceChange) + Send + Sync>;

/// Unsubscribe handle for an OS notification registration
///
/// Cancelling is idempotent; dropping the handle cancels it.
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// Unregister the callback (no-op when already cancelled)
    pub fn cancel(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }

    pub fn is_active(&self) -> bool {
        self.cancel.is_some()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.is_active())
            .finish()
    }
}

/// A bound render endpoint
///
/// Calls are synchronous and expected to return promptly. Implementations
/// must never invoke the volume callback while holding a lock that the
/// caller of [`AudioEndpoint::set_volume`] could need.
pub trait AudioEndpoint: Send {
    /// Identity of this endpoint
    fn info(&self) -> &DeviceInfo;

    /// Current master volume in percent (0-100)
    fn volume(&self) -> Result<f32, AudioError>;

    /// Clamp `percent` to 0-100 and commit it as the OS scalar
    ///
    /// The OS reports the change back through the volume callback like any
    /// other change; no echo suppression happens here.
    fn set_volume(&self, percent: f32) -> Result<(), AudioError>;

    /// Register the volume change callback, replacing any previous one
    fn on_volume_changed(&mut self, callback: VolumeCallback) -> Result<(), AudioError>;

    /// Unregister callbacks and release OS handles. Idempotent.
    fn dispose(&mut self);

    fn is_disposed(&self) -> bool;
}

/// Platform audio subsystem
pub trait AudioBackend: Send + Sync {
    /// Backend name for logs
    fn name(&self) -> &str;

    /// Bind the current default render endpoint (multimedia role)
    fn default_render_endpoint(&self) -> Result<Box<dyn AudioEndpoint>, AudioError>;

    /// Subscribe to default render device changes
    fn watch_default_device(
        &self,
        callback: DefaultDeviceCallback,
    ) -> Result<Subscription, AudioError>;
}

/// Clamp a percentage to 0-100 (NaN maps to 0)
pub fn clamp_percent(percent: f32) -> f32 {
    if percent.is_nan() {
        0.0
    } else {
        percent.clamp(0.0, 100.0)
    }
}

/// Convert a percentage to the OS scalar range, clamping first
pub fn percent_to_scalar(percent: f32) -> f32 {
    clamp_percent(percent) / 100.0
}

/// Convert an OS scalar to a percentage
pub fn scalar_to_percent(scalar: f32) -> f32 {
    scalar * 100.0
}

/// Integer percentage published upstream (truncated toward zero, not rounded)
pub fn truncate_percent(percent: f32) -> u8 {
    clamp_percent(percent) as u8
}
