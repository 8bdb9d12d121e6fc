//! Default render device tracking
//!
//! Keeps exactly one endpoint bound: whichever device the OS currently
//! considers the default for the multimedia/console roles. Every rebind is
//! a full teardown/rebuild and bumps the binding generation, so readings
//! still queued from the previous device can be recognised as stale.
//!
//! The manager is owned by the bridge actor and mutated through `&mut self`
//! only, which serializes rebinds against commands and each other.

use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::{
    AudioBackend, AudioEndpoint, AudioError, AudioEvent, ChangeOrigin, DeviceInfo, DeviceRole,
    Subscription, VolumeChangeEvent,
};

/// Current binding state
enum Binding {
    /// Nothing was ever bound
    Unbound,
    /// Live endpoint with a registered volume callback
    Active(Box<dyn AudioEndpoint>),
    /// Last known endpoint, disposed; kept for identity until the next rebind
    Inert(Box<dyn AudioEndpoint>),
}

/// Owns the bound endpoint and the default-device subscription
pub struct DeviceRebindManager {
    backend: Arc<dyn AudioBackend>,
    events: mpsc::UnboundedSender<AudioEvent>,
    binding: Binding,
    generation: u64,
    device_watch: Option<Subscription>,
}

impl DeviceRebindManager {
    pub fn new(backend: Arc<dyn AudioBackend>, events: mpsc::UnboundedSender<AudioEvent>) -> Self {
        Self {
            backend,
            events,
            binding: Binding::Unbound,
            generation: 0,
            device_watch: None,
        }
    }

    /// Whether a default-device notification for `role` should trigger a rebind
    pub fn is_trigger_role(role: DeviceRole) -> bool {
        matches!(role, DeviceRole::Multimedia | DeviceRole::Console)
    }

    /// Subscribe to default-device changes and bind the current default
    ///
    /// The subscription is installed even when the initial bind fails, so a
    /// device plugged in later is still picked up.
    pub fn start(&mut self) -> Result<DeviceInfo, AudioError> {
        if self.device_watch.is_none() {
            let events = self.events.clone();
            let watch = self
                .backend
                .watch_default_device(Arc::new(move |change| {
                    if Self::is_trigger_role(change.role) {
                        let _ = events.send(AudioEvent::DefaultDeviceChanged(change));
                    }
                }))?;
            self.device_watch = Some(watch);
            debug!("Watching default render device on {} backend", self.backend.name());
        }

        self.bind(ChangeOrigin::Notification)
    }

    /// Tear down the current binding and bind the new default endpoint
    ///
    /// Emits a synthetic [`ChangeOrigin::Rebind`] reading on success. On
    /// failure the previous endpoint is kept inert and the error is returned;
    /// the next notification retries.
    pub fn rebind(&mut self) -> Result<DeviceInfo, AudioError> {
        self.bind(ChangeOrigin::Rebind)
    }

    fn bind(&mut self, origin: ChangeOrigin) -> Result<DeviceInfo, AudioError> {
        // 1. stop the old endpoint from producing events
        let previous = match std::mem::replace(&mut self.binding, Binding::Unbound) {
            Binding::Active(mut endpoint) => {
                endpoint.dispose();
                Some(endpoint)
            }
            Binding::Inert(endpoint) => Some(endpoint),
            Binding::Unbound => None,
        };

        // Anything still queued from the previous binding is stale from here on
        self.generation += 1;
        let generation = self.generation;

        // 2. bind the new default
        let mut endpoint = match self.open_default(generation) {
            Ok(endpoint) => endpoint,
            Err(e) => {
                if let Some(previous) = previous {
                    warn!(
                        "Rebind failed, keeping {} inert until the next device change: {}",
                        previous.info(),
                        e
                    );
                    self.binding = Binding::Inert(previous);
                } else {
                    warn!("No render endpoint could be bound: {}", e);
                }
                return Err(e);
            }
        };

        let info = endpoint.info().clone();
        drop(previous);

        // 3. resynchronise subscribers with the new device's volume
        if origin == ChangeOrigin::Rebind {
            match endpoint.volume() {
                Ok(volume) => {
                    let _ = self.events.send(AudioEvent::VolumeChanged(VolumeChangeEvent {
                        device_id: info.id.clone(),
                        volume,
                        generation,
                        origin,
                    }));
                }
                Err(e) => {
                    warn!("Could not read volume of {} after rebind: {}", info, e);
                    endpoint.dispose();
                    self.binding = Binding::Inert(endpoint);
                    return Err(e);
                }
            }
        }

        info!(generation, "🔊 Bound render endpoint: {}", info);
        self.binding = Binding::Active(endpoint);
        Ok(info)
    }

    fn open_default(&self, generation: u64) -> Result<Box<dyn AudioEndpoint>, AudioError> {
        let mut endpoint = self.backend.default_render_endpoint()?;

        let events = self.events.clone();
        let device_id = endpoint.info().id.clone();
        let registered = endpoint.on_volume_changed(Arc::new(move |volume| {
            let _ = events.send(AudioEvent::VolumeChanged(VolumeChangeEvent {
                device_id: device_id.clone(),
                volume,
                generation,
                origin: ChangeOrigin::Notification,
            }));
        }));

        if let Err(e) = registered {
            endpoint.dispose();
            return Err(e);
        }
        Ok(endpoint)
    }

    /// Whether a reading belongs to the current binding
    pub fn is_current(&self, event: &VolumeChangeEvent) -> bool {
        match &self.binding {
            Binding::Active(endpoint) => {
                event.generation == self.generation && event.device_id == endpoint.info().id
            }
            _ => false,
        }
    }

    /// Apply a volume (percent) to the bound endpoint
    pub fn set_volume(&self, percent: f32) -> Result<(), AudioError> {
        match &self.binding {
            Binding::Active(endpoint) => endpoint.set_volume(percent),
            Binding::Inert(endpoint) => Err(AudioError::Disposed(endpoint.info().id.clone())),
            Binding::Unbound => Err(AudioError::NoDefaultEndpoint),
        }
    }

    /// Read the bound endpoint's volume (percent)
    pub fn volume(&self) -> Result<f32, AudioError> {
        match &self.binding {
            Binding::Active(endpoint) => endpoint.volume(),
            Binding::Inert(endpoint) => Err(AudioError::Disposed(endpoint.info().id.clone())),
            Binding::Unbound => Err(AudioError::NoDefaultEndpoint),
        }
    }

    /// Identity of the live endpoint, if any
    pub fn device(&self) -> Option<&DeviceInfo> {
        match &self.binding {
            Binding::Active(endpoint) => Some(endpoint.info()),
            _ => None,
        }
    }

    /// Identity of the last known endpoint, live or inert
    pub fn last_known_device(&self) -> Option<&DeviceInfo> {
        match &self.binding {
            Binding::Active(endpoint) | Binding::Inert(endpoint) => Some(endpoint.info()),
            Binding::Unbound => None,
        }
    }

    pub fn is_bound(&self) -> bool {
        matches!(self.binding, Binding::Active(_))
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Stop producing events: drop the device watch and dispose the endpoint
    pub fn shutdown(&mut self) {
        if let Some(mut watch) = self.device_watch.take() {
            watch.cancel();
        }

        self.binding = match std::mem::replace(&mut self.binding, Binding::Unbound) {
            Binding::Active(mut endpoint) => {
                endpoint.dispose();
                Binding::Inert(endpoint)
            }
            other => other,
        };
        self.generation += 1;
        debug!("Device rebind manager shut down");
    }
}
