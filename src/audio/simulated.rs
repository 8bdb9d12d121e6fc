//! In-memory audio backend
//!
//! Behaves like the OS mixer for everything the bridge relies on: volume is
//! stored as a scalar, every successful set fires the change callbacks
//! (including our own sets), and default-device changes are reported once
//! per role the way Windows does. Used by tests and on hosts without a
//! native backend.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, trace};

use super::{
    percent_to_scalar, scalar_to_percent, AudioBackend, AudioEndpoint, AudioError,
    DefaultDeviceCallback, DefaultDeviceChange, DeviceInfo, DeviceRole, Subscription,
    VolumeCallback,
};

struct SimDevice {
    name: String,
    scalar: f32,
    listeners: HashMap<u64, VolumeCallback>,
    set_calls: usize,
}

#[derive(Default)]
struct SimState {
    devices: HashMap<String, SimDevice>,
    default_id: Option<String>,
    watchers: HashMap<u64, DefaultDeviceCallback>,
    next_id: u64,
}

impl SimState {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

/// Shared, cloneable in-memory mixer
#[derive(Clone, Default)]
pub struct SimulatedBackend {
    state: Arc<Mutex<SimState>>,
}

impl SimulatedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a backend with a single device that is already the default
    pub fn with_device(id: &str, name: &str, percent: f32) -> Self {
        let backend = Self::new();
        backend.add_device(id, name, percent);
        backend.state.lock().default_id = Some(id.to_string());
        backend
    }

    /// Plug in a device (does not change the default)
    pub fn add_device(&self, id: &str, name: &str, percent: f32) {
        let mut state = self.state.lock();
        state.devices.insert(
            id.to_string(),
            SimDevice {
                name: name.to_string(),
                scalar: percent_to_scalar(percent),
                listeners: HashMap::new(),
                set_calls: 0,
            },
        );
        debug!("Simulated device added: {} ({})", name, id);
    }

    /// Unplug a device; if it was the default, all roles lose their default
    pub fn remove_device(&self, id: &str) {
        let was_default = {
            let mut state = self.state.lock();
            state.devices.remove(id);
            if state.default_id.as_deref() == Some(id) {
                state.default_id = None;
                true
            } else {
                false
            }
        };

        if was_default {
            self.notify_all_roles(None);
        }
    }

    /// Make `id` the default render device and notify every role
    pub fn set_default(&self, id: &str) {
        self.state.lock().default_id = Some(id.to_string());
        self.notify_all_roles(Some(id.to_string()));
    }

    /// Fire a single default-device notification for one role
    pub fn notify_default_changed(&self, role: DeviceRole) {
        let device_id = self.state.lock().default_id.clone();
        self.notify_watchers(DefaultDeviceChange { role, device_id });
    }

    /// Change a device's volume the way another application would
    pub fn change_volume_externally(&self, id: &str, percent: f32) {
        let listeners = {
            let mut state = self.state.lock();
            let Some(device) = state.devices.get_mut(id) else {
                return;
            };
            device.scalar = percent_to_scalar(percent);
            device.listeners.values().cloned().collect::<Vec<_>>()
        };

        let reported = scalar_to_percent(percent_to_scalar(percent));
        for listener in listeners {
            listener(reported);
        }
    }

    /// Raw OS scalar of a device
    pub fn scalar(&self, id: &str) -> Option<f32> {
        self.state.lock().devices.get(id).map(|d| d.scalar)
    }

    /// Number of `set_volume` calls that reached a device
    pub fn set_volume_calls(&self, id: &str) -> usize {
        self.state
            .lock()
            .devices
            .get(id)
            .map(|d| d.set_calls)
            .unwrap_or(0)
    }

    /// Registered volume callbacks for a device
    pub fn listener_count(&self, id: &str) -> usize {
        self.state
            .lock()
            .devices
            .get(id)
            .map(|d| d.listeners.len())
            .unwrap_or(0)
    }

    /// Registered default-device watchers
    pub fn watcher_count(&self) -> usize {
        self.state.lock().watchers.len()
    }

    fn notify_all_roles(&self, device_id: Option<String>) {
        for role in [
            DeviceRole::Console,
            DeviceRole::Multimedia,
            DeviceRole::Communications,
        ] {
            self.notify_watchers(DefaultDeviceChange {
                role,
                device_id: device_id.clone(),
            });
        }
    }

    fn notify_watchers(&self, change: DefaultDeviceChange) {
        let watchers: Vec<_> = self.state.lock().watchers.values().cloned().collect();
        trace!("Simulated default change {:?} -> {} watchers", change, watchers.len());
        for watcher in watchers {
            watcher(change.clone());
        }
    }
}

impl AudioBackend for SimulatedBackend {
    fn name(&self) -> &str {
        "simulated"
    }

    fn default_render_endpoint(&self) -> Result<Box<dyn AudioEndpoint>, AudioError> {
        let state = self.state.lock();
        let id = state
            .default_id
            .clone()
            .ok_or(AudioError::NoDefaultEndpoint)?;
        let device = state
            .devices
            .get(&id)
            .ok_or(AudioError::NoDefaultEndpoint)?;

        Ok(Box::new(SimulatedEndpoint {
            info: DeviceInfo {
                id: id.clone(),
                name: device.name.clone(),
            },
            state: Arc::clone(&self.state),
            listener_id: None,
            disposed: false,
        }))
    }

    fn watch_default_device(
        &self,
        callback: DefaultDeviceCallback,
    ) -> Result<Subscription, AudioError> {
        let id = {
            let mut state = self.state.lock();
            let id = state.next_id();
            state.watchers.insert(id, callback);
            id
        };

        let state = Arc::clone(&self.state);
        Ok(Subscription::new(move || {
            state.lock().watchers.remove(&id);
        }))
    }
}

/// Endpoint handle into the simulated mixer
pub struct SimulatedEndpoint {
    info: DeviceInfo,
    state: Arc<Mutex<SimState>>,
    listener_id: Option<u64>,
    disposed: bool,
}

impl SimulatedEndpoint {
    fn ensure_live(&self) -> Result<(), AudioError> {
        if self.disposed {
            Err(AudioError::Disposed(self.info.id.clone()))
        } else {
            Ok(())
        }
    }

    fn remove_listener(&mut self) {
        if let Some(listener_id) = self.listener_id.take() {
            if let Some(device) = self.state.lock().devices.get_mut(&self.info.id) {
                device.listeners.remove(&listener_id);
            }
        }
    }
}

impl AudioEndpoint for SimulatedEndpoint {
    fn info(&self) -> &DeviceInfo {
        &self.info
    }

    fn volume(&self) -> Result<f32, AudioError> {
        self.ensure_live()?;
        self.state
            .lock()
            .devices
            .get(&self.info.id)
            .map(|d| scalar_to_percent(d.scalar))
            .ok_or_else(|| AudioError::DeviceGone(self.info.id.clone()))
    }

    fn set_volume(&self, percent: f32) -> Result<(), AudioError> {
        self.ensure_live()?;
        let scalar = percent_to_scalar(percent);

        let listeners = {
            let mut state = self.state.lock();
            let device = state
                .devices
                .get_mut(&self.info.id)
                .ok_or_else(|| AudioError::DeviceGone(self.info.id.clone()))?;
            device.scalar = scalar;
            device.set_calls += 1;
            device.listeners.values().cloned().collect::<Vec<_>>()
        };

        // The OS notifies every registered client, including the one that set it
        for listener in listeners {
            listener(scalar_to_percent(scalar));
        }
        Ok(())
    }

    fn on_volume_changed(&mut self, callback: VolumeCallback) -> Result<(), AudioError> {
        self.ensure_live()?;
        self.remove_listener();

        let mut state = self.state.lock();
        let listener_id = state.next_id();
        let device = state
            .devices
            .get_mut(&self.info.id)
            .ok_or_else(|| AudioError::DeviceGone(self.info.id.clone()))?;
        device.listeners.insert(listener_id, callback);
        self.listener_id = Some(listener_id);
        Ok(())
    }

    fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.remove_listener();
        self.disposed = true;
        debug!("Simulated endpoint disposed: {}", self.info);
    }

    fn is_disposed(&self) -> bool {
        self.disposed
    }
}

impl Drop for SimulatedEndpoint {
    fn drop(&mut self) {
        self.dispose();
    }
}
