//! Windows Core Audio backend (MMDevice API + IAudioEndpointVolume)
//!
//! All objects are created in the multithreaded apartment, which Core Audio
//! supports for cross-thread use. COM is initialized lazily on whichever
//! runtime thread first touches the backend.

use std::sync::Arc;
use tracing::{debug, warn};
use windows::core::{implement, HRESULT, PCWSTR, PWSTR};
use windows::Win32::Devices::FunctionDiscovery::PKEY_Device_FriendlyName;
use windows::Win32::Media::Audio::Endpoints::{
    IAudioEndpointVolume, IAudioEndpointVolumeCallback, IAudioEndpointVolumeCallback_Impl,
};
use windows::Win32::Media::Audio::{
    eCommunications, eConsole, eMultimedia, eRender, EDataFlow, ERole, IMMDevice,
    IMMDeviceEnumerator, IMMNotificationClient, IMMNotificationClient_Impl, MMDeviceEnumerator,
    AUDIO_VOLUME_NOTIFICATION_DATA, DEVICE_STATE,
};
use windows::Win32::System::Com::StructuredStorage::PropVariantToStringAlloc;
use windows::Win32::System::Com::{
    CoCreateInstance, CoInitializeEx, CoTaskMemFree, CLSCTX_ALL, COINIT_MULTITHREADED, STGM_READ,
};
use windows::Win32::UI::Shell::PropertiesSystem::PROPERTYKEY;

use super::{
    percent_to_scalar, scalar_to_percent, AudioBackend, AudioEndpoint, AudioError,
    DefaultDeviceCallback, DefaultDeviceChange, DeviceInfo, DeviceRole, Subscription,
    VolumeCallback,
};

/// HRESULT_FROM_WIN32(ERROR_NOT_FOUND), returned when no default device exists
const E_NOTFOUND: HRESULT = HRESULT(0x8007_0490_u32 as i32);

/// Initialize COM (MTA) once per thread
fn ensure_com() {
    thread_local! {
        static COM_INIT: () = {
            // S_FALSE / RPC_E_CHANGED_MODE both leave us with a usable apartment
            let _ = unsafe { CoInitializeEx(None, COINIT_MULTITHREADED) };
        };
    }
    COM_INIT.with(|_| {});
}

/// Free-threaded COM pointer that may cross threads
struct Mta<T>(T);

// SAFETY: Core Audio interfaces created in the MTA are free-threaded.
unsafe impl<T> Send for Mta<T> {}
unsafe impl<T> Sync for Mta<T> {}

impl<T> Mta<T> {
    fn get(&self) -> &T {
        &self.0
    }
}

/// Take ownership of a CoTaskMem-allocated wide string
unsafe fn take_pwstr(value: PWSTR) -> String {
    let text = value.to_string().unwrap_or_default();
    CoTaskMemFree(Some(value.0 as *const _));
    text
}

fn friendly_name(device: &IMMDevice) -> Result<String, AudioError> {
    unsafe {
        let store = device.OpenPropertyStore(STGM_READ)?;
        let value = store.GetValue(&PKEY_Device_FriendlyName)?;
        let name = PropVariantToStringAlloc(&value)?;
        Ok(take_pwstr(name))
    }
}

fn map_role(role: ERole) -> Option<DeviceRole> {
    if role == eConsole {
        Some(DeviceRole::Console)
    } else if role == eMultimedia {
        Some(DeviceRole::Multimedia)
    } else if role == eCommunications {
        Some(DeviceRole::Communications)
    } else {
        None
    }
}

/// Core Audio backend
pub struct WasapiBackend {
    enumerator: Mta<IMMDeviceEnumerator>,
}

impl WasapiBackend {
    pub fn new() -> Result<Self, AudioError> {
        ensure_com();
        let enumerator: IMMDeviceEnumerator =
            unsafe { CoCreateInstance(&MMDeviceEnumerator, None, CLSCTX_ALL)? };
        debug!("MMDeviceEnumerator created");
        Ok(Self {
            enumerator: Mta(enumerator),
        })
    }
}

impl AudioBackend for WasapiBackend {
    fn name(&self) -> &str {
        "wasapi"
    }

    fn default_render_endpoint(&self) -> Result<Box<dyn AudioEndpoint>, AudioError> {
        ensure_com();
        let device = unsafe { self.enumerator.get().GetDefaultAudioEndpoint(eRender, eMultimedia) }
            .map_err(|e| {
                if e.code() == E_NOTFOUND {
                    AudioError::NoDefaultEndpoint
                } else {
                    AudioError::from(e)
                }
            })?;

        let id = unsafe { take_pwstr(device.GetId()?) };
        let name = friendly_name(&device).unwrap_or_else(|e| {
            debug!("Friendly name unavailable for {}: {}", id, e);
            id.clone()
        });
        let volume: IAudioEndpointVolume = unsafe { device.Activate(CLSCTX_ALL, None)? };

        Ok(Box::new(WasapiEndpoint {
            info: DeviceInfo { id, name },
            device: Some(Mta(device)),
            volume: Some(Mta(volume)),
            notifier: None,
            disposed: false,
        }))
    }

    fn watch_default_device(
        &self,
        callback: DefaultDeviceCallback,
    ) -> Result<Subscription, AudioError> {
        ensure_com();
        let client: IMMNotificationClient = DefaultDeviceNotifier { callback }.into();
        unsafe {
            self.enumerator
                .get()
                .RegisterEndpointNotificationCallback(&client)?
        };

        let enumerator = Mta(self.enumerator.get().clone());
        let client = Mta(client);
        Ok(Subscription::new(move || {
            ensure_com();
            let result = unsafe {
                enumerator
                    .get()
                    .UnregisterEndpointNotificationCallback(client.get())
            };
            if let Err(e) = result {
                warn!("Failed to unregister default device notifications: {}", e);
            }
        }))
    }
}

/// One bound render endpoint
pub struct WasapiEndpoint {
    info: DeviceInfo,
    device: Option<Mta<IMMDevice>>,
    volume: Option<Mta<IAudioEndpointVolume>>,
    notifier: Option<Mta<IAudioEndpointVolumeCallback>>,
    disposed: bool,
}

impl WasapiEndpoint {
    fn live_volume(&self) -> Result<&IAudioEndpointVolume, AudioError> {
        match (&self.volume, self.disposed) {
            (Some(volume), false) => Ok(volume.get()),
            _ => Err(AudioError::Disposed(self.info.id.clone())),
        }
    }

    fn unregister_notifier(&mut self) {
        if let (Some(volume), Some(notifier)) = (&self.volume, self.notifier.take()) {
            let result = unsafe { volume.get().UnregisterControlChangeNotify(notifier.get()) };
            if let Err(e) = result {
                warn!("Failed to unregister volume notifications for {}: {}", self.info, e);
            }
        }
    }
}

impl AudioEndpoint for WasapiEndpoint {
    fn info(&self) -> &DeviceInfo {
        &self.info
    }

    fn volume(&self) -> Result<f32, AudioError> {
        ensure_com();
        let scalar = unsafe { self.live_volume()?.GetMasterVolumeLevelScalar()? };
        Ok(scalar_to_percent(scalar))
    }

    fn set_volume(&self, percent: f32) -> Result<(), AudioError> {
        ensure_com();
        let scalar = percent_to_scalar(percent);
        unsafe {
            self.live_volume()?
                .SetMasterVolumeLevelScalar(scalar, std::ptr::null())?
        };
        Ok(())
    }

    fn on_volume_changed(&mut self, callback: VolumeCallback) -> Result<(), AudioError> {
        ensure_com();
        self.live_volume()?;
        self.unregister_notifier();

        let notifier: IAudioEndpointVolumeCallback = VolumeNotifier { callback }.into();
        unsafe { self.live_volume()?.RegisterControlChangeNotify(&notifier)? };
        self.notifier = Some(Mta(notifier));
        Ok(())
    }

    fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        ensure_com();
        self.unregister_notifier();
        self.volume = None;
        self.device = None;
        self.disposed = true;
        debug!("Released endpoint {}", self.info);
    }

    fn is_disposed(&self) -> bool {
        self.disposed
    }
}

impl Drop for WasapiEndpoint {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// IAudioEndpointVolumeCallback forwarding master volume changes
#[implement(IAudioEndpointVolumeCallback)]
struct VolumeNotifier {
    callback: VolumeCallback,
}

impl IAudioEndpointVolumeCallback_Impl for VolumeNotifier {
    fn OnNotify(&self, pnotify: *mut AUDIO_VOLUME_NOTIFICATION_DATA) -> windows::core::Result<()> {
        if let Some(data) = unsafe { pnotify.as_ref() } {
            (self.callback)(scalar_to_percent(data.fMasterVolume));
        }
        Ok(())
    }
}

/// IMMNotificationClient forwarding render default changes
#[implement(IMMNotificationClient)]
struct DefaultDeviceNotifier {
    callback: DefaultDeviceCallback,
}

impl IMMNotificationClient_Impl for DefaultDeviceNotifier {
    fn OnDeviceStateChanged(
        &self,
        _pwstrdeviceid: &PCWSTR,
        _dwnewstate: DEVICE_STATE,
    ) -> windows::core::Result<()> {
        Ok(())
    }

    fn OnDeviceAdded(&self, _pwstrdeviceid: &PCWSTR) -> windows::core::Result<()> {
        Ok(())
    }

    fn OnDeviceRemoved(&self, _pwstrdeviceid: &PCWSTR) -> windows::core::Result<()> {
        Ok(())
    }

    fn OnDefaultDeviceChanged(
        &self,
        flow: EDataFlow,
        role: ERole,
        pwstrdefaultdeviceid: &PCWSTR,
    ) -> windows::core::Result<()> {
        if flow != eRender {
            return Ok(());
        }
        let Some(role) = map_role(role) else {
            return Ok(());
        };

        let device_id = if pwstrdefaultdeviceid.is_null() {
            None
        } else {
            unsafe { pwstrdefaultdeviceid.to_string() }.ok()
        };

        (self.callback)(DefaultDeviceChange { role, device_id });
        Ok(())
    }

    fn OnPropertyValueChanged(
        &self,
        _pwstrdeviceid: &PCWSTR,
        _key: &PROPERTYKEY,
    ) -> windows::core::Result<()> {
        Ok(())
    }
}
