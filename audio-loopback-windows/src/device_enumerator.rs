//! Windows audio endpoint enumeration via the MMDevice API.
//!
//! Wraps `IMMDeviceEnumerator` to list active capture endpoints with
//! friendly names and transport types, and to resolve the endpoints the
//! backend activates.

use windows::core::PROPVARIANT;
use windows::Win32::Devices::FunctionDiscovery::*;
use windows::Win32::Media::Audio::*;
use windows::Win32::System::Com::*;

use audio_loopback_core::models::audio_models::{AudioEndpoint, AudioTransportType, EndpointFlow};
use audio_loopback_core::models::error::AudioError;

use crate::hresult::HresultError;

/// Audio endpoint enumerator using the Windows MMDevice API.
pub struct DeviceEnumerator {
    enumerator: IMMDeviceEnumerator,
}

impl DeviceEnumerator {
    /// Create a new device enumerator.
    ///
    /// Requires the calling thread to be in the multithreaded apartment.
    pub fn new() -> Result<Self, AudioError> {
        unsafe {
            let enumerator: IMMDeviceEnumerator = CoCreateInstance(&MMDeviceEnumerator, None, CLSCTX_ALL)
                .map_err(|e| HresultError::new(e.code().0, "CoCreateInstance(MMDeviceEnumerator)"))?;
            Ok(Self { enumerator })
        }
    }

    /// The default console render endpoint.
    pub fn default_render_device(&self) -> Result<IMMDevice, AudioError> {
        unsafe {
            self.enumerator
                .GetDefaultAudioEndpoint(eRender, eConsole)
                .map_err(|_| AudioError::DeviceNotAvailable)
        }
    }

    /// The active capture endpoint at `index`, in [`list_capture_devices`](Self::list_capture_devices) order.
    pub fn capture_device(&self, index: usize) -> Result<IMMDevice, AudioError> {
        unsafe {
            let collection = self.active_endpoints(eCapture)?;
            let count = collection
                .GetCount()
                .map_err(|e| HresultError::new(e.code().0, "IMMDeviceCollection::GetCount"))?;
            if index >= count as usize {
                return Err(AudioError::DeviceNotAvailable);
            }
            collection
                .Item(index as u32)
                .map_err(|_| AudioError::DeviceNotAvailable)
        }
    }

    /// List active capture endpoints.
    pub fn list_capture_devices(&self) -> Result<Vec<AudioEndpoint>, AudioError> {
        unsafe {
            let collection = self.active_endpoints(eCapture)?;
            let count = collection
                .GetCount()
                .map_err(|e| HresultError::new(e.code().0, "IMMDeviceCollection::GetCount"))?;

            let default_id = self
                .enumerator
                .GetDefaultAudioEndpoint(eCapture, eConsole)
                .ok()
                .and_then(|d| d.GetId().ok())
                .and_then(|id| id.to_string().ok());

            let mut devices = Vec::with_capacity(count as usize);
            for i in 0..count {
                let device = match collection.Item(i) {
                    Ok(d) => d,
                    Err(_) => continue,
                };
                let id = match device.GetId() {
                    Ok(id) => id.to_string().unwrap_or_default(),
                    Err(_) => continue,
                };

                let store = device.OpenPropertyStore(STGM_READ).ok();
                let name = store
                    .as_ref()
                    .and_then(|s| prop_string(s.GetValue(&PKEY_Device_FriendlyName)))
                    .unwrap_or_else(|| format!("Capture Device {}", i));
                let transport = store
                    .as_ref()
                    .and_then(|s| prop_string(s.GetValue(&PKEY_Device_EnumeratorName)))
                    .map(|name| transport_from_enumerator(&name))
                    .unwrap_or(AudioTransportType::Unknown);

                devices.push(AudioEndpoint {
                    is_default: default_id.as_deref() == Some(id.as_str()),
                    id,
                    name,
                    flow: EndpointFlow::Capture,
                    transport_type: Some(transport),
                });
            }
            log::debug!("enumerated {} capture endpoints", devices.len());
            Ok(devices)
        }
    }

    unsafe fn active_endpoints(&self, flow: EDataFlow) -> Result<IMMDeviceCollection, AudioError> {
        self.enumerator
            .EnumAudioEndpoints(flow, DEVICE_STATE_ACTIVE)
            .map_err(|e| HresultError::new(e.code().0, "EnumAudioEndpoints").into())
    }
}

/// String value of a property read, `None` when missing or empty.
fn prop_string(prop: windows::core::Result<PROPVARIANT>) -> Option<String> {
    let value = prop.ok()?.to_string();
    (!value.is_empty()).then_some(value)
}

fn transport_from_enumerator(name: &str) -> AudioTransportType {
    if name.contains("BTHLEENUM") {
        AudioTransportType::BluetoothLE
    } else if name.contains("BTHENUM") {
        AudioTransportType::Bluetooth
    } else if name.contains("USB") {
        AudioTransportType::Usb
    } else if name.contains("ROOT") || name.contains("SWD") {
        AudioTransportType::Virtual
    } else {
        AudioTransportType::BuiltIn
    }
}
