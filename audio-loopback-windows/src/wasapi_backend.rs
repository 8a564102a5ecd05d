//! [`AudioBackend`] over WASAPI.

use parking_lot::Mutex;
use windows::core::w;
use windows::Win32::Media::Audio::IAudioClient;
use windows::Win32::System::Com::{CoDecrementMTAUsage, CoIncrementMTAUsage, CLSCTX_ALL, CO_MTA_USAGE_COOKIE};
use windows::Win32::System::Threading::AvSetMmThreadCharacteristicsW;

use audio_loopback_core::models::audio_models::{AudioEndpoint, EndpointFlow};
use audio_loopback_core::models::error::AudioError;
use audio_loopback_core::traits::audio_client::{CaptureClient, RenderClient};
use audio_loopback_core::traits::backend::AudioBackend;

use crate::device_enumerator::DeviceEnumerator;
use crate::hresult::HresultError;
use crate::wasapi_client::WasapiClient;

/// WASAPI entry point.
///
/// Holds a reference on the process multithreaded apartment for its
/// lifetime, so stream workers and activation threads can make COM calls
/// without initializing COM themselves.
pub struct WasapiBackend {
    enumerator: Mutex<DeviceEnumerator>,
    mta: CO_MTA_USAGE_COOKIE,
}

// SAFETY: the MTA is kept alive for the backend's lifetime and the
// enumerator is only reached through the mutex.
unsafe impl Send for WasapiBackend {}
unsafe impl Sync for WasapiBackend {}

impl WasapiBackend {
    pub fn new() -> Result<Self, AudioError> {
        let mta = unsafe { CoIncrementMTAUsage() }.map_err(|e| HresultError::new(e.code().0, "CoIncrementMTAUsage"))?;
        let enumerator = match DeviceEnumerator::new() {
            Ok(enumerator) => enumerator,
            Err(e) => {
                unsafe {
                    let _ = CoDecrementMTAUsage(mta);
                }
                return Err(e);
            }
        };
        log::info!("WASAPI backend ready");
        Ok(Self {
            enumerator: Mutex::new(enumerator),
            mta,
        })
    }

    fn activate(device: &windows::Win32::Media::Audio::IMMDevice, flow: EndpointFlow) -> Result<WasapiClient, AudioError> {
        let client: IAudioClient = unsafe { device.Activate(CLSCTX_ALL, None) }
            .map_err(|e| HresultError::new(e.code().0, "IMMDevice::Activate(IAudioClient)"))?;
        Ok(WasapiClient::new(client, flow))
    }
}

impl AudioBackend for WasapiBackend {
    fn capture_endpoints(&self) -> Result<Vec<AudioEndpoint>, AudioError> {
        self.enumerator.lock().list_capture_devices()
    }

    fn activate_render(&self) -> Result<Box<dyn RenderClient>, AudioError> {
        let device = self.enumerator.lock().default_render_device()?;
        Ok(Box::new(Self::activate(&device, EndpointFlow::Render)?))
    }

    fn activate_capture(&self, index: usize) -> Result<Box<dyn CaptureClient>, AudioError> {
        let device = self.enumerator.lock().capture_device(index)?;
        Ok(Box::new(Self::activate(&device, EndpointFlow::Capture)?))
    }

    fn promote_current_thread(&self) {
        promote_to_pro_audio();
    }
}

impl Drop for WasapiBackend {
    fn drop(&mut self) {
        unsafe {
            let _ = CoDecrementMTAUsage(self.mta);
        }
    }
}

/// Register the calling thread with MMCSS as "Pro Audio".
///
/// The registration lives until the thread exits. Returns whether it succeeded.
pub(crate) fn promote_to_pro_audio() -> bool {
    let mut task_index: u32 = 0;
    match unsafe { AvSetMmThreadCharacteristicsW(w!("Pro Audio"), &mut task_index) } {
        Ok(_) => true,
        Err(e) => {
            log::warn!("MMCSS registration failed: {}", e);
            false
        }
    }
}
