//! WASAPI shared-mode, event-driven audio client.
//!
//! Wraps `IAudioClient` plus its render or capture service behind the
//! core `RenderClient` / `CaptureClient` traits.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use windows::core::{Interface, PCWSTR};
use windows::Win32::Foundation::{CloseHandle, HANDLE, WAIT_OBJECT_0};
use windows::Win32::Media::Audio::*;
use windows::Win32::System::Com::CoTaskMemFree;
use windows::Win32::System::Threading::{CreateEventW, WaitForSingleObject};

use audio_loopback_core::models::audio_models::EndpointFlow;
use audio_loopback_core::models::error::AudioError;
use audio_loopback_core::models::format::WaveFormat;
use audio_loopback_core::session::event::AudioEvent;
use audio_loopback_core::storage::wav_header;
use audio_loopback_core::traits::audio_client::{
    AudioClient, CaptureClient, ClientProperties, PacketFlags, RenderClient, StreamCategory,
};

use crate::hresult::HresultError;
use crate::wasapi_backend::promote_to_pro_audio;

/// Size of the base `WAVEFORMATEX` structure.
const WAVEFORMATEX_SIZE: usize = 18;

/// How long the event bridge blocks before re-checking for shutdown.
const BRIDGE_POLL_MS: u32 = 100;

/// Nanoseconds per `REFERENCE_TIME` unit.
const HNS_PER_NANO: u128 = 100;

fn hr(context: &'static str) -> impl FnOnce(windows::core::Error) -> AudioError {
    move |e| HresultError::new(e.code().0, context).into()
}

/// An `IAudioClient` activated on one endpoint.
pub struct WasapiClient {
    client: IAudioClient,
    flow: EndpointFlow,
    format: Option<WaveFormat>,
    render: Option<IAudioRenderClient>,
    capture: Option<IAudioCaptureClient>,
    bridge: Option<EventBridge>,
}

// SAFETY: the client is created in the multithreaded apartment and WASAPI
// interfaces are free-threaded; the wrapper is only used by one thread at a time.
unsafe impl Send for WasapiClient {}

impl WasapiClient {
    pub(crate) fn new(client: IAudioClient, flow: EndpointFlow) -> Self {
        Self {
            client,
            flow,
            format: None,
            render: None,
            capture: None,
            bridge: None,
        }
    }

    fn block_align(&self) -> Result<usize, AudioError> {
        self.format
            .map(|f| f.frame_bytes())
            .ok_or_else(|| HresultError::new(crate::hresult::AUDCLNT_E_NOT_INITIALIZED as i32, "stream format").into())
    }
}

impl AudioClient for WasapiClient {
    fn set_client_properties(&mut self, properties: &ClientProperties) -> Result<(), AudioError> {
        let category = match properties.category {
            StreamCategory::Other => AudioCategory_Other,
            StreamCategory::ForegroundOnlyMedia => AudioCategory_ForegroundOnlyMedia,
            StreamCategory::Communications => AudioCategory_Communications,
            StreamCategory::GameMedia => AudioCategory_GameMedia,
        };
        let props = AudioClientProperties {
            cbSize: std::mem::size_of::<AudioClientProperties>() as u32,
            bIsOffload: properties.offload.into(),
            eCategory: category,
            Options: if properties.raw {
                AUDCLNT_STREAMOPTIONS_RAW
            } else {
                AUDCLNT_STREAMOPTIONS_NONE
            },
        };
        unsafe {
            // IAudioClient2 is Windows 8+; older systems keep the defaults.
            match self.client.cast::<IAudioClient2>() {
                Ok(client2) => client2
                    .SetClientProperties(&props)
                    .map_err(hr("IAudioClient2::SetClientProperties")),
                Err(_) => {
                    log::debug!("IAudioClient2 unavailable, client properties not applied");
                    Ok(())
                }
            }
        }
    }

    fn mix_format(&self) -> Result<WaveFormat, AudioError> {
        unsafe {
            let ptr = self.client.GetMixFormat().map_err(hr("IAudioClient::GetMixFormat"))?;
            let extra = (*ptr).cbSize as usize;
            let bytes = std::slice::from_raw_parts(ptr as *const u8, WAVEFORMATEX_SIZE + extra).to_vec();
            CoTaskMemFree(Some(ptr as *const _));
            wav_header::decode_format(&bytes)
        }
    }

    fn initialize(&mut self, format: &WaveFormat, buffer_duration: Duration) -> Result<(), AudioError> {
        let mut bytes = wav_header::encode_format(format);
        if bytes.len() < WAVEFORMATEX_SIZE {
            // PCM fmt chunks omit cbSize; WASAPI always reads it.
            bytes.resize(WAVEFORMATEX_SIZE, 0);
        }
        let hns = (buffer_duration.as_nanos() / HNS_PER_NANO) as i64;

        unsafe {
            self.client
                .Initialize(
                    AUDCLNT_SHAREMODE_SHARED,
                    AUDCLNT_STREAMFLAGS_EVENTCALLBACK | AUDCLNT_STREAMFLAGS_NOPERSIST,
                    hns,
                    0,
                    bytes.as_ptr() as *const WAVEFORMATEX,
                    None,
                )
                .map_err(hr("IAudioClient::Initialize"))?;

            match self.flow {
                EndpointFlow::Render => {
                    self.render = Some(self.client.GetService().map_err(hr("GetService(IAudioRenderClient)"))?);
                }
                EndpointFlow::Capture => {
                    self.capture = Some(self.client.GetService().map_err(hr("GetService(IAudioCaptureClient)"))?);
                }
            }
        }
        self.format = Some(*format);
        Ok(())
    }

    fn buffer_size(&self) -> Result<u32, AudioError> {
        unsafe { self.client.GetBufferSize().map_err(hr("IAudioClient::GetBufferSize")) }
    }

    fn device_period(&self) -> Result<Duration, AudioError> {
        let mut default_period: i64 = 0;
        unsafe {
            self.client
                .GetDevicePeriod(Some(&mut default_period), None)
                .map_err(hr("IAudioClient::GetDevicePeriod"))?;
        }
        Ok(Duration::from_nanos(default_period.max(0) as u64 * HNS_PER_NANO as u64))
    }

    fn set_event_handle(&mut self, event: AudioEvent) -> Result<(), AudioError> {
        let bridge = EventBridge::start(event)?;
        unsafe {
            self.client
                .SetEventHandle(bridge.handle.0)
                .map_err(hr("IAudioClient::SetEventHandle"))?;
        }
        self.bridge = Some(bridge);
        Ok(())
    }

    fn start(&mut self) -> Result<(), AudioError> {
        unsafe { self.client.Start().map_err(hr("IAudioClient::Start")) }
    }

    fn stop(&mut self) -> Result<(), AudioError> {
        unsafe { self.client.Stop().map_err(hr("IAudioClient::Stop")) }
    }
}

impl RenderClient for WasapiClient {
    fn current_padding(&self) -> Result<u32, AudioError> {
        unsafe { self.client.GetCurrentPadding().map_err(hr("IAudioClient::GetCurrentPadding")) }
    }

    fn write_buffer(&mut self, frames: u32, data: Option<&[u8]>) -> Result<(), AudioError> {
        let block_align = self.block_align()?;
        let render = self
            .render
            .as_ref()
            .ok_or_else(|| AudioError::from(HresultError::new(crate::hresult::AUDCLNT_E_NOT_INITIALIZED as i32, "IAudioRenderClient")))?;
        unsafe {
            let buffer = render.GetBuffer(frames).map_err(hr("IAudioRenderClient::GetBuffer"))?;
            let flags = match data {
                Some(data) => {
                    let len = (frames as usize * block_align).min(data.len());
                    std::ptr::copy_nonoverlapping(data.as_ptr(), buffer, len);
                    0
                }
                None => AUDCLNT_BUFFERFLAGS_SILENT.0 as u32,
            };
            render
                .ReleaseBuffer(frames, flags)
                .map_err(hr("IAudioRenderClient::ReleaseBuffer"))
        }
    }
}

impl CaptureClient for WasapiClient {
    fn read_packet(&mut self, sink: &mut dyn FnMut(&[u8], PacketFlags)) -> Result<u32, AudioError> {
        let block_align = self.block_align()?;
        let capture = self
            .capture
            .as_ref()
            .ok_or_else(|| AudioError::from(HresultError::new(crate::hresult::AUDCLNT_E_NOT_INITIALIZED as i32, "IAudioCaptureClient")))?;
        unsafe {
            let pending = capture
                .GetNextPacketSize()
                .map_err(hr("IAudioCaptureClient::GetNextPacketSize"))?;
            if pending == 0 {
                return Ok(0);
            }

            let mut data: *mut u8 = std::ptr::null_mut();
            let mut frames: u32 = 0;
            let mut flags: u32 = 0;
            capture
                .GetBuffer(&mut data, &mut frames, &mut flags, None, None)
                .map_err(hr("IAudioCaptureClient::GetBuffer"))?;

            if frames > 0 && !data.is_null() {
                let packet = std::slice::from_raw_parts(data, frames as usize * block_align);
                sink(
                    packet,
                    PacketFlags {
                        silent: flags & AUDCLNT_BUFFERFLAGS_SILENT.0 as u32 != 0,
                        discontinuity: flags & AUDCLNT_BUFFERFLAGS_DATA_DISCONTINUITY.0 as u32 != 0,
                    },
                );
            }
            capture
                .ReleaseBuffer(frames)
                .map_err(hr("IAudioCaptureClient::ReleaseBuffer"))?;
            Ok(frames)
        }
    }
}

impl Drop for WasapiClient {
    fn drop(&mut self) {
        unsafe {
            let _ = self.client.Stop();
        }
        // Stop the bridge only after the client can no longer signal it.
        self.bridge.take();
    }
}

struct EventHandle(HANDLE);

// SAFETY: kernel event handles may be waited on and signalled from any thread.
unsafe impl Send for EventHandle {}
unsafe impl Sync for EventHandle {}

const PRIORITY_PENDING: u8 = 0;
const PRIORITY_PRO_AUDIO: u8 = 1;
const PRIORITY_NORMAL: u8 = 2;

/// Forwards a Win32 auto-reset event into an [`AudioEvent`].
///
/// WASAPI can only signal kernel events; the stream worker waits on a channel.
/// The forwarding thread sits on the real-time path, so it is promoted to
/// MMCSS "Pro Audio" like the worker before it forwards anything.
struct EventBridge {
    handle: Arc<EventHandle>,
    running: Arc<AtomicBool>,
    priority: Arc<AtomicU8>,
    thread: Option<JoinHandle<()>>,
}

impl EventBridge {
    fn start(event: AudioEvent) -> Result<Self, AudioError> {
        let handle = unsafe { CreateEventW(None, false, false, PCWSTR::null()) }.map_err(hr("CreateEventW"))?;
        let handle = Arc::new(EventHandle(handle));
        let running = Arc::new(AtomicBool::new(true));
        let priority = Arc::new(AtomicU8::new(PRIORITY_PENDING));

        let thread = {
            let (handle, running, priority) = (Arc::clone(&handle), Arc::clone(&running), Arc::clone(&priority));
            thread::Builder::new()
                .name("wasapi-event-bridge".into())
                .spawn(move || {
                    let level = if promote_to_pro_audio() {
                        PRIORITY_PRO_AUDIO
                    } else {
                        PRIORITY_NORMAL
                    };
                    priority.store(level, Ordering::SeqCst);
                    while running.load(Ordering::SeqCst) {
                        if unsafe { WaitForSingleObject(handle.0, BRIDGE_POLL_MS) } == WAIT_OBJECT_0 {
                            event.signal();
                        }
                    }
                })
                .map_err(|e| AudioError::Thread(format!("failed to spawn event bridge: {}", e)))?
        };

        Ok(Self {
            handle,
            running,
            priority,
            thread: Some(thread),
        })
    }

    /// Whether the forwarding thread has finished its MMCSS registration attempt.
    fn priority_settled(&self) -> bool {
        self.priority.load(Ordering::SeqCst) != PRIORITY_PENDING
    }
}

impl Drop for EventBridge {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
        unsafe {
            let _ = CloseHandle(self.handle.0);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use windows::Win32::System::Threading::SetEvent;

    use super::*;

    #[test]
    fn bridge_is_promoted_before_forwarding_signals() {
        let event = AudioEvent::new();
        let bridge = EventBridge::start(event.clone()).unwrap();

        unsafe { SetEvent(bridge.handle.0) }.unwrap();
        assert!(event.wait_timeout(Duration::from_secs(5)));
        assert!(bridge.priority_settled());
    }
}
