use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use parking_lot::Mutex;

use crate::models::audio_models::AudioEndpoint;
use crate::models::error::AudioError;
use crate::models::format::WaveFormat;
use crate::session::event::AudioEvent;
use crate::traits::audio_client::{AudioClient, CaptureClient, ClientProperties, PacketFlags, RenderClient};
use crate::traits::backend::AudioBackend;

/// Software audio engine driven by a wall-clock timer.
///
/// Render clients record everything written to them; capture clients
/// deliver packets queued with [`push_capture`](Self::push_capture). Faults
/// can be injected into the next device call to exercise error handling.
pub struct SimulatedBackend {
    shared: Arc<SimShared>,
}

#[derive(Default)]
struct SimShared {
    render_format: Mutex<Option<WaveFormat>>,
    capture_format: Mutex<Option<WaveFormat>>,
    endpoints: Mutex<Vec<AudioEndpoint>>,
    period: Mutex<Duration>,
    rendered: Mutex<Vec<u8>>,
    silent_frames: AtomicU32,
    padding: AtomicU32,
    packets: Mutex<VecDeque<(Vec<u8>, PacketFlags)>>,
    render_faults: Mutex<VecDeque<AudioError>>,
    capture_faults: Mutex<VecDeque<AudioError>>,
    activation_faults: Mutex<VecDeque<AudioError>>,
    render_activations: AtomicUsize,
    capture_activations: AtomicUsize,
    last_capture_index: AtomicUsize,
}

impl SimulatedBackend {
    /// Float 48 kHz stereo render, float 48 kHz mono capture, one microphone, 10 ms period.
    pub fn new() -> Self {
        Self::with_formats(WaveFormat::ieee_float(48000, 2), WaveFormat::ieee_float(48000, 1))
    }

    pub fn with_formats(render: WaveFormat, capture: WaveFormat) -> Self {
        let shared = SimShared::default();
        *shared.render_format.lock() = Some(render);
        *shared.capture_format.lock() = Some(capture);
        *shared.endpoints.lock() = vec![AudioEndpoint::capture("sim-mic-0", "Simulated Microphone", true)];
        *shared.period.lock() = Duration::from_millis(10);
        Self {
            shared: Arc::new(shared),
        }
    }

    pub fn set_period(&self, period: Duration) {
        *self.shared.period.lock() = period;
    }

    pub fn set_endpoints(&self, endpoints: Vec<AudioEndpoint>) {
        *self.shared.endpoints.lock() = endpoints;
    }

    /// Frames reported as still queued on render clients.
    pub fn set_render_padding(&self, frames: u32) {
        self.shared.padding.store(frames, Ordering::SeqCst);
    }

    /// Queue one captured packet.
    pub fn push_capture(&self, data: Vec<u8>, flags: PacketFlags) {
        self.shared.packets.lock().push_back((data, flags));
    }

    pub fn pending_capture_packets(&self) -> usize {
        self.shared.packets.lock().len()
    }

    /// Non-silent bytes handed to render clients, in order.
    pub fn rendered(&self) -> Vec<u8> {
        self.shared.rendered.lock().clone()
    }

    pub fn clear_rendered(&self) {
        self.shared.rendered.lock().clear();
    }

    pub fn silent_frames(&self) -> u32 {
        self.shared.silent_frames.load(Ordering::SeqCst)
    }

    /// Fail the next render pass with `error`.
    pub fn fail_next_render(&self, error: AudioError) {
        self.shared.render_faults.lock().push_back(error);
    }

    /// Fail the next capture pass with `error`.
    pub fn fail_next_capture(&self, error: AudioError) {
        self.shared.capture_faults.lock().push_back(error);
    }

    /// Fail the next client activation with `error`.
    pub fn fail_next_activation(&self, error: AudioError) {
        self.shared.activation_faults.lock().push_back(error);
    }

    /// Report the render endpoint as invalidated on its next pass.
    pub fn invalidate_render(&self) {
        self.fail_next_render(AudioError::ResourcesInvalidated);
    }

    pub fn render_activations(&self) -> usize {
        self.shared.render_activations.load(Ordering::SeqCst)
    }

    pub fn capture_activations(&self) -> usize {
        self.shared.capture_activations.load(Ordering::SeqCst)
    }

    pub fn last_capture_index(&self) -> usize {
        self.shared.last_capture_index.load(Ordering::SeqCst)
    }
}

impl Default for SimulatedBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioBackend for SimulatedBackend {
    fn capture_endpoints(&self) -> Result<Vec<AudioEndpoint>, AudioError> {
        Ok(self.shared.endpoints.lock().clone())
    }

    fn activate_render(&self) -> Result<Box<dyn RenderClient>, AudioError> {
        if let Some(e) = self.shared.activation_faults.lock().pop_front() {
            return Err(e);
        }
        let mix_format = (*self.shared.render_format.lock()).ok_or(AudioError::DeviceNotAvailable)?;
        self.shared.render_activations.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(SimulatedClient::new(Arc::clone(&self.shared), mix_format)))
    }

    fn activate_capture(&self, index: usize) -> Result<Box<dyn CaptureClient>, AudioError> {
        if let Some(e) = self.shared.activation_faults.lock().pop_front() {
            return Err(e);
        }
        if index >= self.shared.endpoints.lock().len() {
            return Err(AudioError::DeviceNotAvailable);
        }
        let mix_format = (*self.shared.capture_format.lock()).ok_or(AudioError::DeviceNotAvailable)?;
        self.shared.capture_activations.fetch_add(1, Ordering::SeqCst);
        self.shared.last_capture_index.store(index, Ordering::SeqCst);
        Ok(Box::new(SimulatedClient::new(Arc::clone(&self.shared), mix_format)))
    }
}

/// Periodic event source standing in for the audio engine.
struct Clock {
    stop: Sender<()>,
    thread: JoinHandle<()>,
}

impl Clock {
    fn start(event: AudioEvent, period: Duration) -> Result<Self, AudioError> {
        let (stop, stopped) = bounded::<()>(0);
        let thread = thread::Builder::new()
            .name("simulated-clock".into())
            .spawn(move || loop {
                match stopped.recv_timeout(period) {
                    Err(RecvTimeoutError::Timeout) => event.signal(),
                    _ => break,
                }
            })
            .map_err(|e| AudioError::Thread(format!("failed to spawn clock: {}", e)))?;
        Ok(Self { stop, thread })
    }

    fn halt(self) {
        drop(self.stop);
        let _ = self.thread.join();
    }
}

struct SimulatedClient {
    shared: Arc<SimShared>,
    mix_format: WaveFormat,
    format: Option<WaveFormat>,
    buffer_frames: u32,
    event: Option<AudioEvent>,
    clock: Option<Clock>,
}

impl SimulatedClient {
    fn new(shared: Arc<SimShared>, mix_format: WaveFormat) -> Self {
        Self {
            shared,
            mix_format,
            format: None,
            buffer_frames: 0,
            event: None,
            clock: None,
        }
    }

    fn initialized_format(&self) -> Result<WaveFormat, AudioError> {
        self.format.ok_or(AudioError::Os {
            code: 0x8889_0001,
            context: "client not initialized".into(),
        })
    }

    fn take_fault(faults: &Mutex<VecDeque<AudioError>>) -> Result<(), AudioError> {
        match faults.lock().pop_front() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl AudioClient for SimulatedClient {
    fn set_client_properties(&mut self, _properties: &ClientProperties) -> Result<(), AudioError> {
        Ok(())
    }

    fn mix_format(&self) -> Result<WaveFormat, AudioError> {
        Ok(self.mix_format)
    }

    fn initialize(&mut self, format: &WaveFormat, buffer_duration: Duration) -> Result<(), AudioError> {
        if format.samples_per_sec != self.mix_format.samples_per_sec {
            return Err(AudioError::UnsupportedFormat(format!(
                "{} Hz does not match the {} Hz mix format",
                format.samples_per_sec, self.mix_format.samples_per_sec
            )));
        }
        let period_frames = format.frames_per_period(*self.shared.period.lock());
        self.buffer_frames = format.frames_per_period(buffer_duration).max(period_frames);
        self.format = Some(*format);
        Ok(())
    }

    fn buffer_size(&self) -> Result<u32, AudioError> {
        self.initialized_format()?;
        Ok(self.buffer_frames)
    }

    fn device_period(&self) -> Result<Duration, AudioError> {
        Ok(*self.shared.period.lock())
    }

    fn set_event_handle(&mut self, event: AudioEvent) -> Result<(), AudioError> {
        self.event = Some(event);
        Ok(())
    }

    fn start(&mut self) -> Result<(), AudioError> {
        self.initialized_format()?;
        if self.clock.is_some() {
            return Ok(());
        }
        let event = self.event.clone().ok_or(AudioError::Os {
            code: 0x8889_0014,
            context: "event handle not set".into(),
        })?;
        self.clock = Some(Clock::start(event, *self.shared.period.lock())?);
        Ok(())
    }

    fn stop(&mut self) -> Result<(), AudioError> {
        if let Some(clock) = self.clock.take() {
            clock.halt();
        }
        Ok(())
    }
}

impl RenderClient for SimulatedClient {
    fn current_padding(&self) -> Result<u32, AudioError> {
        Self::take_fault(&self.shared.render_faults)?;
        Ok(self.shared.padding.load(Ordering::SeqCst).min(self.buffer_frames))
    }

    fn write_buffer(&mut self, frames: u32, data: Option<&[u8]>) -> Result<(), AudioError> {
        let format = self.initialized_format()?;
        match data {
            Some(data) => {
                if data.len() != frames as usize * format.frame_bytes() {
                    return Err(AudioError::InvalidArgument(format!(
                        "{} bytes for {} frames",
                        data.len(),
                        frames
                    )));
                }
                self.shared.rendered.lock().extend_from_slice(data);
            }
            None => {
                self.shared.silent_frames.fetch_add(frames, Ordering::SeqCst);
            }
        }
        Ok(())
    }
}

impl CaptureClient for SimulatedClient {
    fn read_packet(&mut self, sink: &mut dyn FnMut(&[u8], PacketFlags)) -> Result<u32, AudioError> {
        Self::take_fault(&self.shared.capture_faults)?;
        let format = self.initialized_format()?;
        let Some((data, flags)) = self.shared.packets.lock().pop_front() else {
            return Ok(0);
        };
        sink(&data, flags);
        Ok((data.len() / format.frame_bytes()).max(1) as u32)
    }
}

impl Drop for SimulatedClient {
    fn drop(&mut self) {
        if let Some(clock) = self.clock.take() {
            clock.halt();
        }
    }
}

/// Poll `condition` every few milliseconds for up to five seconds.
#[cfg(test)]
pub(crate) fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..1000 {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    false
}
