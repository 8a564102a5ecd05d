use std::ops::ControlFlow;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::models::audio_models::StreamDiagnostics;
use crate::models::config::PipelineConfiguration;
use crate::models::error::{AudioError, ErrorClass};
use crate::models::format::WaveFormat;
use crate::models::state::DeviceState;
use crate::processing::circular_buffer::CircularAudioBuffer;
use crate::processing::sample_queue::SampleSource;
use crate::processing::tone_generator::ToneSampleGenerator;
use crate::processing::wave_generator::WaveSampleGenerator;
use crate::storage::wav_reader::WavData;
use crate::traits::audio_client::{ClientProperties, RenderClient, StreamCategory};
use crate::traits::backend::AudioBackend;
use crate::traits::listener::DeviceStateListener;

use super::command_queue::Command;
use super::event::AudioEvent;
use super::notifier::{DeviceStateNotifier, ListenerToken};
use super::stream::{spawn_activation, ActivationHandle, StreamControl, StreamInfo};
use super::worker::{spawn_stream_worker, StreamHandler, WorkerContext};

/// Event-driven renderer on the default output endpoint.
///
/// Plays either a static [`SampleSource`] (wave file, tone) or, in loopback
/// mode, whatever the capture side has pushed into a [`CircularAudioBuffer`].
///
/// ```text
/// initialize_async ─→ [activation thread] ─→ Initialized
/// start_playback / pause_playback / stop_playback ─→ CommandQueue ─→ [render worker]
/// [device event] ─→ [render worker] ─→ padding → fill → RenderClient
/// ```
///
/// Owner operations validate the current state, move to the transitional
/// state (`Starting`, `Pausing`, `Stopping`) and return immediately; the
/// worker completes the transition.
pub struct AudioRenderer {
    shared: Arc<RenderShared>,
}

struct RenderShared {
    config: PipelineConfiguration,
    backend: Arc<dyn AudioBackend>,
    notifier: DeviceStateNotifier,
    control: StreamControl,
    source: Mutex<Option<Box<dyn SampleSource>>>,
    capture_buffer: Mutex<Option<Arc<CircularAudioBuffer>>>,
    loopback: AtomicBool,
}

impl AudioRenderer {
    pub fn new(backend: Arc<dyn AudioBackend>, config: PipelineConfiguration) -> Self {
        Self {
            shared: Arc::new(RenderShared {
                config,
                backend,
                notifier: DeviceStateNotifier::new("render"),
                control: StreamControl::new(),
                source: Mutex::new(None),
                capture_buffer: Mutex::new(None),
                loopback: AtomicBool::new(false),
            }),
        }
    }

    pub fn state(&self) -> DeviceState {
        self.shared.notifier.state()
    }

    pub fn last_error(&self) -> Option<AudioError> {
        self.shared.notifier.last_error()
    }

    pub fn subscribe(&self, listener: Arc<dyn DeviceStateListener>) -> ListenerToken {
        self.shared.notifier.subscribe(listener)
    }

    pub fn unsubscribe(&self, token: ListenerToken) -> bool {
        self.shared.notifier.unsubscribe(token)
    }

    /// Activate the default render endpoint on a background thread.
    pub fn initialize_async(&self) -> Result<ActivationHandle, AudioError> {
        let state = self.state();
        if state != DeviceState::Uninitialized {
            return Err(AudioError::InvalidState {
                operation: "initialize_async",
                state,
            });
        }
        self.shared.spawn_activation()
    }

    /// Tear down the current stream (if any) and activate again.
    ///
    /// This is the way out of `InError`, and the response to a default
    /// device change.
    pub fn reinitialize(&self) -> Result<ActivationHandle, AudioError> {
        self.shared.control.stop_worker();
        self.shared.notifier.reset(None, true);
        self.shared.spawn_activation()
    }

    /// Parameters of the initialized stream.
    pub fn stream_info(&self) -> Option<StreamInfo> {
        self.shared.control.info()
    }

    pub fn mix_format(&self) -> Option<WaveFormat> {
        self.stream_info().map(|info| info.format)
    }

    pub fn diagnostics(&self) -> StreamDiagnostics {
        self.shared.control.diagnostics()
    }

    /// Replace the static source played when loopback is off.
    pub fn configure_source(&self, source: Box<dyn SampleSource>) {
        *self.shared.source.lock() = Some(source);
    }

    /// Render `wav` into device-period chunks for the current stream.
    pub fn configure_wave(&self, wav: &WavData) -> Result<(), AudioError> {
        let info = self.require_stream("configure_wave")?;
        let generator = WaveSampleGenerator::from_wav(wav, info.frames_per_period, &info.format)?;
        self.configure_source(Box::new(generator));
        Ok(())
    }

    /// Queue the configured test tone for the current stream.
    pub fn configure_tone(&self) -> Result<(), AudioError> {
        let info = self.require_stream("configure_tone")?;
        let config = &self.shared.config;
        let mut tone = ToneSampleGenerator::new();
        tone.generate_sample_buffer(
            config.tone_frequency_hz,
            info.frames_per_period,
            &info.format,
            std::time::Duration::from_secs(config.tone_duration_secs as u64),
            config.tone_amplitude,
        )?;
        self.configure_source(Box::new(tone));
        Ok(())
    }

    pub fn has_source(&self) -> bool {
        self.shared.source.lock().is_some()
    }

    /// Buffer read in loopback mode; `None` renders silence.
    pub fn set_capture_buffer(&self, buffer: Option<Arc<CircularAudioBuffer>>) {
        *self.shared.capture_buffer.lock() = buffer;
    }

    /// Switch between the capture buffer and the static source.
    ///
    /// Takes effect on the next render pass.
    pub fn set_loopback(&self, enabled: bool) {
        self.shared.loopback.store(enabled, Ordering::SeqCst);
    }

    pub fn is_loopback(&self) -> bool {
        self.shared.loopback.load(Ordering::SeqCst)
    }

    /// Start (or resume) playback; valid from `Initialized`, `Stopped` and `Paused`.
    pub fn start_playback(&self, loopback: bool) -> Result<(), AudioError> {
        if !loopback && !self.has_source() {
            return Err(AudioError::ConfigurationFailed("no playback source configured".into()));
        }
        self.shared.loopback.store(loopback, Ordering::SeqCst);
        self.shared.notifier.transition(
            &[DeviceState::Initialized, DeviceState::Stopped, DeviceState::Paused],
            DeviceState::Starting,
            "start_playback",
            true,
        )?;
        self.shared.control.enqueue(Command::Start)
    }

    /// Stop playback; valid from `Playing` and `Paused`.
    pub fn stop_playback(&self) -> Result<(), AudioError> {
        self.shared.request_stop(&[DeviceState::Playing, DeviceState::Paused])
    }

    /// Pause playback; valid from `Playing`.
    pub fn pause_playback(&self) -> Result<(), AudioError> {
        self.shared
            .notifier
            .transition(&[DeviceState::Playing], DeviceState::Pausing, "pause_playback", false)?;
        self.shared.control.enqueue(Command::Pause)
    }

    fn require_stream(&self, operation: &'static str) -> Result<StreamInfo, AudioError> {
        self.stream_info().ok_or(AudioError::InvalidState {
            operation,
            state: self.state(),
        })
    }

    /// Stop the worker and refuse further activations.
    pub fn shutdown(&self) {
        self.shared.control.shutdown();
    }
}

impl Drop for AudioRenderer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl RenderShared {
    fn spawn_activation(self: &Arc<Self>) -> Result<ActivationHandle, AudioError> {
        let shared = Arc::clone(self);
        spawn_activation("render-activation", move || shared.activate())
    }

    fn activate(self: &Arc<Self>) -> Result<StreamInfo, AudioError> {
        self.notifier
            .transition(&[DeviceState::Uninitialized], DeviceState::Activated, "initialize", false)?;

        match self.open_stream() {
            Ok(info) => {
                log::info!(
                    "render stream initialized: {} Hz, {} ch, {} frame buffer, {} frames per period",
                    info.format.samples_per_sec,
                    info.format.channels,
                    info.buffer_frames,
                    info.frames_per_period
                );
                self.notifier.set_state(DeviceState::Initialized, None, true)?;
                Ok(info)
            }
            Err(e) => {
                self.control.detach();
                self.notifier.fail(e.clone());
                Err(e)
            }
        }
    }

    fn open_stream(self: &Arc<Self>) -> Result<StreamInfo, AudioError> {
        let mut client = self.backend.activate_render()?;
        client.set_client_properties(&ClientProperties {
            offload: false,
            category: StreamCategory::ForegroundOnlyMedia,
            raw: false,
        })?;

        let mut format = client.mix_format()?;
        if self.config.force_stereo_render && format.channels != 2 {
            format = format.with_channels(2);
        }
        client.initialize(&format, self.config.render_buffer_duration())?;

        let buffer_frames = client.buffer_size()?;
        let device_period = client.device_period()?;
        let info = StreamInfo {
            format,
            buffer_frames,
            device_period,
            frames_per_period: format.frames_per_period(device_period),
        };

        let buffer_ready = AudioEvent::new();
        client.set_event_handle(buffer_ready.clone())?;

        let commands = self.control.install(info)?;
        let handle = spawn_stream_worker(
            WorkerContext {
                name: "render-worker".into(),
                buffer_ready,
                commands,
                stall_timeout: self.config.stall_timeout(),
            },
            RenderStream {
                shared: Arc::clone(self),
                client,
                info,
                scratch: Vec::new(),
            },
        )?;
        self.control.set_worker(handle);
        Ok(info)
    }

    fn request_stop(&self, allowed: &[DeviceState]) -> Result<(), AudioError> {
        self.notifier
            .transition(allowed, DeviceState::Stopping, "stop_playback", true)?;
        self.control.enqueue(Command::Stop)
    }
}

/// Outcome of pulling from the static source, decided under the source lock.
enum SourcePull {
    Empty,
    Exhausted,
    Ready(usize),
}

/// Worker-side state; owns the render client.
struct RenderStream {
    shared: Arc<RenderShared>,
    client: Box<dyn RenderClient>,
    info: StreamInfo,
    scratch: Vec<u8>,
}

impl RenderStream {
    fn state(&self) -> DeviceState {
        self.shared.notifier.state()
    }

    fn on_start(&mut self) -> Result<(), AudioError> {
        if self.state() != DeviceState::Starting {
            log::debug!("ignoring start in state {}", self.state());
            return Ok(());
        }
        // Pre-roll silence so the first period is not an underrun.
        self.service(true)?;
        self.client.start()?;
        self.shared.notifier.set_state(DeviceState::Playing, None, true)?;
        Ok(())
    }

    fn on_stop(&mut self) -> Result<(), AudioError> {
        if self.state() != DeviceState::Stopping {
            log::debug!("ignoring stop in state {}", self.state());
            return Ok(());
        }
        if let Err(e) = self.service(true) {
            log::debug!("silence flush before stop failed: {}", e);
        }
        self.client.stop()?;
        if !self.shared.loopback.load(Ordering::SeqCst) {
            if let Some(source) = self.shared.source.lock().as_mut() {
                source.flush();
            }
        }
        self.shared.notifier.set_state(DeviceState::Stopped, None, true)?;
        Ok(())
    }

    fn on_pause(&mut self) -> Result<(), AudioError> {
        if self.state() != DeviceState::Pausing {
            log::debug!("ignoring pause in state {}", self.state());
            return Ok(());
        }
        self.client.stop()?;
        self.shared.notifier.set_state(DeviceState::Paused, None, true)?;
        Ok(())
    }

    /// One render pass: fill whatever room the endpoint buffer has.
    fn service(&mut self, silence: bool) -> Result<(), AudioError> {
        let padding = self.client.current_padding()?;
        let available = self.info.buffer_frames.saturating_sub(padding);
        if available == 0 {
            return Ok(());
        }
        if silence {
            return self.write_silence(available);
        }
        if self.state() != DeviceState::Playing {
            return Ok(());
        }
        if self.shared.loopback.load(Ordering::SeqCst) {
            self.write_loopback(available)
        } else {
            self.write_source(available)
        }
    }

    fn write_silence(&mut self, frames: u32) -> Result<(), AudioError> {
        self.client.write_buffer(frames, None)?;
        self.shared.control.record(|d| d.frames += frames as u64);
        Ok(())
    }

    fn write_frames(&mut self, frames: usize) -> Result<(), AudioError> {
        let bytes = frames * self.info.format.frame_bytes();
        self.client.write_buffer(frames as u32, Some(&self.scratch[..bytes]))?;
        self.shared.control.record(|d| d.frames += frames as u64);
        Ok(())
    }

    fn write_loopback(&mut self, available: u32) -> Result<(), AudioError> {
        let buffer = self.shared.capture_buffer.lock().clone();
        let Some(buffer) = buffer else {
            return self.write_silence(available);
        };

        let frame_bytes = self.info.format.frame_bytes();
        let frames = (buffer.current_usage() / frame_bytes).min(available as usize);
        if frames == 0 {
            return self.write_silence(available);
        }
        self.scratch.resize(frames * frame_bytes, 0);
        if buffer.get_capture_buffer(&mut self.scratch[..frames * frame_bytes]) == 0 {
            return self.write_silence(available);
        }
        self.write_frames(frames)
    }

    fn write_source(&mut self, available: u32) -> Result<(), AudioError> {
        let frame_bytes = self.info.format.frame_bytes();
        let room = available as usize * frame_bytes;

        let pull = {
            let mut source = self.shared.source.lock();
            match source.as_mut() {
                None => SourcePull::Empty,
                Some(source) if source.is_eof() => SourcePull::Exhausted,
                Some(source) => {
                    // A chunk larger than the free space is played across passes.
                    let len = source.buffer_length().min(room);
                    self.scratch.resize(len, 0);
                    let filled = source.fill_sample_buffer(&mut self.scratch)?;
                    SourcePull::Ready(filled / frame_bytes)
                }
            }
        };

        match pull {
            SourcePull::Empty => self.write_silence(available),
            SourcePull::Exhausted => {
                self.write_silence(available)?;
                log::info!("playback source exhausted, stopping");
                if let Err(e) = self.shared.request_stop(&[DeviceState::Playing]) {
                    log::debug!("end-of-source stop not issued: {}", e);
                }
                Ok(())
            }
            SourcePull::Ready(0) => Ok(()),
            SourcePull::Ready(frames) => self.write_frames(frames),
        }
    }

    fn settle(&mut self, result: Result<(), AudioError>) -> ControlFlow<()> {
        let Err(error) = result else {
            return ControlFlow::Continue(());
        };
        match error.class() {
            ErrorClass::Soft => {
                log::debug!("render pass skipped: {}", error);
                ControlFlow::Continue(())
            }
            ErrorClass::Resettable => {
                log::warn!("render device invalidated, reinitializing");
                self.shared.control.detach();
                self.shared.notifier.reset(Some(error), true);
                if let Err(e) = self.shared.spawn_activation() {
                    self.shared.notifier.fail(e);
                }
                ControlFlow::Break(())
            }
            ErrorClass::Fatal => {
                let _ = self.client.stop();
                self.shared.control.detach();
                self.shared.notifier.fail(error);
                ControlFlow::Break(())
            }
        }
    }
}

impl StreamHandler for RenderStream {
    fn on_thread_start(&mut self) {
        self.shared.backend.promote_current_thread();
    }

    fn on_buffer_ready(&mut self) -> ControlFlow<()> {
        self.shared.control.record(|d| d.buffer_passes += 1);
        let result = self.service(false);
        self.settle(result)
    }

    fn on_command(&mut self, command: Command) -> ControlFlow<()> {
        let result = match command {
            Command::Start => self.on_start(),
            Command::Stop => self.on_stop(),
            Command::Pause => self.on_pause(),
        };
        self.settle(result)
    }

    fn on_timeout(&mut self) -> ControlFlow<()> {
        if self.state() != DeviceState::Playing {
            return ControlFlow::Continue(());
        }
        log::warn!("render event stalled, servicing anyway");
        self.shared.control.record(|d| d.stalls += 1);
        let result = self.service(false);
        self.settle(result)
    }

    fn on_close(&mut self) {
        if matches!(
            self.state(),
            DeviceState::Playing | DeviceState::Pausing | DeviceState::Stopping
        ) {
            if let Err(e) = self.client.stop() {
                log::debug!("render client stop on close failed: {}", e);
            }
        }
    }
}
