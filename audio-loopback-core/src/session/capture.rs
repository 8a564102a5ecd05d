use std::ops::ControlFlow;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::models::audio_models::{AudioEndpoint, StreamDiagnostics};
use crate::models::config::PipelineConfiguration;
use crate::models::error::{AudioError, ErrorClass};
use crate::models::format::WaveFormat;
use crate::models::recording_result::RecordingResult;
use crate::models::state::DeviceState;
use crate::processing::circular_buffer::CircularAudioBuffer;
use crate::storage::metadata;
use crate::storage::wav_writer::WaveFileWriter;
use crate::traits::audio_client::{CaptureClient, ClientProperties, PacketFlags};
use crate::traits::backend::AudioBackend;
use crate::traits::listener::DeviceStateListener;

use super::command_queue::Command;
use super::event::AudioEvent;
use super::notifier::{DeviceStateNotifier, ListenerToken};
use super::stream::{spawn_activation, StreamControl, StreamInfo};
use super::worker::{spawn_stream_worker, StreamHandler, WorkerContext};

/// Event-driven capture from one capture endpoint.
///
/// Captured packets are appended to the recording file (when a recording
/// path is set) and, in loopback mode, pushed into the shared
/// [`CircularAudioBuffer`] for the renderer.
///
/// ```text
/// initialize(index) ─→ Initialized
/// start_capture / stop_capture ─→ CommandQueue ─→ [capture worker]
/// [device event] ─→ [capture worker] ─→ packets ─┬→ WaveFileWriter
///                                                └→ CircularAudioBuffer (loopback)
/// ```
pub struct AudioCapture {
    shared: Arc<CaptureShared>,
}

struct CaptureShared {
    config: PipelineConfiguration,
    backend: Arc<dyn AudioBackend>,
    notifier: DeviceStateNotifier,
    control: StreamControl,
    device_index: AtomicUsize,
    capture_buffer: Mutex<Option<Arc<CircularAudioBuffer>>>,
    loopback: AtomicBool,
    recording_path: Mutex<Option<PathBuf>>,
    last_recording: Mutex<Option<RecordingResult>>,
}

impl AudioCapture {
    pub fn new(backend: Arc<dyn AudioBackend>, config: PipelineConfiguration) -> Self {
        let recording_path = config.recording_path.clone();
        let device_index = config.capture_device_index;
        let loopback = config.loopback;
        Self {
            shared: Arc::new(CaptureShared {
                config,
                backend,
                notifier: DeviceStateNotifier::new("capture"),
                control: StreamControl::new(),
                device_index: AtomicUsize::new(device_index),
                capture_buffer: Mutex::new(None),
                loopback: AtomicBool::new(loopback),
                recording_path: Mutex::new(recording_path),
                last_recording: Mutex::new(None),
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

    /// Activate the capture endpoint at `index` on the calling thread.
    pub fn initialize(&self, index: usize) -> Result<StreamInfo, AudioError> {
        self.shared.device_index.store(index, Ordering::SeqCst);
        self.shared.activate()
    }

    /// Switch to another capture endpoint, tearing down the current stream.
    ///
    /// A running capture is drained and its recording closed before the
    /// switch; the new stream comes up `Initialized`.
    pub fn set_capture_device(&self, index: usize) -> Result<StreamInfo, AudioError> {
        let endpoints = self.shared.backend.capture_endpoints()?;
        if index >= endpoints.len() {
            return Err(AudioError::InvalidArgument(format!(
                "capture device {} out of range ({} devices)",
                index,
                endpoints.len()
            )));
        }
        self.shared.control.stop_worker();
        self.shared.notifier.reset(None, true);
        self.initialize(index)
    }

    pub fn capture_endpoints(&self) -> Result<Vec<AudioEndpoint>, AudioError> {
        self.shared.backend.capture_endpoints()
    }

    pub fn device_index(&self) -> usize {
        self.shared.device_index.load(Ordering::SeqCst)
    }

    pub fn stream_info(&self) -> Option<StreamInfo> {
        self.shared.control.info()
    }

    pub fn mix_format(&self) -> Option<WaveFormat> {
        self.stream_info().map(|info| info.format)
    }

    pub fn diagnostics(&self) -> StreamDiagnostics {
        self.shared.control.diagnostics()
    }

    /// Start capturing; valid from `Initialized` and `Stopped`.
    pub fn start_capture(&self) -> Result<(), AudioError> {
        self.shared.notifier.transition(
            &[DeviceState::Initialized, DeviceState::Stopped],
            DeviceState::Starting,
            "start_capture",
            true,
        )?;
        self.shared.control.enqueue(Command::Start)
    }

    /// Stop capturing and close the recording; valid while capturing.
    pub fn stop_capture(&self) -> Result<(), AudioError> {
        self.shared.notifier.transition(
            &[DeviceState::Capturing, DeviceState::Discontinuity],
            DeviceState::Stopping,
            "stop_capture",
            true,
        )?;
        self.shared.control.enqueue(Command::Stop)
    }

    /// Route captured packets into the loopback buffer.
    pub fn set_loopback(&self, enabled: bool) {
        self.shared.loopback.store(enabled, Ordering::SeqCst);
    }

    pub fn is_loopback(&self) -> bool {
        self.shared.loopback.load(Ordering::SeqCst)
    }

    pub fn set_capture_buffer(&self, buffer: Option<Arc<CircularAudioBuffer>>) {
        *self.shared.capture_buffer.lock() = buffer;
    }

    /// Recording target used by the next `start_capture`; `None` disables recording.
    pub fn set_recording_path(&self, path: Option<PathBuf>) {
        *self.shared.recording_path.lock() = path;
    }

    pub fn recording_path(&self) -> Option<PathBuf> {
        self.shared.recording_path.lock().clone()
    }

    /// The recording closed by the most recent stop.
    pub fn last_recording(&self) -> Option<RecordingResult> {
        self.shared.last_recording.lock().clone()
    }

    /// Stop the worker and refuse further activations.
    pub fn shutdown(&self) {
        self.shared.control.shutdown();
    }
}

impl Drop for AudioCapture {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl CaptureShared {
    fn activate(self: &Arc<Self>) -> Result<StreamInfo, AudioError> {
        self.notifier
            .transition(&[DeviceState::Uninitialized], DeviceState::Activated, "initialize", false)?;

        let index = self.device_index.load(Ordering::SeqCst);
        match self.open_stream(index) {
            Ok(info) => {
                log::info!(
                    "capture stream initialized on device {}: {} Hz, {} ch, {} bit",
                    index,
                    info.format.samples_per_sec,
                    info.format.channels,
                    info.format.bits_per_sample
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

    fn open_stream(self: &Arc<Self>, index: usize) -> Result<StreamInfo, AudioError> {
        let mut client = self.backend.activate_capture(index)?;
        client.set_client_properties(&ClientProperties::default())?;

        let format = client.mix_format()?;
        client.initialize(&format, self.config.capture_buffer_duration())?;

        let device_period = client.device_period()?;
        let info = StreamInfo {
            format,
            buffer_frames: client.buffer_size()?,
            device_period,
            frames_per_period: format.frames_per_period(device_period),
        };

        let buffer_ready = AudioEvent::new();
        client.set_event_handle(buffer_ready.clone())?;

        let commands = self.control.install(info)?;
        let handle = spawn_stream_worker(
            WorkerContext {
                name: "capture-worker".into(),
                buffer_ready,
                commands,
                stall_timeout: self.config.stall_timeout(),
            },
            CaptureStream {
                shared: Arc::clone(self),
                client,
                info,
                writer: None,
                silence: Vec::new(),
            },
        )?;
        self.control.set_worker(handle);
        Ok(info)
    }
}

/// Worker-side state; owns the capture client and the open recording.
struct CaptureStream {
    shared: Arc<CaptureShared>,
    client: Box<dyn CaptureClient>,
    info: StreamInfo,
    writer: Option<WaveFileWriter>,
    silence: Vec<u8>,
}

impl CaptureStream {
    fn state(&self) -> DeviceState {
        self.shared.notifier.state()
    }

    fn on_start(&mut self) -> Result<(), AudioError> {
        if self.state() != DeviceState::Starting {
            log::debug!("ignoring start in state {}", self.state());
            return Ok(());
        }
        let path = self.shared.recording_path.lock().clone();
        if let Some(path) = path {
            // Capture still runs (and feeds loopback) without a recording.
            match WaveFileWriter::open(&path, &self.info.format) {
                Ok(writer) => self.writer = Some(writer),
                Err(e) => log::error!("cannot record to {}: {}", path.display(), e),
            }
        }
        self.client.start()?;
        self.shared.notifier.set_state(DeviceState::Capturing, None, true)?;
        Ok(())
    }

    fn on_stop(&mut self) -> Result<(), AudioError> {
        if self.state() != DeviceState::Stopping {
            log::debug!("ignoring stop in state {}", self.state());
            return Ok(());
        }
        let drained = self.drain_packets();
        self.client.stop()?;
        self.finish_recording();
        drained?;
        self.shared.notifier.set_state(DeviceState::Stopped, None, true)?;
        Ok(())
    }

    fn finish_recording(&mut self) {
        let Some(mut writer) = self.writer.take() else {
            return;
        };
        let checksum = match writer.close() {
            Ok(checksum) => checksum,
            Err(e) => {
                log::error!("failed to close recording {}: {}", writer.file_path().display(), e);
                return;
            }
        };
        let result = RecordingResult::new(
            writer.file_path().to_path_buf(),
            *writer.format(),
            writer.data_bytes(),
            checksum,
            self.shared.loopback.load(Ordering::SeqCst),
        );
        if self.shared.config.write_metadata_sidecar {
            if let Err(e) = metadata::write_metadata(&result.metadata, &result.file_path) {
                log::warn!("metadata sidecar not written: {}", e);
            }
        }
        log::info!(
            "recorded {:.2}s to {}",
            result.duration.as_secs_f64(),
            result.file_path.display()
        );
        *self.shared.last_recording.lock() = Some(result);
    }

    /// Read every pending packet into the recording and the loopback buffer.
    fn drain_packets(&mut self) -> Result<(), AudioError> {
        let buffer = if self.shared.loopback.load(Ordering::SeqCst) {
            self.shared.capture_buffer.lock().clone()
        } else {
            None
        };

        let Self {
            client,
            writer,
            silence,
            ..
        } = self;
        let mut write_error = None;
        let mut discontinuity = false;
        let mut frames_read = 0u64;

        loop {
            let frames = client.read_packet(&mut |data: &[u8], flags: PacketFlags| {
                discontinuity |= flags.discontinuity;
                let data = if flags.silent {
                    silence.clear();
                    silence.resize(data.len(), 0);
                    &silence[..]
                } else {
                    data
                };
                if let Some(w) = writer.as_mut() {
                    if write_error.is_none() {
                        if let Err(e) = w.write_sample(data) {
                            write_error = Some(e);
                        }
                    }
                }
                if let Some(buffer) = buffer.as_ref() {
                    buffer.set_capture_buffer(data);
                }
            })?;
            if frames == 0 {
                break;
            }
            frames_read += frames as u64;
        }

        if let Some(e) = write_error {
            log::error!("recording stopped: {}", e);
            if let Some(mut w) = self.writer.take() {
                let _ = w.close();
            }
        }
        self.shared.control.record(|d| {
            d.frames += frames_read;
            if discontinuity {
                d.discontinuities += 1;
            }
        });
        if discontinuity {
            self.report_discontinuity();
        }
        Ok(())
    }

    /// Publish `Discontinuity`, then return to `Capturing`.
    ///
    /// Either step is skipped when a listener or another thread has already
    /// moved the state on (for example by stopping the capture).
    fn report_discontinuity(&self) {
        log::warn!("capture discontinuity");
        let notifier = &self.shared.notifier;
        if notifier
            .transition(&[DeviceState::Capturing], DeviceState::Discontinuity, "discontinuity", true)
            .is_err()
        {
            return;
        }
        if let Err(e) = notifier.transition(&[DeviceState::Discontinuity], DeviceState::Capturing, "resume_capture", true) {
            log::debug!("capture not resumed after discontinuity: {}", e);
        }
    }

    fn service(&mut self) -> Result<(), AudioError> {
        match self.state() {
            DeviceState::Capturing | DeviceState::Discontinuity => self.drain_packets(),
            _ => Ok(()),
        }
    }

    fn settle(&mut self, result: Result<(), AudioError>) -> ControlFlow<()> {
        let Err(error) = result else {
            return ControlFlow::Continue(());
        };
        match error.class() {
            ErrorClass::Soft => {
                log::debug!("capture pass skipped: {}", error);
                ControlFlow::Continue(())
            }
            ErrorClass::Resettable => {
                log::warn!("capture device invalidated, reinitializing");
                self.finish_recording();
                self.shared.control.detach();
                self.shared.notifier.reset(Some(error), true);
                let shared = Arc::clone(&self.shared);
                if let Err(e) = spawn_activation("capture-activation", move || shared.activate()) {
                    self.shared.notifier.fail(e);
                }
                ControlFlow::Break(())
            }
            ErrorClass::Fatal => {
                let _ = self.client.stop();
                self.finish_recording();
                self.shared.control.detach();
                self.shared.notifier.fail(error);
                ControlFlow::Break(())
            }
        }
    }
}

impl StreamHandler for CaptureStream {
    fn on_thread_start(&mut self) {
        self.shared.backend.promote_current_thread();
    }

    fn on_buffer_ready(&mut self) -> ControlFlow<()> {
        self.shared.control.record(|d| d.buffer_passes += 1);
        let result = self.service();
        self.settle(result)
    }

    fn on_command(&mut self, command: Command) -> ControlFlow<()> {
        let result = match command {
            Command::Start => self.on_start(),
            Command::Stop => self.on_stop(),
            Command::Pause => {
                log::warn!("capture streams cannot be paused");
                Ok(())
            }
        };
        self.settle(result)
    }

    fn on_timeout(&mut self) -> ControlFlow<()> {
        if !matches!(self.state(), DeviceState::Capturing | DeviceState::Discontinuity) {
            return ControlFlow::Continue(());
        }
        log::warn!("capture event stalled, servicing anyway");
        self.shared.control.record(|d| d.stalls += 1);
        let result = self.service();
        self.settle(result)
    }

    fn on_close(&mut self) {
        if matches!(
            self.state(),
            DeviceState::Capturing | DeviceState::Discontinuity | DeviceState::Stopping
        ) {
            if let Err(e) = self.drain_packets() {
                log::debug!("final capture drain failed: {}", e);
            }
            if let Err(e) = self.client.stop() {
                log::debug!("capture client stop on close failed: {}", e);
            }
        }
        self.finish_recording();
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;
    use crate::backend::simulated::{wait_until, SimulatedBackend};
    use crate::storage::wav_reader::WavData;
    use crate::traits::listener::DeviceStateChange;

    fn float_bytes(samples: &[f32]) -> Vec<u8> {
        samples.iter().flat_map(|s| s.to_le_bytes()).collect()
    }

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("capture_test_{}_{}.wav", std::process::id(), name))
    }

    fn capture(backend: &Arc<SimulatedBackend>, recording: Option<&Path>) -> AudioCapture {
        let config = PipelineConfiguration {
            recording_path: recording.map(Path::to_path_buf),
            write_metadata_sidecar: true,
            ..Default::default()
        };
        let capture = AudioCapture::new(Arc::clone(backend) as Arc<dyn AudioBackend>, config);
        capture.initialize(0).unwrap();
        capture
    }

    #[test]
    fn records_packets_to_wav() {
        let path = temp_path("record");
        let backend = Arc::new(SimulatedBackend::new());
        let capture = capture(&backend, Some(&path));
        assert_eq!(capture.state(), DeviceState::Initialized);

        backend.push_capture(float_bytes(&[0.1, 0.2]), PacketFlags::default());
        backend.push_capture(
            float_bytes(&[0.9, 0.9]),
            PacketFlags {
                silent: true,
                discontinuity: false,
            },
        );
        capture.start_capture().unwrap();
        assert!(wait_until(|| backend.pending_capture_packets() == 0));
        capture.stop_capture().unwrap();
        assert!(wait_until(|| capture.state() == DeviceState::Stopped));

        let result = capture.last_recording().unwrap();
        assert_eq!(result.data_bytes, 16);
        assert_eq!(result.checksum.len(), 64);

        let wav = WavData::from_file(&path).unwrap();
        assert_eq!(wav.format, WaveFormat::ieee_float(48000, 1));
        assert_eq!(wav.audio(), &float_bytes(&[0.1, 0.2, 0.0, 0.0])[..]);

        let sidecar = metadata::read_metadata(&path).unwrap();
        assert_eq!(sidecar.checksum, result.checksum);
        assert!(!sidecar.loopback);

        let _ = std::fs::remove_file(&path);
        let _ = std::fs::remove_file(metadata::metadata_path(&path));
    }

    #[test]
    fn loopback_feeds_circular_buffer() {
        let backend = Arc::new(SimulatedBackend::new());
        let capture = capture(&backend, None);

        let buffer = Arc::new(CircularAudioBuffer::default());
        buffer.set_render_format(WaveFormat::ieee_float(48000, 2));
        buffer.set_source_format(capture.mix_format().unwrap());
        capture.set_capture_buffer(Some(Arc::clone(&buffer)));
        capture.set_loopback(true);

        capture.start_capture().unwrap();
        backend.push_capture(float_bytes(&[0.25, -0.5]), PacketFlags::default());
        assert!(wait_until(|| buffer.current_usage() == 16));

        let mut out = vec![0u8; 16];
        assert_eq!(buffer.get_capture_buffer(&mut out), 16);
        assert_eq!(out, float_bytes(&[0.25, 0.0, -0.5, 0.0]));
        assert_eq!(capture.last_recording(), None);
    }

    #[test]
    fn discontinuity_is_reported_and_recovered() {
        let backend = Arc::new(SimulatedBackend::new());
        let capture = capture(&backend, None);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        capture.subscribe(Arc::new(move |change: &DeviceStateChange| sink.lock().push(change.state)));

        capture.start_capture().unwrap();
        assert!(wait_until(|| capture.state() == DeviceState::Capturing));
        backend.push_capture(
            float_bytes(&[0.0]),
            PacketFlags {
                silent: false,
                discontinuity: true,
            },
        );

        assert!(wait_until(|| capture.diagnostics().discontinuities == 1));
        assert!(wait_until(|| seen.lock().ends_with(&[DeviceState::Discontinuity, DeviceState::Capturing])));
        assert_eq!(capture.state(), DeviceState::Capturing);
    }

    #[test]
    fn stop_requires_running_capture() {
        let backend = Arc::new(SimulatedBackend::new());
        let capture = capture(&backend, None);

        assert!(matches!(
            capture.stop_capture(),
            Err(AudioError::InvalidState { operation: "stop_capture", .. })
        ));
        assert!(capture.initialize(0).is_err());
    }

    #[test]
    fn switches_capture_device() {
        let backend = Arc::new(SimulatedBackend::new());
        backend.set_endpoints(vec![
            AudioEndpoint::capture("mic-0", "Built-in Microphone", true),
            AudioEndpoint::capture("mic-1", "USB Microphone", false),
        ]);
        let capture = capture(&backend, None);

        capture.set_capture_device(1).unwrap();
        assert_eq!(backend.last_capture_index(), 1);
        assert_eq!(capture.device_index(), 1);
        assert_eq!(capture.state(), DeviceState::Initialized);
        assert_eq!(backend.capture_activations(), 2);

        assert!(matches!(
            capture.set_capture_device(5),
            Err(AudioError::InvalidArgument(_))
        ));
        assert_eq!(capture.state(), DeviceState::Initialized);
    }

    #[test]
    fn switching_device_mid_recording_keeps_the_recording() {
        let path = temp_path("switch");
        let backend = Arc::new(SimulatedBackend::new());
        backend.set_endpoints(vec![
            AudioEndpoint::capture("mic-0", "Built-in Microphone", true),
            AudioEndpoint::capture("mic-1", "USB Microphone", false),
        ]);
        let capture = capture(&backend, Some(&path));

        capture.start_capture().unwrap();
        assert!(wait_until(|| capture.state() == DeviceState::Capturing));
        backend.push_capture(float_bytes(&[0.1, 0.2, 0.3, 0.4]), PacketFlags::default());
        assert!(wait_until(|| backend.pending_capture_packets() == 0));

        capture.set_capture_device(1).unwrap();
        assert_eq!(capture.state(), DeviceState::Initialized);
        let result = capture.last_recording().unwrap();
        assert_eq!(result.data_bytes, 16);
        let wav = WavData::from_file(&path).unwrap();
        assert_eq!(wav.audio(), &float_bytes(&[0.1, 0.2, 0.3, 0.4])[..]);
        assert!(metadata::read_metadata(&path).is_ok());

        let _ = std::fs::remove_file(&path);
        let _ = std::fs::remove_file(metadata::metadata_path(&path));
    }

    #[test]
    fn stop_during_discontinuity_is_serviced() {
        let backend = Arc::new(SimulatedBackend::new());
        let capture = Arc::new(capture(&backend, None));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let owner = Arc::downgrade(&capture);
        capture.subscribe(Arc::new(move |change: &DeviceStateChange| {
            sink.lock().push(change.state);
            if change.state == DeviceState::Discontinuity {
                if let Some(capture) = owner.upgrade() {
                    capture.stop_capture().unwrap();
                }
            }
        }));

        capture.start_capture().unwrap();
        assert!(wait_until(|| capture.state() == DeviceState::Capturing));
        backend.push_capture(
            float_bytes(&[0.0]),
            PacketFlags {
                silent: false,
                discontinuity: true,
            },
        );

        assert!(wait_until(|| capture.state() == DeviceState::Stopped));
        assert_eq!(capture.last_error(), None);
        assert_eq!(
            *seen.lock(),
            vec![
                DeviceState::Starting,
                DeviceState::Capturing,
                DeviceState::Discontinuity,
                DeviceState::Stopping,
                DeviceState::Stopped
            ]
        );
    }

    #[test]
    fn unwritable_recording_still_captures() {
        let blocker = temp_path("blocker");
        std::fs::write(&blocker, b"not a directory").unwrap();
        let backend = Arc::new(SimulatedBackend::new());
        let capture = capture(&backend, Some(&blocker.join("nested.wav")));

        capture.start_capture().unwrap();
        assert!(wait_until(|| capture.state() == DeviceState::Capturing));
        capture.stop_capture().unwrap();
        assert!(wait_until(|| capture.state() == DeviceState::Stopped));
        assert_eq!(capture.last_recording(), None);

        let _ = std::fs::remove_file(&blocker);
    }

    #[test]
    fn invalidation_closes_recording_and_reactivates() {
        let path = temp_path("invalidate");
        let backend = Arc::new(SimulatedBackend::new());
        let capture = capture(&backend, Some(&path));

        capture.start_capture().unwrap();
        assert!(wait_until(|| capture.state() == DeviceState::Capturing));
        backend.fail_next_capture(AudioError::ResourcesInvalidated);

        assert!(wait_until(|| backend.capture_activations() == 2
            && capture.state() == DeviceState::Initialized));
        assert!(capture.last_recording().is_some());

        let _ = std::fs::remove_file(&path);
        let _ = std::fs::remove_file(metadata::metadata_path(&path));
    }
}
