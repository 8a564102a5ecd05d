use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::models::config::PipelineConfiguration;
use crate::models::error::AudioError;
use crate::models::state::DeviceState;
use crate::processing::circular_buffer::CircularAudioBuffer;
use crate::storage::wav_reader::WavData;
use crate::traits::backend::AudioBackend;
use crate::traits::listener::DeviceStateChange;

use super::capture::AudioCapture;
use super::device_list::CaptureDeviceList;
use super::render::AudioRenderer;
use super::stream::ActivationHandle;

/// Snapshot of what the pipeline is doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ManagerStatus {
    pub capturing: bool,
    pub playing: bool,
    pub loopback: bool,
}

/// Wires an [`AudioCapture`] to an [`AudioRenderer`] through a shared
/// [`CircularAudioBuffer`].
///
/// The renderer is initialized first; once it reports `Initialized` the
/// capture device is activated and the buffer is configured with the
/// capture format on the source side and the render format on the sink side.
///
/// ```text
/// capture device ─→ AudioCapture ─┬→ recording.wav
///                                 └→ CircularAudioBuffer ─→ AudioRenderer ─→ render device
/// ```
pub struct LoopbackManager {
    inner: Arc<ManagerInner>,
}

struct ManagerInner {
    config: PipelineConfiguration,
    backend: Arc<dyn AudioBackend>,
    renderer: Mutex<Option<Arc<AudioRenderer>>>,
    capture: Mutex<Option<Arc<AudioCapture>>>,
    buffer: Arc<CircularAudioBuffer>,
    devices: CaptureDeviceList,
    loopback: AtomicBool,
}

impl LoopbackManager {
    pub fn new(backend: Arc<dyn AudioBackend>, config: PipelineConfiguration) -> Result<Self, AudioError> {
        config.validate().map_err(AudioError::ConfigurationFailed)?;
        let buffer = Arc::new(CircularAudioBuffer::new(config.loopback_buffer_bytes));
        let loopback = config.loopback;
        Ok(Self {
            inner: Arc::new(ManagerInner {
                config,
                backend,
                renderer: Mutex::new(None),
                capture: Mutex::new(None),
                buffer,
                devices: CaptureDeviceList::new(),
                loopback: AtomicBool::new(loopback),
            }),
        })
    }

    /// Create the renderer and start its asynchronous activation.
    ///
    /// The capture side is brought up from the renderer's `Initialized`
    /// notification.
    pub fn start_device(&self) -> Result<ActivationHandle, AudioError> {
        if self.inner.renderer().is_some() {
            return Err(AudioError::ConfigurationFailed("device already started".into()));
        }

        let renderer = Arc::new(AudioRenderer::new(Arc::clone(&self.inner.backend), self.inner.config.clone()));
        let weak: Weak<ManagerInner> = Arc::downgrade(&self.inner);
        renderer.subscribe(Arc::new(move |change: &DeviceStateChange| {
            if change.state != DeviceState::Initialized {
                return;
            }
            if let Some(inner) = weak.upgrade() {
                if let Err(e) = inner.initialize_capture_device() {
                    log::error!("capture device setup failed: {}", e);
                }
            }
        }));

        *self.inner.renderer.lock() = Some(Arc::clone(&renderer));
        log::info!("starting loopback pipeline");
        renderer.initialize_async()
    }

    /// Tear both devices down and start again.
    pub fn restart_device(&self) -> Result<ActivationHandle, AudioError> {
        self.inner.shutdown();
        self.start_device()
    }

    /// Start or stop capturing (and recording).
    pub fn record_toggle(&self) -> Result<(), AudioError> {
        let capture = self.inner.require_capture()?;
        match capture.state() {
            DeviceState::Capturing | DeviceState::Discontinuity => capture.stop_capture(),
            _ => capture.start_capture(),
        }
    }

    /// Play the last recording, or pause/resume whatever is playing.
    pub fn play_pause_toggle(&self) -> Result<(), AudioError> {
        let renderer = self.inner.require_renderer()?;
        let loopback = self.inner.loopback.load(Ordering::SeqCst);
        match renderer.state() {
            DeviceState::Playing => renderer.pause_playback(),
            DeviceState::Paused => renderer.start_playback(loopback),
            _ if loopback => renderer.start_playback(true),
            _ => {
                let path = self.playback_path()?;
                log::info!("playing {}", path.display());
                let wav = WavData::from_file(&path)?;
                renderer.configure_wave(&wav)?;
                renderer.start_playback(false)
            }
        }
    }

    /// Route captured audio straight to the renderer, or stop doing so.
    pub fn loopback_toggle(&self) -> Result<bool, AudioError> {
        let enabled = !self.inner.loopback.load(Ordering::SeqCst);
        self.inner.loopback.store(enabled, Ordering::SeqCst);

        let renderer = self.inner.renderer();
        let capture = self.inner.capture();
        if let Some(capture) = &capture {
            capture.set_loopback(enabled);
        }
        if let Some(renderer) = &renderer {
            renderer.set_loopback(enabled);
        }
        log::info!("loopback {}", if enabled { "enabled" } else { "disabled" });

        if enabled {
            self.inner.buffer.reset();
            if let Some(capture) = &capture {
                if matches!(capture.state(), DeviceState::Initialized | DeviceState::Stopped) {
                    capture.start_capture()?;
                }
            }
            if let Some(renderer) = &renderer {
                if matches!(
                    renderer.state(),
                    DeviceState::Initialized | DeviceState::Stopped | DeviceState::Paused
                ) {
                    renderer.start_playback(true)?;
                }
            }
        } else if let Some(renderer) = &renderer {
            if matches!(renderer.state(), DeviceState::Playing | DeviceState::Paused) {
                renderer.stop_playback()?;
            }
        }
        Ok(enabled)
    }

    /// Move capture to the endpoint at `index` in [`devices`](Self::devices).
    ///
    /// A running capture is stopped (its recording is closed) and playback
    /// stops with it.
    pub fn set_capture_device(&self, index: usize) -> Result<(), AudioError> {
        let capture = self.inner.require_capture()?;
        if matches!(capture.state(), DeviceState::Capturing | DeviceState::Discontinuity) {
            if let Some(renderer) = self.inner.renderer() {
                if renderer.state() == DeviceState::Playing {
                    renderer.stop_playback()?;
                }
            }
        }
        let info = capture.set_capture_device(index)?;
        self.inner.buffer.set_source_format(info.format);
        capture.set_loopback(self.inner.loopback.load(Ordering::SeqCst));
        self.inner.devices.select(index)?;
        Ok(())
    }

    /// Re-enumerate capture endpoints, notifying device-list subscribers on change.
    pub fn refresh_devices(&self) -> Result<bool, AudioError> {
        self.inner.refresh_devices()
    }

    pub fn devices(&self) -> &CaptureDeviceList {
        &self.inner.devices
    }

    pub fn renderer(&self) -> Option<Arc<AudioRenderer>> {
        self.inner.renderer()
    }

    pub fn capture(&self) -> Option<Arc<AudioCapture>> {
        self.inner.capture()
    }

    pub fn capture_buffer(&self) -> Arc<CircularAudioBuffer> {
        Arc::clone(&self.inner.buffer)
    }

    pub fn status(&self) -> ManagerStatus {
        ManagerStatus {
            capturing: self
                .inner
                .capture()
                .is_some_and(|c| matches!(c.state(), DeviceState::Capturing | DeviceState::Discontinuity)),
            playing: self
                .inner
                .renderer()
                .is_some_and(|r| r.state() == DeviceState::Playing),
            loopback: self.inner.loopback.load(Ordering::SeqCst),
        }
    }

    /// Human-readable status, one line per component.
    pub fn status_lines(&self) -> Vec<String> {
        let capture = match self.inner.capture().map(|c| c.state()) {
            Some(DeviceState::Capturing | DeviceState::Discontinuity) => "Running",
            Some(DeviceState::InError) => "Error",
            None => "Not Available",
            Some(_) => "Stopped",
        };
        let playback = match self.inner.renderer().map(|r| r.state()) {
            Some(DeviceState::Playing) => "Playing",
            Some(DeviceState::Paused) => "Paused",
            Some(DeviceState::InError) => "Error",
            None => "Not Available",
            Some(_) => "Stopped",
        };
        let loopback = if self.inner.loopback.load(Ordering::SeqCst) {
            "Enabled"
        } else {
            "Disabled"
        };
        vec![
            format!("Capture: {}", capture),
            format!("Playback: {}", playback),
            format!("Loopback: {}", loopback),
        ]
    }

    fn playback_path(&self) -> Result<PathBuf, AudioError> {
        let capture = self.inner.capture();
        capture
            .as_ref()
            .and_then(|c| c.last_recording().map(|r| r.file_path))
            .or_else(|| capture.as_ref().and_then(|c| c.recording_path()))
            .or_else(|| self.inner.config.recording_path.clone())
            .ok_or_else(|| AudioError::ConfigurationFailed("no recording to play".into()))
    }
}

impl Drop for LoopbackManager {
    fn drop(&mut self) {
        self.inner.shutdown();
    }
}

impl ManagerInner {
    fn renderer(&self) -> Option<Arc<AudioRenderer>> {
        self.renderer.lock().clone()
    }

    fn capture(&self) -> Option<Arc<AudioCapture>> {
        self.capture.lock().clone()
    }

    fn require_renderer(&self) -> Result<Arc<AudioRenderer>, AudioError> {
        self.renderer().ok_or(AudioError::DeviceNotAvailable)
    }

    fn require_capture(&self) -> Result<Arc<AudioCapture>, AudioError> {
        self.capture().ok_or(AudioError::DeviceNotAvailable)
    }

    /// Bring up (or re-wire) the capture side after the renderer initialized.
    fn initialize_capture_device(&self) -> Result<(), AudioError> {
        let renderer = self.require_renderer()?;
        let render_format = renderer
            .mix_format()
            .ok_or(AudioError::InvalidState {
                operation: "initialize_capture_device",
                state: renderer.state(),
            })?;

        let capture = match self.capture() {
            Some(capture) => capture,
            None => {
                let capture = Arc::new(AudioCapture::new(Arc::clone(&self.backend), self.config.clone()));
                capture.initialize(self.config.capture_device_index)?;
                *self.capture.lock() = Some(Arc::clone(&capture));
                capture
            }
        };
        let capture_format = capture.mix_format().ok_or(AudioError::InvalidState {
            operation: "initialize_capture_device",
            state: capture.state(),
        })?;

        self.buffer.set_render_format(render_format);
        self.buffer.set_source_format(capture_format);
        renderer.set_capture_buffer(Some(Arc::clone(&self.buffer)));
        capture.set_capture_buffer(Some(Arc::clone(&self.buffer)));

        let loopback = self.loopback.load(Ordering::SeqCst);
        capture.set_loopback(loopback);
        renderer.set_loopback(loopback);

        if let Err(e) = self.refresh_devices() {
            log::warn!("capture device enumeration failed: {}", e);
        }
        if let Err(e) = self.devices.select(capture.device_index()) {
            log::debug!("capture device not in list: {}", e);
        }

        if loopback {
            if matches!(capture.state(), DeviceState::Initialized | DeviceState::Stopped) {
                capture.start_capture()?;
            }
            if renderer.state() == DeviceState::Initialized {
                renderer.start_playback(true)?;
            }
        }
        log::info!("loopback pipeline ready");
        Ok(())
    }

    fn refresh_devices(&self) -> Result<bool, AudioError> {
        let endpoints = self.backend.capture_endpoints()?;
        Ok(self.devices.refresh(endpoints))
    }

    fn shutdown(&self) {
        let capture = self.capture.lock().take();
        let renderer = self.renderer.lock().take();
        if let Some(capture) = capture {
            capture.shutdown();
        }
        if let Some(renderer) = renderer {
            renderer.shutdown();
        }
        self.buffer.reset();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::backend::simulated::{wait_until, SimulatedBackend};
    use crate::models::audio_models::AudioEndpoint;
    use crate::models::format::WaveFormat;
    use crate::traits::audio_client::PacketFlags;
    use crate::traits::listener::DeviceListChange;

    const WAIT: Duration = Duration::from_secs(5);

    fn float_bytes(samples: &[f32]) -> Vec<u8> {
        samples.iter().flat_map(|s| s.to_le_bytes()).collect()
    }

    fn manager(backend: &Arc<SimulatedBackend>, recording: Option<PathBuf>) -> LoopbackManager {
        let config = PipelineConfiguration {
            recording_path: recording,
            ..Default::default()
        };
        let manager = LoopbackManager::new(Arc::clone(backend) as Arc<dyn AudioBackend>, config).unwrap();
        manager.start_device().unwrap().wait_timeout(WAIT).unwrap();
        manager
    }

    #[test]
    fn start_device_wires_capture_to_render() {
        let backend = Arc::new(SimulatedBackend::new());
        let manager = manager(&backend, None);

        let capture = manager.capture().unwrap();
        assert_eq!(capture.state(), DeviceState::Initialized);
        let buffer = manager.capture_buffer();
        assert_eq!(buffer.render_format(), Some(WaveFormat::ieee_float(48000, 2)));
        assert_eq!(buffer.source_format(), Some(WaveFormat::ieee_float(48000, 1)));
        assert_eq!(manager.devices().len(), 1);
        assert_eq!(manager.devices().selected(), Some(0));

        assert_eq!(manager.status(), ManagerStatus::default());
        assert_eq!(
            manager.status_lines(),
            vec!["Capture: Stopped", "Playback: Stopped", "Loopback: Disabled"]
        );
        assert!(manager.start_device().is_err());
    }

    #[test]
    fn rejects_invalid_configuration() {
        let config = PipelineConfiguration {
            loopback_buffer_bytes: 0,
            ..Default::default()
        };
        let backend: Arc<dyn AudioBackend> = Arc::new(SimulatedBackend::new());
        assert!(matches!(
            LoopbackManager::new(backend, config),
            Err(AudioError::ConfigurationFailed(_))
        ));
    }

    #[test]
    fn operations_before_start_report_missing_device() {
        let backend: Arc<dyn AudioBackend> = Arc::new(SimulatedBackend::new());
        let manager = LoopbackManager::new(backend, PipelineConfiguration::default()).unwrap();

        assert_eq!(manager.record_toggle(), Err(AudioError::DeviceNotAvailable));
        assert_eq!(manager.play_pause_toggle(), Err(AudioError::DeviceNotAvailable));
        assert_eq!(
            manager.status_lines(),
            vec!["Capture: Not Available", "Playback: Not Available", "Loopback: Disabled"]
        );
    }

    #[test]
    fn loopback_toggle_routes_capture_to_render() {
        let backend = Arc::new(SimulatedBackend::new());
        let manager = manager(&backend, None);

        assert!(manager.loopback_toggle().unwrap());
        assert!(wait_until(|| {
            let status = manager.status();
            status.capturing && status.playing && status.loopback
        }));

        backend.push_capture(float_bytes(&[0.25, -0.5]), PacketFlags::default());
        assert!(wait_until(|| backend.rendered().len() == 16));
        assert_eq!(backend.rendered(), float_bytes(&[0.25, 0.0, -0.5, 0.0]));

        assert!(!manager.loopback_toggle().unwrap());
        let renderer = manager.renderer().unwrap();
        assert!(wait_until(|| renderer.state() == DeviceState::Stopped));
        assert_eq!(manager.status_lines()[2], "Loopback: Disabled");
    }

    #[test]
    fn records_then_plays_back() {
        let path = std::env::temp_dir().join(format!("manager_test_{}.wav", std::process::id()));
        let backend = Arc::new(SimulatedBackend::new());
        let manager = manager(&backend, Some(path.clone()));

        let samples: Vec<f32> = (0..600).map(|i| i as f32 / 1000.0).collect();
        backend.push_capture(float_bytes(&samples), PacketFlags::default());
        manager.record_toggle().unwrap();
        assert!(wait_until(|| backend.pending_capture_packets() == 0 && manager.status().capturing));
        manager.record_toggle().unwrap();
        let capture = manager.capture().unwrap();
        assert!(wait_until(|| capture.state() == DeviceState::Stopped));
        assert_eq!(capture.last_recording().unwrap().data_bytes, 2400);

        manager.play_pause_toggle().unwrap();
        let renderer = manager.renderer().unwrap();
        assert!(wait_until(|| renderer.state() == DeviceState::Stopped));

        let rendered = backend.rendered();
        assert_eq!(rendered.len(), 600 * 8);
        assert_eq!(&rendered[8..16], &float_bytes(&[0.001, 0.0])[..]);

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn switching_capture_device_notifies_subscribers() {
        let backend = Arc::new(SimulatedBackend::new());
        backend.set_endpoints(vec![
            AudioEndpoint::capture("mic-0", "Built-in Microphone", true),
            AudioEndpoint::capture("mic-1", "Headset Microphone", false),
        ]);
        let manager = manager(&backend, None);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        manager
            .devices()
            .subscribe(Arc::new(move |change: &DeviceListChange| sink.lock().push(change.selected)));

        manager.set_capture_device(1).unwrap();
        assert_eq!(backend.last_capture_index(), 1);
        assert_eq!(*seen.lock(), vec![Some(1)]);
        assert!(manager.set_capture_device(7).is_err());

        backend.set_endpoints(vec![AudioEndpoint::capture("mic-1", "Headset Microphone", true)]);
        assert!(manager.refresh_devices().unwrap());
        assert_eq!(*seen.lock(), vec![Some(1), Some(0)]);
    }

    #[test]
    fn switching_device_mid_recording_closes_recording_and_stops_playback() {
        let path = std::env::temp_dir().join(format!("manager_switch_test_{}.wav", std::process::id()));
        let backend = Arc::new(SimulatedBackend::new());
        backend.set_endpoints(vec![
            AudioEndpoint::capture("mic-0", "Built-in Microphone", true),
            AudioEndpoint::capture("mic-1", "Headset Microphone", false),
        ]);
        let manager = manager(&backend, Some(path.clone()));

        assert!(manager.loopback_toggle().unwrap());
        assert!(wait_until(|| {
            let status = manager.status();
            status.capturing && status.playing
        }));
        backend.push_capture(float_bytes(&[0.25, -0.5]), PacketFlags::default());
        assert!(wait_until(|| backend.rendered().len() == 16));

        manager.set_capture_device(1).unwrap();
        let capture = manager.capture().unwrap();
        assert_eq!(capture.state(), DeviceState::Initialized);
        let recording = capture.last_recording().unwrap();
        assert_eq!(recording.data_bytes, 8);
        assert_eq!(recording.checksum.len(), 64);

        let renderer = manager.renderer().unwrap();
        assert!(wait_until(|| renderer.state() == DeviceState::Stopped));
        assert!(!manager.status().playing);

        let _ = std::fs::remove_file(&path);
        let _ = std::fs::remove_file(crate::storage::metadata::metadata_path(&path));
    }

    #[test]
    fn restart_device_rebuilds_pipeline() {
        let backend = Arc::new(SimulatedBackend::new());
        let manager = manager(&backend, None);
        let first = manager.renderer().unwrap();

        manager.restart_device().unwrap().wait_timeout(WAIT).unwrap();
        let second = manager.renderer().unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(backend.render_activations(), 2);
        assert_eq!(backend.capture_activations(), 2);
        assert_eq!(manager.capture().unwrap().state(), DeviceState::Initialized);
    }
}
