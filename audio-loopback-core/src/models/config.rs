use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::error::AudioError;

/// Configuration for the capture/render loopback pipeline.
///
/// Missing fields fall back to [`Default`] when deserialized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfiguration {
    /// Size in bytes of the circular buffer between capture and render (default: 32 KiB).
    pub loopback_buffer_bytes: usize,

    /// Requested render buffer duration in milliseconds (default: 20).
    pub render_buffer_ms: u64,

    /// Requested capture buffer duration in milliseconds (default: 1000).
    pub capture_buffer_ms: u64,

    /// Force the render mix format down to two channels (default: true).
    pub force_stereo_render: bool,

    /// Where captured audio is recorded; `None` disables recording.
    pub recording_path: Option<PathBuf>,

    /// Write a JSON metadata sidecar next to each finished recording.
    pub write_metadata_sidecar: bool,

    /// Route captured audio straight to the renderer on startup.
    pub loopback: bool,

    /// Index of the capture endpoint to open first.
    pub capture_device_index: usize,

    /// How long a worker waits for a device event before servicing anyway (default: 100).
    pub stall_timeout_ms: u64,

    pub tone_frequency_hz: u32,
    pub tone_duration_secs: u32,
    pub tone_amplitude: f64,
}

impl PipelineConfiguration {
    pub fn validate(&self) -> Result<(), String> {
        if self.loopback_buffer_bytes == 0 {
            return Err("loopback buffer must not be empty".into());
        }
        if self.render_buffer_ms == 0 || self.capture_buffer_ms == 0 {
            return Err("buffer durations must be positive".into());
        }
        if self.stall_timeout_ms == 0 {
            return Err("stall timeout must be positive".into());
        }
        if self.tone_frequency_hz == 0 {
            return Err("tone frequency must be positive".into());
        }
        if !(0.0..=1.0).contains(&self.tone_amplitude) {
            return Err(format!("tone amplitude out of range: {}", self.tone_amplitude));
        }
        Ok(())
    }

    /// Parse and validate a JSON configuration document.
    pub fn from_json_str(json: &str) -> Result<Self, AudioError> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| AudioError::ConfigurationFailed(format!("invalid configuration: {}", e)))?;
        config.validate().map_err(AudioError::ConfigurationFailed)?;
        Ok(config)
    }

    pub fn render_buffer_duration(&self) -> Duration {
        Duration::from_millis(self.render_buffer_ms)
    }

    pub fn capture_buffer_duration(&self) -> Duration {
        Duration::from_millis(self.capture_buffer_ms)
    }

    pub fn stall_timeout(&self) -> Duration {
        Duration::from_millis(self.stall_timeout_ms)
    }
}

impl Default for PipelineConfiguration {
    fn default() -> Self {
        Self {
            loopback_buffer_bytes: 32 * 1024,
            render_buffer_ms: 20,
            capture_buffer_ms: 1000,
            force_stereo_render: true,
            recording_path: Some(PathBuf::from("Recording.wav")),
            write_metadata_sidecar: false,
            loopback: false,
            capture_device_index: 0,
            stall_timeout_ms: 100,
            tone_frequency_hz: 440,
            tone_duration_secs: 30,
            tone_amplitude: 0.5,
        }
    }
}
