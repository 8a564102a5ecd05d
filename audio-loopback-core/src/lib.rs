//! # audio-loopback-core
//!
//! Platform-agnostic core of an event-driven, shared-mode audio pipeline.
//!
//! Provides the device state machine, capture and render stream workers,
//! a circular buffer bridging capture to render, static sample generators
//! and WAV I/O. Platform backends (Windows WASAPI, the in-process simulator)
//! implement the `AudioBackend` trait and plug into the device wrappers.
//!
//! ## Architecture
//!
//! ```text
//! audio-loopback-core (this crate)
//! ├── traits/       ← AudioBackend, AudioClient, RenderClient, CaptureClient, listeners
//! ├── models/       ← AudioError, DeviceState, WaveFormat, PipelineConfiguration, etc.
//! ├── processing/   ← CircularAudioBuffer, sample codecs, wave and tone generators
//! ├── session/      ← AudioRenderer, AudioCapture, LoopbackManager, command queue, workers
//! ├── storage/      ← WAV reader/writer, recording metadata sidecar
//! └── backend/      ← SimulatedBackend (software clock)
//! ```

pub mod backend;
pub mod models;
pub mod processing;
pub mod session;
pub mod storage;
pub mod traits;

// Re-export key types at crate root for convenience.
pub use backend::SimulatedBackend;
pub use models::audio_models::{AudioEndpoint, AudioTransportType, EndpointFlow, StreamDiagnostics};
pub use models::config::PipelineConfiguration;
pub use models::error::{AudioError, ErrorClass};
pub use models::format::WaveFormat;
pub use models::recording_result::{RecordingMetadata, RecordingResult};
pub use models::state::DeviceState;
pub use processing::circular_buffer::CircularAudioBuffer;
pub use processing::sample_queue::SampleSource;
pub use processing::tone_generator::ToneSampleGenerator;
pub use processing::wave_generator::WaveSampleGenerator;
pub use session::capture::AudioCapture;
pub use session::command_queue::{Command, CommandQueue};
pub use session::device_list::CaptureDeviceList;
pub use session::event::AudioEvent;
pub use session::manager::{LoopbackManager, ManagerStatus};
pub use session::notifier::{DeviceStateNotifier, ListenerToken};
pub use session::render::AudioRenderer;
pub use session::stream::{ActivationHandle, StreamInfo};
pub use storage::wav_reader::WavData;
pub use storage::wav_writer::WaveFileWriter;
pub use traits::audio_client::{AudioClient, CaptureClient, ClientProperties, PacketFlags, RenderClient, StreamCategory};
pub use traits::backend::AudioBackend;
pub use traits::listener::{DeviceListChange, DeviceListListener, DeviceStateChange, DeviceStateListener};
