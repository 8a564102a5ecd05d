use std::time::Duration;

use crate::models::error::AudioError;
use crate::models::format::WaveFormat;
use crate::session::event::AudioEvent;

/// Stream category requested from the audio engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StreamCategory {
    #[default]
    Other,
    ForegroundOnlyMedia,
    Communications,
    GameMedia,
}

/// Properties applied to a client before it is initialized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ClientProperties {
    pub offload: bool,
    pub category: StreamCategory,
    /// Ask the engine for raw (unprocessed) capture.
    pub raw: bool,
}

/// Flags reported with a captured packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PacketFlags {
    /// The packet contents should be treated as silence.
    pub silent: bool,
    /// The device dropped data before this packet.
    pub discontinuity: bool,
}

/// Shared-mode, event-driven audio stream on one endpoint.
///
/// Implemented by:
/// - `WasapiClient` (Windows)
/// - `SimulatedClient` (software clock, tests)
///
/// Methods are called from a single thread at a time: activation happens
/// on the activating thread, then ownership moves to the stream worker.
pub trait AudioClient: Send {
    fn set_client_properties(&mut self, properties: &ClientProperties) -> Result<(), AudioError>;

    /// The engine's shared-mode mix format.
    fn mix_format(&self) -> Result<WaveFormat, AudioError>;

    /// Initialize in shared, event-callback mode.
    fn initialize(&mut self, format: &WaveFormat, buffer_duration: Duration) -> Result<(), AudioError>;

    /// Endpoint buffer size in frames.
    fn buffer_size(&self) -> Result<u32, AudioError>;

    /// Default device period.
    fn device_period(&self) -> Result<Duration, AudioError>;

    /// Register the event signalled each time a buffer is ready.
    fn set_event_handle(&mut self, event: AudioEvent) -> Result<(), AudioError>;

    fn start(&mut self) -> Result<(), AudioError>;

    fn stop(&mut self) -> Result<(), AudioError>;
}

/// Render side of an [`AudioClient`].
pub trait RenderClient: AudioClient {
    /// Frames queued in the endpoint buffer and not yet played.
    fn current_padding(&self) -> Result<u32, AudioError>;

    /// Hand `frames` frames to the device; `None` marks them silent.
    ///
    /// When given, `data` holds exactly `frames * block_align` bytes.
    fn write_buffer(&mut self, frames: u32, data: Option<&[u8]>) -> Result<(), AudioError>;
}

/// Capture side of an [`AudioClient`].
pub trait CaptureClient: AudioClient {
    /// Pass the next captured packet to `sink` and release it.
    ///
    /// Returns the number of frames in the packet, 0 when none is pending.
    fn read_packet(&mut self, sink: &mut dyn FnMut(&[u8], PacketFlags)) -> Result<u32, AudioError>;
}
