use crate::models::audio_models::AudioEndpoint;
use crate::models::error::AudioError;

use super::audio_client::{CaptureClient, RenderClient};

/// Entry point to a platform audio API.
///
/// Implemented by:
/// - `WasapiBackend` (Windows)
/// - `SimulatedBackend` (portable, tests)
pub trait AudioBackend: Send + Sync {
    /// Capture endpoints in enumeration order; indices are stable until the next call.
    fn capture_endpoints(&self) -> Result<Vec<AudioEndpoint>, AudioError>;

    /// Activate a client on the default render endpoint.
    fn activate_render(&self) -> Result<Box<dyn RenderClient>, AudioError>;

    /// Activate a client on the capture endpoint at `index`.
    fn activate_capture(&self, index: usize) -> Result<Box<dyn CaptureClient>, AudioError>;

    /// Raise the calling worker thread to the platform's real-time audio class.
    fn promote_current_thread(&self) {}
}
