use thiserror::Error;

use super::state::DeviceState;

/// Errors produced by the audio pipeline.
///
/// Device wrappers never panic on these; runtime failures are surfaced
/// through [`DeviceStateChange`](crate::traits::listener::DeviceStateChange)
/// and precondition failures are returned directly.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AudioError {
    #[error("device not available")]
    DeviceNotAvailable,

    /// The audio endpoint was removed or its format changed underneath us.
    #[error("audio resources invalidated")]
    ResourcesInvalidated,

    #[error("`{operation}` is not valid in state {state}")]
    InvalidState {
        operation: &'static str,
        state: DeviceState,
    },

    #[error("invalid state transition {from} -> {to}")]
    InvalidTransition { from: DeviceState, to: DeviceState },

    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("malformed wave data: {0}")]
    InvalidWaveData(String),

    #[error("configuration failed: {0}")]
    ConfigurationFailed(String),

    #[error("storage error: {0}")]
    StorageError(String),

    /// The device buffer could not be acquired for this pass.
    #[error("device buffer unavailable")]
    BufferUnavailable,

    #[error("device call failed (0x{code:08X}): {context}")]
    Os { code: u32, context: String },

    #[error("worker thread failed: {0}")]
    Thread(String),

    #[error("timeout")]
    Timeout,
}

/// How a device wrapper reacts to an error raised on its worker thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Release the client, go back to `Uninitialized` and activate again.
    Resettable,
    /// Enter `InError` and stop servicing until reinitialized.
    Fatal,
    /// Skip the current pass.
    Soft,
}

impl AudioError {
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::ResourcesInvalidated => ErrorClass::Resettable,
            Self::BufferUnavailable => ErrorClass::Soft,
            // Lost a race with an owner operation; the owner's command finishes the job.
            Self::InvalidState { .. } | Self::InvalidTransition { .. } => ErrorClass::Soft,
            _ => ErrorClass::Fatal,
        }
    }

    pub(crate) fn storage(context: &str, err: impl std::fmt::Display) -> Self {
        Self::StorageError(format!("{}: {}", context, err))
    }
}
