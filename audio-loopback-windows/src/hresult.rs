//! Classification of WASAPI `HRESULT` failures.
//!
//! Kept free of `windows` types so the mapping is testable on every host.

use thiserror::Error;

use audio_loopback_core::models::error::AudioError;

pub const AUDCLNT_E_NOT_INITIALIZED: u32 = 0x8889_0001;
pub const AUDCLNT_E_DEVICE_INVALIDATED: u32 = 0x8889_0004;
pub const AUDCLNT_E_BUFFER_TOO_LARGE: u32 = 0x8889_0006;
pub const AUDCLNT_E_UNSUPPORTED_FORMAT: u32 = 0x8889_0008;
pub const AUDCLNT_E_DEVICE_IN_USE: u32 = 0x8889_000A;
pub const AUDCLNT_E_BUFFER_ERROR: u32 = 0x8889_0018;
pub const AUDCLNT_E_RESOURCES_INVALIDATED: u32 = 0x8889_0026;
pub const E_NOTFOUND: u32 = 0x8007_0490;

/// A failed WASAPI call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{context} failed (0x{code:08X})")]
pub struct HresultError {
    pub code: u32,
    pub context: &'static str,
}

impl HresultError {
    pub fn new(code: i32, context: &'static str) -> Self {
        Self {
            code: code as u32,
            context,
        }
    }
}

impl From<HresultError> for AudioError {
    fn from(err: HresultError) -> Self {
        match err.code {
            AUDCLNT_E_DEVICE_INVALIDATED | AUDCLNT_E_RESOURCES_INVALIDATED => AudioError::ResourcesInvalidated,
            AUDCLNT_E_BUFFER_TOO_LARGE | AUDCLNT_E_BUFFER_ERROR => AudioError::BufferUnavailable,
            AUDCLNT_E_UNSUPPORTED_FORMAT => AudioError::UnsupportedFormat(err.to_string()),
            E_NOTFOUND => AudioError::DeviceNotAvailable,
            code => AudioError::Os {
                code,
                context: err.context.to_string(),
            },
        }
    }
}
