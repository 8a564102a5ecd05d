//! # audio-loopback-windows
//!
//! Windows WASAPI backend for audio-loopback-core.
//!
//! Provides:
//! - `WasapiBackend`: `AudioBackend` over the MMDevice API, MMCSS thread promotion
//! - `WasapiClient`: shared-mode, event-driven `IAudioClient` (render and capture)
//! - `DeviceEnumerator`: capture endpoint enumeration
//! - `hresult`: mapping of WASAPI failures onto `AudioError`
//!
//! ## Platform Requirements
//! - Windows 8+ for `IAudioClient2` stream categories (older systems run without them)
//! - Visual Studio Build Tools 2022 + Windows SDK for linking
//!
//! ## Usage
//! ```ignore
//! use std::sync::Arc;
//! use audio_loopback_core::{LoopbackManager, PipelineConfiguration};
//! use audio_loopback_windows::WasapiBackend;
//!
//! let backend = Arc::new(WasapiBackend::new()?);
//! let manager = LoopbackManager::new(backend, PipelineConfiguration::default())?;
//! manager.start_device()?;
//! manager.loopback_toggle()?;
//! ```

pub mod hresult;

#[cfg(target_os = "windows")]
pub mod device_enumerator;
#[cfg(target_os = "windows")]
pub mod wasapi_backend;
#[cfg(target_os = "windows")]
pub mod wasapi_client;

pub use hresult::HresultError;

#[cfg(target_os = "windows")]
pub use device_enumerator::DeviceEnumerator;
#[cfg(target_os = "windows")]
pub use wasapi_backend::WasapiBackend;
#[cfg(target_os = "windows")]
pub use wasapi_client::WasapiClient;
