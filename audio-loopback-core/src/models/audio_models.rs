use serde::{Deserialize, Serialize};

/// Direction of an audio endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EndpointFlow {
    Capture,
    Render,
}

/// Transport type for an audio device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AudioTransportType {
    BuiltIn,
    Bluetooth,
    BluetoothLE,
    Usb,
    Virtual,
    Unknown,
}

/// An audio endpoint that can be activated for capture or playback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioEndpoint {
    pub id: String,
    pub name: String,
    pub flow: EndpointFlow,
    pub is_default: bool,
    pub transport_type: Option<AudioTransportType>,
}

impl AudioEndpoint {
    pub fn capture(id: impl Into<String>, name: impl Into<String>, is_default: bool) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            flow: EndpointFlow::Capture,
            is_default,
            transport_type: None,
        }
    }
}

/// Counters kept by a stream worker, readable from any thread.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamDiagnostics {
    /// I/O passes triggered by the device event.
    pub buffer_passes: u64,
    /// Waits that timed out while streaming.
    pub stalls: u64,
    /// Frames moved to or from the device.
    pub frames: u64,
    /// Discontinuity flags reported by the device.
    pub discontinuities: u64,
}
