use crate::models::audio_models::AudioEndpoint;
use crate::models::error::AudioError;
use crate::models::state::DeviceState;

/// A state transition reported by a device wrapper.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceStateChange {
    pub previous: DeviceState,
    pub state: DeviceState,
    /// The error that caused the transition, if any.
    pub error: Option<AudioError>,
}

/// Observer of device state transitions.
///
/// Called on whichever thread performed the transition (caller, activation
/// or worker thread), never with a wrapper lock held. Implementations may
/// call back into the wrapper but should return quickly.
pub trait DeviceStateListener: Send + Sync {
    fn on_state_changed(&self, change: &DeviceStateChange);
}

impl<F> DeviceStateListener for F
where
    F: Fn(&DeviceStateChange) + Send + Sync,
{
    fn on_state_changed(&self, change: &DeviceStateChange) {
        self(change)
    }
}

/// Snapshot of the capture endpoint list after a change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceListChange {
    pub devices: Vec<AudioEndpoint>,
    /// Index of the selected endpoint in `devices`, if it is still present.
    pub selected: Option<usize>,
}

/// Observer of capture endpoint list changes.
pub trait DeviceListListener: Send + Sync {
    fn on_devices_changed(&self, change: &DeviceListChange);
}

impl<F> DeviceListListener for F
where
    F: Fn(&DeviceListChange) + Send + Sync,
{
    fn on_devices_changed(&self, change: &DeviceListChange) {
        self(change)
    }
}
