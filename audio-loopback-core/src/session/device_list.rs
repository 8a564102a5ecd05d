use std::sync::Arc;

use parking_lot::Mutex;

use crate::models::audio_models::AudioEndpoint;
use crate::models::error::AudioError;
use crate::traits::listener::{DeviceListChange, DeviceListListener};

use super::notifier::{ListenerSet, ListenerToken};

#[derive(Default)]
struct ListState {
    devices: Vec<AudioEndpoint>,
    selected_id: Option<String>,
}

impl ListState {
    fn selected_index(&self) -> Option<usize> {
        let id = self.selected_id.as_ref()?;
        self.devices.iter().position(|d| &d.id == id)
    }

    fn change(&self) -> DeviceListChange {
        DeviceListChange {
            devices: self.devices.clone(),
            selected: self.selected_index(),
        }
    }
}

/// The capture endpoints known to the pipeline and the one in use.
///
/// The selection follows the endpoint id, so it survives reordering when
/// the list is refreshed.
pub struct CaptureDeviceList {
    state: Mutex<ListState>,
    listeners: ListenerSet<dyn DeviceListListener>,
}

impl CaptureDeviceList {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ListState::default()),
            listeners: ListenerSet::new(),
        }
    }

    /// Replace the list; listeners are told only when it actually changed.
    ///
    /// Returns whether it changed.
    pub fn refresh(&self, devices: Vec<AudioEndpoint>) -> bool {
        let change = {
            let mut state = self.state.lock();
            if state.devices == devices {
                return false;
            }
            state.devices = devices;
            if state.selected_index().is_none() {
                let fallback = state
                    .devices
                    .iter()
                    .find(|d| d.is_default)
                    .or_else(|| state.devices.first())
                    .map(|d| d.id.clone());
                state.selected_id = fallback;
            }
            state.change()
        };
        log::debug!("capture device list changed: {} devices", change.devices.len());
        self.notify(&change);
        true
    }

    pub fn devices(&self) -> Vec<AudioEndpoint> {
        self.state.lock().devices.clone()
    }

    pub fn len(&self) -> usize {
        self.state.lock().devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().devices.is_empty()
    }

    /// Index of the selected endpoint in the current list.
    pub fn selected(&self) -> Option<usize> {
        self.state.lock().selected_index()
    }

    pub fn selected_device(&self) -> Option<AudioEndpoint> {
        let state = self.state.lock();
        state.selected_index().map(|i| state.devices[i].clone())
    }

    /// Select the endpoint at `index`.
    pub fn select(&self, index: usize) -> Result<AudioEndpoint, AudioError> {
        let (device, change) = {
            let mut state = self.state.lock();
            let device = state.devices.get(index).cloned().ok_or_else(|| {
                AudioError::InvalidArgument(format!(
                    "capture device {} out of range ({} devices)",
                    index,
                    state.devices.len()
                ))
            })?;
            if state.selected_id.as_ref() == Some(&device.id) {
                return Ok(device);
            }
            state.selected_id = Some(device.id.clone());
            (device, state.change())
        };
        self.notify(&change);
        Ok(device)
    }

    pub fn subscribe(&self, listener: Arc<dyn DeviceListListener>) -> ListenerToken {
        self.listeners.subscribe(listener)
    }

    pub fn unsubscribe(&self, token: ListenerToken) -> bool {
        self.listeners.unsubscribe(token)
    }

    fn notify(&self, change: &DeviceListChange) {
        for listener in self.listeners.snapshot() {
            listener.on_devices_changed(change);
        }
    }
}

impl Default for CaptureDeviceList {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoints(ids: &[&str]) -> Vec<AudioEndpoint> {
        ids.iter()
            .enumerate()
            .map(|(i, id)| AudioEndpoint::capture(*id, format!("Microphone {}", id), i == 0))
            .collect()
    }

    fn recorder(list: &CaptureDeviceList) -> Arc<Mutex<Vec<DeviceListChange>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        list.subscribe(Arc::new(move |change: &DeviceListChange| sink.lock().push(change.clone())));
        seen
    }

    #[test]
    fn first_refresh_selects_default() {
        let list = CaptureDeviceList::new();
        let seen = recorder(&list);

        assert!(list.refresh(endpoints(&["a", "b"])));
        assert_eq!(list.selected(), Some(0));
        assert_eq!(seen.lock().len(), 1);
        assert_eq!(seen.lock()[0].selected, Some(0));
    }

    #[test]
    fn unchanged_refresh_is_silent() {
        let list = CaptureDeviceList::new();
        let seen = recorder(&list);

        list.refresh(endpoints(&["a", "b"]));
        assert!(!list.refresh(endpoints(&["a", "b"])));
        assert_eq!(seen.lock().len(), 1);
    }

    #[test]
    fn selection_follows_id_across_reorder() {
        let list = CaptureDeviceList::new();
        list.refresh(endpoints(&["a", "b", "c"]));
        list.select(2).unwrap();

        list.refresh(endpoints(&["c", "a"]));
        assert_eq!(list.selected(), Some(0));
        assert_eq!(list.selected_device().unwrap().id, "c");
    }

    #[test]
    fn removed_selection_falls_back_to_default() {
        let list = CaptureDeviceList::new();
        list.refresh(endpoints(&["a", "b"]));
        list.select(1).unwrap();

        list.refresh(endpoints(&["x", "a"]));
        assert_eq!(list.selected_device().unwrap().id, "x");
    }

    #[test]
    fn select_out_of_range_fails() {
        let list = CaptureDeviceList::new();
        list.refresh(endpoints(&["a"]));
        assert!(matches!(list.select(3), Err(AudioError::InvalidArgument(_))));
        assert_eq!(list.selected(), Some(0));
    }
}
