use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::models::error::AudioError;
use crate::models::state::DeviceState;
use crate::traits::listener::{DeviceStateChange, DeviceStateListener};

/// Handle returned by `subscribe`, used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerToken(u64);

/// Registered listeners, invoked outside the lock.
pub(crate) struct ListenerSet<L: ?Sized> {
    listeners: RwLock<Vec<(u64, Arc<L>)>>,
    next_token: AtomicU64,
}

impl<L: ?Sized> ListenerSet<L> {
    pub(crate) fn new() -> Self {
        Self {
            listeners: RwLock::new(Vec::new()),
            next_token: AtomicU64::new(1),
        }
    }

    pub(crate) fn subscribe(&self, listener: Arc<L>) -> ListenerToken {
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        self.listeners.write().push((token, listener));
        ListenerToken(token)
    }

    pub(crate) fn unsubscribe(&self, token: ListenerToken) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|(id, _)| *id != token.0);
        listeners.len() != before
    }

    pub(crate) fn snapshot(&self) -> Vec<Arc<L>> {
        self.listeners.read().iter().map(|(_, l)| Arc::clone(l)).collect()
    }
}

/// Owns the [`DeviceState`] of one device wrapper and publishes its transitions.
///
/// Every transition is validated against the state machine. Re-setting the
/// current state is a silent no-op.
pub struct DeviceStateNotifier {
    name: &'static str,
    state: Mutex<DeviceState>,
    last_error: Mutex<Option<AudioError>>,
    listeners: ListenerSet<dyn DeviceStateListener>,
}

impl DeviceStateNotifier {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            state: Mutex::new(DeviceState::Uninitialized),
            last_error: Mutex::new(None),
            listeners: ListenerSet::new(),
        }
    }

    pub fn state(&self) -> DeviceState {
        *self.state.lock()
    }

    /// The error attached to the most recent failing transition.
    pub fn last_error(&self) -> Option<AudioError> {
        self.last_error.lock().clone()
    }

    pub fn subscribe(&self, listener: Arc<dyn DeviceStateListener>) -> ListenerToken {
        self.listeners.subscribe(listener)
    }

    pub fn unsubscribe(&self, token: ListenerToken) -> bool {
        self.listeners.unsubscribe(token)
    }

    /// Move to `next`, optionally notifying listeners.
    ///
    /// Returns `Ok(false)` when already in `next`.
    pub fn set_state(&self, next: DeviceState, error: Option<AudioError>, notify: bool) -> Result<bool, AudioError> {
        let previous = {
            let mut state = self.state.lock();
            let previous = *state;
            if previous == next {
                return Ok(false);
            }
            if !previous.can_transition_to(next) {
                return Err(AudioError::InvalidTransition { from: previous, to: next });
            }
            *state = next;
            previous
        };
        self.finish(previous, next, error, notify);
        Ok(true)
    }

    /// Atomically move to `next` if the current state is one of `allowed`.
    ///
    /// Used by owner operations; returns the previous state.
    pub fn transition(
        &self,
        allowed: &[DeviceState],
        next: DeviceState,
        operation: &'static str,
        notify: bool,
    ) -> Result<DeviceState, AudioError> {
        let previous = {
            let mut state = self.state.lock();
            let previous = *state;
            if !allowed.contains(&previous) || !previous.can_transition_to(next) {
                return Err(AudioError::InvalidState {
                    operation,
                    state: previous,
                });
            }
            *state = next;
            previous
        };
        self.finish(previous, next, None, notify);
        Ok(previous)
    }

    /// Enter `InError` with `error` and notify.
    pub fn fail(&self, error: AudioError) {
        log::error!("{} device failed: {}", self.name, error);
        if let Err(e) = self.set_state(DeviceState::InError, Some(error), true) {
            log::warn!("{}: {}", self.name, e);
        }
    }

    /// Return to `Uninitialized`; always permitted.
    pub fn reset(&self, error: Option<AudioError>, notify: bool) {
        if let Err(e) = self.set_state(DeviceState::Uninitialized, error, notify) {
            log::warn!("{}: {}", self.name, e);
        }
    }

    fn finish(&self, previous: DeviceState, state: DeviceState, error: Option<AudioError>, notify: bool) {
        log::debug!("{}: {} -> {}", self.name, previous, state);
        if error.is_some() || state == DeviceState::Uninitialized {
            *self.last_error.lock() = error.clone();
        }
        if !notify {
            return;
        }
        let change = DeviceStateChange { previous, state, error };
        for listener in self.listeners.snapshot() {
            listener.on_state_changed(&change);
        }
    }
}
