use std::fmt;

/// Lifecycle state of a capture or render device wrapper.
///
/// Transitions:
/// ```text
/// Uninitialized → Activated → Initialized → Starting → Playing | Capturing
/// Playing   → Pausing → Paused → Starting | Stopping
/// Playing   → Stopping
/// Capturing → Discontinuity → Capturing | Stopping
/// Capturing → Stopping → Stopped → Starting
///
/// any → InError        (fatal error; InError only leaves via Uninitialized)
/// any → Uninitialized  (resources invalidated / reinitialize)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceState {
    Uninitialized,
    InError,
    Discontinuity,
    Activated,
    Initialized,
    Starting,
    Playing,
    Capturing,
    Pausing,
    Paused,
    Stopping,
    Stopped,
}

impl DeviceState {
    /// Whether the state machine permits moving from `self` to `next`.
    ///
    /// Re-entering the current state is handled by the notifier as a no-op and
    /// is not considered a transition here.
    pub fn can_transition_to(self, next: DeviceState) -> bool {
        use DeviceState::*;

        if self == next {
            return false;
        }
        match (self, next) {
            (_, InError) | (_, Uninitialized) => true,
            (InError, _) => false,
            (Uninitialized, Activated) => true,
            (Activated, Initialized) => true,
            (Initialized, Starting) => true,
            (Starting, Playing) | (Starting, Capturing) => true,
            (Playing, Pausing) | (Playing, Stopping) => true,
            (Pausing, Paused) => true,
            (Paused, Starting) | (Paused, Stopping) => true,
            (Capturing, Stopping) | (Capturing, Discontinuity) => true,
            (Discontinuity, Capturing) | (Discontinuity, Stopping) => true,
            (Stopping, Stopped) => true,
            (Stopped, Starting) => true,
            _ => false,
        }
    }

    /// Whether the device is moving audio (or about to).
    pub fn is_streaming(self) -> bool {
        matches!(
            self,
            Self::Starting | Self::Playing | Self::Capturing | Self::Discontinuity | Self::Pausing
        )
    }

    pub fn is_error(self) -> bool {
        self == Self::InError
    }
}

impl fmt::Display for DeviceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use DeviceState::*;

    const ALL: [DeviceState; 12] = [
        Uninitialized,
        InError,
        Discontinuity,
        Activated,
        Initialized,
        Starting,
        Playing,
        Capturing,
        Pausing,
        Paused,
        Stopping,
        Stopped,
    ];

    #[test]
    fn happy_paths() {
        let render = [Uninitialized, Activated, Initialized, Starting, Playing, Pausing, Paused, Starting];
        for pair in render.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{} -> {}", pair[0], pair[1]);
        }

        let capture = [Initialized, Starting, Capturing, Discontinuity, Capturing, Stopping, Stopped, Starting];
        for pair in capture.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{} -> {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn stopped_never_skips_starting() {
        assert!(!Stopped.can_transition_to(Playing));
        assert!(!Stopped.can_transition_to(Capturing));
        assert!(!Paused.can_transition_to(Playing));
        assert!(!Initialized.can_transition_to(Playing));
    }

    #[test]
    fn error_and_reset_reachable_from_everywhere() {
        for state in ALL {
            if state != InError {
                assert!(state.can_transition_to(InError), "{} -> InError", state);
            }
            if state != Uninitialized {
                assert!(state.can_transition_to(Uninitialized), "{} -> Uninitialized", state);
            }
        }
    }

    #[test]
    fn in_error_is_terminal_until_reset() {
        for state in ALL {
            let allowed = InError.can_transition_to(state);
            assert_eq!(allowed, state == Uninitialized, "InError -> {}", state);
        }
    }

    #[test]
    fn same_state_is_not_a_transition() {
        for state in ALL {
            assert!(!state.can_transition_to(state));
        }
    }
}
