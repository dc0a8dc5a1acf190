//! Coordinator state machine.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Global coordinator state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoordinatorState {
    Idle,
    Ready,
    Coordinating,
    Waving,
    Paused,
    Stopping,
    Error,
}

impl CoordinatorState {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Ready => "ready",
            Self::Coordinating => "coordinating",
            Self::Waving => "waving",
            Self::Paused => "paused",
            Self::Stopping => "stopping",
            Self::Error => "error",
        }
    }

    /// State implied by the sessions once nothing is in flight.
    #[must_use]
    pub const fn derived(any_waving: bool, any_paused: bool) -> Self {
        if any_waving {
            Self::Waving
        } else if any_paused {
            Self::Paused
        } else {
            Self::Ready
        }
    }
}

impl fmt::Display for CoordinatorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Input to the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsmEvent {
    Initialize,
    Start,
    Stop,
    Pause,
    Resume,
    /// Every dispatched command has been acknowledged; carries the state
    /// derived from the sessions.
    CoordinationComplete(CoordinatorState),
    CoordinationFailed,
    SettingsUpdate,
    SelectorOperation,
    ErrorReported,
    TabUpdated,
    TabRemoved,
    Retry,
    Reset,
}

/// Next state for `event` in `state`, or `None` when the event leaves the
/// state alone.
#[must_use]
pub const fn transition(state: CoordinatorState, event: FsmEvent) -> Option<CoordinatorState> {
    use CoordinatorState as S;

    match (state, event) {
        (_, FsmEvent::Reset) => Some(S::Idle),
        (S::Idle, FsmEvent::Initialize) | (S::Error, FsmEvent::Retry) => Some(S::Ready),
        (S::Idle | S::Ready | S::Waving | S::Paused, FsmEvent::Start) => Some(S::Coordinating),
        (S::Waving | S::Paused, FsmEvent::Stop) => Some(S::Stopping),
        (
            S::Coordinating | S::Stopping | S::Waving | S::Paused | S::Ready,
            FsmEvent::CoordinationComplete(derived),
        ) => Some(derived),
        (S::Error, FsmEvent::CoordinationFailed) => None,
        (_, FsmEvent::CoordinationFailed) => Some(S::Error),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use CoordinatorState as S;

    #[test]
    fn test_start_from_ready_states() {
        for from in [S::Idle, S::Ready, S::Waving, S::Paused] {
            assert_eq!(transition(from, FsmEvent::Start), Some(S::Coordinating));
        }
        assert_eq!(transition(S::Error, FsmEvent::Start), None);
        assert_eq!(transition(S::Stopping, FsmEvent::Start), None);
    }

    #[test]
    fn test_stop_only_from_active() {
        assert_eq!(transition(S::Waving, FsmEvent::Stop), Some(S::Stopping));
        assert_eq!(transition(S::Paused, FsmEvent::Stop), Some(S::Stopping));
        assert_eq!(transition(S::Ready, FsmEvent::Stop), None);
    }

    #[test]
    fn test_completion_applies_derived_state() {
        let done = FsmEvent::CoordinationComplete(S::derived(false, true));
        assert_eq!(transition(S::Coordinating, done), Some(S::Paused));
        assert_eq!(transition(S::Stopping, FsmEvent::CoordinationComplete(S::derived(false, false))), Some(S::Ready));
        assert_eq!(transition(S::Idle, done), None);
        assert_eq!(transition(S::Error, done), None);
    }

    #[test]
    fn test_failure_and_recovery() {
        assert_eq!(transition(S::Waving, FsmEvent::CoordinationFailed), Some(S::Error));
        assert_eq!(transition(S::Error, FsmEvent::CoordinationFailed), None);
        assert_eq!(transition(S::Error, FsmEvent::Retry), Some(S::Ready));
        assert_eq!(transition(S::Ready, FsmEvent::Retry), None);
        assert_eq!(transition(S::Error, FsmEvent::Reset), Some(S::Idle));
        assert_eq!(transition(S::Idle, FsmEvent::Initialize), Some(S::Ready));
    }

    #[test]
    fn test_bookkeeping_events_keep_state() {
        for event in [
            FsmEvent::SettingsUpdate,
            FsmEvent::SelectorOperation,
            FsmEvent::ErrorReported,
            FsmEvent::TabUpdated,
        ] {
            assert_eq!(transition(S::Waving, event), None);
        }
    }
}
