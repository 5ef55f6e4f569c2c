//! SessionState transitions.
//!
//! Idle → Starting → Talking → ShuttingDown, with Starting → Idle on
//! startup failure. ShuttingDown is terminal: the process exits after
//! teardown.

use nico_common::session::SessionState;

/// Result of a SessionState transition attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionResult {
    /// Transition succeeded: new state.
    Ok(SessionState),
    /// Transition rejected: reason.
    Rejected(&'static str),
}

/// Session-level event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    /// Physical button press (debounced, asserted).
    ButtonPressed,
    /// Remote compute and speech service are ready.
    ComputeReady,
    /// Remote compute could not be brought up.
    StartupFailed,
    /// Any shutdown trigger: hold, worker exit, fatal error, signal.
    Shutdown,
}

/// SessionState holder. Callers serialize access with their own lock.
#[derive(Debug, Clone, Default)]
pub struct SessionStateMachine {
    state: SessionState,
}

impl SessionStateMachine {
    pub const fn new() -> Self {
        Self {
            state: SessionState::Idle,
        }
    }

    #[inline]
    pub const fn state(&self) -> SessionState {
        self.state
    }

    /// Attempt a transition given an event.
    pub fn handle_event(&mut self, event: SessionEvent) -> TransitionResult {
        use SessionEvent::*;
        use SessionState::*;

        let next = match (self.state, event) {
            (Idle, ButtonPressed) => Starting,
            (Starting, ComputeReady) => Talking,
            (Starting, StartupFailed) => Idle,
            (Talking, ButtonPressed) => ShuttingDown,
            (ShuttingDown, _) => {
                return TransitionResult::Rejected("ShuttingDown: terminal state");
            }
            (_, Shutdown) => ShuttingDown,
            (state, event) => {
                return TransitionResult::Rejected(invalid_transition_reason(state, event));
            }
        };

        self.state = next;
        TransitionResult::Ok(next)
    }
}

fn invalid_transition_reason(state: SessionState, event: SessionEvent) -> &'static str {
    use SessionEvent::*;
    use SessionState::*;
    match (state, event) {
        (Starting, ButtonPressed) => "Starting: busy, button dropped",
        (Idle, _) => "Idle: only ButtonPressed allowed",
        (Starting, _) => "Starting: only ComputeReady or StartupFailed allowed",
        (Talking, _) => "Talking: only ButtonPressed or Shutdown allowed",
        (ShuttingDown, _) => "ShuttingDown: terminal state",
    }
}

// ─── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use SessionEvent::*;
    use SessionState::*;

    #[test]
    fn initial_state_is_idle() {
        assert_eq!(SessionStateMachine::new().state(), Idle);
    }

    #[test]
    fn normal_session() {
        let mut sm = SessionStateMachine::new();
        assert_eq!(sm.handle_event(ButtonPressed), TransitionResult::Ok(Starting));
        assert_eq!(sm.handle_event(ComputeReady), TransitionResult::Ok(Talking));
        assert_eq!(sm.handle_event(ButtonPressed), TransitionResult::Ok(ShuttingDown));
    }

    #[test]
    fn startup_failure_returns_to_idle() {
        let mut sm = SessionStateMachine::new();
        sm.handle_event(ButtonPressed);
        assert_eq!(sm.handle_event(StartupFailed), TransitionResult::Ok(Idle));
        assert_eq!(sm.handle_event(ButtonPressed), TransitionResult::Ok(Starting));
    }

    #[test]
    fn button_while_starting_is_dropped() {
        let mut sm = SessionStateMachine::new();
        sm.handle_event(ButtonPressed);
        assert!(matches!(sm.handle_event(ButtonPressed), TransitionResult::Rejected(_)));
        assert_eq!(sm.state(), Starting);
    }

    #[test]
    fn shutdown_from_any_live_state() {
        for initial in [Idle, Starting, Talking] {
            let mut sm = SessionStateMachine { state: initial };
            assert_eq!(
                sm.handle_event(Shutdown),
                TransitionResult::Ok(ShuttingDown),
                "Shutdown from {initial:?} should -> ShuttingDown"
            );
        }
    }

    #[test]
    fn shutting_down_is_terminal() {
        for event in [ButtonPressed, ComputeReady, StartupFailed, Shutdown] {
            let mut sm = SessionStateMachine {
                state: ShuttingDown,
            };
            assert!(matches!(sm.handle_event(event), TransitionResult::Rejected(_)));
            assert_eq!(sm.state(), ShuttingDown);
        }
    }

    #[test]
    fn idle_rejects_compute_events() {
        let mut sm = SessionStateMachine::new();
        assert!(matches!(sm.handle_event(ComputeReady), TransitionResult::Rejected(_)));
        assert!(matches!(sm.handle_event(StartupFailed), TransitionResult::Rejected(_)));
        assert_eq!(sm.state(), Idle);
    }
}
