//! Session lifecycle state.
//!
//! The orchestrator holds exactly one `SessionState` at a time. The
//! transition table lives in `nico::session::machine`.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Button-driven session lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[repr(u8)]
pub enum SessionState {
    /// Waiting for a button press.
    #[default]
    Idle = 0,
    /// Remote compute is being brought up.
    Starting = 1,
    /// Conversational worker is running.
    Talking = 2,
    /// Teardown in progress; the process exits afterwards.
    ShuttingDown = 3,
}

impl SessionState {
    /// Whether a button press is handled in this state.
    ///
    /// Presses in any other state are dropped.
    #[inline]
    pub const fn accepts_button(self) -> bool {
        matches!(self, Self::Idle | Self::Talking)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "IDLE",
            Self::Starting => "STARTING",
            Self::Talking => "TALKING",
            Self::ShuttingDown => "SHUTTING_DOWN",
        };
        f.write_str(name)
    }
}

/// What initiated a teardown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownTrigger {
    /// Button pressed while talking.
    Button,
    /// Press-and-hold emergency stop.
    Hold,
    /// Worker exited on its own.
    WorkerExited {
        /// Exit code if the worker exited normally.
        code: Option<i32>,
    },
    /// Worker exceeded its wall-clock ceiling and was killed.
    WorkerTimeout,
    /// Worker could not be spawned.
    SpawnFailed,
    /// Unexpected failure while handling a button event.
    Fatal(String),
    /// SIGINT / SIGTERM.
    Signal,
}

impl fmt::Display for ShutdownTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Button => f.write_str("button"),
            Self::Hold => f.write_str("button hold"),
            Self::WorkerExited { code: Some(code) } => write!(f, "worker exited ({code})"),
            Self::WorkerExited { code: None } => f.write_str("worker exited (signal)"),
            Self::WorkerTimeout => f.write_str("worker timeout"),
            Self::SpawnFailed => f.write_str("worker spawn failure"),
            Self::Fatal(reason) => write!(f, "fatal error: {reason}"),
            Self::Signal => f.write_str("termination signal"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_state_is_idle() {
        assert_eq!(SessionState::default(), SessionState::Idle);
    }

    #[test]
    fn only_idle_and_talking_accept_button() {
        assert!(SessionState::Idle.accepts_button());
        assert!(SessionState::Talking.accepts_button());
        assert!(!SessionState::Starting.accepts_button());
        assert!(!SessionState::ShuttingDown.accepts_button());
    }

    #[test]
    fn trigger_display_mentions_exit_code() {
        let t = ShutdownTrigger::WorkerExited { code: Some(3) };
        assert_eq!(t.to_string(), "worker exited (3)");
    }
}
