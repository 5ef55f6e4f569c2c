//! # Worker supervision types
//!
//! Outcome and error types shared between the worker supervisor and the
//! session controller. The supervisor never mutates session state; it
//! reports a [`WorkerExit`] and the controller turns it into a
//! [`ShutdownTrigger`].

use crate::session::ShutdownTrigger;
use thiserror::Error;

/// How a supervised worker stopped running.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerExit {
    /// Worker exited on its own. The code is not interpreted.
    Exited {
        /// Exit code, `None` when killed by a signal.
        code: Option<i32>,
    },
    /// Worker outlived its ceiling and was force-killed.
    TimedOut,
    /// Worker was taken over by teardown before it exited.
    Detached,
}

impl WorkerExit {
    /// Shutdown trigger for this outcome, `None` when teardown already owns it.
    pub fn trigger(&self) -> Option<ShutdownTrigger> {
        match self {
            Self::Exited { code } => Some(ShutdownTrigger::WorkerExited { code: *code }),
            Self::TimedOut => Some(ShutdownTrigger::WorkerTimeout),
            Self::Detached => None,
        }
    }
}

/// Error type for worker supervision.
#[derive(Debug, Error)]
pub enum SupervisorError {
    /// Failed to launch the worker program.
    #[error("failed to spawn worker {program:?}: {source}")]
    SpawnFailed {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// A worker is already live; only one handle may exist at a time.
    #[error("worker already running (pid {pid})")]
    AlreadyRunning { pid: u32 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_maps_to_trigger() {
        assert_eq!(
            WorkerExit::Exited { code: Some(0) }.trigger(),
            Some(ShutdownTrigger::WorkerExited { code: Some(0) })
        );
        assert_eq!(WorkerExit::TimedOut.trigger(), Some(ShutdownTrigger::WorkerTimeout));
        assert_eq!(WorkerExit::Detached.trigger(), None);
    }

    #[test]
    fn supervisor_error_display() {
        let e = SupervisorError::SpawnFailed {
            program: "/opt/nico/worker".into(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "no such file"),
        };
        let msg = e.to_string();
        assert!(msg.contains("/opt/nico/worker"), "should mention program: {msg}");
        assert!(msg.contains("no such file"), "should contain cause: {msg}");

        let e2 = SupervisorError::AlreadyRunning { pid: 4242 };
        assert!(e2.to_string().contains("4242"));
    }
}
