//! Remote compute power state and handle.
//!
//! The handle is owned by the lifecycle manager; callers read it through
//! the manager's API and never mutate it directly.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Power state reported by the cloud provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ComputeState {
    /// Start issued, not yet running.
    Pending,
    /// Running and billable.
    Running,
    /// Stop issued, not yet stopped.
    Stopping,
    /// Powered off; can be started again.
    Stopped,
    /// Termination in progress.
    ShuttingDown,
    /// Gone for good. Not recoverable.
    Terminated,
}

impl ComputeState {
    /// `terminated` and `shutting-down` can never be started again.
    #[inline]
    pub const fn is_unrecoverable(self) -> bool {
        matches!(self, Self::Terminated | Self::ShuttingDown)
    }
}

impl fmt::Display for ComputeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
            Self::ShuttingDown => "shutting-down",
            Self::Terminated => "terminated",
        };
        f.write_str(name)
    }
}

impl FromStr for ComputeState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "stopping" => Ok(Self::Stopping),
            "stopped" => Ok(Self::Stopped),
            "shutting-down" => Ok(Self::ShuttingDown),
            "terminated" => Ok(Self::Terminated),
            other => Err(format!("unknown instance state {other:?}")),
        }
    }
}

/// Snapshot of the remote instance as last observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteComputeHandle {
    /// Provider instance identifier.
    pub instance_id: String,
    /// Resolved host once the instance is reachable.
    pub host: Option<String>,
    /// Last observed power state.
    pub current_state: Option<ComputeState>,
}

impl RemoteComputeHandle {
    /// Handle for an instance that has not been inspected yet.
    pub fn new(instance_id: impl Into<String>) -> Self {
        Self {
            instance_id: instance_id.into(),
            host: None,
            current_state: None,
        }
    }
}
