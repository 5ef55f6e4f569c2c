//! Prelude module for common re-exports.
//!
//! ```rust
//! use nico_common::prelude::*;
//! ```

// ─── Configuration ──────────────────────────────────────────────────
pub use crate::config::{ConfigError, ConfigLoader, LogLevel, NicoConfig, SharedConfig};

// ─── Domain types ───────────────────────────────────────────────────
pub use crate::actuator::{ActuatorCommand, CommandParseError};
pub use crate::compute::{ComputeState, RemoteComputeHandle};
pub use crate::session::{SessionState, ShutdownTrigger};
pub use crate::worker::{SupervisorError, WorkerExit};

static_assertions::assert_impl_all!(ActuatorCommand: Send, Sync, Copy);
static_assertions::assert_impl_all!(SessionState: Send, Sync, Copy);
