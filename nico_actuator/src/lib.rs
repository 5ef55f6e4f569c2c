//! # NICO Actuator Relay
//!
//! Owns the only connection to the wireless motor controller.
//!
//! Producers call [`CommandSender::enqueue`], which never blocks and never
//! fails. A single worker thread drains the queue in FIFO order, keeps the
//! link connected (reconnecting with capped exponential backoff) and
//! writes each command once. A failed write drops the link and the
//! command; nothing is requeued.
//!
//! # Module Structure
//!
//! - [`link`] - `ActuatorLink` trait and link errors
//! - [`link_registry`] - Link factory registration
//! - [`links`] - Link implementations (`gatttool`, `simulation`)
//! - [`backoff`] - Reconnect delay policy
//! - [`relay`] - Queue + worker
//! - [`inlet`] - Local datagram socket feeding the queue
//!
//! # Architecture
//!
//! ```text
//!  producers ──enqueue──► ┌───────────┐   recv   ┌──────────────┐  write  ┌────────────┐
//!  (session, inlet)       │  FIFO     │ ───────► │ relay worker │ ──────► │ ActuatorLink│
//!                         │ (unbounded)│         │ (sole owner) │         └────────────┘
//!                         └───────────┘          └──────────────┘
//! ```

#![deny(missing_docs)]

pub mod backoff;
pub mod inlet;
pub mod link;
pub mod link_registry;
pub mod links;
pub mod relay;

pub use crate::backoff::{Backoff, BackoffPolicy};
pub use crate::inlet::{CommandInlet, send_command};
pub use crate::link::{ActuatorLink, LinkError, LinkSettings};
pub use crate::link_registry::LinkRegistry;
pub use crate::relay::{CommandSender, RelayHandle, RelayStats};
