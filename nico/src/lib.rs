//! # NICO Session Orchestrator
//!
//! Button-driven controller that brings up a remote speech-service
//! instance, supervises the conversational worker against it, and tears
//! everything down exactly once.
//!
//! # Module Structure
//!
//! - [`session`] - Session controller, state machine, teardown routine
//! - [`compute`] - Remote compute lifecycle manager and providers
//! - [`readiness`] - TCP / HTTP readiness polling
//! - [`supervisor`] - Conversational worker process supervision
//! - [`hardware`] - Button, LED and their release
//! - [`feedback`] - Startup audio prompt
//! - [`shutdown`] - Exactly-once guard, journal, host power-off
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                              nico                                │
//! │  ┌────────────┐    ┌───────────────────┐    ┌─────────────────┐  │
//! │  │  hardware  │───►│ SessionController │───►│ LifecycleManager│──┼──► cloud API
//! │  │ (button)   │    │  (state + guard)  │    └─────────────────┘  │
//! │  └────────────┘    └────────┬──────────┘    ┌─────────────────┐  │
//! │                             ├──────────────►│WorkerSupervisor │──┼──► worker process
//! │                             │               └─────────────────┘  │
//! │                             ▼                                    │
//! │                    ┌─────────────────┐                           │
//! │                    │  RelayHandle    │ (nico_actuator)           │
//! │                    └─────────────────┘                           │
//! └──────────────────────────────────────────────────────────────────┘
//! ```

pub mod compute;
pub mod feedback;
pub mod hardware;
pub mod readiness;
pub mod session;
pub mod shutdown;
pub mod supervisor;
