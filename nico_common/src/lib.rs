//! NICO Common Library
//!
//! Shared constants, domain types and configuration loading for all
//! nico workspace crates.
//!
//! # Module Structure
//!
//! - [`config`] - TOML configuration sections, loading and validation
//! - [`consts`] - Default timings, ports and paths
//! - [`session`] - Session lifecycle state
//! - [`actuator`] - Actuator commands and their text codec
//! - [`compute`] - Remote compute power state and handle
//! - [`worker`] - Conversational worker exit classification
//! - [`prelude`] - Common re-exports for convenience
//!
//! # Usage
//!
//! ```toml
//! [dependencies]
//! nico_common = { path = "../nico_common" }
//! ```
//!
//! ```rust
//! use nico_common::prelude::*;
//! ```

pub mod actuator;
pub mod compute;
pub mod config;
pub mod consts;
pub mod prelude;
pub mod session;
pub mod worker;
