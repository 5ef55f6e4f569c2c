//! Actuator link implementations.
//!
//! - [`gatttool`] - BlueZ `gatttool` interactive session (production)
//! - [`simulation`] - In-process link for development and testing
//!
//! # Adding New Links
//!
//! 1. Create a new submodule under `links/`
//! 2. Implement the `ActuatorLink` trait from [`crate::link`]
//! 3. Register the factory in [`register_all_links`]

pub mod gatttool;
pub mod simulation;

use crate::link_registry::LinkRegistry;

/// Register all built-in links.
pub fn register_all_links(registry: &mut LinkRegistry) {
    registry.register("gatttool", gatttool::create_link);
    registry.register("simulation", simulation::create_link);
}
