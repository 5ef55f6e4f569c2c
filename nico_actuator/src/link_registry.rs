//! Link registry for actuator transports.
//!
//! Provides a `LinkRegistry` struct for registering and creating links by
//! the name given in `[actuator].link`. Constructed at startup and passed
//! by value; no global state.

use crate::link::{ActuatorLink, LinkError, LinkFactory, LinkSettings};
use crate::links::register_all_links;
use std::collections::HashMap;

/// Registry of available actuator links.
pub struct LinkRegistry {
    factories: HashMap<&'static str, LinkFactory>,
}

impl LinkRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Create a registry pre-populated with the built-in links.
    pub fn with_builtin_links() -> Self {
        let mut registry = Self::new();
        register_all_links(&mut registry);
        registry
    }

    /// Register a link factory.
    ///
    /// # Panics
    /// Panics if a link with the same name is already registered.
    pub fn register(&mut self, name: &'static str, factory: LinkFactory) {
        if self.factories.contains_key(name) {
            panic!("Link '{name}' is already registered");
        }
        self.factories.insert(name, factory);
    }

    /// Create a link instance by name.
    ///
    /// # Errors
    /// Returns `LinkError::UnknownLink` if no link with the given name is registered.
    pub fn create(
        &self,
        name: &str,
        settings: &LinkSettings,
    ) -> Result<Box<dyn ActuatorLink>, LinkError> {
        let factory = self
            .factories
            .get(name)
            .copied()
            .ok_or_else(|| {
                let mut known = self.list();
                known.sort_unstable();
                LinkError::UnknownLink(format!("{name} (known: {})", known.join(", ")))
            })?;
        Ok(factory(settings))
    }

    /// List all registered link names.
    pub fn list(&self) -> Vec<&'static str> {
        self.factories.keys().copied().collect()
    }
}

impl Default for LinkRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    struct NullLink;

    impl ActuatorLink for NullLink {
        fn name(&self) -> &'static str {
            "null"
        }

        fn is_connected(&self) -> bool {
            true
        }

        fn connect(&mut self) -> Result<(), LinkError> {
            Ok(())
        }

        fn write(&mut self, _payload: &[u8]) -> Result<(), LinkError> {
            Ok(())
        }

        fn disconnect(&mut self) {}
    }

    fn create_null_link(_settings: &LinkSettings) -> Box<dyn ActuatorLink> {
        Box::new(NullLink)
    }

    fn settings() -> LinkSettings {
        LinkSettings {
            address: "00:00:00:00:00:00".into(),
            characteristic_handle: 1,
            connect_timeout: Duration::from_secs(1),
        }
    }

    #[test]
    fn registry_register_and_create() {
        let mut reg = LinkRegistry::new();
        reg.register("null", create_null_link);

        let link = reg.create("null", &settings()).expect("should create");
        assert_eq!(link.name(), "null");
    }

    #[test]
    fn registry_link_not_found() {
        let reg = LinkRegistry::new();
        let result = reg.create("nonexistent", &settings());
        assert!(matches!(result, Err(LinkError::UnknownLink(_))));
    }

    #[test]
    fn unknown_link_error_names_known_links() {
        let reg = LinkRegistry::with_builtin_links();
        let Err(LinkError::UnknownLink(msg)) = reg.create("bluez", &settings()) else {
            panic!("expected UnknownLink");
        };
        assert_eq!(msg, "bluez (known: gatttool, simulation)");
    }

    #[test]
    fn builtin_links_are_registered() {
        let reg = LinkRegistry::with_builtin_links();
        let mut names = reg.list();
        names.sort();
        assert_eq!(names, vec!["gatttool", "simulation"]);
    }

    #[test]
    #[should_panic(expected = "already registered")]
    fn registry_duplicate_panics() {
        let mut reg = LinkRegistry::new();
        reg.register("dup", create_null_link);
        reg.register("dup", create_null_link);
    }
}
