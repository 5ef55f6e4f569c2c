//! Actuator link trait and error types.
//!
//! This module defines:
//! - `ActuatorLink` trait - Interface for pluggable peripheral transports
//! - `LinkError` enum - Error types for link operations
//! - `LinkFactory` type alias - Factory function type
//! - `LinkSettings` struct - Transport parameters from `[actuator]`

use nico_common::config::ActuatorConfig;
use std::time::Duration;
use thiserror::Error;

/// Error types for link operations.
#[derive(Debug, Clone, Error)]
pub enum LinkError {
    /// Write attempted without a live connection.
    #[error("Link not connected")]
    NotConnected,

    /// Connection attempt failed.
    #[error("Connect failed: {0}")]
    ConnectFailed(String),

    /// Payload write failed.
    #[error("Write failed: {0}")]
    WriteFailed(String),

    /// No link registered under this name.
    #[error("Link not found: {0}")]
    UnknownLink(String),

    /// I/O error talking to the transport.
    #[error("Link I/O error: {0}")]
    Io(String),
}

impl From<std::io::Error> for LinkError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}

/// Transport parameters handed to a link factory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkSettings {
    /// Peripheral address.
    pub address: String,
    /// Attribute handle of the command characteristic.
    pub characteristic_handle: u16,
    /// Per-attempt connect (and write acknowledgement) timeout.
    pub connect_timeout: Duration,
}

impl From<&ActuatorConfig> for LinkSettings {
    fn from(config: &ActuatorConfig) -> Self {
        Self {
            address: config.address.clone(),
            characteristic_handle: config.characteristic_handle,
            connect_timeout: config.connect_timeout(),
        }
    }
}

/// Factory function type for creating link instances.
pub type LinkFactory = fn(&LinkSettings) -> Box<dyn ActuatorLink>;

/// Connection to the motor controller.
///
/// Exactly one relay worker owns a link; implementations need not be
/// `Sync` and never see concurrent calls.
///
/// # Lifecycle
///
/// 1. `connect()` - Called by the worker whenever `is_connected()` is false
/// 2. `write()` - Called once per dequeued command
/// 3. `disconnect()` - Called after a failed write, before each reconnect
///    and when the worker exits
pub trait ActuatorLink: Send {
    /// Returns the link's registry name (e.g., "gatttool").
    fn name(&self) -> &'static str;

    /// Whether a live connection is currently held.
    fn is_connected(&self) -> bool;

    /// Open a fresh connection.
    ///
    /// # Errors
    /// Return `LinkError::ConnectFailed` if the peripheral is unreachable.
    fn connect(&mut self) -> Result<(), LinkError>;

    /// Write one encoded command to the command characteristic.
    ///
    /// # Errors
    /// Return `LinkError::NotConnected` or `LinkError::WriteFailed`.
    fn write(&mut self, payload: &[u8]) -> Result<(), LinkError>;

    /// Drop the connection. Must be safe to call when not connected.
    fn disconnect(&mut self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settings_from_config() {
        let config = ActuatorConfig {
            address: "28:CD:C1:0A:1B:2C".into(),
            characteristic_handle: 0x10,
            connect_timeout_secs: 7,
            ..Default::default()
        };
        let s = LinkSettings::from(&config);
        assert_eq!(s.address, "28:CD:C1:0A:1B:2C");
        assert_eq!(s.characteristic_handle, 0x10);
        assert_eq!(s.connect_timeout, Duration::from_secs(7));
    }

    #[test]
    fn io_error_converts() {
        let e: LinkError = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe").into();
        assert!(matches!(e, LinkError::Io(ref m) if m.contains("pipe")));
    }
}
