//! Simulation link.
//!
//! Accepts every write once connected and records the payloads, so a
//! whole session can run on a workstation without the toy. Connect
//! failures can be scripted to exercise the relay's backoff.

use crate::link::{ActuatorLink, LinkError, LinkSettings};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::info;

/// Payloads accepted by a [`SimulationLink`], shared with observers.
pub type DeliveryLog = Arc<Mutex<Vec<String>>>;

/// In-process link implementing [`ActuatorLink`].
pub struct SimulationLink {
    connected: bool,
    failing_connects: u32,
    connect_attempts: u32,
    delivered: DeliveryLog,
}

impl SimulationLink {
    /// Create a link that connects on the first attempt.
    pub fn new() -> Self {
        Self {
            connected: false,
            failing_connects: 0,
            connect_attempts: 0,
            delivered: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Fail the next `n` connect attempts.
    pub fn with_failing_connects(mut self, n: u32) -> Self {
        self.failing_connects = n;
        self
    }

    /// Shared view of the delivered payloads (decoded as UTF-8).
    pub fn delivery_log(&self) -> DeliveryLog {
        Arc::clone(&self.delivered)
    }

    /// Number of connect attempts so far.
    pub fn connect_attempts(&self) -> u32 {
        self.connect_attempts
    }
}

impl Default for SimulationLink {
    fn default() -> Self {
        Self::new()
    }
}

impl ActuatorLink for SimulationLink {
    fn name(&self) -> &'static str {
        "simulation"
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn connect(&mut self) -> Result<(), LinkError> {
        self.connect_attempts += 1;
        if self.failing_connects > 0 {
            self.failing_connects -= 1;
            return Err(LinkError::ConnectFailed("simulated peripheral unavailable".into()));
        }
        self.connected = true;
        info!("[sim] actuator link connected");
        Ok(())
    }

    fn write(&mut self, payload: &[u8]) -> Result<(), LinkError> {
        if !self.connected {
            return Err(LinkError::NotConnected);
        }
        let token = String::from_utf8_lossy(payload).into_owned();
        info!("[sim] actuator <- {token}");
        self.delivered.lock().push(token);
        Ok(())
    }

    fn disconnect(&mut self) {
        self.connected = false;
    }
}

/// Factory registered as `"simulation"`.
pub fn create_link(_settings: &LinkSettings) -> Box<dyn ActuatorLink> {
    Box::new(SimulationLink::new())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_requires_connection() {
        let mut link = SimulationLink::new();
        assert!(matches!(link.write(b"STOP"), Err(LinkError::NotConnected)));
        link.connect().unwrap();
        link.write(b"STOP").unwrap();
        assert_eq!(*link.delivery_log().lock(), vec!["STOP".to_string()]);
    }

    #[test]
    fn scripted_connect_failures() {
        let mut link = SimulationLink::new().with_failing_connects(2);
        assert!(link.connect().is_err());
        assert!(link.connect().is_err());
        assert!(link.connect().is_ok());
        assert_eq!(link.connect_attempts(), 3);
        assert!(link.is_connected());

        link.disconnect();
        assert!(!link.is_connected());
    }
}
