//! In-memory instance for workstation runs and tests.
//!
//! Starts and stops complete after fixed delays; the host is always
//! `127.0.0.1`.

use super::{ComputeError, ComputeProvider, InstanceDescription};
use nico_common::compute::ComputeState;
use parking_lot::Mutex;
use std::thread;
use std::time::{Duration, Instant};
use tracing::info;

const SIM_HOST: &str = "127.0.0.1";

struct SimInstance {
    state: ComputeState,
    /// When the current transition (pending / stopping) began.
    since: Instant,
}

pub struct SimulationProvider {
    instance: Mutex<SimInstance>,
    boot_delay: Duration,
    stop_delay: Duration,
}

impl SimulationProvider {
    /// Stopped instance with short boot and stop delays.
    pub fn new() -> Self {
        Self::with_state(ComputeState::Stopped)
    }

    pub fn with_state(state: ComputeState) -> Self {
        Self {
            instance: Mutex::new(SimInstance {
                state,
                since: Instant::now(),
            }),
            boot_delay: Duration::from_millis(500),
            stop_delay: Duration::from_millis(500),
        }
    }

    pub fn with_delays(mut self, boot: Duration, stop: Duration) -> Self {
        self.boot_delay = boot;
        self.stop_delay = stop;
        self
    }

    /// Advance time-based transitions and return the current state.
    fn settle(&self) -> ComputeState {
        let mut inst = self.instance.lock();
        let elapsed = inst.since.elapsed();
        match inst.state {
            ComputeState::Pending if elapsed >= self.boot_delay => {
                inst.state = ComputeState::Running;
            }
            ComputeState::Stopping if elapsed >= self.stop_delay => {
                inst.state = ComputeState::Stopped;
            }
            ComputeState::ShuttingDown if elapsed >= self.stop_delay => {
                inst.state = ComputeState::Terminated;
            }
            _ => {}
        }
        inst.state
    }
}

impl Default for SimulationProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl ComputeProvider for SimulationProvider {
    fn name(&self) -> &'static str {
        "simulation"
    }

    fn describe(&self, _instance_id: &str) -> Result<InstanceDescription, ComputeError> {
        let state = self.settle();
        let public_host = matches!(state, ComputeState::Pending | ComputeState::Running)
            .then(|| SIM_HOST.to_string());
        Ok(InstanceDescription { state, public_host })
    }

    fn start_instance(&self, instance_id: &str) -> Result<(), ComputeError> {
        let state = self.settle();
        let mut inst = self.instance.lock();
        match state {
            ComputeState::Stopped => {
                info!("[sim] starting {instance_id}");
                inst.state = ComputeState::Pending;
                inst.since = Instant::now();
                Ok(())
            }
            ComputeState::Pending | ComputeState::Running => Ok(()),
            other => Err(ComputeError::Provider(format!(
                "cannot start {instance_id} while {other}"
            ))),
        }
    }

    fn stop_instance(&self, instance_id: &str) -> Result<(), ComputeError> {
        let state = self.settle();
        let mut inst = self.instance.lock();
        match state {
            ComputeState::Pending | ComputeState::Running => {
                info!("[sim] stopping {instance_id}");
                inst.state = ComputeState::Stopping;
                inst.since = Instant::now();
                Ok(())
            }
            ComputeState::Stopping | ComputeState::Stopped => Ok(()),
            other => Err(ComputeError::Provider(format!(
                "cannot stop {instance_id} while {other}"
            ))),
        }
    }

    fn wait_until_running(&self, instance_id: &str) -> Result<(), ComputeError> {
        loop {
            match self.settle() {
                ComputeState::Running => return Ok(()),
                ComputeState::Pending => thread::sleep(Duration::from_millis(20)),
                other => {
                    return Err(ComputeError::Provider(format!(
                        "{instance_id} will not reach running from {other}"
                    )));
                }
            }
        }
    }
}
