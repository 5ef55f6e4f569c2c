//! Remote compute lifecycle.
//!
//! [`LifecycleManager`] starts and stops the cloud instance that hosts the
//! speech service and owns the [`RemoteComputeHandle`]. The provider API
//! sits behind the [`ComputeProvider`] trait:
//!
//! - [`aws_cli`] - `aws ec2 ...` command line (production)
//! - [`simulation`] - in-memory instance for workstation runs
//!
//! # Start policy
//!
//! | Observed state | Action |
//! |----------------|--------|
//! | running | no start, check SSH |
//! | pending | provider wait, check SSH |
//! | stopped | start, provider wait, check SSH |
//! | stopping | poll until stopped (no timeout), start, provider wait, check SSH |
//! | terminated / shutting-down | fail, never start |

pub mod aws_cli;
pub mod simulation;

use crate::readiness::{PollPolicy, ServiceEndpoints, wait_for_service, wait_for_tcp};
use nico_common::compute::{ComputeState, RemoteComputeHandle};
use nico_common::config::{ComputeConfig, ComputeProviderKind, StopPolicy};
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread;
use std::time::Instant;
use thiserror::Error;
use tracing::{info, warn};

/// Error types for remote compute operations.
#[derive(Debug, Clone, Error)]
pub enum ComputeError {
    /// Instance is terminated; no retry path exists.
    #[error("instance {instance_id} is {state} and cannot be started")]
    Terminated {
        instance_id: String,
        state: ComputeState,
    },

    /// Instance reported a state the current step cannot proceed from.
    #[error("instance {instance_id} unexpectedly {state}")]
    UnexpectedState {
        instance_id: String,
        state: ComputeState,
    },

    /// Provider call failed.
    #[error("provider error: {0}")]
    Provider(String),

    /// Provider returned something unparseable.
    #[error("unexpected provider response: {0}")]
    InvalidResponse(String),

    /// No configured host and no public address reported.
    #[error("instance {0} has no reachable host")]
    NoHost(String),

    /// Instance is running but SSH never answered.
    #[error("{host}:{port} unreachable after instance start")]
    Unreachable { host: String, port: u16 },

    /// SSH answered but the speech service never passed its checks.
    #[error("service on {host}:{port} not ready")]
    ServiceNotReady { host: String, port: u16 },
}

/// What the provider reports about an instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceDescription {
    pub state: ComputeState,
    /// Public address, if the provider assigned one.
    pub public_host: Option<String>,
}

/// Cloud provider operations used by the lifecycle manager.
pub trait ComputeProvider: Send + Sync {
    /// Backend name for logging.
    fn name(&self) -> &'static str;

    /// Current power state and address.
    fn describe(&self, instance_id: &str) -> Result<InstanceDescription, ComputeError>;

    /// Issue a start request. Returns once the request is accepted.
    fn start_instance(&self, instance_id: &str) -> Result<(), ComputeError>;

    /// Issue a stop request. Returns once the request is accepted.
    fn stop_instance(&self, instance_id: &str) -> Result<(), ComputeError>;

    /// Block until the instance reports `running` (provider-side waiter).
    fn wait_until_running(&self, instance_id: &str) -> Result<(), ComputeError>;
}

/// Build the provider selected in `[compute]`.
pub fn create_provider(config: &ComputeConfig) -> Arc<dyn ComputeProvider> {
    match config.provider {
        ComputeProviderKind::AwsCli => Arc::new(aws_cli::AwsCliProvider::new(&config.region)),
        ComputeProviderKind::Simulation => Arc::new(simulation::SimulationProvider::new()),
    }
}

/// Starts, stops and tracks the remote instance.
pub struct LifecycleManager {
    provider: Arc<dyn ComputeProvider>,
    config: ComputeConfig,
    handle: Mutex<RemoteComputeHandle>,
}

impl LifecycleManager {
    /// Create a manager for `config.instance_id`.
    pub fn new(provider: Arc<dyn ComputeProvider>, config: ComputeConfig) -> Self {
        let handle = RemoteComputeHandle::new(config.instance_id.clone());
        Self {
            provider,
            config,
            handle: Mutex::new(handle),
        }
    }

    /// Snapshot of the handle.
    pub fn handle(&self) -> RemoteComputeHandle {
        self.handle.lock().clone()
    }

    /// Resolved host, if a start completed and no stop followed.
    pub fn host(&self) -> Option<String> {
        self.handle.lock().host.clone()
    }

    /// Bring the instance up and return a host reachable over SSH.
    ///
    /// Blocks the calling thread; there is no cancellation once started.
    pub fn start(&self) -> Result<String, ComputeError> {
        let id = self.config.instance_id.clone();
        info!("Starting remote compute {id} via {}", self.provider.name());

        let desc = self.describe(&id)?;
        info!("Instance {id} is {}", desc.state);

        match desc.state {
            ComputeState::Running => info!("Instance already running"),
            ComputeState::Pending => self.provider.wait_until_running(&id)?,
            ComputeState::Stopped => {
                self.provider.start_instance(&id)?;
                self.provider.wait_until_running(&id)?;
            }
            ComputeState::Stopping => {
                self.wait_until_stopped()?;
                self.provider.start_instance(&id)?;
                self.provider.wait_until_running(&id)?;
            }
            state @ (ComputeState::Terminated | ComputeState::ShuttingDown) => {
                return Err(ComputeError::Terminated {
                    instance_id: id,
                    state,
                });
            }
        }
        self.handle.lock().current_state = Some(ComputeState::Running);
        info!("Instance {id} is running");

        let host = match &self.config.host {
            Some(host) => host.clone(),
            None => {
                let desc = self.describe(&id)?;
                if desc.state != ComputeState::Running {
                    return Err(ComputeError::UnexpectedState {
                        instance_id: id,
                        state: desc.state,
                    });
                }
                desc.public_host
                    .ok_or_else(|| ComputeError::NoHost(id.clone()))?
            }
        };

        if !wait_for_tcp(&host, self.config.ssh_port, &PollPolicy::ssh(&self.config)) {
            return Err(ComputeError::Unreachable {
                host,
                port: self.config.ssh_port,
            });
        }

        self.handle.lock().host = Some(host.clone());
        Ok(host)
    }

    /// Wait for the speech service on `host` to pass both HTTP checks.
    pub fn wait_for_service(
        &self,
        host: &str,
        endpoints: &ServiceEndpoints,
        policy: &PollPolicy,
    ) -> Result<(), ComputeError> {
        if wait_for_service(host, endpoints, policy) {
            Ok(())
        } else {
            Err(ComputeError::ServiceNotReady {
                host: host.to_string(),
                port: endpoints.port,
            })
        }
    }

    /// Poll every `stopped_poll_secs` until the instance reports `stopped`.
    ///
    /// No timeout of its own; bounded only by the caller.
    pub fn wait_until_stopped(&self) -> Result<(), ComputeError> {
        let id = &self.config.instance_id;
        info!("Waiting for instance {id} to finish stopping");
        loop {
            let desc = self.describe(id)?;
            match desc.state {
                ComputeState::Stopped => return Ok(()),
                state if state.is_unrecoverable() => {
                    return Err(ComputeError::Terminated {
                        instance_id: id.clone(),
                        state,
                    });
                }
                state => info!("Instance {id} is {state}"),
            }
            thread::sleep(self.config.stopped_poll());
        }
    }

    /// Request instance stop and clear the host reference. Never fails.
    ///
    /// Under [`StopPolicy::FireAndForget`] this returns as soon as the
    /// request is accepted; under [`StopPolicy::Confirm`] it also waits,
    /// bounded by `stop_confirm_timeout_secs`, for `stopped`.
    pub fn stop(&self) {
        let id = self.config.instance_id.clone();
        match self.provider.stop_instance(&id) {
            Ok(()) => {
                info!("Stop requested for instance {id}");
                self.handle.lock().current_state = Some(ComputeState::Stopping);
                if self.config.stop_policy == StopPolicy::Confirm {
                    self.confirm_stopped(&id);
                }
            }
            Err(e) => warn!("Failed to stop instance {id}: {e}"),
        }
        self.handle.lock().host = None;
    }

    fn confirm_stopped(&self, id: &str) {
        let deadline = Instant::now() + self.config.stop_confirm_timeout();
        loop {
            match self.describe(id) {
                Ok(desc) if desc.state == ComputeState::Stopped => {
                    info!("Instance {id} stopped");
                    return;
                }
                Ok(desc) if desc.state.is_unrecoverable() => return,
                Ok(_) => {}
                Err(e) => warn!("Failed to poll instance {id}: {e}"),
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                warn!("Instance {id} not stopped within {:?}", self.config.stop_confirm_timeout());
                return;
            }
            thread::sleep(self.config.stopped_poll().min(remaining));
        }
    }

    fn describe(&self, id: &str) -> Result<InstanceDescription, ComputeError> {
        let desc = self.provider.describe(id)?;
        self.handle.lock().current_state = Some(desc.state);
        Ok(desc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Provider replaying a fixed list of observed states.
    struct ScriptedProvider {
        states: Mutex<Vec<ComputeState>>,
        starts: AtomicUsize,
        stops: AtomicUsize,
        waits: AtomicUsize,
    }

    impl ScriptedProvider {
        fn new(states: &[ComputeState]) -> Self {
            Self {
                states: Mutex::new(states.iter().rev().copied().collect()),
                starts: AtomicUsize::new(0),
                stops: AtomicUsize::new(0),
                waits: AtomicUsize::new(0),
            }
        }
    }

    impl ComputeProvider for ScriptedProvider {
        fn name(&self) -> &'static str {
            "scripted"
        }

        fn describe(&self, _id: &str) -> Result<InstanceDescription, ComputeError> {
            let mut states = self.states.lock();
            let state = if states.len() > 1 {
                states.pop().unwrap_or(ComputeState::Running)
            } else {
                states.last().copied().unwrap_or(ComputeState::Running)
            };
            Ok(InstanceDescription {
                state,
                public_host: Some("127.0.0.1".into()),
            })
        }

        fn start_instance(&self, _id: &str) -> Result<(), ComputeError> {
            self.starts.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn stop_instance(&self, _id: &str) -> Result<(), ComputeError> {
            self.stops.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn wait_until_running(&self, _id: &str) -> Result<(), ComputeError> {
            self.waits.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn config(ssh_port: u16) -> ComputeConfig {
        let toml = format!(
            "instance_id = \"i-test\"\nssh_port = {ssh_port}\nssh_timeout_secs = 1\nssh_poll_secs = 1\nstopped_poll_secs = 0\n"
        );
        toml::from_str(&toml).unwrap()
    }

    #[test]
    fn running_instance_is_not_started_again() {
        let ssh = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = ssh.local_addr().unwrap().port();
        let provider = Arc::new(ScriptedProvider::new(&[ComputeState::Running]));
        let mgr = LifecycleManager::new(provider.clone(), config(port));

        assert_eq!(mgr.start().unwrap(), "127.0.0.1");
        assert_eq!(provider.starts.load(Ordering::SeqCst), 0);
        assert_eq!(provider.waits.load(Ordering::SeqCst), 0);
        assert_eq!(mgr.host().as_deref(), Some("127.0.0.1"));
    }

    #[test]
    fn stopping_instance_waits_then_starts() {
        let ssh = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = ssh.local_addr().unwrap().port();
        let provider = Arc::new(ScriptedProvider::new(&[
            ComputeState::Stopping,
            ComputeState::Stopping,
            ComputeState::Stopping,
            ComputeState::Stopped,
            ComputeState::Running,
        ]));
        let mgr = LifecycleManager::new(provider.clone(), config(port));

        mgr.start().unwrap();
        assert_eq!(provider.starts.load(Ordering::SeqCst), 1);
        assert_eq!(provider.waits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn terminated_instance_fails_without_start() {
        let provider = Arc::new(ScriptedProvider::new(&[ComputeState::Terminated]));
        let mgr = LifecycleManager::new(provider.clone(), config(1));

        assert!(matches!(mgr.start(), Err(ComputeError::Terminated { .. })));
        assert_eq!(provider.starts.load(Ordering::SeqCst), 0);
        assert!(mgr.host().is_none());
    }

    #[test]
    fn unreachable_ssh_is_a_startup_failure() {
        let port = {
            let l = TcpListener::bind("127.0.0.1:0").unwrap();
            l.local_addr().unwrap().port()
        };
        let provider = Arc::new(ScriptedProvider::new(&[ComputeState::Stopped, ComputeState::Running]));
        let mgr = LifecycleManager::new(provider.clone(), config(port));

        assert!(matches!(mgr.start(), Err(ComputeError::Unreachable { .. })));
        assert_eq!(provider.starts.load(Ordering::SeqCst), 1);
        assert!(mgr.host().is_none());
    }

    #[test]
    fn stop_clears_host_and_never_waits() {
        let ssh = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = ssh.local_addr().unwrap().port();
        let provider = Arc::new(ScriptedProvider::new(&[ComputeState::Running]));
        let mgr = LifecycleManager::new(provider.clone(), config(port));
        mgr.start().unwrap();

        mgr.stop();
        assert_eq!(provider.stops.load(Ordering::SeqCst), 1);
        assert!(mgr.host().is_none());
        assert_eq!(mgr.handle().current_state, Some(ComputeState::Stopping));
    }
}
