//! Session controller.
//!
//! [`SessionController`] is the context object every thread shares. It
//! holds the state machine behind a mutex, the exactly-once
//! [`ShutdownGuard`], and the component handles:
//!
//! ```text
//!  button ──► on_button_pressed ──► start_session ──► lifecycle.start
//!                 │                     │                 wait_for_service
//!                 │                     └──► supervisor.spawn ──► nico-monitor
//!                 ▼                                                   │
//!  hold / signal / fatal / worker exit ──────► handle_shutdown ◄──────┘
//! ```
//!
//! The state lock is only held to read and transition state, never across
//! network or process I/O.
//!
//! # Teardown order
//!
//! Each step is best-effort; a failure is logged and the next step runs.
//!
//! 1. Mark `SHUTTING_DOWN`, journal, LED off
//! 2. Terminate the worker
//! 3. Close the command inlet, queue a final `STOP`
//! 4. Stop remote compute, clear the host
//! 5. Release button and LED
//! 6. Drain the relay
//! 7. Power off the host (skipped in dev mode)

pub mod machine;

use crate::compute::{self, ComputeError, LifecycleManager};
use crate::feedback::PromptPlayer;
use crate::hardware::{self, ButtonHandlers, ForcedRelease, HardwareError, HardwareGuard};
use crate::readiness::{PollPolicy, ServiceEndpoints};
use crate::shutdown::{Journal, PowerOff, ShutdownGuard};
use crate::supervisor::WorkerSupervisor;
use crossbeam_channel::{Receiver, Sender, bounded};
use machine::{SessionEvent, SessionStateMachine, TransitionResult};
use nico_actuator::{
    BackoffPolicy, CommandInlet, LinkError, LinkRegistry, LinkSettings, RelayHandle,
};
use nico_common::actuator::ActuatorCommand;
use nico_common::config::{ComputeProviderKind, InputKind, NicoConfig};
use nico_common::consts::ACTUATOR_SOCKET_ENV;
use nico_common::session::{SessionState, ShutdownTrigger};
use nico_common::worker::SupervisorError;
use parking_lot::Mutex;
use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Error type for session setup and startup.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Compute(#[from] ComputeError),

    #[error(transparent)]
    Supervisor(#[from] SupervisorError),

    #[error(transparent)]
    Hardware(#[from] HardwareError),

    #[error(transparent)]
    Link(#[from] LinkError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Components owned by a session controller.
pub struct SessionParts {
    pub lifecycle: LifecycleManager,
    pub supervisor: WorkerSupervisor,
    pub relay: RelayHandle,
    pub inlet: Option<CommandInlet>,
    pub hardware: HardwareGuard,
    pub journal: Journal,
    pub power_off: PowerOff,
    pub service: ServiceEndpoints,
    pub service_policy: PollPolicy,
    pub drain_timeout: Duration,
}

impl SessionParts {
    /// Build every component from configuration.
    ///
    /// `simulate` swaps in the simulation provider and link, console
    /// input, and forces dev mode.
    pub fn from_config(config: &NicoConfig, simulate: bool) -> Result<Self, SessionError> {
        let mut compute_config = config.compute.clone();
        let mut actuator_config = config.actuator.clone();
        let mut hardware_config = config.hardware.clone();
        if simulate {
            compute_config.provider = ComputeProviderKind::Simulation;
            actuator_config.link = "simulation".to_string();
            hardware_config.input = InputKind::Console;
        }

        let provider = compute::create_provider(&compute_config);
        let lifecycle = LifecycleManager::new(provider, compute_config.clone());

        let registry = LinkRegistry::with_builtin_links();
        let link = registry.create(&actuator_config.link, &LinkSettings::from(&actuator_config))?;
        let relay = RelayHandle::start(link, BackoffPolicy::from(&actuator_config))?;
        let inlet = CommandInlet::bind(&actuator_config.inlet_socket, relay.sender())?;

        let supervisor = WorkerSupervisor::new(config.worker.clone()).with_env(
            ACTUATOR_SOCKET_ENV,
            actuator_config.inlet_socket.display().to_string(),
        );

        let (button, led) = hardware::create_hardware(&hardware_config)?;
        let forced = if hardware_config.input == InputKind::Sysfs {
            ForcedRelease::from_config(&hardware_config)
        } else {
            None
        };
        let hardware = HardwareGuard::new(button, led, hardware_config.settle(), forced);

        let dev_mode = simulate || config.dev_mode();
        Ok(Self {
            lifecycle,
            supervisor,
            relay,
            inlet: Some(inlet),
            hardware,
            journal: Journal::new(config.shutdown.journal_path.as_deref()),
            power_off: PowerOff::new(config.shutdown.power_off_command.clone(), dev_mode),
            service: ServiceEndpoints::from(&config.service),
            service_policy: PollPolicy::service(&config.service),
            drain_timeout: actuator_config.drain_timeout(),
        })
    }
}

/// Shared session context.
pub struct SessionController {
    machine: Mutex<SessionStateMachine>,
    guard: ShutdownGuard,
    lifecycle: LifecycleManager,
    supervisor: Arc<WorkerSupervisor>,
    relay: RelayHandle,
    inlet: Mutex<Option<CommandInlet>>,
    hardware: HardwareGuard,
    journal: Journal,
    power_off: PowerOff,
    service: ServiceEndpoints,
    service_policy: PollPolicy,
    drain_timeout: Duration,
    finished: AtomicBool,
    done_tx: Sender<()>,
    done_rx: Receiver<()>,
}

impl SessionController {
    pub fn new(parts: SessionParts) -> Arc<Self> {
        let (done_tx, done_rx) = bounded(1);
        Arc::new(Self {
            machine: Mutex::new(SessionStateMachine::new()),
            guard: ShutdownGuard::new(),
            lifecycle: parts.lifecycle,
            supervisor: Arc::new(parts.supervisor),
            relay: parts.relay,
            inlet: Mutex::new(parts.inlet),
            hardware: parts.hardware,
            journal: parts.journal,
            power_off: parts.power_off,
            service: parts.service,
            service_policy: parts.service_policy,
            drain_timeout: parts.drain_timeout,
            finished: AtomicBool::new(false),
            done_tx,
            done_rx,
        })
    }

    pub fn state(&self) -> SessionState {
        self.machine.lock().state()
    }

    /// Whether teardown has begun.
    pub fn is_shutting_down(&self) -> bool {
        self.guard.is_begun()
    }

    /// Remote compute manager (read-only access to its handle).
    pub fn lifecycle(&self) -> &LifecycleManager {
        &self.lifecycle
    }

    /// Play the startup prompt, then attach the button handlers.
    pub fn arm(self: &Arc<Self>, prompt: &PromptPlayer) -> Result<(), HardwareError> {
        prompt.play();
        self.hardware.arm(self.button_handlers())
    }

    /// Handlers routing button gestures into this controller.
    pub fn button_handlers(self: &Arc<Self>) -> ButtonHandlers {
        let press = Arc::clone(self);
        let hold = Arc::clone(self);
        ButtonHandlers {
            on_press: Arc::new(move || press.on_button_pressed()),
            on_hold: Some(Arc::new(move || hold.on_button_held())),
        }
    }

    /// Button press. Starts a session from IDLE, ends one from TALKING,
    /// and is dropped in any other state. Never panics.
    pub fn on_button_pressed(self: &Arc<Self>) {
        self.guarded("button press", || self.press());
    }

    /// Press-and-hold emergency stop, accepted in every state.
    pub fn on_button_held(self: &Arc<Self>) {
        info!("Button held: emergency stop");
        self.guarded("button hold", || self.handle_shutdown(ShutdownTrigger::Hold));
    }

    fn press(self: &Arc<Self>) {
        if !self.hardware.button_asserted() {
            debug!("Ignoring press: button not asserted");
            return;
        }
        let starting = {
            let mut machine = self.machine.lock();
            let state = machine.state();
            if !state.accepts_button() {
                debug!("Button press dropped in {state}");
                return;
            }
            state == SessionState::Idle
                && machine.handle_event(SessionEvent::ButtonPressed)
                    == TransitionResult::Ok(SessionState::Starting)
        };

        if starting {
            info!("Button pressed: starting session");
            self.start_session();
        } else {
            info!("Button pressed: ending session");
            self.handle_shutdown(ShutdownTrigger::Button);
        }
    }

    /// Run `f`, converting a panic into a fatal shutdown.
    fn guarded<F: FnOnce()>(&self, what: &str, f: F) {
        let Err(panic) = catch_unwind(AssertUnwindSafe(f)) else {
            return;
        };
        let reason = format!("{what} handler panicked: {}", panic_message(&*panic));
        error!("{reason}");
        if self.guard.is_begun() {
            // Teardown itself failed; let the process exit.
            self.signal_finished();
        } else {
            self.handle_shutdown(ShutdownTrigger::Fatal(reason));
        }
    }

    fn start_session(self: &Arc<Self>) {
        self.hardware.set_indicator(true);

        let host = match self.bring_up() {
            Ok(host) => host,
            Err(e) => {
                warn!("Session startup failed: {e}");
                if brought_up(&e) {
                    self.lifecycle.stop();
                }
                self.hardware.set_indicator(false);
                let mut machine = self.machine.lock();
                if !self.guard.is_begun() {
                    machine.handle_event(SessionEvent::StartupFailed);
                    info!("Session back to {}", machine.state());
                }
                return;
            }
        };

        let ready = {
            let mut machine = self.machine.lock();
            !self.guard.is_begun()
                && machine.handle_event(SessionEvent::ComputeReady)
                    == TransitionResult::Ok(SessionState::Talking)
        };
        if !ready {
            info!("Shutdown began during startup; stopping instance");
            self.lifecycle.stop();
            return;
        }

        info!("Session TALKING with {host}");
        self.launch_worker(&host);
    }

    fn bring_up(&self) -> Result<String, SessionError> {
        let host = self.lifecycle.start()?;
        self.lifecycle
            .wait_for_service(&host, &self.service, &self.service_policy)?;
        Ok(host)
    }

    fn launch_worker(self: &Arc<Self>, host: &str) {
        if let Err(e) = self.supervisor.spawn(host) {
            error!("{e}");
            self.handle_shutdown(ShutdownTrigger::SpawnFailed);
            return;
        }
        if self.guard.is_begun() {
            // Teardown may have run its terminate step before the spawn.
            self.supervisor.terminate();
            return;
        }

        let this = Arc::clone(self);
        let monitor = thread::Builder::new()
            .name("nico-monitor".into())
            .spawn(move || {
                let exit = this.supervisor.supervise();
                if let Some(trigger) = exit.trigger() {
                    this.guarded("worker monitor", || this.handle_shutdown(trigger));
                }
            });
        if let Err(e) = monitor {
            error!("Failed to start worker monitor: {e}");
            self.handle_shutdown(ShutdownTrigger::Fatal(format!("monitor thread: {e}")));
        }
    }

    /// The single teardown routine. The first caller runs the body; every
    /// other caller returns immediately.
    pub fn handle_shutdown(&self, trigger: ShutdownTrigger) {
        if !self.guard.try_begin() {
            debug!("Shutdown already in progress; ignoring {trigger}");
            return;
        }

        let previous = {
            let mut machine = self.machine.lock();
            let previous = machine.state();
            machine.handle_event(SessionEvent::Shutdown);
            previous
        };
        info!("Shutdown begin: {trigger} (was {previous})");
        self.journal.record_start(&trigger, previous);
        self.hardware.set_indicator(false);

        if let (Some(host), Some(uptime)) = (self.supervisor.host(), self.supervisor.uptime()) {
            info!("Stopping worker for {host} after {:.1}s", uptime.as_secs_f64());
        }
        self.supervisor.terminate();

        if let Some(mut inlet) = self.inlet.lock().take() {
            inlet.close();
        }
        self.relay.enqueue(ActuatorCommand::Stop);

        self.lifecycle.stop();

        self.hardware.release();

        if !self.relay.shutdown(self.drain_timeout) {
            warn!("Final STOP may not have reached the actuator");
        }

        self.journal.record_finish(self.power_off.is_enabled());
        info!("Shutdown complete");
        self.power_off.execute();

        self.signal_finished();
    }

    fn signal_finished(&self) {
        self.finished.store(true, Ordering::Release);
        let _ = self.done_tx.try_send(());
    }

    /// Block until teardown completes or `timeout` passes.
    pub fn wait_finished(&self, timeout: Duration) -> bool {
        self.finished.load(Ordering::Acquire) || self.done_rx.recv_timeout(timeout).is_ok()
    }
}

/// Startup errors raised after the instance began running.
fn brought_up(e: &SessionError) -> bool {
    matches!(
        e,
        SessionError::Compute(
            ComputeError::Unreachable { .. }
                | ComputeError::ServiceNotReady { .. }
                | ComputeError::NoHost(_)
        )
    )
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

static_assertions::assert_impl_all!(SessionController: Send, Sync);
