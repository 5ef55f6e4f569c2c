//! Conversational worker supervisor.
//!
//! Spawns `program args... <host>`, polls it on a fixed interval and
//! enforces a wall-clock ceiling. The supervisor never touches session
//! state: [`WorkerSupervisor::supervise`] returns a [`WorkerExit`] and the
//! caller decides what it means.
//!
//! The live process record lives behind a mutex so teardown can take it
//! while the monitor thread is still polling. A monitor that finds the slot
//! empty reports [`WorkerExit::Detached`].
//!
//! Two ways to stop a worker:
//!
//! - ceiling expiry inside [`WorkerSupervisor::supervise`]: immediate SIGKILL
//! - [`WorkerSupervisor::terminate`] during teardown: SIGTERM, grace, SIGKILL

use nico_common::config::WorkerConfig;
use nico_common::worker::{SupervisorError, WorkerExit};
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use parking_lot::Mutex;
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// A spawned worker and what it was started with.
struct WorkerProcess {
    child: Child,
    host: String,
    started_at: Instant,
}

impl WorkerProcess {
    fn pid(&self) -> u32 {
        self.child.id()
    }
}

/// Owns at most one live worker process.
pub struct WorkerSupervisor {
    config: WorkerConfig,
    ceiling: Duration,
    env: Vec<(String, String)>,
    child: Mutex<Option<WorkerProcess>>,
}

impl WorkerSupervisor {
    pub fn new(config: WorkerConfig) -> Self {
        let ceiling = config.ceiling();
        Self {
            config,
            ceiling,
            env: Vec::new(),
            child: Mutex::new(None),
        }
    }

    /// Override the wall-clock ceiling.
    pub fn with_ceiling(mut self, ceiling: Duration) -> Self {
        self.ceiling = ceiling;
        self
    }

    /// Extra environment variable for the worker.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// PID of the live worker, if any.
    pub fn pid(&self) -> Option<u32> {
        self.child.lock().as_ref().map(WorkerProcess::pid)
    }

    /// Host argument of the live worker.
    pub fn host(&self) -> Option<String> {
        self.child.lock().as_ref().map(|w| w.host.clone())
    }

    /// Time since the live worker was spawned.
    pub fn uptime(&self) -> Option<Duration> {
        self.child.lock().as_ref().map(|w| w.started_at.elapsed())
    }

    /// Launch the worker with `host` as its last argument.
    pub fn spawn(&self, host: &str) -> Result<u32, SupervisorError> {
        let mut slot = self.child.lock();
        if let Some(worker) = slot.as_ref() {
            return Err(SupervisorError::AlreadyRunning { pid: worker.pid() });
        }

        let mut cmd = Command::new(&self.config.program);
        cmd.args(&self.config.args)
            .arg(host)
            .envs(self.env.iter().map(|(k, v)| (k, v)))
            .stdin(Stdio::null());

        let child = cmd.spawn().map_err(|source| SupervisorError::SpawnFailed {
            program: self.config.program.display().to_string(),
            source,
        })?;
        let pid = child.id();
        info!("Worker started (pid {pid}, host {host})");
        *slot = Some(WorkerProcess {
            child,
            host: host.to_string(),
            started_at: Instant::now(),
        });
        Ok(pid)
    }

    /// Block until the worker exits, exceeds its ceiling or is taken by
    /// [`terminate`](Self::terminate).
    ///
    /// The ceiling is measured from spawn. On expiry the worker is killed
    /// outright and reaped here before returning [`WorkerExit::TimedOut`].
    pub fn supervise(&self) -> WorkerExit {
        loop {
            {
                let mut slot = self.child.lock();
                let Some(worker) = slot.as_mut() else {
                    debug!("Worker taken over by teardown");
                    return WorkerExit::Detached;
                };
                match worker.child.try_wait() {
                    Ok(Some(status)) => {
                        slot.take();
                        info!("Worker exited: {status}");
                        return WorkerExit::Exited {
                            code: status.code(),
                        };
                    }
                    Ok(None) => {}
                    Err(e) => {
                        slot.take();
                        error!("Lost track of worker: {e}");
                        return WorkerExit::Exited { code: None };
                    }
                }

                if worker.started_at.elapsed() >= self.ceiling {
                    warn!("Worker exceeded ceiling of {:?}; killing it", self.ceiling);
                    let expired = slot.take();
                    drop(slot);
                    if let Some(worker) = expired {
                        kill_and_reap(worker);
                    }
                    return WorkerExit::TimedOut;
                }
            }
            thread::sleep(self.config.poll());
        }
    }

    /// Stop the worker: SIGTERM, grace period, then SIGKILL. Never fails.
    ///
    /// No-op when no worker is live.
    pub fn terminate(&self) {
        let Some(mut worker) = self.child.lock().take() else {
            return;
        };
        let pid = worker.pid();

        if let Ok(Some(status)) = worker.child.try_wait() {
            debug!("Worker {pid} already exited: {status}");
            return;
        }

        info!("Terminating worker {pid}");
        match i32::try_from(pid) {
            Ok(raw) => {
                if let Err(e) = signal::kill(Pid::from_raw(raw), Signal::SIGTERM) {
                    warn!("SIGTERM to worker {pid} failed: {e}");
                }
            }
            Err(_) => warn!("Worker pid {pid} out of range for signals"),
        }

        let deadline = Instant::now() + self.config.terminate_grace();
        while Instant::now() < deadline {
            match worker.child.try_wait() {
                Ok(Some(status)) => {
                    info!("Worker {pid} stopped: {status}");
                    return;
                }
                Ok(None) => thread::sleep(Duration::from_millis(50)),
                Err(e) => {
                    warn!("Failed to poll worker {pid}: {e}");
                    break;
                }
            }
        }

        warn!("Worker {pid} ignored SIGTERM; killing");
        kill_and_reap(worker);
    }
}

/// SIGKILL and wait. The record is dropped once the process is confirmed dead.
fn kill_and_reap(mut worker: WorkerProcess) {
    let pid = worker.pid();
    if let Err(e) = worker.child.kill() {
        warn!("Failed to kill worker {pid}: {e}");
    }
    match worker.child.wait() {
        Ok(status) => info!("Worker {pid} killed: {status}"),
        Err(e) => warn!("Failed to reap worker {pid}: {e}"),
    }
}

impl Drop for WorkerSupervisor {
    fn drop(&mut self) {
        self.terminate();
    }
}

static_assertions::assert_impl_all!(WorkerSupervisor: Send, Sync);
