//! Local command inlet.
//!
//! A Unix datagram socket through which other processes (the
//! conversational worker, the `nico send` subcommand) hand commands to the
//! relay. Each datagram carries one token (`FORWARD:1.5`, `STOP`, ...).
//! Producers never touch the peripheral connection themselves.

use crate::relay::CommandSender;
use nico_common::actuator::ActuatorCommand;
use std::io;
use std::os::unix::net::UnixDatagram;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Read timeout used to poll the stop flag.
const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Largest accepted datagram.
const MAX_DATAGRAM: usize = 256;

/// Listening side of the inlet.
pub struct CommandInlet {
    path: PathBuf,
    stop: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl CommandInlet {
    /// Bind `path` and forward every valid datagram to `sender`.
    ///
    /// A stale socket file left by a previous run is removed first.
    pub fn bind(path: &Path, sender: CommandSender) -> io::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        match std::fs::remove_file(path) {
            Ok(()) => debug!("Removed stale inlet socket {}", path.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }

        let socket = UnixDatagram::bind(path)?;
        socket.set_read_timeout(Some(POLL_INTERVAL))?;

        let stop = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop);
        let worker = thread::Builder::new()
            .name("nico-inlet".into())
            .spawn(move || serve(socket, sender, flag))?;

        info!("Command inlet listening on {}", path.display());
        Ok(Self {
            path: path.to_path_buf(),
            stop,
            worker: Some(worker),
        })
    }

    /// Socket path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Stop accepting commands and remove the socket file. Idempotent.
    pub fn close(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };
        self.stop.store(true, Ordering::SeqCst);
        let _ = worker.join();
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != io::ErrorKind::NotFound {
                warn!("Failed to remove inlet socket {}: {e}", self.path.display());
            }
        }
        info!("Command inlet closed");
    }
}

impl Drop for CommandInlet {
    fn drop(&mut self) {
        self.close();
    }
}

fn serve(socket: UnixDatagram, sender: CommandSender, stop: Arc<AtomicBool>) {
    let mut buf = [0u8; MAX_DATAGRAM];
    while !stop.load(Ordering::SeqCst) {
        let n = match socket.recv(&mut buf) {
            Ok(n) => n,
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
                continue;
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                warn!("Command inlet receive failed: {e}");
                break;
            }
        };

        let Ok(text) = std::str::from_utf8(&buf[..n]) else {
            warn!("Dropping non-UTF-8 datagram ({n} bytes)");
            continue;
        };
        match text.parse::<ActuatorCommand>() {
            Ok(cmd) => {
                debug!("Inlet -> {cmd}");
                sender.enqueue(cmd);
            }
            Err(e) => warn!("Dropping malformed command {text:?}: {e}"),
        }
    }
}

/// Send one command to an inlet bound at `path`.
pub fn send_command(path: &Path, cmd: ActuatorCommand) -> io::Result<()> {
    let socket = UnixDatagram::unbound()?;
    socket.send_to(cmd.to_string().as_bytes(), path)?;
    Ok(())
}
