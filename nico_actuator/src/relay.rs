//! Command queue and its single worker.
//!
//! The worker thread is the only holder of the [`ActuatorLink`]. For each
//! dequeued command it ensures a connection (retrying forever with
//! backoff), writes once, and on write failure drops the connection and
//! the command. Queue order is delivery order.

use crate::backoff::{Backoff, BackoffPolicy};
use crate::link::ActuatorLink;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, bounded, unbounded};
use nico_common::actuator::ActuatorCommand;
use parking_lot::Mutex;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, warn};

enum RelayMessage {
    Command(ActuatorCommand),
    /// Sentinel: exit once everything queued before it is handled.
    Drain,
}

/// Delivery counters, updated by the worker only.
#[derive(Debug, Default)]
pub struct RelayStats {
    sent: AtomicU64,
    dropped: AtomicU64,
    connect_failures: AtomicU64,
}

impl RelayStats {
    /// Commands written successfully.
    pub fn sent(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }

    /// Commands lost to a failed write or an aborted retry loop.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Failed connect attempts.
    pub fn connect_failures(&self) -> u64 {
        self.connect_failures.load(Ordering::Relaxed)
    }
}

/// Cloneable producer side of the relay queue.
#[derive(Clone)]
pub struct CommandSender {
    tx: Sender<RelayMessage>,
}

impl CommandSender {
    /// Queue a command. Never blocks and never fails from the caller's
    /// side; delivery is best-effort.
    pub fn enqueue(&self, cmd: ActuatorCommand) {
        if self.tx.send(RelayMessage::Command(cmd)).is_err() {
            debug!("Relay stopped; dropping {cmd}");
        }
    }
}

/// Owner handle for a running relay.
pub struct RelayHandle {
    sender: CommandSender,
    abort_tx: Sender<()>,
    done_rx: Receiver<()>,
    worker: Mutex<Option<JoinHandle<()>>>,
    stats: Arc<RelayStats>,
}

impl RelayHandle {
    /// Spawn the relay worker around `link`.
    pub fn start(link: Box<dyn ActuatorLink>, policy: BackoffPolicy) -> io::Result<Self> {
        let (tx, rx) = unbounded();
        let (abort_tx, abort_rx) = bounded(1);
        let (done_tx, done_rx) = bounded(1);
        let stats = Arc::new(RelayStats::default());

        info!("Starting actuator relay on '{}' link", link.name());
        let worker = RelayWorker {
            link,
            backoff: Backoff::new(policy),
            rx,
            abort_rx,
            stats: Arc::clone(&stats),
        };
        let handle = thread::Builder::new()
            .name("nico-relay".into())
            .spawn(move || {
                worker.run();
                let _ = done_tx.send(());
            })?;

        Ok(Self {
            sender: CommandSender { tx },
            abort_tx,
            done_rx,
            worker: Mutex::new(Some(handle)),
            stats,
        })
    }

    /// Queue a command (see [`CommandSender::enqueue`]).
    pub fn enqueue(&self, cmd: ActuatorCommand) {
        self.sender.enqueue(cmd);
    }

    /// Producer handle for other threads.
    pub fn sender(&self) -> CommandSender {
        self.sender.clone()
    }

    /// Delivery counters.
    pub fn stats(&self) -> &RelayStats {
        &self.stats
    }

    /// Drain the queue and stop the worker.
    ///
    /// Commands queued before this call are still handled. Returns `true`
    /// if the worker finished within `timeout`; otherwise a pending
    /// reconnect loop is aborted and the worker is left to exit on its own.
    /// Safe to call more than once.
    pub fn shutdown(&self, timeout: Duration) -> bool {
        let Some(handle) = self.worker.lock().take() else {
            return true;
        };
        let _ = self.sender.tx.send(RelayMessage::Drain);

        match self.done_rx.recv_timeout(timeout) {
            Ok(()) => {
                let _ = handle.join();
                info!(
                    "Actuator relay drained (sent={}, dropped={})",
                    self.stats.sent(),
                    self.stats.dropped()
                );
                true
            }
            Err(_) => {
                warn!("Actuator relay did not drain within {timeout:?}; aborting retries");
                let _ = self.abort_tx.try_send(());
                false
            }
        }
    }
}

struct RelayWorker {
    link: Box<dyn ActuatorLink>,
    backoff: Backoff,
    rx: Receiver<RelayMessage>,
    abort_rx: Receiver<()>,
    stats: Arc<RelayStats>,
}

impl RelayWorker {
    fn run(mut self) {
        while let Ok(msg) = self.rx.recv() {
            match msg {
                RelayMessage::Command(cmd) => {
                    if !self.deliver(cmd) {
                        break;
                    }
                }
                RelayMessage::Drain => break,
            }
        }
        self.link.disconnect();
        debug!("Actuator relay worker exiting");
    }

    /// Returns `false` if the worker was aborted while reconnecting.
    fn deliver(&mut self, cmd: ActuatorCommand) -> bool {
        let payload = match cmd.to_payload() {
            Ok(payload) => payload,
            Err(e) => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                warn!("Refusing to send {cmd:?}: {e}");
                return true;
            }
        };
        if !self.ensure_connected() {
            self.stats.dropped.fetch_add(1, Ordering::Relaxed);
            warn!("Relay aborted while reconnecting; {cmd} not sent");
            return false;
        }

        match self.link.write(&payload) {
            Ok(()) => {
                self.stats.sent.fetch_add(1, Ordering::Relaxed);
                info!("Sent {cmd}");
            }
            Err(e) => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                if cmd.is_stop() {
                    error!("STOP not delivered: {e}; dropping connection");
                } else {
                    warn!("Failed to send {cmd}: {e}; dropping connection");
                }
                self.link.disconnect();
            }
        }
        true
    }

    /// Connect until success. Returns `false` only on abort.
    fn ensure_connected(&mut self) -> bool {
        if self.link.is_connected() {
            return true;
        }
        loop {
            self.link.disconnect();
            match self.link.connect() {
                Ok(()) => {
                    self.backoff.reset();
                    info!("Actuator link connected");
                    return true;
                }
                Err(e) => {
                    self.stats.connect_failures.fetch_add(1, Ordering::Relaxed);
                    let delay = self.backoff.next_delay();
                    warn!("Actuator connect failed: {e}; retry in {:.2}s", delay.as_secs_f64());
                    match self.abort_rx.recv_timeout(delay) {
                        Err(RecvTimeoutError::Timeout) => {}
                        // Abort requested or owner dropped.
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => return false,
                    }
                }
            }
        }
    }
}

static_assertions::assert_impl_all!(RelayHandle: Send, Sync);
static_assertions::assert_impl_all!(CommandSender: Send, Sync, Clone);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::links::simulation::SimulationLink;

    fn fast_policy() -> BackoffPolicy {
        BackoffPolicy {
            initial: Duration::from_millis(5),
            factor: 1.5,
            max: Duration::from_millis(20),
        }
    }

    #[test]
    fn delivers_in_enqueue_order() {
        let link = SimulationLink::new();
        let log = link.delivery_log();
        let relay = RelayHandle::start(Box::new(link), fast_policy()).unwrap();

        relay.enqueue(ActuatorCommand::Forward(1.5));
        relay.enqueue(ActuatorCommand::Stop);
        relay.enqueue(ActuatorCommand::Reverse(2.0));
        assert!(relay.shutdown(Duration::from_secs(2)));

        assert_eq!(*log.lock(), vec!["FORWARD:1.5", "STOP", "REVERSE:2.0"]);
        assert_eq!(relay.stats().sent(), 3);
        assert_eq!(relay.stats().dropped(), 0);
    }

    #[test]
    fn retries_connect_until_success() {
        let link = SimulationLink::new().with_failing_connects(3);
        let log = link.delivery_log();
        let relay = RelayHandle::start(Box::new(link), fast_policy()).unwrap();

        relay.enqueue(ActuatorCommand::Stop);
        assert!(relay.shutdown(Duration::from_secs(2)));

        assert_eq!(*log.lock(), vec!["STOP"]);
        assert_eq!(relay.stats().connect_failures(), 3);
    }

    #[test]
    fn shutdown_aborts_endless_reconnect() {
        let link = SimulationLink::new().with_failing_connects(u32::MAX);
        let relay = RelayHandle::start(Box::new(link), fast_policy()).unwrap();

        relay.enqueue(ActuatorCommand::Stop);
        assert!(!relay.shutdown(Duration::from_millis(100)));
        // Second call is a no-op.
        assert!(relay.shutdown(Duration::from_millis(10)));
    }

    #[test]
    fn invalid_motion_is_dropped_not_sent() {
        let link = SimulationLink::new();
        let log = link.delivery_log();
        let relay = RelayHandle::start(Box::new(link), fast_policy()).unwrap();

        relay.enqueue(ActuatorCommand::Forward(f64::NAN));
        relay.enqueue(ActuatorCommand::Reverse(-1.0));
        relay.enqueue(ActuatorCommand::Stop);
        assert!(relay.shutdown(Duration::from_secs(2)));

        assert_eq!(*log.lock(), vec!["STOP"]);
        assert_eq!(relay.stats().sent(), 1);
        assert_eq!(relay.stats().dropped(), 2);
    }

    #[test]
    fn enqueue_after_shutdown_is_silent() {
        let relay = RelayHandle::start(Box::new(SimulationLink::new()), fast_policy()).unwrap();
        let sender = relay.sender();
        assert!(relay.shutdown(Duration::from_secs(1)));
        sender.enqueue(ActuatorCommand::Stop);
    }
}
