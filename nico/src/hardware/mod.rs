//! Button, indicator LED and their release policy.
//!
//! Inputs implement [`ButtonInput`], outputs implement [`Indicator`]:
//!
//! - [`sysfs`] - Linux `/sys/class/gpio` (production)
//! - [`console`] - stdin lines and log output (workstation runs)
//!
//! [`HardwareGuard`] owns both for the life of the process and releases
//! them exactly once during teardown. When the orderly release fails it
//! falls back to [`ForcedRelease`], which frees the GPIO character device
//! from whatever still holds it.

pub mod console;
pub mod sysfs;

use nico_common::config::{HardwareConfig, InputKind};
use parking_lot::Mutex;
use std::path::PathBuf;
use std::process::Command;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Hardware error types.
#[derive(Debug, Error)]
pub enum HardwareError {
    #[error("GPIO {pin}: {source}")]
    Gpio {
        pin: u32,
        #[source]
        source: std::io::Error,
    },

    #[error("button handlers already attached")]
    AlreadyAttached,

    #[error("input source exhausted")]
    SourceExhausted,

    #[error("failed to spawn button thread: {0}")]
    Thread(#[source] std::io::Error),
}

/// Callback run for a button gesture.
pub type ButtonCallback = Arc<dyn Fn() + Send + Sync>;

/// Callbacks attached to a button.
///
/// Each invocation runs on its own thread, so a callback may block or
/// tear the button down without stalling the input poller.
#[derive(Clone)]
pub struct ButtonHandlers {
    pub on_press: ButtonCallback,
    /// Fired once per press held past the hold threshold.
    pub on_hold: Option<ButtonCallback>,
}

impl ButtonHandlers {
    pub(crate) fn dispatch_press(&self) {
        dispatch("press", &self.on_press);
    }

    pub(crate) fn dispatch_hold(&self) {
        if let Some(cb) = &self.on_hold {
            dispatch("hold", cb);
        }
    }
}

fn dispatch(gesture: &'static str, cb: &ButtonCallback) {
    let cb = Arc::clone(cb);
    if let Err(e) = thread::Builder::new()
        .name(format!("nico-{gesture}"))
        .spawn(move || cb())
    {
        warn!("Failed to dispatch button {gesture}: {e}");
    }
}

/// A momentary push button.
pub trait ButtonInput: Send {
    fn name(&self) -> &'static str;

    /// Start delivering gestures to `handlers`.
    fn attach(&mut self, handlers: ButtonHandlers) -> Result<(), HardwareError>;

    /// Stop delivering gestures. Callbacks already dispatched keep running.
    fn detach(&mut self);

    /// Whether the button is held down right now.
    fn is_asserted(&self) -> bool;

    /// Release the underlying line.
    fn close(&mut self) -> Result<(), HardwareError>;
}

/// A single on/off indicator.
pub trait Indicator: Send {
    fn set(&mut self, on: bool) -> Result<(), HardwareError>;

    /// Switch off and release the underlying line.
    fn close(&mut self) -> Result<(), HardwareError>;
}

/// Build the button and LED selected in `[hardware]`.
pub fn create_hardware(
    config: &HardwareConfig,
) -> Result<(Box<dyn ButtonInput>, Box<dyn Indicator>), HardwareError> {
    match config.input {
        InputKind::Sysfs => {
            let gpio = sysfs::SysfsGpio::default();
            let button = sysfs::SysfsButton::open(&gpio, config)?;
            let led = sysfs::SysfsLed::open(&gpio, config.led_pin)?;
            Ok((Box::new(button), Box::new(led)))
        }
        InputKind::Console => Ok((
            Box::new(console::ConsoleButton::stdin()),
            Box::new(console::ConsoleLed::default()),
        )),
    }
}

// ─── Forced release ─────────────────────────────────────────────────

/// Last-resort cleanup of the GPIO character device.
///
/// 1. `SIGKILL` every other process holding `chip` (per `lsof -t`)
/// 2. `systemctl stop <service>`
/// 3. `killall -9 <daemon>` ("no process found" is not a failure)
#[derive(Debug, Clone)]
pub struct ForcedRelease {
    pub chip: PathBuf,
    pub service: Option<String>,
    pub daemon: Option<String>,
}

impl ForcedRelease {
    pub fn from_config(config: &HardwareConfig) -> Option<Self> {
        config.forced_release.then(|| Self {
            chip: config.gpio_chip.clone(),
            service: config.gpio_service.clone(),
            daemon: config.gpio_daemon.clone(),
        })
    }

    /// Run every step; failures are logged and skipped.
    pub fn run(&self) {
        warn!("Forcing release of {}", self.chip.display());
        self.kill_holders();

        if let Some(service) = &self.service {
            match Command::new("systemctl").args(["stop", service]).output() {
                Ok(out) if out.status.success() => info!("Stopped {service}"),
                Ok(out) => warn!(
                    "systemctl stop {service}: {}",
                    String::from_utf8_lossy(&out.stderr).trim()
                ),
                Err(e) => warn!("systemctl unavailable: {e}"),
            }
        }

        if let Some(daemon) = &self.daemon {
            match Command::new("killall").args(["-9", daemon]).output() {
                Ok(out) if out.status.success() => info!("Killed {daemon}"),
                Ok(out) => {
                    let stderr = String::from_utf8_lossy(&out.stderr);
                    if stderr.contains("no process found") {
                        debug!("{daemon} not running");
                    } else {
                        warn!("killall {daemon}: {}", stderr.trim());
                    }
                }
                Err(e) => warn!("killall unavailable: {e}"),
            }
        }
    }

    fn kill_holders(&self) {
        let out = match Command::new("lsof").arg("-t").arg(&self.chip).output() {
            Ok(out) => out,
            Err(e) => {
                warn!("lsof unavailable: {e}");
                return;
            }
        };
        let own = std::process::id();
        for pid in parse_pids(&String::from_utf8_lossy(&out.stdout)) {
            if pid == own {
                continue;
            }
            let Ok(raw) = i32::try_from(pid) else { continue };
            match nix::sys::signal::kill(
                nix::unistd::Pid::from_raw(raw),
                nix::sys::signal::Signal::SIGKILL,
            ) {
                Ok(()) => info!("Killed pid {pid} holding {}", self.chip.display()),
                Err(e) => warn!("Failed to kill pid {pid}: {e}"),
            }
        }
    }
}

fn parse_pids(text: &str) -> Vec<u32> {
    text.split_whitespace()
        .filter_map(|s| s.parse().ok())
        .collect()
}

// ─── Guard ──────────────────────────────────────────────────────────

/// Owns the button and LED; releases them once.
pub struct HardwareGuard {
    button: Mutex<Option<Box<dyn ButtonInput>>>,
    led: Mutex<Option<Box<dyn Indicator>>>,
    settle: Duration,
    forced: Option<ForcedRelease>,
}

impl HardwareGuard {
    pub fn new(
        button: Box<dyn ButtonInput>,
        led: Box<dyn Indicator>,
        settle: Duration,
        forced: Option<ForcedRelease>,
    ) -> Self {
        Self {
            button: Mutex::new(Some(button)),
            led: Mutex::new(Some(led)),
            settle,
            forced,
        }
    }

    /// Attach gesture handlers to the button.
    pub fn arm(&self, handlers: ButtonHandlers) -> Result<(), HardwareError> {
        match self.button.lock().as_mut() {
            Some(button) => {
                button.attach(handlers)?;
                info!("Button armed ({})", button.name());
                Ok(())
            }
            None => Ok(()),
        }
    }

    /// Best-effort LED update. Ignored after release.
    pub fn set_indicator(&self, on: bool) {
        if let Some(led) = self.led.lock().as_mut() {
            if let Err(e) = led.set(on) {
                warn!("Failed to set LED: {e}");
            }
        }
    }

    /// Current button level; `false` once released.
    pub fn button_asserted(&self) -> bool {
        self.button
            .lock()
            .as_ref()
            .is_some_and(|button| button.is_asserted())
    }

    /// Whether [`release`](Self::release) has run.
    pub fn is_released(&self) -> bool {
        self.button.lock().is_none() && self.led.lock().is_none()
    }

    /// Detach callbacks, let in-flight work settle, close the lines.
    ///
    /// Falls back to [`ForcedRelease`] when a close fails. Never fails;
    /// later calls are no-ops.
    pub fn release(&self) {
        let button = self.button.lock().take();
        let led = self.led.lock().take();
        if button.is_none() && led.is_none() {
            return;
        }

        let mut clean = true;
        if let Some(mut button) = button {
            button.detach();
            thread::sleep(self.settle);
            if let Err(e) = button.close() {
                warn!("Button close failed: {e}");
                clean = false;
            }
        }
        if let Some(mut led) = led {
            if let Err(e) = led.close() {
                warn!("LED close failed: {e}");
                clean = false;
            }
        }

        if clean {
            info!("Hardware released");
        } else if let Some(forced) = &self.forced {
            forced.run();
        } else {
            warn!("Hardware release incomplete and forced release disabled");
        }
    }
}

static_assertions::assert_impl_all!(HardwareGuard: Send, Sync);

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Counters {
        detach: AtomicUsize,
        close: AtomicUsize,
        led_close: AtomicUsize,
    }

    struct FakeButton(Arc<Counters>, bool);

    impl ButtonInput for FakeButton {
        fn name(&self) -> &'static str {
            "fake"
        }
        fn attach(&mut self, _h: ButtonHandlers) -> Result<(), HardwareError> {
            Ok(())
        }
        fn detach(&mut self) {
            self.0.detach.fetch_add(1, Ordering::SeqCst);
        }
        fn is_asserted(&self) -> bool {
            true
        }
        fn close(&mut self) -> Result<(), HardwareError> {
            self.0.close.fetch_add(1, Ordering::SeqCst);
            if self.1 {
                Err(HardwareError::SourceExhausted)
            } else {
                Ok(())
            }
        }
    }

    struct FakeLed(Arc<Counters>);

    impl Indicator for FakeLed {
        fn set(&mut self, _on: bool) -> Result<(), HardwareError> {
            Ok(())
        }
        fn close(&mut self) -> Result<(), HardwareError> {
            self.0.led_close.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn release_runs_once() {
        let c = Arc::new(Counters::default());
        let guard = HardwareGuard::new(
            Box::new(FakeButton(Arc::clone(&c), false)),
            Box::new(FakeLed(Arc::clone(&c))),
            Duration::ZERO,
            None,
        );
        assert!(guard.button_asserted());
        guard.release();
        guard.release();
        assert!(guard.is_released());
        assert!(!guard.button_asserted());
        assert_eq!(c.detach.load(Ordering::SeqCst), 1);
        assert_eq!(c.close.load(Ordering::SeqCst), 1);
        assert_eq!(c.led_close.load(Ordering::SeqCst), 1);
        // Updates after release are ignored.
        guard.set_indicator(true);
    }

    #[test]
    fn failed_close_still_closes_led() {
        let c = Arc::new(Counters::default());
        let guard = HardwareGuard::new(
            Box::new(FakeButton(Arc::clone(&c), true)),
            Box::new(FakeLed(Arc::clone(&c))),
            Duration::ZERO,
            None,
        );
        guard.release();
        assert_eq!(c.led_close.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn lsof_output_parsing() {
        assert_eq!(parse_pids("123\n456\n"), vec![123, 456]);
        assert_eq!(parse_pids(""), Vec::<u32>::new());
        assert_eq!(parse_pids("12 junk 7"), vec![12, 7]);
    }

    #[test]
    fn forced_release_follows_config() {
        let mut config = HardwareConfig::default();
        assert!(ForcedRelease::from_config(&config).is_some());
        config.forced_release = false;
        assert!(ForcedRelease::from_config(&config).is_none());
    }
}
