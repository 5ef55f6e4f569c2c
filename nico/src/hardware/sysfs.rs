//! Linux sysfs GPIO backend.
//!
//! Lines are exported through `<base>/export` and driven through
//! `<base>/gpioN/{direction,value}`. The button is polled on a dedicated
//! thread with software debounce and hold detection.

use super::{ButtonHandlers, ButtonInput, HardwareError, Indicator};
use nico_common::config::HardwareConfig;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

const SYSFS_GPIO: &str = "/sys/class/gpio";
const POLL_INTERVAL: Duration = Duration::from_millis(10);
const EXPORT_TIMEOUT: Duration = Duration::from_secs(1);

/// Handle on a sysfs GPIO tree.
#[derive(Debug, Clone)]
pub struct SysfsGpio {
    base: PathBuf,
}

impl Default for SysfsGpio {
    fn default() -> Self {
        Self::new(SYSFS_GPIO)
    }
}

impl SysfsGpio {
    pub fn new(base: impl AsRef<Path>) -> Self {
        Self {
            base: base.as_ref().to_path_buf(),
        }
    }

    fn line(&self, pin: u32) -> PathBuf {
        self.base.join(format!("gpio{pin}"))
    }

    /// Export `pin` and set its direction.
    pub fn export(&self, pin: u32, output: bool) -> Result<(), HardwareError> {
        let wrap = |source| HardwareError::Gpio { pin, source };
        let line = self.line(pin);
        if !line.exists() {
            fs::write(self.base.join("export"), pin.to_string()).map_err(wrap)?;
            let deadline = Instant::now() + EXPORT_TIMEOUT;
            while !line.exists() {
                if Instant::now() >= deadline {
                    return Err(wrap(io::Error::new(
                        io::ErrorKind::TimedOut,
                        "line did not appear after export",
                    )));
                }
                thread::sleep(POLL_INTERVAL);
            }
        }
        let direction = if output { "out" } else { "in" };
        fs::write(line.join("direction"), direction).map_err(wrap)?;
        debug!("GPIO {pin} exported as {direction}");
        Ok(())
    }

    pub fn unexport(&self, pin: u32) -> Result<(), HardwareError> {
        fs::write(self.base.join("unexport"), pin.to_string())
            .map_err(|source| HardwareError::Gpio { pin, source })
    }

    /// Raw line level.
    pub fn read(&self, pin: u32) -> io::Result<bool> {
        let raw = fs::read_to_string(self.line(pin).join("value"))?;
        match raw.trim() {
            "0" => Ok(false),
            "1" => Ok(true),
            other => Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("unexpected level {other:?}"),
            )),
        }
    }

    pub fn write(&self, pin: u32, level: bool) -> Result<(), HardwareError> {
        fs::write(self.line(pin).join("value"), if level { "1" } else { "0" })
            .map_err(|source| HardwareError::Gpio { pin, source })
    }
}

// ─── Button ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
struct ButtonTiming {
    active_low: bool,
    bounce: Duration,
    hold: Option<Duration>,
}

/// Polled push button on one input line.
pub struct SysfsButton {
    gpio: SysfsGpio,
    pin: u32,
    timing: ButtonTiming,
    stop: Arc<AtomicBool>,
    poller: Option<JoinHandle<()>>,
}

impl SysfsButton {
    pub fn open(gpio: &SysfsGpio, config: &HardwareConfig) -> Result<Self, HardwareError> {
        gpio.export(config.button_pin, false)?;
        Ok(Self {
            gpio: gpio.clone(),
            pin: config.button_pin,
            timing: ButtonTiming {
                active_low: config.active_low,
                bounce: config.bounce(),
                hold: config.hold(),
            },
            stop: Arc::new(AtomicBool::new(false)),
            poller: None,
        })
    }
}

impl ButtonInput for SysfsButton {
    fn name(&self) -> &'static str {
        "sysfs"
    }

    fn attach(&mut self, handlers: ButtonHandlers) -> Result<(), HardwareError> {
        if self.poller.is_some() {
            return Err(HardwareError::AlreadyAttached);
        }
        self.stop.store(false, Ordering::SeqCst);

        let gpio = self.gpio.clone();
        let pin = self.pin;
        let timing = self.timing;
        let stop = Arc::clone(&self.stop);
        let poller = thread::Builder::new()
            .name("nico-button".into())
            .spawn(move || poll_button(&gpio, pin, timing, &handlers, &stop))
            .map_err(HardwareError::Thread)?;
        self.poller = Some(poller);
        Ok(())
    }

    fn detach(&mut self) {
        if let Some(poller) = self.poller.take() {
            self.stop.store(true, Ordering::SeqCst);
            let _ = poller.join();
            debug!("GPIO {} poller stopped", self.pin);
        }
    }

    /// A line that cannot be read counts as pressed.
    fn is_asserted(&self) -> bool {
        match self.gpio.read(self.pin) {
            Ok(level) => level != self.timing.active_low,
            Err(e) => {
                debug!("GPIO {} unreadable: {e}", self.pin);
                true
            }
        }
    }

    fn close(&mut self) -> Result<(), HardwareError> {
        self.detach();
        self.gpio.unexport(self.pin)?;
        info!("GPIO {} released", self.pin);
        Ok(())
    }
}

impl Drop for SysfsButton {
    fn drop(&mut self) {
        self.detach();
    }
}

fn poll_button(
    gpio: &SysfsGpio,
    pin: u32,
    timing: ButtonTiming,
    handlers: &ButtonHandlers,
    stop: &AtomicBool,
) {
    let mut pressed = false;
    let mut last_edge: Option<Instant> = None;
    let mut pressed_at = Instant::now();
    let mut hold_fired = false;
    let mut read_failing = false;

    while !stop.load(Ordering::SeqCst) {
        match gpio.read(pin) {
            Ok(level) => {
                read_failing = false;
                let now_pressed = level != timing.active_low;
                let now = Instant::now();
                if now_pressed != pressed {
                    if last_edge.is_none_or(|t| now.duration_since(t) >= timing.bounce) {
                        last_edge = Some(now);
                        pressed = now_pressed;
                        if pressed {
                            pressed_at = now;
                            hold_fired = false;
                            handlers.dispatch_press();
                        }
                    }
                } else if pressed && !hold_fired {
                    if let Some(hold) = timing.hold {
                        if now.duration_since(pressed_at) >= hold {
                            hold_fired = true;
                            handlers.dispatch_hold();
                        }
                    }
                }
            }
            Err(e) => {
                if !read_failing {
                    warn!("GPIO {pin} read failed: {e}");
                    read_failing = true;
                }
            }
        }
        thread::sleep(POLL_INTERVAL);
    }
}

// ─── LED ────────────────────────────────────────────────────────────

/// Output line driving the status LED.
pub struct SysfsLed {
    gpio: SysfsGpio,
    pin: u32,
}

impl SysfsLed {
    /// Export `pin` as an output, initially off.
    pub fn open(gpio: &SysfsGpio, pin: u32) -> Result<Self, HardwareError> {
        gpio.export(pin, true)?;
        gpio.write(pin, false)?;
        Ok(Self {
            gpio: gpio.clone(),
            pin,
        })
    }
}

impl Indicator for SysfsLed {
    fn set(&mut self, on: bool) -> Result<(), HardwareError> {
        self.gpio.write(self.pin, on)
    }

    fn close(&mut self) -> Result<(), HardwareError> {
        self.gpio.write(self.pin, false)?;
        self.gpio.unexport(self.pin)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    /// Fake sysfs tree with pre-exported lines.
    fn fake_sysfs(pins: &[u32]) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("export"), "").unwrap();
        fs::write(dir.path().join("unexport"), "").unwrap();
        for pin in pins {
            let line = dir.path().join(format!("gpio{pin}"));
            fs::create_dir(&line).unwrap();
            fs::write(line.join("direction"), "in").unwrap();
            fs::write(line.join("value"), "1").unwrap();
        }
        dir
    }

    fn config(bounce_ms: u64, hold_secs: u64) -> HardwareConfig {
        HardwareConfig {
            bounce_ms,
            hold_secs,
            ..HardwareConfig::default()
        }
    }

    fn counting() -> (ButtonHandlers, Arc<AtomicUsize>, Arc<AtomicUsize>) {
        let presses = Arc::new(AtomicUsize::new(0));
        let holds = Arc::new(AtomicUsize::new(0));
        let (p, h) = (Arc::clone(&presses), Arc::clone(&holds));
        let handlers = ButtonHandlers {
            on_press: Arc::new(move || {
                p.fetch_add(1, Ordering::SeqCst);
            }),
            on_hold: Some(Arc::new(move || {
                h.fetch_add(1, Ordering::SeqCst);
            })),
        };
        (handlers, presses, holds)
    }

    fn set_level(dir: &Path, pin: u32, level: &str) {
        fs::write(dir.join(format!("gpio{pin}/value")), level).unwrap();
    }

    fn settle() {
        thread::sleep(Duration::from_millis(150));
    }

    #[test]
    fn press_is_debounced() {
        let dir = fake_sysfs(&[17]);
        let gpio = SysfsGpio::new(dir.path());
        let mut button = SysfsButton::open(&gpio, &config(300, 60)).unwrap();
        let (handlers, presses, _) = counting();
        button.attach(handlers).unwrap();

        set_level(dir.path(), 17, "0");
        thread::sleep(Duration::from_millis(30));
        set_level(dir.path(), 17, "1");
        thread::sleep(Duration::from_millis(30));
        set_level(dir.path(), 17, "0");
        settle();
        assert_eq!(presses.load(Ordering::SeqCst), 1);

        button.detach();
    }

    #[test]
    fn hold_fires_once() {
        let dir = fake_sysfs(&[17]);
        let gpio = SysfsGpio::new(dir.path());
        let mut button = SysfsButton::open(&gpio, &config(20, 1)).unwrap();
        let (handlers, presses, holds) = counting();
        button.attach(handlers).unwrap();

        set_level(dir.path(), 17, "0");
        thread::sleep(Duration::from_millis(1300));
        assert_eq!(presses.load(Ordering::SeqCst), 1);
        assert_eq!(holds.load(Ordering::SeqCst), 1);

        button.close().unwrap();
        assert_eq!(fs::read_to_string(dir.path().join("unexport")).unwrap(), "17");
    }

    #[test]
    fn detached_button_ignores_presses() {
        let dir = fake_sysfs(&[17]);
        let gpio = SysfsGpio::new(dir.path());
        let mut button = SysfsButton::open(&gpio, &config(20, 60)).unwrap();
        let (handlers, presses, _) = counting();
        button.attach(handlers.clone()).unwrap();
        assert!(matches!(button.attach(handlers), Err(HardwareError::AlreadyAttached)));

        button.detach();
        set_level(dir.path(), 17, "0");
        settle();
        assert_eq!(presses.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn asserted_follows_active_low_level() {
        let dir = fake_sysfs(&[17]);
        let gpio = SysfsGpio::new(dir.path());
        let button = SysfsButton::open(&gpio, &config(20, 60)).unwrap();
        assert!(!button.is_asserted());

        set_level(dir.path(), 17, "0");
        assert!(button.is_asserted());

        let active_high = HardwareConfig {
            active_low: false,
            ..config(20, 60)
        };
        let button = SysfsButton::open(&gpio, &active_high).unwrap();
        assert!(!button.is_asserted());
    }

    #[test]
    fn led_writes_levels() {
        let dir = fake_sysfs(&[18]);
        let gpio = SysfsGpio::new(dir.path());
        let mut led = SysfsLed::open(&gpio, 18).unwrap();
        let value = dir.path().join("gpio18/value");
        assert_eq!(fs::read_to_string(&value).unwrap(), "0");
        assert_eq!(fs::read_to_string(dir.path().join("gpio18/direction")).unwrap(), "out");

        led.set(true).unwrap();
        assert_eq!(fs::read_to_string(&value).unwrap(), "1");
        led.close().unwrap();
        assert_eq!(fs::read_to_string(&value).unwrap(), "0");
    }

    #[test]
    fn export_times_out_when_line_never_appears() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("export"), "").unwrap();
        let gpio = SysfsGpio::new(dir.path());
        assert!(matches!(gpio.export(5, false), Err(HardwareError::Gpio { pin: 5, .. })));
    }
}
