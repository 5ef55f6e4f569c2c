//! Console stand-ins for the button and LED.
//!
//! Each input line is one gesture: an empty line or `p` presses, `h`
//! holds. The LED logs its state instead of driving a pin.

use super::{ButtonHandlers, ButtonInput, HardwareError, Indicator};
use std::io::{BufRead, BufReader};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use tracing::{debug, info, warn};

type LineSource = Box<dyn BufRead + Send>;

/// Button driven by text lines.
pub struct ConsoleButton {
    source: Option<LineSource>,
    attached: Arc<AtomicBool>,
}

impl ConsoleButton {
    pub fn stdin() -> Self {
        Self::from_reader(BufReader::new(std::io::stdin()))
    }

    pub fn from_reader(reader: impl BufRead + Send + 'static) -> Self {
        Self {
            source: Some(Box::new(reader)),
            attached: Arc::new(AtomicBool::new(false)),
        }
    }
}

impl ButtonInput for ConsoleButton {
    fn name(&self) -> &'static str {
        "console"
    }

    fn attach(&mut self, handlers: ButtonHandlers) -> Result<(), HardwareError> {
        if self.attached.load(Ordering::SeqCst) {
            return Err(HardwareError::AlreadyAttached);
        }
        let source = self.source.take().ok_or(HardwareError::SourceExhausted)?;
        self.attached.store(true, Ordering::SeqCst);

        let attached = Arc::clone(&self.attached);
        thread::Builder::new()
            .name("nico-button".into())
            .spawn(move || read_gestures(source, &handlers, &attached))
            .map_err(HardwareError::Thread)?;
        info!("Console button: <Enter> or 'p' = press, 'h' = hold");
        Ok(())
    }

    /// Stop dispatching. The reader thread stays blocked on its source
    /// until the next line or EOF, then exits.
    fn detach(&mut self) {
        self.attached.store(false, Ordering::SeqCst);
    }

    /// Gestures are whole lines, so a delivered press is always real.
    fn is_asserted(&self) -> bool {
        true
    }

    fn close(&mut self) -> Result<(), HardwareError> {
        self.detach();
        Ok(())
    }
}

fn read_gestures(source: LineSource, handlers: &ButtonHandlers, attached: &AtomicBool) {
    for line in source.lines() {
        if !attached.load(Ordering::SeqCst) {
            break;
        }
        match line {
            Ok(line) => match line.trim() {
                "" | "p" => handlers.dispatch_press(),
                "h" => handlers.dispatch_hold(),
                other => warn!("Unknown console gesture {other:?}"),
            },
            Err(e) => {
                warn!("Console input failed: {e}");
                break;
            }
        }
    }
    debug!("Console button reader exiting");
}

/// LED that logs state changes.
#[derive(Debug, Default)]
pub struct ConsoleLed {
    on: bool,
}

impl Indicator for ConsoleLed {
    fn set(&mut self, on: bool) -> Result<(), HardwareError> {
        if self.on != on {
            self.on = on;
            info!("LED {}", if on { "on" } else { "off" });
        }
        Ok(())
    }

    fn close(&mut self) -> Result<(), HardwareError> {
        self.set(false)
    }
}
