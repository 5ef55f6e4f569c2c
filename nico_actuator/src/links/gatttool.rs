//! BlueZ `gatttool` link.
//!
//! Keeps one interactive `gatttool -b <addr> -I` session per connection.
//! Commands are written with `char-write-req <handle> <hex>` and
//! acknowledged by the tool's "written successfully" line. A reader
//! thread forwards stdout lines into a channel so every wait is bounded.

use crate::link::{ActuatorLink, LinkError, LinkSettings};
use crossbeam_channel::{Receiver, RecvTimeoutError, unbounded};
use std::io::{BufRead, BufReader, Write};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

const GATTTOOL: &str = "gatttool";
const CONNECTED_MARKER: &str = "Connection successful";
const WRITTEN_MARKER: &str = "written successfully";

/// Live interactive session.
struct Session {
    child: Child,
    stdin: ChildStdin,
    lines: Receiver<String>,
}

/// `gatttool`-backed [`ActuatorLink`].
pub struct GattToolLink {
    settings: LinkSettings,
    session: Option<Session>,
    connected: bool,
}

impl GattToolLink {
    /// Create a disconnected link.
    pub fn new(settings: LinkSettings) -> Self {
        Self {
            settings,
            session: None,
            connected: false,
        }
    }

    fn spawn_session(&self) -> Result<Session, LinkError> {
        let mut child = Command::new(GATTTOOL)
            .arg("-b")
            .arg(&self.settings.address)
            .arg("-I")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| LinkError::ConnectFailed(format!("cannot launch {GATTTOOL}: {e}")))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| LinkError::Io("gatttool stdin unavailable".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| LinkError::Io("gatttool stdout unavailable".into()))?;

        let (tx, lines) = unbounded();
        thread::Builder::new()
            .name("nico-gatttool".into())
            .spawn(move || {
                for line in BufReader::new(stdout).lines() {
                    let Ok(line) = line else { break };
                    if tx.send(line).is_err() {
                        break;
                    }
                }
            })?;

        Ok(Session { child, stdin, lines })
    }

    fn send_line(&mut self, line: &str) -> Result<(), LinkError> {
        let session = self.session.as_mut().ok_or(LinkError::NotConnected)?;
        writeln!(session.stdin, "{line}")?;
        session.stdin.flush()?;
        Ok(())
    }

    /// Wait for a line containing `marker`. Error lines and EOF fail early.
    fn await_marker(&self, marker: &str, timeout: Duration) -> Result<(), String> {
        let session = self.session.as_ref().ok_or("no session")?;
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match session.lines.recv_timeout(remaining) {
                Ok(line) => {
                    debug!("gatttool: {line}");
                    if line.contains(marker) {
                        return Ok(());
                    }
                    if line.contains("Error") || line.contains("error") {
                        return Err(strip_ansi(&line));
                    }
                }
                Err(RecvTimeoutError::Timeout) => {
                    return Err(format!("no {marker:?} within {timeout:?}"));
                }
                Err(RecvTimeoutError::Disconnected) => return Err("gatttool exited".into()),
            }
        }
    }
}

impl ActuatorLink for GattToolLink {
    fn name(&self) -> &'static str {
        "gatttool"
    }

    fn is_connected(&self) -> bool {
        self.connected && self.session.is_some()
    }

    fn connect(&mut self) -> Result<(), LinkError> {
        self.disconnect();
        debug!("Connecting to {}", self.settings.address);

        self.session = Some(self.spawn_session()?);
        self.send_line("connect")?;
        if let Err(reason) = self.await_marker(CONNECTED_MARKER, self.settings.connect_timeout) {
            self.disconnect();
            return Err(LinkError::ConnectFailed(reason));
        }
        self.connected = true;
        Ok(())
    }

    fn write(&mut self, payload: &[u8]) -> Result<(), LinkError> {
        if !self.is_connected() {
            return Err(LinkError::NotConnected);
        }
        let request = format!(
            "char-write-req 0x{:04x} {}",
            self.settings.characteristic_handle,
            to_hex(payload)
        );
        self.send_line(&request)?;
        self.await_marker(WRITTEN_MARKER, self.settings.connect_timeout)
            .map_err(|reason| {
                self.connected = false;
                LinkError::WriteFailed(reason)
            })
    }

    fn disconnect(&mut self) {
        self.connected = false;
        let Some(mut session) = self.session.take() else {
            return;
        };
        let _ = writeln!(session.stdin, "disconnect");
        let _ = writeln!(session.stdin, "exit");
        drop(session.stdin);
        if let Err(e) = session.child.kill() {
            // InvalidInput means it already exited.
            if e.kind() != std::io::ErrorKind::InvalidInput {
                warn!("Failed to kill gatttool: {e}");
            }
        }
        let _ = session.child.wait();
    }
}

impl Drop for GattToolLink {
    fn drop(&mut self) {
        self.disconnect();
    }
}

/// Factory registered as `"gatttool"`.
pub fn create_link(settings: &LinkSettings) -> Box<dyn ActuatorLink> {
    Box::new(GattToolLink::new(settings.clone()))
}

fn to_hex(payload: &[u8]) -> String {
    payload.iter().map(|b| format!("{b:02x}")).collect()
}

fn strip_ansi(line: &str) -> String {
    let mut out = String::with_capacity(line.len());
    let mut chars = line.chars();
    while let Some(c) = chars.next() {
        if c == '\u{1b}' {
            // Skip CSI sequence up to its final byte.
            for c in chars.by_ref() {
                if c.is_ascii_alphabetic() {
                    break;
                }
            }
        } else {
            out.push(c);
        }
    }
    out.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> LinkSettings {
        LinkSettings {
            address: "28:CD:C1:0A:1B:2C".into(),
            characteristic_handle: 0x10,
            connect_timeout: Duration::from_millis(100),
        }
    }

    #[test]
    fn hex_encodes_command_tokens() {
        assert_eq!(to_hex(b"STOP"), "53544f50");
        assert_eq!(to_hex(b""), "");
    }

    #[test]
    fn strips_prompt_colouring() {
        let raw = "\u{1b}[0m[28:CD:C1:0A:1B:2C][LE]> Error: connect error";
        assert_eq!(strip_ansi(raw), "[28:CD:C1:0A:1B:2C][LE]> Error: connect error");
    }

    #[test]
    fn fresh_link_is_disconnected() {
        let mut link = GattToolLink::new(settings());
        assert!(!link.is_connected());
        assert!(matches!(link.write(b"STOP"), Err(LinkError::NotConnected)));
        link.disconnect();
    }
}
