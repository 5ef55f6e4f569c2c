//! Exactly-once guard, teardown journal and host power-down.

use chrono::Local;
use nico_common::session::{SessionState, ShutdownTrigger};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{info, warn};

/// Lets the teardown body run at most once per process.
#[derive(Debug, Default)]
pub struct ShutdownGuard {
    begun: AtomicBool,
}

impl ShutdownGuard {
    pub const fn new() -> Self {
        Self {
            begun: AtomicBool::new(false),
        }
    }

    /// `true` for exactly one caller; every later or concurrent caller
    /// gets `false`.
    pub fn try_begin(&self) -> bool {
        self.begun
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn is_begun(&self) -> bool {
        self.begun.load(Ordering::Acquire)
    }
}

/// Append-only record of teardowns. Disabled when no path is set.
#[derive(Debug, Clone, Default)]
pub struct Journal {
    path: Option<PathBuf>,
}

impl Journal {
    pub fn new(path: Option<&Path>) -> Self {
        Self {
            path: path.map(Path::to_path_buf),
        }
    }

    /// Teardown started.
    pub fn record_start(&self, trigger: &ShutdownTrigger, state: SessionState) {
        self.append(&format!("shutdown begin trigger=\"{trigger}\" state={state}"));
    }

    /// Teardown finished, host about to power down (or not).
    pub fn record_finish(&self, power_off: bool) {
        self.append(&format!("shutdown complete power_off={power_off}"));
    }

    fn append(&self, message: &str) {
        let Some(path) = &self.path else { return };
        let line = format!("{} {message}\n", Local::now().to_rfc3339());
        let result = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .and_then(|mut f| f.write_all(line.as_bytes()));
        if let Err(e) = result {
            warn!("Failed to write journal {}: {e}", path.display());
        }
    }
}

/// Final host power-down, suppressed in dev mode.
#[derive(Debug, Clone)]
pub struct PowerOff {
    command: Vec<String>,
    dev_mode: bool,
}

impl PowerOff {
    pub fn new(command: Vec<String>, dev_mode: bool) -> Self {
        Self { command, dev_mode }
    }

    pub fn is_enabled(&self) -> bool {
        !self.dev_mode
    }

    /// Run the power-off command. Never fails.
    pub fn execute(&self) {
        if self.dev_mode {
            info!("Dev mode: skipping host power-off");
            return;
        }
        let Some((program, args)) = self.command.split_first() else {
            warn!("No power-off command configured");
            return;
        };
        info!("Powering off host: {}", self.command.join(" "));
        match Command::new(program).args(args).status() {
            Ok(status) if status.success() => {}
            Ok(status) => warn!("Power-off command exited with {status}"),
            Err(e) => warn!("Failed to run power-off command: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn guard_admits_one_of_many() {
        let guard = Arc::new(ShutdownGuard::new());
        let winners = Arc::new(AtomicUsize::new(0));
        let threads: Vec<_> = (0..8)
            .map(|_| {
                let guard = Arc::clone(&guard);
                let winners = Arc::clone(&winners);
                std::thread::spawn(move || {
                    if guard.try_begin() {
                        winners.fetch_add(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }
        assert_eq!(winners.load(Ordering::SeqCst), 1);
        assert!(guard.is_begun());
    }

    #[test]
    fn journal_appends_timestamped_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shutdown.log");
        let journal = Journal::new(Some(path.as_path()));
        journal.record_start(&ShutdownTrigger::Hold, SessionState::Talking);
        journal.record_finish(false);

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with("shutdown begin trigger=\"button hold\" state=TALKING"));
        assert!(lines[1].ends_with("power_off=false"));
        // RFC 3339 timestamp prefix.
        assert!(lines[0].split(' ').next().unwrap().contains('T'));
    }

    #[test]
    fn dev_mode_skips_power_off() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("powered-off");
        let cmd = vec!["touch".to_string(), marker.display().to_string()];

        PowerOff::new(cmd.clone(), true).execute();
        assert!(!marker.exists());

        PowerOff::new(cmd, false).execute();
        assert!(marker.exists());
    }
}
