//! System-wide constants for the nico workspace.
//!
//! Single source of truth for default timings, ports and paths.
//! Config sections fall back to these values.

/// Upper bound for any configured duration (one day).
pub const MAX_DURATION_SECS: u64 = 86_400;

/// Upper bound for the reconnect delay growth factor.
pub const MAX_BACKOFF_FACTOR: f64 = 10.0;

/// Default configuration file path.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/nico/nico.toml";

/// Environment variable overriding `[shutdown].dev_mode`.
pub const DEV_MODE_ENV: &str = "NICO_DEV_MODE";

// ─── Remote compute ─────────────────────────────────────────────────

/// TCP port checked once the instance reports `running` (SSH).
pub const DEFAULT_SSH_PORT: u16 = 22;

/// Overall SSH reachability timeout in seconds.
pub const DEFAULT_SSH_TIMEOUT_SECS: u64 = 60;

/// Interval between SSH reachability attempts in seconds.
pub const DEFAULT_SSH_POLL_SECS: u64 = 2;

/// Per-attempt TCP connect timeout in seconds.
pub const DEFAULT_SSH_ATTEMPT_TIMEOUT_SECS: u64 = 5;

/// Poll interval while waiting for a `stopping` instance to reach `stopped`.
pub const DEFAULT_STOPPED_POLL_SECS: u64 = 5;

/// Upper bound for the `confirm` stop policy.
pub const DEFAULT_STOP_CONFIRM_TIMEOUT_SECS: u64 = 120;

// ─── Speech service readiness ───────────────────────────────────────

/// Speech service HTTP port.
pub const DEFAULT_SERVICE_PORT: u16 = 50021;

/// Overall service readiness timeout in seconds.
pub const DEFAULT_SERVICE_TIMEOUT_SECS: u64 = 60;

/// Interval between service readiness attempts in seconds.
pub const DEFAULT_SERVICE_POLL_SECS: u64 = 2;

/// Per-request timeout for service checks in seconds.
pub const DEFAULT_SERVICE_ATTEMPT_TIMEOUT_SECS: u64 = 3;

// ─── Worker supervision ─────────────────────────────────────────────

/// Wall-clock ceiling for the conversational worker (15 minutes).
pub const DEFAULT_WORKER_CEILING_SECS: u64 = 900;

/// Grace period between SIGTERM and SIGKILL.
pub const DEFAULT_TERMINATE_GRACE_SECS: u64 = 5;

/// Child exit poll interval in milliseconds.
pub const DEFAULT_WORKER_POLL_MS: u64 = 100;

// ─── Actuator relay ─────────────────────────────────────────────────

/// First reconnect delay in seconds.
pub const DEFAULT_BACKOFF_INITIAL_SECS: f64 = 0.3;

/// Reconnect delay growth factor.
pub const DEFAULT_BACKOFF_FACTOR: f64 = 1.5;

/// Reconnect delay cap in seconds.
pub const DEFAULT_BACKOFF_MAX_SECS: f64 = 3.0;

/// Per-attempt peripheral connect timeout in seconds.
pub const DEFAULT_LINK_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Default local socket used by producers to reach the relay.
pub const DEFAULT_INLET_SOCKET: &str = "/run/nico/actuator.sock";

/// Environment variable telling the worker where the inlet socket is.
pub const ACTUATOR_SOCKET_ENV: &str = "NICO_ACTUATOR_SOCKET";

/// How long teardown waits for queued commands to drain.
pub const DEFAULT_DRAIN_TIMEOUT_SECS: u64 = 3;

// ─── Hardware ───────────────────────────────────────────────────────

/// BCM pin of the session button.
pub const DEFAULT_BUTTON_PIN: u32 = 17;

/// BCM pin of the status LED.
pub const DEFAULT_LED_PIN: u32 = 18;

/// Button debounce window in milliseconds.
pub const DEFAULT_BOUNCE_MS: u64 = 300;

/// Press-and-hold threshold in seconds.
pub const DEFAULT_HOLD_SECS: u64 = 3;

/// Pause between detaching callbacks and closing inputs.
pub const DEFAULT_SETTLE_MS: u64 = 500;

/// GPIO character device checked by the forced release path.
pub const DEFAULT_GPIO_CHIP: &str = "/dev/gpiochip0";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_defaults_are_consistent() {
        assert!(DEFAULT_BACKOFF_INITIAL_SECS > 0.0);
        assert!(DEFAULT_BACKOFF_FACTOR >= 1.0);
        assert!(DEFAULT_BACKOFF_INITIAL_SECS <= DEFAULT_BACKOFF_MAX_SECS);
        assert!(DEFAULT_BACKOFF_FACTOR <= MAX_BACKOFF_FACTOR);
        assert!(DEFAULT_BACKOFF_MAX_SECS <= MAX_DURATION_SECS as f64);
    }

    #[test]
    fn readiness_timeouts_exceed_poll_intervals() {
        assert!(DEFAULT_SSH_TIMEOUT_SECS > DEFAULT_SSH_POLL_SECS);
        assert!(DEFAULT_SERVICE_TIMEOUT_SECS > DEFAULT_SERVICE_POLL_SECS);
        assert!(DEFAULT_WORKER_CEILING_SECS > DEFAULT_TERMINATE_GRACE_SECS);
    }
}
