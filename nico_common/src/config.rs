//! Configuration loading traits and types.
//!
//! The orchestrator reads a single TOML file. Every section except
//! `[shared]`, `[compute]` and `[worker]` may be omitted and falls back to the
//! defaults in [`crate::consts`].
//!
//! # Usage
//!
//! ```rust,no_run
//! use nico_common::config::{ConfigError, NicoConfig};
//! use std::path::Path;
//!
//! fn main() -> Result<(), ConfigError> {
//!     let config = NicoConfig::load_validated(Path::new("nico.toml"))?;
//!     println!("Service: {}", config.shared.service_name);
//!     Ok(())
//! }
//! ```

use crate::consts::*;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Error type for configuration loading operations.
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    /// Configuration file not found at specified path.
    #[error("Configuration file not found")]
    FileNotFound,

    /// TOML parsing failed.
    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    /// Semantic validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

/// Log level for application logging.
///
/// Uses lowercase serde values for TOML compatibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Most verbose, detailed tracing information.
    Trace,
    /// Debug information useful during development.
    Debug,
    /// General information about application operation.
    #[default]
    Info,
    /// Warning messages for potentially problematic situations.
    Warn,
    /// Error messages for serious problems.
    Error,
}

impl LogLevel {
    /// Directive string understood by `tracing_subscriber::EnvFilter`.
    pub const fn as_directive(self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

/// Common configuration fields.
///
/// # TOML Example
///
/// ```toml
/// [shared]
/// log_level = "debug"
/// service_name = "nico-livingroom"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SharedConfig {
    /// Logging verbosity level.
    #[serde(default)]
    pub log_level: LogLevel,

    /// Application instance identifier.
    pub service_name: String,
}

impl SharedConfig {
    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` if `service_name` is empty.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.service_name.is_empty() {
            return Err(ConfigError::ValidationError(
                "service_name cannot be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Trait for loading configuration from TOML files.
///
/// # Contract
///
/// - Returns `ConfigError::FileNotFound` if the file does not exist
/// - Returns `ConfigError::ParseError` if TOML syntax is invalid
pub trait ConfigLoader: Sized + serde::de::DeserializeOwned {
    /// Load configuration from a TOML file.
    fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ConfigError::FileNotFound
            } else {
                ConfigError::ParseError(e.to_string())
            }
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }
}

// Blanket implementation for all types that implement DeserializeOwned.
impl<T: serde::de::DeserializeOwned> ConfigLoader for T {}

// ─── Remote compute ─────────────────────────────────────────────────

/// Which backend drives the remote instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ComputeProviderKind {
    /// `aws ec2 ...` command line.
    #[default]
    AwsCli,
    /// In-memory instance for workstation runs.
    Simulation,
}

/// Whether teardown waits for the instance to report `stopped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StopPolicy {
    /// Issue the stop request and move on.
    #[default]
    FireAndForget,
    /// Wait (bounded) until the instance is `stopped`.
    Confirm,
}

/// `[compute]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ComputeConfig {
    #[serde(default)]
    pub provider: ComputeProviderKind,
    /// Provider instance identifier (e.g. `i-0123456789abcdef0`).
    #[serde(default)]
    pub instance_id: String,
    /// Provider region.
    #[serde(default)]
    pub region: String,
    /// Fixed host; falls back to the instance's public address.
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default = "default_ssh_port")]
    pub ssh_port: u16,
    #[serde(default = "default_ssh_timeout_secs")]
    pub ssh_timeout_secs: u64,
    #[serde(default = "default_ssh_poll_secs")]
    pub ssh_poll_secs: u64,
    #[serde(default = "default_ssh_attempt_timeout_secs")]
    pub ssh_attempt_timeout_secs: u64,
    #[serde(default = "default_stopped_poll_secs")]
    pub stopped_poll_secs: u64,
    #[serde(default)]
    pub stop_policy: StopPolicy,
    #[serde(default = "default_stop_confirm_timeout_secs")]
    pub stop_confirm_timeout_secs: u64,
}

impl ComputeConfig {
    pub fn ssh_timeout(&self) -> Duration {
        Duration::from_secs(self.ssh_timeout_secs)
    }

    pub fn ssh_poll(&self) -> Duration {
        Duration::from_secs(self.ssh_poll_secs)
    }

    pub fn ssh_attempt_timeout(&self) -> Duration {
        Duration::from_secs(self.ssh_attempt_timeout_secs)
    }

    pub fn stopped_poll(&self) -> Duration {
        Duration::from_secs(self.stopped_poll_secs)
    }

    pub fn stop_confirm_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_confirm_timeout_secs)
    }
}

// ─── Speech service ─────────────────────────────────────────────────

/// `[service]` section: readiness of the speech service on the instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServiceConfig {
    #[serde(default = "default_service_port")]
    pub port: u16,
    #[serde(default = "default_service_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_service_poll_secs")]
    pub poll_secs: u64,
    #[serde(default = "default_service_attempt_timeout_secs")]
    pub attempt_timeout_secs: u64,
    #[serde(default = "default_base_path")]
    pub base_path: String,
    #[serde(default = "default_ready_path")]
    pub ready_path: String,
}

impl ServiceConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn poll(&self) -> Duration {
        Duration::from_secs(self.poll_secs)
    }

    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_secs(self.attempt_timeout_secs)
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_SERVICE_PORT,
            timeout_secs: DEFAULT_SERVICE_TIMEOUT_SECS,
            poll_secs: DEFAULT_SERVICE_POLL_SECS,
            attempt_timeout_secs: DEFAULT_SERVICE_ATTEMPT_TIMEOUT_SECS,
            base_path: default_base_path(),
            ready_path: default_ready_path(),
        }
    }
}

// ─── Worker ─────────────────────────────────────────────────────────

/// `[worker]` section: the conversational child process.
///
/// The resolved host is appended as the last argument.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WorkerConfig {
    pub program: PathBuf,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default = "default_worker_ceiling_secs")]
    pub ceiling_secs: u64,
    #[serde(default = "default_terminate_grace_secs")]
    pub terminate_grace_secs: u64,
    #[serde(default = "default_worker_poll_ms")]
    pub poll_ms: u64,
}

impl WorkerConfig {
    pub fn ceiling(&self) -> Duration {
        Duration::from_secs(self.ceiling_secs)
    }

    pub fn terminate_grace(&self) -> Duration {
        Duration::from_secs(self.terminate_grace_secs)
    }

    pub fn poll(&self) -> Duration {
        Duration::from_millis(self.poll_ms)
    }
}

// ─── Actuator ───────────────────────────────────────────────────────

/// `[actuator]` section: motor controller link and relay tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ActuatorConfig {
    /// Registered link name (`gatttool`, `simulation`).
    #[serde(default = "default_link")]
    pub link: String,
    /// Peripheral address (e.g. `28:CD:C1:0A:1B:2C`).
    #[serde(default)]
    pub address: String,
    /// Attribute handle of the command characteristic.
    #[serde(default)]
    pub characteristic_handle: u16,
    #[serde(default = "default_link_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_backoff_initial_secs")]
    pub backoff_initial_secs: f64,
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,
    #[serde(default = "default_backoff_max_secs")]
    pub backoff_max_secs: f64,
    #[serde(default = "default_inlet_socket")]
    pub inlet_socket: PathBuf,
    #[serde(default = "default_drain_timeout_secs")]
    pub drain_timeout_secs: u64,
}

impl ActuatorConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.drain_timeout_secs)
    }
}

impl Default for ActuatorConfig {
    fn default() -> Self {
        Self {
            link: default_link(),
            address: String::new(),
            characteristic_handle: 0,
            connect_timeout_secs: DEFAULT_LINK_CONNECT_TIMEOUT_SECS,
            backoff_initial_secs: DEFAULT_BACKOFF_INITIAL_SECS,
            backoff_factor: DEFAULT_BACKOFF_FACTOR,
            backoff_max_secs: DEFAULT_BACKOFF_MAX_SECS,
            inlet_socket: default_inlet_socket(),
            drain_timeout_secs: DEFAULT_DRAIN_TIMEOUT_SECS,
        }
    }
}

// ─── Hardware ───────────────────────────────────────────────────────

/// Where button events come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum InputKind {
    /// Linux sysfs GPIO.
    #[default]
    Sysfs,
    /// Stdin lines (workstation runs).
    Console,
}

/// `[hardware]` section: button, LED and release policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HardwareConfig {
    #[serde(default)]
    pub input: InputKind,
    #[serde(default = "default_button_pin")]
    pub button_pin: u32,
    #[serde(default = "default_led_pin")]
    pub led_pin: u32,
    /// Button pulls the line low when pressed (pull-up wiring).
    #[serde(default = "default_true")]
    pub active_low: bool,
    #[serde(default = "default_bounce_ms")]
    pub bounce_ms: u64,
    #[serde(default = "default_true")]
    pub hold_enabled: bool,
    #[serde(default = "default_hold_secs")]
    pub hold_secs: u64,
    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,
    #[serde(default = "default_gpio_chip")]
    pub gpio_chip: PathBuf,
    #[serde(default = "default_true")]
    pub forced_release: bool,
    /// systemd unit stopped by the forced release path.
    #[serde(default = "default_gpio_service")]
    pub gpio_service: Option<String>,
    /// Daemon killed by the forced release path.
    #[serde(default = "default_gpio_daemon")]
    pub gpio_daemon: Option<String>,
}

impl HardwareConfig {
    pub fn bounce(&self) -> Duration {
        Duration::from_millis(self.bounce_ms)
    }

    /// Hold threshold, `None` when the gesture is disabled.
    pub fn hold(&self) -> Option<Duration> {
        self.hold_enabled.then(|| Duration::from_secs(self.hold_secs))
    }

    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }
}

impl Default for HardwareConfig {
    fn default() -> Self {
        Self {
            input: InputKind::default(),
            button_pin: DEFAULT_BUTTON_PIN,
            led_pin: DEFAULT_LED_PIN,
            active_low: true,
            bounce_ms: DEFAULT_BOUNCE_MS,
            hold_enabled: true,
            hold_secs: DEFAULT_HOLD_SECS,
            settle_ms: DEFAULT_SETTLE_MS,
            gpio_chip: default_gpio_chip(),
            forced_release: true,
            gpio_service: default_gpio_service(),
            gpio_daemon: default_gpio_daemon(),
        }
    }
}

// ─── Feedback / shutdown ────────────────────────────────────────────

/// `[feedback]` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FeedbackConfig {
    /// WAV prompt played once before the button is armed.
    #[serde(default)]
    pub prompt_audio: Option<PathBuf>,
}

/// `[shutdown]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ShutdownConfig {
    /// Skip the host power-down step.
    #[serde(default)]
    pub dev_mode: bool,
    /// Append-only teardown journal.
    #[serde(default)]
    pub journal_path: Option<PathBuf>,
    #[serde(default = "default_power_off_command")]
    pub power_off_command: Vec<String>,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            dev_mode: false,
            journal_path: None,
            power_off_command: default_power_off_command(),
        }
    }
}

// ─── Top level ──────────────────────────────────────────────────────

/// Complete orchestrator configuration.
///
/// # TOML Example
///
/// ```toml
/// [shared]
/// service_name = "nico"
///
/// [compute]
/// instance_id = "i-0123456789abcdef0"
/// region = "ap-northeast-1"
/// host = "203.0.113.10"
///
/// [worker]
/// program = "/opt/nico/venv/bin/python"
/// args = ["/opt/nico/assistant.py"]
///
/// [actuator]
/// address = "28:CD:C1:0A:1B:2C"
/// characteristic_handle = 0x0010
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NicoConfig {
    pub shared: SharedConfig,
    pub compute: ComputeConfig,
    #[serde(default)]
    pub service: ServiceConfig,
    pub worker: WorkerConfig,
    #[serde(default)]
    pub actuator: ActuatorConfig,
    #[serde(default)]
    pub hardware: HardwareConfig,
    #[serde(default)]
    pub feedback: FeedbackConfig,
    #[serde(default)]
    pub shutdown: ShutdownConfig,
}

impl NicoConfig {
    /// Load and validate a configuration file.
    pub fn load_validated(path: &Path) -> Result<Self, ConfigError> {
        let config = Self::load(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Semantic validation across sections.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.shared.validate()?;

        if self.compute.provider == ComputeProviderKind::AwsCli
            && self.compute.instance_id.trim().is_empty()
        {
            return Err(invalid("compute.instance_id cannot be empty for the aws-cli provider"));
        }
        if self.compute.ssh_poll_secs == 0 || self.service.poll_secs == 0 {
            return Err(invalid("poll intervals must be greater than zero"));
        }
        if self.worker.program.as_os_str().is_empty() {
            return Err(invalid("worker.program cannot be empty"));
        }
        if self.worker.ceiling_secs == 0 {
            return Err(invalid("worker.ceiling_secs must be greater than zero"));
        }

        self.validate_durations()?;

        let a = &self.actuator;
        for (name, value) in [
            ("actuator.backoff_initial_secs", a.backoff_initial_secs),
            ("actuator.backoff_max_secs", a.backoff_max_secs),
        ] {
            if !(value.is_finite() && value > 0.0 && value <= MAX_DURATION_SECS as f64) {
                return Err(ConfigError::ValidationError(format!(
                    "{name} must be in (0, {MAX_DURATION_SECS}]"
                )));
            }
        }
        if !(a.backoff_factor >= 1.0 && a.backoff_factor <= MAX_BACKOFF_FACTOR) {
            return Err(ConfigError::ValidationError(format!(
                "actuator.backoff_factor must be in [1.0, {MAX_BACKOFF_FACTOR}]"
            )));
        }
        if a.backoff_initial_secs > a.backoff_max_secs {
            return Err(invalid(
                "actuator.backoff_initial_secs cannot exceed backoff_max_secs",
            ));
        }

        if self.shutdown.power_off_command.is_empty() {
            return Err(invalid("shutdown.power_off_command cannot be empty"));
        }
        Ok(())
    }

    /// Every timeout and interval must fit in [`MAX_DURATION_SECS`].
    fn validate_durations(&self) -> Result<(), ConfigError> {
        let (c, s, w, a, h) = (
            &self.compute,
            &self.service,
            &self.worker,
            &self.actuator,
            &self.hardware,
        );
        let secs = [
            ("compute.ssh_timeout_secs", c.ssh_timeout_secs),
            ("compute.ssh_poll_secs", c.ssh_poll_secs),
            ("compute.ssh_attempt_timeout_secs", c.ssh_attempt_timeout_secs),
            ("compute.stopped_poll_secs", c.stopped_poll_secs),
            ("compute.stop_confirm_timeout_secs", c.stop_confirm_timeout_secs),
            ("service.timeout_secs", s.timeout_secs),
            ("service.poll_secs", s.poll_secs),
            ("service.attempt_timeout_secs", s.attempt_timeout_secs),
            ("worker.ceiling_secs", w.ceiling_secs),
            ("worker.terminate_grace_secs", w.terminate_grace_secs),
            ("actuator.connect_timeout_secs", a.connect_timeout_secs),
            ("actuator.drain_timeout_secs", a.drain_timeout_secs),
            ("hardware.hold_secs", h.hold_secs),
        ];
        let millis = [
            ("worker.poll_ms", w.poll_ms),
            ("hardware.bounce_ms", h.bounce_ms),
            ("hardware.settle_ms", h.settle_ms),
        ];
        let too_long = secs
            .into_iter()
            .find(|(_, v)| *v > MAX_DURATION_SECS)
            .or_else(|| {
                millis
                    .into_iter()
                    .find(|(_, v)| *v > MAX_DURATION_SECS * 1000)
            });
        match too_long {
            Some((name, value)) => Err(ConfigError::ValidationError(format!(
                "{name} = {value} exceeds {MAX_DURATION_SECS}s"
            ))),
            None => Ok(()),
        }
    }

    /// Effective dev mode: `NICO_DEV_MODE` wins over the config file.
    pub fn dev_mode(&self) -> bool {
        resolve_dev_mode(
            self.shutdown.dev_mode,
            std::env::var(DEV_MODE_ENV).ok().as_deref(),
        )
    }
}

/// Combine the configured dev-mode flag with an environment override.
///
/// Unrecognised override values are ignored.
pub fn resolve_dev_mode(configured: bool, env_value: Option<&str>) -> bool {
    match env_value.map(|v| v.trim().to_ascii_lowercase()) {
        Some(v) if matches!(v.as_str(), "1" | "true" | "yes" | "on") => true,
        Some(v) if matches!(v.as_str(), "0" | "false" | "no" | "off") => false,
        Some(other) => {
            tracing::warn!("Ignoring unrecognised {DEV_MODE_ENV}={other:?}");
            configured
        }
        None => configured,
    }
}

fn invalid(msg: &str) -> ConfigError {
    ConfigError::ValidationError(msg.to_string())
}

// ─── serde defaults ─────────────────────────────────────────────────

fn default_true() -> bool {
    true
}
fn default_ssh_port() -> u16 {
    DEFAULT_SSH_PORT
}
fn default_ssh_timeout_secs() -> u64 {
    DEFAULT_SSH_TIMEOUT_SECS
}
fn default_ssh_poll_secs() -> u64 {
    DEFAULT_SSH_POLL_SECS
}
fn default_ssh_attempt_timeout_secs() -> u64 {
    DEFAULT_SSH_ATTEMPT_TIMEOUT_SECS
}
fn default_stopped_poll_secs() -> u64 {
    DEFAULT_STOPPED_POLL_SECS
}
fn default_stop_confirm_timeout_secs() -> u64 {
    DEFAULT_STOP_CONFIRM_TIMEOUT_SECS
}
fn default_service_port() -> u16 {
    DEFAULT_SERVICE_PORT
}
fn default_service_timeout_secs() -> u64 {
    DEFAULT_SERVICE_TIMEOUT_SECS
}
fn default_service_poll_secs() -> u64 {
    DEFAULT_SERVICE_POLL_SECS
}
fn default_service_attempt_timeout_secs() -> u64 {
    DEFAULT_SERVICE_ATTEMPT_TIMEOUT_SECS
}
fn default_base_path() -> String {
    "/".to_string()
}
fn default_ready_path() -> String {
    "/speakers".to_string()
}
fn default_worker_ceiling_secs() -> u64 {
    DEFAULT_WORKER_CEILING_SECS
}
fn default_terminate_grace_secs() -> u64 {
    DEFAULT_TERMINATE_GRACE_SECS
}
fn default_worker_poll_ms() -> u64 {
    DEFAULT_WORKER_POLL_MS
}
fn default_link() -> String {
    "gatttool".to_string()
}
fn default_link_connect_timeout_secs() -> u64 {
    DEFAULT_LINK_CONNECT_TIMEOUT_SECS
}
fn default_backoff_initial_secs() -> f64 {
    DEFAULT_BACKOFF_INITIAL_SECS
}
fn default_backoff_factor() -> f64 {
    DEFAULT_BACKOFF_FACTOR
}
fn default_backoff_max_secs() -> f64 {
    DEFAULT_BACKOFF_MAX_SECS
}
fn default_inlet_socket() -> PathBuf {
    PathBuf::from(DEFAULT_INLET_SOCKET)
}
fn default_drain_timeout_secs() -> u64 {
    DEFAULT_DRAIN_TIMEOUT_SECS
}
fn default_button_pin() -> u32 {
    DEFAULT_BUTTON_PIN
}
fn default_led_pin() -> u32 {
    DEFAULT_LED_PIN
}
fn default_bounce_ms() -> u64 {
    DEFAULT_BOUNCE_MS
}
fn default_hold_secs() -> u64 {
    DEFAULT_HOLD_SECS
}
fn default_settle_ms() -> u64 {
    DEFAULT_SETTLE_MS
}
fn default_gpio_chip() -> PathBuf {
    PathBuf::from(DEFAULT_GPIO_CHIP)
}
fn default_gpio_service() -> Option<String> {
    Some("lgpio".to_string())
}
fn default_gpio_daemon() -> Option<String> {
    Some("lgpiod".to_string())
}
fn default_power_off_command() -> Vec<String> {
    ["sudo", "shutdown", "-h", "now"].map(String::from).to_vec()
}
