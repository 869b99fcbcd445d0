#![deny(unsafe_code)]

//! Configuration loading and validation for gpiod.
//!
//! Loads TOML configuration files and validates them. [`AppConfig`] is the
//! central configuration structure shared by the pipe daemon, the HTTP
//! facade, and the CLI client commands. Every field has a default, so an
//! empty file (or no file at all) yields a working configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Errors that can occur during configuration loading and validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("validation error: {0}")]
    Validation(String),
}

/// Hardware backends accepted by `hardware.backend`.
pub const HARDWARE_BACKENDS: [&str; 2] = ["noop", "memory"];

/// Upper bound for `pipes.max_message_bytes`; the daemon allocates a read
/// buffer of that size up front.
pub const MAX_MESSAGE_BYTES_LIMIT: usize = 1024 * 1024;

/// Top-level application configuration.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Named pipe channels and dispatch loop tuning.
    #[serde(default)]
    pub pipes: PipeConfig,

    /// HTTP facade listener.
    #[serde(default)]
    pub http: HttpConfig,

    /// Hardware backend and pin assignments.
    #[serde(default)]
    pub hardware: HardwareConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Configuration for the inbound/outbound FIFO pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipeConfig {
    /// FIFO the daemon reads commands from.
    #[serde(default = "default_inbound_path")]
    pub inbound_path: PathBuf,

    /// FIFO the daemon writes results to.
    #[serde(default = "default_outbound_path")]
    pub outbound_path: PathBuf,

    /// Lock file guarding against two daemons sharing one channel pair.
    #[serde(default = "default_lock_path")]
    pub lock_path: PathBuf,

    /// Permission bits for FIFOs the daemon creates (e.g. `0o660`).
    #[serde(default = "default_fifo_mode")]
    pub mode: u32,

    /// Upper bound of one readiness wait on the inbound channel.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Largest accepted command, in bytes. Also the size of a single read.
    #[serde(default = "default_max_message_bytes")]
    pub max_message_bytes: usize,

    /// First backoff delay while waiting for an outbound reader.
    #[serde(default = "default_open_retry_initial_ms")]
    pub open_retry_initial_ms: u64,

    /// Backoff ceiling while waiting for an outbound reader.
    #[serde(default = "default_open_retry_max_ms")]
    pub open_retry_max_ms: u64,

    /// Maximum outbound open attempts (0 = keep trying until a reader appears).
    #[serde(default)]
    pub open_retry_attempts: u32,
}

impl Default for PipeConfig {
    fn default() -> Self {
        Self {
            inbound_path: default_inbound_path(),
            outbound_path: default_outbound_path(),
            lock_path: default_lock_path(),
            mode: default_fifo_mode(),
            poll_interval_ms: default_poll_interval_ms(),
            max_message_bytes: default_max_message_bytes(),
            open_retry_initial_ms: default_open_retry_initial_ms(),
            open_retry_max_ms: default_open_retry_max_ms(),
            open_retry_attempts: 0,
        }
    }
}

impl PipeConfig {
    /// The readiness wait bound as a [`Duration`].
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn open_retry_initial(&self) -> Duration {
        Duration::from_millis(self.open_retry_initial_ms)
    }

    pub fn open_retry_max(&self) -> Duration {
        Duration::from_millis(self.open_retry_max_ms)
    }
}

fn default_inbound_path() -> PathBuf {
    PathBuf::from("/tmp/gpio_driver_input")
}

fn default_outbound_path() -> PathBuf {
    PathBuf::from("/tmp/gpio_driver_output")
}

fn default_lock_path() -> PathBuf {
    PathBuf::from("/tmp/gpio_driver.lock")
}

fn default_fifo_mode() -> u32 {
    0o660
}

fn default_poll_interval_ms() -> u64 {
    100
}

fn default_max_message_bytes() -> usize {
    20 * 1024
}

fn default_open_retry_initial_ms() -> u64 {
    50
}

fn default_open_retry_max_ms() -> u64 {
    1000
}

/// Configuration for the HTTP facade.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Address the facade binds to.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// Port the facade binds to.
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            listen_port: default_listen_port(),
        }
    }
}

fn default_listen_addr() -> String {
    "127.0.0.1".to_string()
}

fn default_listen_port() -> u16 {
    8080
}

/// Hardware backend selection and the board's pin assignments.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HardwareConfig {
    /// Backend: "noop" (no board attached) or "memory" (simulated board).
    #[serde(default = "default_hardware_backend")]
    pub backend: String,

    /// Number of inputs, outputs and relays on the simulated board.
    #[serde(default = "default_pin_count")]
    pub pin_count: u16,

    /// Input wired to the door switch.
    #[serde(default)]
    pub door_switch_input: u8,

    /// Relay wired to the door remote.
    #[serde(default)]
    pub door_remote_relay: u8,

    /// Relay wired to the light.
    #[serde(default = "default_light_relay")]
    pub light_relay: u8,
}

impl Default for HardwareConfig {
    fn default() -> Self {
        Self {
            backend: default_hardware_backend(),
            pin_count: default_pin_count(),
            door_switch_input: 0,
            door_remote_relay: 0,
            light_relay: default_light_relay(),
        }
    }
}

fn default_hardware_backend() -> String {
    "noop".to_string()
}

fn default_pin_count() -> u16 {
    8
}

fn default_light_relay() -> u8 {
    1
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g. "info", "debug", "trace").
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl AppConfig {
    /// Load configuration from a TOML file at the given path using async I/O.
    pub async fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = tokio::fs::read_to_string(path).await?;
        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(s: &str) -> Result<Self, ConfigError> {
        let config: AppConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.validate_pipes()?;

        if self.http.listen_port == 0 {
            return Err(ConfigError::Validation(
                "http.listen_port must be non-zero".to_string(),
            ));
        }
        if self.http.listen_addr.is_empty() {
            return Err(ConfigError::Validation(
                "http.listen_addr must not be empty".to_string(),
            ));
        }

        self.validate_hardware()
    }

    fn validate_pipes(&self) -> Result<(), ConfigError> {
        let pipes = &self.pipes;
        let paths = [
            ("pipes.inbound_path", &pipes.inbound_path),
            ("pipes.outbound_path", &pipes.outbound_path),
            ("pipes.lock_path", &pipes.lock_path),
        ];
        for (name, path) in paths {
            if path.as_os_str().is_empty() {
                return Err(ConfigError::Validation(format!("{name} must not be empty")));
            }
        }
        if pipes.inbound_path == pipes.outbound_path
            || pipes.inbound_path == pipes.lock_path
            || pipes.outbound_path == pipes.lock_path
        {
            return Err(ConfigError::Validation(
                "pipes.inbound_path, pipes.outbound_path and pipes.lock_path must be distinct"
                    .to_string(),
            ));
        }
        if pipes.mode & !0o777 != 0 {
            return Err(ConfigError::Validation(format!(
                "pipes.mode must only contain permission bits (0o777), got {:#o}",
                pipes.mode
            )));
        }
        if pipes.poll_interval_ms == 0 {
            return Err(ConfigError::Validation(
                "pipes.poll_interval_ms must be non-zero".to_string(),
            ));
        }
        if pipes.max_message_bytes == 0 || pipes.max_message_bytes > MAX_MESSAGE_BYTES_LIMIT {
            return Err(ConfigError::Validation(format!(
                "pipes.max_message_bytes must be in 1..={MAX_MESSAGE_BYTES_LIMIT}, got {}",
                pipes.max_message_bytes
            )));
        }
        if pipes.open_retry_initial_ms == 0 {
            return Err(ConfigError::Validation(
                "pipes.open_retry_initial_ms must be non-zero".to_string(),
            ));
        }
        if pipes.open_retry_initial_ms > pipes.open_retry_max_ms {
            return Err(ConfigError::Validation(format!(
                "pipes.open_retry_initial_ms ({}) must not exceed pipes.open_retry_max_ms ({})",
                pipes.open_retry_initial_ms, pipes.open_retry_max_ms
            )));
        }
        Ok(())
    }

    fn validate_hardware(&self) -> Result<(), ConfigError> {
        let hw = &self.hardware;
        if !HARDWARE_BACKENDS.contains(&hw.backend.as_str()) {
            return Err(ConfigError::Validation(format!(
                "hardware.backend must be one of {:?}, got {:?}",
                HARDWARE_BACKENDS, hw.backend
            )));
        }
        if hw.pin_count == 0 || hw.pin_count > 256 {
            return Err(ConfigError::Validation(format!(
                "hardware.pin_count must be in 1..=256, got {}",
                hw.pin_count
            )));
        }
        let pins = [
            ("hardware.door_switch_input", hw.door_switch_input),
            ("hardware.door_remote_relay", hw.door_remote_relay),
            ("hardware.light_relay", hw.light_relay),
        ];
        for (name, pin) in pins {
            if u16::from(pin) >= hw.pin_count {
                return Err(ConfigError::Validation(format!(
                    "{name} ({pin}) must be below hardware.pin_count ({})",
                    hw.pin_count
                )));
            }
        }
        Ok(())
    }
}
