//! Configuration builders for tests.

use std::path::Path;

use gpiod_config::{AppConfig, PipeConfig};

/// Fluent builder for [`AppConfig`] in tests.
///
/// ```ignore
/// let config = TestConfigBuilder::new()
///     .pipes_in(tmp.path())
///     .open_retry_attempts(3)
///     .build();
/// ```
pub struct TestConfigBuilder {
    config: AppConfig,
}

impl TestConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: AppConfig::default(),
        }
    }

    /// Put both FIFOs and the lock file under `dir`, with short poll and
    /// retry intervals.
    pub fn pipes_in(mut self, dir: &Path) -> Self {
        self.config.pipes = PipeConfig {
            inbound_path: dir.join("gpio_in"),
            outbound_path: dir.join("gpio_out"),
            lock_path: dir.join("gpiod.lock"),
            poll_interval_ms: 10,
            open_retry_initial_ms: 5,
            open_retry_max_ms: 40,
            ..self.config.pipes
        };
        self
    }

    pub fn poll_interval_ms(mut self, ms: u64) -> Self {
        self.config.pipes.poll_interval_ms = ms;
        self
    }

    pub fn max_message_bytes(mut self, bytes: usize) -> Self {
        self.config.pipes.max_message_bytes = bytes;
        self
    }

    pub fn open_retry_attempts(mut self, attempts: u32) -> Self {
        self.config.pipes.open_retry_attempts = attempts;
        self
    }

    pub fn hardware_backend(mut self, backend: &str) -> Self {
        self.config.hardware.backend = backend.to_string();
        self
    }

    pub fn pin_count(mut self, count: u16) -> Self {
        self.config.hardware.pin_count = count;
        self
    }

    pub fn log_level(mut self, level: &str) -> Self {
        self.config.logging.level = level.to_string();
        self
    }

    pub fn build(self) -> AppConfig {
        self.config
    }
}

impl Default for TestConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
