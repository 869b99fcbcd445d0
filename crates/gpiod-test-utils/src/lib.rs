#![deny(unsafe_code)]

//! Shared test utilities for the gpiod workspace.
//!
//! Config builders that keep every FIFO inside a temp directory, a hardware
//! double that records each call, a running-daemon fixture, and tracing
//! setup.
//!
//! ```toml
//! [dev-dependencies]
//! gpiod-test-utils = { workspace = true }
//! ```

pub mod config;
pub mod daemon;
pub mod hardware;
pub mod tracing_setup;

pub use config::TestConfigBuilder;
pub use daemon::{RunningDaemon, TestPipes};
pub use hardware::{FaultMode, HardwareCall, RecordingHardware};
