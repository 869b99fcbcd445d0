//! No-op (development) hardware backend.
//!
//! Reads always report a low level and writes are only logged. Every call
//! succeeds, so clients see the same result contract as on a real board.

use super::{Hardware, HardwareError};

/// Backend for hosts with no board attached.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHardware;

impl Hardware for NoopHardware {
    fn name(&self) -> &str {
        "noop"
    }

    fn read_input(&self, index: u8) -> Result<bool, HardwareError> {
        tracing::debug!(backend = "noop", index, "Input read without hardware");
        Ok(false)
    }

    fn write_output(&self, index: u8, state: bool) -> Result<(), HardwareError> {
        tracing::debug!(backend = "noop", index, state, "Output write without hardware");
        Ok(())
    }

    fn write_relay(&self, index: u8, state: bool) -> Result<(), HardwareError> {
        tracing::debug!(backend = "noop", index, state, "Relay write without hardware");
        Ok(())
    }
}
