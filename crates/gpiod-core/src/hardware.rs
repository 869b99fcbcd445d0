//! Hardware capability: the digital I/O board behind both front ends.
//!
//! The pipe daemon and the HTTP facade never touch the board directly; they
//! are handed an `Arc<dyn Hardware>` at construction. Which implementation
//! sits behind it is decided once at startup by [`select_backend`].
//!
//! `read_input` reports the **raw electrical level**. The board's switches
//! are wired active-low, so callers that want the logical state negate it
//! (see [`crate::dispatch`]).

/// No-op backend for hosts without a board.
pub mod noop;

/// In-memory simulated board.
pub mod memory;

use std::sync::Arc;

use gpiod_config::HardwareConfig;

pub use memory::MemoryHardware;
pub use noop::NoopHardware;

/// Which bank of pins an operation addressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinKind {
    Input,
    Output,
    Relay,
}

impl std::fmt::Display for PinKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PinKind::Input => write!(f, "input"),
            PinKind::Output => write!(f, "output"),
            PinKind::Relay => write!(f, "relay"),
        }
    }
}

/// Errors raised by a hardware backend.
#[derive(Debug, thiserror::Error)]
pub enum HardwareError {
    #[error("{kind} {index} does not exist (board has {count})")]
    PinOutOfRange { kind: PinKind, index: u8, count: u16 },

    #[error("hardware fault: {0}")]
    Fault(String),
}

/// Digital input, output and relay primitives of one board.
///
/// Implementations must be callable from any thread; the HTTP facade shares
/// one instance across request handlers.
pub trait Hardware: Send + Sync {
    /// Backend name, for logs.
    fn name(&self) -> &str;

    /// Read the raw electrical level of input `index`.
    fn read_input(&self, index: u8) -> Result<bool, HardwareError>;

    /// Drive output `index` high (`true`) or low.
    fn write_output(&self, index: u8, state: bool) -> Result<(), HardwareError>;

    /// Energise (`true`) or release relay `index`.
    fn write_relay(&self, index: u8, state: bool) -> Result<(), HardwareError>;
}

/// Build the backend named in `config.backend`.
///
/// The name is validated by [`gpiod_config::AppConfig::validate`]; anything
/// unrecognised falls back to the no-op backend.
pub fn select_backend(config: &HardwareConfig) -> Arc<dyn Hardware> {
    match config.backend.as_str() {
        "memory" => Arc::new(MemoryHardware::new(config.pin_count)),
        "noop" => Arc::new(NoopHardware),
        other => {
            tracing::warn!(backend = %other, "Unknown hardware backend, using noop");
            Arc::new(NoopHardware)
        }
    }
}
