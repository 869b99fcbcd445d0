#![deny(unsafe_code)]

//! gpiod core runtime.
//!
//! Exposes a digital I/O board to other local processes through two front
//! ends: a pair of named pipes carrying JSON commands (run by [`PipeDaemon`])
//! and a small HTTP facade for the door and light. Both dispatch to the same
//! [`Hardware`] capability.

/// Compile-time build metadata (version, git hash, profile).
pub mod build_info;
/// Client side of the named-pipe protocol.
pub mod client;
/// Pipe daemon runtime and its dispatch loop.
pub mod daemon;
/// Command routing from decoded messages to hardware.
pub mod dispatch;
/// Hardware capability trait and backends.
pub mod hardware;
/// axum router for the HTTP facade.
pub mod http;
/// FIFO creation, opening and cleanup.
pub mod pipe;
/// Command and result codec, plus stream framing.
pub mod protocol;

pub use client::{ClientError, PipeClient, PipeConnection};
pub use daemon::{DaemonError, PipeDaemon, ShutdownSignal};
pub use dispatch::Dispatcher;
pub use hardware::{Hardware, HardwareError, MemoryHardware, NoopHardware, select_backend};
pub use pipe::{ChannelError, ChannelGuard};
pub use protocol::{Command, ErrorKind, ProtocolError, Reply};
