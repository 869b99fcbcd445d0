//! Pipe client: sends one command to a running daemon and reads its result.
//!
//! ```text
//! client ──command──▶ inbound FIFO  ──▶ daemon
//! client ◀──result─── outbound FIFO ◀── daemon
//! ```
//!
//! The client holds the outbound FIFO as its reader, which is what lets the
//! daemon's outbound open succeed. Only one client should be attached at a
//! time; results carry no correlation id.

use std::path::{Path, PathBuf};
use std::time::Duration;

use gpiod_config::PipeConfig;
use nix::errno::Errno;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::pipe;
use tokio::time::Instant;
use tracing::debug;

use crate::protocol::{Command, ErrorKind, Reply};

const CONNECT_POLL: Duration = Duration::from_millis(20);

/// Errors from the pipe client.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("daemon is not running (no FIFO at {0})")]
    NotRunning(PathBuf),

    #[error("failed to open {path}: {source}")]
    Open {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("daemon closed the outbound channel")]
    Disconnected,

    #[error("failed to parse result {line:?}: {reason}")]
    Parse { line: String, reason: String },

    #[error("daemon reported {kind:?}: {message}")]
    Rejected { kind: ErrorKind, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Where to find the daemon and how long to wait for it.
#[derive(Debug, Clone)]
pub struct PipeClient {
    inbound_path: PathBuf,
    outbound_path: PathBuf,
    timeout: Duration,
}

impl PipeClient {
    /// Target a daemon reading `inbound_path` and writing `outbound_path`.
    pub fn new(inbound_path: impl Into<PathBuf>, outbound_path: impl Into<PathBuf>) -> Self {
        Self {
            inbound_path: inbound_path.into(),
            outbound_path: outbound_path.into(),
            timeout: Duration::from_secs(2),
        }
    }

    pub fn from_config(config: &PipeConfig) -> Self {
        Self::new(&config.inbound_path, &config.outbound_path)
    }

    /// Bound on connecting and on each request.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Attach to both FIFOs.
    ///
    /// Waits, up to the timeout, for the daemon to create the FIFOs and to
    /// open the inbound one for reading.
    pub async fn connect(&self) -> Result<PipeConnection, ClientError> {
        let deadline = Instant::now() + self.timeout;

        wait_for_path(&self.outbound_path, deadline).await?;
        let mut options = pipe::OpenOptions::new();
        #[cfg(target_os = "linux")]
        options.read_write(true);
        let receiver = options
            .open_receiver(&self.outbound_path)
            .map_err(|source| ClientError::Open {
                path: self.outbound_path.clone(),
                source,
            })?;

        wait_for_path(&self.inbound_path, deadline).await?;
        let sender = loop {
            match pipe::OpenOptions::new().open_sender(&self.inbound_path) {
                Ok(sender) => break sender,
                Err(e) if is_not_ready(&e) => {
                    if Instant::now() >= deadline {
                        return Err(ClientError::Timeout(self.timeout));
                    }
                    tokio::time::sleep(CONNECT_POLL).await;
                }
                Err(source) => {
                    return Err(ClientError::Open {
                        path: self.inbound_path.clone(),
                        source,
                    });
                }
            }
        };
        debug!(
            inbound = %self.inbound_path.display(),
            outbound = %self.outbound_path.display(),
            "Connected to daemon"
        );

        Ok(PipeConnection {
            sender,
            reader: BufReader::new(receiver),
            timeout: self.timeout,
        })
    }

    /// Connect, send `command`, and return its result.
    pub async fn request(&self, command: &Command) -> Result<Reply, ClientError> {
        self.connect().await?.request(command).await
    }

    /// Connect, send raw bytes, and return the first result.
    pub async fn send_raw(&self, payload: &[u8]) -> Result<Reply, ClientError> {
        self.connect().await?.send_raw(payload).await
    }

    /// Logical state of input `index` (`true` when the switch is closed).
    pub async fn query_input(&self, index: u8) -> Result<bool, ClientError> {
        self.connect().await?.query_input(index).await
    }

    pub async fn set_output(&self, index: u8, state: bool) -> Result<bool, ClientError> {
        self.connect().await?.set_output(index, state).await
    }

    pub async fn set_relay(&self, index: u8, state: bool) -> Result<bool, ClientError> {
        self.connect().await?.set_relay(index, state).await
    }
}

/// An attached client. Requests on one connection are answered in order.
#[derive(Debug)]
pub struct PipeConnection {
    sender: pipe::Sender,
    reader: BufReader<pipe::Receiver>,
    timeout: Duration,
}

impl PipeConnection {
    pub async fn request(&mut self, command: &Command) -> Result<Reply, ClientError> {
        let mut line = command.to_value().to_string().into_bytes();
        line.push(b'\n');
        self.send_raw(&line).await
    }

    pub async fn send_raw(&mut self, payload: &[u8]) -> Result<Reply, ClientError> {
        self.write_raw(payload).await?;
        self.read_reply().await
    }

    /// Write bytes without waiting for a result.
    pub async fn write_raw(&mut self, payload: &[u8]) -> Result<(), ClientError> {
        debug!(bytes = payload.len(), "Sending to daemon");
        self.sender.write_all(payload).await?;
        Ok(())
    }

    /// Read the next result line.
    pub async fn read_reply(&mut self) -> Result<Reply, ClientError> {
        let mut line = String::new();
        let n = tokio::time::timeout(self.timeout, self.reader.read_line(&mut line))
            .await
            .map_err(|_| ClientError::Timeout(self.timeout))??;
        if n == 0 {
            return Err(ClientError::Disconnected);
        }

        serde_json::from_str(line.trim_end()).map_err(|e| ClientError::Parse {
            line: line.trim_end().to_string(),
            reason: e.to_string(),
        })
    }

    pub async fn query_input(&mut self, index: u8) -> Result<bool, ClientError> {
        accepted(self.request(&Command::QueryInput { index }).await?)
    }

    pub async fn set_output(&mut self, index: u8, state: bool) -> Result<bool, ClientError> {
        accepted(self.request(&Command::SetOutput { index, state }).await?)
    }

    pub async fn set_relay(&mut self, index: u8, state: bool) -> Result<bool, ClientError> {
        accepted(self.request(&Command::SetRelay { index, state }).await?)
    }
}

fn accepted(reply: Reply) -> Result<bool, ClientError> {
    match reply {
        Reply::State(state) => Ok(state),
        Reply::Error { error } => Err(ClientError::Rejected {
            kind: error.kind,
            message: error.message,
        }),
    }
}

/// No reader on the inbound FIFO yet, or it is being recreated.
fn is_not_ready(err: &std::io::Error) -> bool {
    matches!(
        err.raw_os_error().map(Errno::from_raw),
        Some(Errno::ENXIO | Errno::ENOENT | Errno::EINTR)
    )
}

async fn wait_for_path(path: &Path, deadline: Instant) -> Result<(), ClientError> {
    while !path.exists() {
        if Instant::now() >= deadline {
            return Err(ClientError::NotRunning(path.to_path_buf()));
        }
        tokio::time::sleep(CONNECT_POLL).await;
    }
    Ok(())
}
