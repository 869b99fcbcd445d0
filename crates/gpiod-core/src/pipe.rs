//! Named pipe lifecycle: creating, opening, locking and removing the
//! inbound/outbound FIFO pair.
//!
//! ## Ordering
//!
//! ```text
//! ChannelGuard::acquire      flock(lock_path), fails if another daemon holds it
//! ensure_fifo(inbound)       mkfifo, or reuse an existing FIFO
//! ensure_fifo(outbound)
//! InboundChannel::open       non-blocking, succeeds with no writer present
//! OutboundChannel::open      retried with backoff until a reader attaches
//!   ...dispatch...
//! ChannelGuard::release      remove inbound, outbound, lock file; then unlock
//! ```
//!
//! The guard releases on drop as well, so a panic or a cancelled session
//! still leaves no FIFOs behind.

use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::fs::{FileTypeExt, OpenOptionsExt};
use std::path::{Path, PathBuf};
use std::time::Duration;

use gpiod_config::PipeConfig;
use nix::errno::Errno;
use nix::fcntl::{Flock, FlockArg};
use nix::sys::stat::Mode;
use nix::unistd::mkfifo;
use tokio::io::AsyncWriteExt;
use tokio::net::unix::pipe;
use tracing::{debug, info, warn};

/// Errors from channel setup and I/O.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("failed to create FIFO at {path}: {source}")]
    Create { path: PathBuf, source: Errno },

    #[error("{0} exists but is not a FIFO")]
    NotAFifo(PathBuf),

    #[error("failed to open {path}: {source}")]
    Open { path: PathBuf, source: io::Error },

    #[error("no reader attached to {path} after {attempts} attempts")]
    NoReader { path: PathBuf, attempts: u32 },

    #[error("read from {path} failed: {source}")]
    Read { path: PathBuf, source: io::Error },

    #[error("write to {path} failed: {source}")]
    Write { path: PathBuf, source: io::Error },

    #[error("failed to lock {path}: {source}")]
    Lock { path: PathBuf, source: io::Error },

    #[error("another daemon already holds {0}")]
    AlreadyRunning(PathBuf),
}

/// Whether [`ensure_fifo`] made a new node or found one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FifoState {
    Created,
    Reused,
}

/// Create a FIFO at `path` unless one already exists there.
///
/// A node left behind by an unclean shutdown is reused. Anything at `path`
/// that is not a FIFO is an error.
pub fn ensure_fifo(path: &Path, mode: u32) -> Result<FifoState, ChannelError> {
    match mkfifo(path, Mode::from_bits_truncate(mode as nix::libc::mode_t)) {
        Ok(()) => {
            info!(path = %path.display(), mode = %format!("{mode:#o}"), "Created FIFO");
            Ok(FifoState::Created)
        }
        Err(Errno::EEXIST) => {
            let metadata = std::fs::metadata(path).map_err(|source| ChannelError::Open {
                path: path.to_path_buf(),
                source,
            })?;
            if !metadata.file_type().is_fifo() {
                return Err(ChannelError::NotAFifo(path.to_path_buf()));
            }
            info!(path = %path.display(), "Reusing existing FIFO");
            Ok(FifoState::Reused)
        }
        Err(source) => Err(ChannelError::Create {
            path: path.to_path_buf(),
            source,
        }),
    }
}

fn is_transient_open_error(err: &io::Error) -> bool {
    matches!(
        err.raw_os_error().map(Errno::from_raw),
        Some(Errno::ENXIO | Errno::ENOENT | Errno::EINTR)
    )
}

// ── Guard ───────────────────────────────────────────────────────────────

/// Exclusive ownership of one channel pair.
///
/// Holds the instance lock and removes the lock file and both FIFOs exactly
/// once, on [`release`](Self::release) or on drop.
pub struct ChannelGuard {
    inbound: PathBuf,
    outbound: PathBuf,
    lock_path: PathBuf,
    lock: Option<Flock<File>>,
    released: bool,
}

impl ChannelGuard {
    /// Take the instance lock for the channel pair described by `config`.
    ///
    /// Fails with [`ChannelError::AlreadyRunning`] while another daemon holds
    /// it; in that case nothing is removed on drop.
    pub fn acquire(config: &PipeConfig) -> Result<Self, ChannelError> {
        let lock_err = |source: io::Error| ChannelError::Lock {
            path: config.lock_path.clone(),
            source,
        };

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .mode(0o600)
            .open(&config.lock_path)
            .map_err(lock_err)?;

        let lock = match Flock::lock(file, FlockArg::LockExclusiveNonblock) {
            Ok(lock) => lock,
            Err((_file, errno)) if errno == Errno::EWOULDBLOCK => {
                return Err(ChannelError::AlreadyRunning(config.lock_path.clone()));
            }
            Err((_file, errno)) => return Err(lock_err(io::Error::from(errno))),
        };
        debug!(path = %config.lock_path.display(), "Acquired channel lock");

        Ok(Self {
            inbound: config.inbound_path.clone(),
            outbound: config.outbound_path.clone(),
            lock_path: config.lock_path.clone(),
            lock: Some(lock),
            released: false,
        })
    }

    /// Whether the channels have already been removed.
    pub fn is_released(&self) -> bool {
        self.released
    }

    /// Remove both FIFOs and the lock file, then drop the lock.
    ///
    /// A channel path holding anything other than a FIFO is left alone.
    /// Every path is attempted even if an earlier removal fails. Later calls
    /// are no-ops.
    pub fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;

        for path in [&self.inbound, &self.outbound] {
            match std::fs::symlink_metadata(path) {
                Ok(metadata) if metadata.file_type().is_fifo() => remove_node(path),
                Ok(_) => warn!(path = %path.display(), "Not a FIFO, leaving it in place"),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    debug!(path = %path.display(), "Already gone");
                }
                Err(e) => warn!(path = %path.display(), error = %e, "Failed to inspect"),
            }
        }
        remove_node(&self.lock_path);
        self.lock.take();
    }
}

fn remove_node(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => info!(path = %path.display(), "Removed"),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "Already gone");
        }
        Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove"),
    }
}

impl Drop for ChannelGuard {
    fn drop(&mut self) {
        self.release();
    }
}

// ── Inbound ─────────────────────────────────────────────────────────────

/// Read side of the inbound FIFO.
#[derive(Debug)]
pub struct InboundChannel {
    path: PathBuf,
    receiver: pipe::Receiver,
}

impl InboundChannel {
    /// Open without blocking; no writer needs to be present.
    ///
    /// On Linux the FIFO is opened read-write, so writers may come and go
    /// without the daemon ever seeing end-of-file.
    pub fn open(path: &Path) -> Result<Self, ChannelError> {
        let mut options = pipe::OpenOptions::new();
        #[cfg(target_os = "linux")]
        options.read_write(true);

        let receiver = options
            .open_receiver(path)
            .map_err(|source| ChannelError::Open {
                path: path.to_path_buf(),
                source,
            })?;
        info!(path = %path.display(), "Inbound channel open");

        Ok(Self {
            path: path.to_path_buf(),
            receiver,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Wait up to `timeout` for data. Returns `false` on timeout.
    pub async fn wait_readable(&self, timeout: Duration) -> Result<bool, ChannelError> {
        match tokio::time::timeout(timeout, self.receiver.readable()).await {
            Err(_elapsed) => Ok(false),
            Ok(Ok(())) => Ok(true),
            Ok(Err(source)) => Err(ChannelError::Read {
                path: self.path.clone(),
                source,
            }),
        }
    }

    /// Read whatever is available into `buf`.
    ///
    /// `Ok(None)` means the readiness was spurious; `Ok(Some(0))` means every
    /// writer has closed.
    pub fn try_read(&self, buf: &mut [u8]) -> Result<Option<usize>, ChannelError> {
        match self.receiver.try_read(buf) {
            Ok(n) => Ok(Some(n)),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => Ok(None),
            Err(source) => Err(ChannelError::Read {
                path: self.path.clone(),
                source,
            }),
        }
    }
}

// ── Outbound ────────────────────────────────────────────────────────────

/// Backoff used while no reader holds the outbound FIFO.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub initial: Duration,
    pub max: Duration,
    /// `None` retries until a reader appears.
    pub max_attempts: Option<u32>,
}

impl RetryPolicy {
    pub fn from_config(config: &PipeConfig) -> Self {
        Self {
            initial: config.open_retry_initial(),
            max: config.open_retry_max(),
            max_attempts: (config.open_retry_attempts > 0).then_some(config.open_retry_attempts),
        }
    }

    fn next_delay(&self, current: Duration) -> Duration {
        current.saturating_mul(2).min(self.max)
    }
}

/// Write side of the outbound FIFO.
#[derive(Debug)]
pub struct OutboundChannel {
    path: PathBuf,
    sender: pipe::Sender,
}

impl OutboundChannel {
    /// Open for writing once a reader is attached.
    ///
    /// A missing reader is not an error: the open is retried under `retry`,
    /// recreating the FIFO if it disappears in the meantime.
    pub async fn open(path: &Path, mode: u32, retry: &RetryPolicy) -> Result<Self, ChannelError> {
        let mut delay = retry.initial;
        let mut attempts = 0u32;

        loop {
            attempts += 1;
            match pipe::OpenOptions::new().open_sender(path) {
                Ok(sender) => {
                    info!(path = %path.display(), attempts, "Outbound reader attached");
                    return Ok(Self {
                        path: path.to_path_buf(),
                        sender,
                    });
                }
                Err(e) if is_transient_open_error(&e) => {
                    if attempts == 1 {
                        info!(path = %path.display(), "Waiting for a reader on the outbound channel");
                    }
                    debug!(path = %path.display(), attempts, error = %e, "Outbound channel not ready");
                    if e.raw_os_error() == Some(Errno::ENOENT as i32) {
                        ensure_fifo(path, mode)?;
                    }
                }
                Err(source) => {
                    return Err(ChannelError::Open {
                        path: path.to_path_buf(),
                        source,
                    });
                }
            }

            if retry.max_attempts.is_some_and(|max| attempts >= max) {
                return Err(ChannelError::NoReader {
                    path: path.to_path_buf(),
                    attempts,
                });
            }
            tokio::time::sleep(delay).await;
            delay = retry.next_delay(delay);
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write all of `bytes`, waiting while the reader's buffer is full.
    pub async fn write_all(&mut self, bytes: &[u8]) -> Result<(), ChannelError> {
        self.sender
            .write_all(bytes)
            .await
            .map_err(|source| ChannelError::Write {
                path: self.path.clone(),
                source,
            })
    }
}
