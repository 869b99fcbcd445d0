//! Pipe daemon: startup, the polling dispatch loop, and shutdown.
//!
//! One session runs on the calling task and is strictly sequential:
//!
//! ```text
//! WAITING ──ready──▶ READING ──▶ DECODING ──▶ DISPATCHING ──▶ WRITING ─┐
//!    ▲                                                                  │
//!    └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! `WAITING` is a readiness wait bounded by `pipes.poll_interval_ms`. A read
//! takes at most `pipes.max_message_bytes`, and every complete command in it
//! is answered, in order, before the next wait.

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{debug, info, trace, warn};

use gpiod_config::PipeConfig;

use crate::dispatch::Dispatcher;
use crate::hardware::Hardware;
use crate::pipe::{
    ChannelError, ChannelGuard, InboundChannel, OutboundChannel, RetryPolicy, ensure_fifo,
};
use crate::protocol::FrameDecoder;

/// Shutdown signal sent via broadcast channel.
#[derive(Debug, Clone)]
pub struct ShutdownSignal;

/// The named-pipe command daemon.
pub struct PipeDaemon {
    config: PipeConfig,
    dispatcher: Dispatcher,
    shutdown_tx: broadcast::Sender<ShutdownSignal>,
    shutdown_rx: broadcast::Receiver<ShutdownSignal>,
}

impl PipeDaemon {
    /// Create a daemon serving `hardware` over the channels in `config`.
    pub fn new(config: PipeConfig, hardware: Arc<dyn Hardware>) -> Self {
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        Self {
            config,
            dispatcher: Dispatcher::new(hardware),
            shutdown_tx,
            shutdown_rx,
        }
    }

    /// A sender that stops the daemon from another task.
    pub fn shutdown_sender(&self) -> broadcast::Sender<ShutdownSignal> {
        self.shutdown_tx.clone()
    }

    /// Request a graceful shutdown.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(ShutdownSignal);
    }

    pub fn config(&self) -> &PipeConfig {
        &self.config
    }

    /// Run until a shutdown request, SIGINT/SIGTERM, or a fatal channel error.
    ///
    /// The channels are removed before this returns, whatever the outcome.
    pub async fn run(self) -> Result<(), DaemonError> {
        let PipeDaemon {
            config,
            dispatcher,
            shutdown_tx: _shutdown_tx,
            mut shutdown_rx,
        } = self;

        info!(
            version = %crate::build_info::version_string(),
            inbound = %config.inbound_path.display(),
            outbound = %config.outbound_path.display(),
            hardware = dispatcher.hardware().name(),
            "gpiod pipe daemon starting"
        );

        let mut guard = ChannelGuard::acquire(&config)?;

        let outcome = tokio::select! {
            result = serve(&config, &dispatcher) => result,
            _ = shutdown_rx.recv() => {
                info!("Shutdown signal received, stopping daemon");
                Ok(())
            }
            signal = shutdown_signal() => {
                warn!(signal, "Signal received, initiating shutdown");
                Ok(())
            }
        };

        if let Err(e) = &outcome {
            warn!(error = %e, "Dispatch loop failed");
        }
        guard.release();
        info!("Daemon stopped");
        outcome
    }
}

/// One session: open both channels, then answer commands forever.
///
/// Only returns on a channel failure.
async fn serve(config: &PipeConfig, dispatcher: &Dispatcher) -> Result<(), DaemonError> {
    ensure_fifo(&config.inbound_path, config.mode)?;
    ensure_fifo(&config.outbound_path, config.mode)?;

    let inbound = InboundChannel::open(&config.inbound_path)?;
    let retry = RetryPolicy::from_config(config);
    let mut outbound = OutboundChannel::open(&config.outbound_path, config.mode, &retry).await?;
    info!("Channels ready, waiting for input");

    let poll_interval = config.poll_interval();
    let mut decoder = FrameDecoder::new(config.max_message_bytes);
    let mut chunk = vec![0u8; config.max_message_bytes];

    loop {
        if !inbound.wait_readable(poll_interval).await? {
            trace!("Poll interval elapsed");
            continue;
        }

        let n = match inbound.try_read(&mut chunk)? {
            None => continue,
            Some(0) => {
                // Every writer closed; only reachable where the FIFO is not held read-write.
                tokio::time::sleep(poll_interval).await;
                continue;
            }
            Some(n) => n,
        };
        debug!(bytes = n, pending = decoder.pending(), "Read from inbound channel");

        for frame in decoder.push(&chunk[..n]) {
            let reply = dispatcher.handle_frame(frame);
            outbound.write_all(&reply.to_line()).await?;
        }
    }
}

/// Resolves on SIGINT or SIGTERM and names the signal.
pub async fn shutdown_signal() -> &'static str {
    use tokio::signal::unix::{SignalKind, signal};

    let terminate = async {
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    let interrupt = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to install SIGINT handler");
            std::future::pending::<()>().await;
        }
    };

    tokio::select! {
        _ = interrupt => "SIGINT",
        _ = terminate => "SIGTERM",
    }
}

/// Errors from the daemon runtime.
#[derive(Debug, thiserror::Error)]
pub enum DaemonError {
    #[error(transparent)]
    Channel(#[from] ChannelError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::NoopHardware;
    use std::path::Path;
    use std::time::Duration;
    use tempfile::TempDir;

    fn pipe_config(dir: &Path) -> PipeConfig {
        PipeConfig {
            inbound_path: dir.join("in"),
            outbound_path: dir.join("out"),
            lock_path: dir.join("lock"),
            poll_interval_ms: 10,
            open_retry_initial_ms: 5,
            open_retry_max_ms: 20,
            ..PipeConfig::default()
        }
    }

    #[tokio::test]
    async fn test_daemon_creation() {
        let daemon = PipeDaemon::new(PipeConfig::default(), Arc::new(NoopHardware));
        assert_eq!(daemon.config().poll_interval_ms, 100);
    }

    #[tokio::test]
    async fn test_shutdown_before_reader_attaches() {
        let tmp = TempDir::new().unwrap();
        let config = pipe_config(tmp.path());
        let daemon = PipeDaemon::new(config.clone(), Arc::new(NoopHardware));
        let shutdown = daemon.shutdown_sender();

        let handle = tokio::spawn(daemon.run());
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(config.inbound_path.exists());
        assert!(config.outbound_path.exists());

        shutdown.send(ShutdownSignal).unwrap();
        let result = tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_ok());
        assert!(!config.inbound_path.exists());
        assert!(!config.outbound_path.exists());
        assert!(!config.lock_path.exists());
    }

    #[tokio::test]
    async fn test_shutdown_requested_before_run() {
        let tmp = TempDir::new().unwrap();
        let config = pipe_config(tmp.path());
        let daemon = PipeDaemon::new(config.clone(), Arc::new(NoopHardware));
        daemon.shutdown();

        let result = tokio::time::timeout(Duration::from_secs(2), daemon.run())
            .await
            .unwrap();
        assert!(result.is_ok());
        assert!(!config.inbound_path.exists());
    }

    #[tokio::test]
    async fn test_bounded_open_failure_cleans_up() {
        let tmp = TempDir::new().unwrap();
        let config = PipeConfig {
            open_retry_attempts: 2,
            ..pipe_config(tmp.path())
        };
        let daemon = PipeDaemon::new(config.clone(), Arc::new(NoopHardware));

        let err = daemon.run().await.unwrap_err();
        assert!(matches!(
            err,
            DaemonError::Channel(ChannelError::NoReader { attempts: 2, .. })
        ));
        assert!(!config.inbound_path.exists());
        assert!(!config.outbound_path.exists());
    }

    #[tokio::test]
    async fn test_outbound_path_occupied_by_regular_file() {
        let tmp = TempDir::new().unwrap();
        let config = pipe_config(tmp.path());
        std::fs::write(&config.outbound_path, b"stale").unwrap();

        let daemon = PipeDaemon::new(config.clone(), Arc::new(NoopHardware));
        let err = daemon.run().await.unwrap_err();
        assert!(matches!(
            err,
            DaemonError::Channel(ChannelError::NotAFifo(_))
        ));
        assert_eq!(std::fs::read(&config.outbound_path).unwrap(), b"stale");
        assert!(!config.inbound_path.exists());
        assert!(!config.lock_path.exists());
    }
}
