//! Pipe daemon fixtures.
//!
//! [`TestPipes`] owns a temp directory for the FIFOs and lock file;
//! [`TestPipes::spawn`] starts a [`PipeDaemon`] on it in a background task.

use std::sync::Arc;
use std::time::Duration;

use gpiod_config::PipeConfig;
use gpiod_core::client::PipeClient;
use gpiod_core::daemon::{DaemonError, PipeDaemon, ShutdownSignal};
use gpiod_core::hardware::Hardware;
use tempfile::TempDir;
use tokio::sync::broadcast;
use tokio::task::{JoinError, JoinHandle};

use crate::config::TestConfigBuilder;

/// How long fixtures wait for the daemon before failing the test.
pub const FIXTURE_TIMEOUT: Duration = Duration::from_secs(5);

/// Channel paths in a temp directory that is removed on drop.
pub struct TestPipes {
    pub config: PipeConfig,
    _temp_dir: TempDir,
}

impl TestPipes {
    pub fn new() -> Self {
        Self::with(|builder| builder)
    }

    /// Adjust the config before it is fixed, e.g. to bound retries.
    pub fn with(customize: impl FnOnce(TestConfigBuilder) -> TestConfigBuilder) -> Self {
        let temp_dir = TempDir::new().expect("failed to create temp dir");
        let config = customize(TestConfigBuilder::new().pipes_in(temp_dir.path()))
            .build()
            .pipes;
        Self {
            config,
            _temp_dir: temp_dir,
        }
    }

    /// Client for these channels.
    pub fn client(&self) -> PipeClient {
        PipeClient::from_config(&self.config).with_timeout(FIXTURE_TIMEOUT)
    }

    /// True once neither FIFO nor the lock file remains.
    pub fn is_clean(&self) -> bool {
        !self.config.inbound_path.exists()
            && !self.config.outbound_path.exists()
            && !self.config.lock_path.exists()
    }

    /// Start a daemon on these channels in a background task.
    pub fn spawn(&self, hardware: Arc<dyn Hardware>) -> RunningDaemon {
        let daemon = PipeDaemon::new(self.config.clone(), hardware);
        let shutdown = daemon.shutdown_sender();
        RunningDaemon {
            handle: tokio::spawn(daemon.run()),
            shutdown,
        }
    }
}

impl Default for TestPipes {
    fn default() -> Self {
        Self::new()
    }
}

/// A daemon task started by [`TestPipes::spawn`].
pub struct RunningDaemon {
    handle: JoinHandle<Result<(), DaemonError>>,
    shutdown: broadcast::Sender<ShutdownSignal>,
}

impl RunningDaemon {
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Request shutdown and wait for the task.
    pub async fn stop(self) -> Result<(), DaemonError> {
        let _ = self.shutdown.send(ShutdownSignal);
        self.join().await.expect("daemon task panicked")
    }

    /// Wait for the task to end on its own.
    pub async fn join(self) -> Result<Result<(), DaemonError>, JoinError> {
        tokio::time::timeout(FIXTURE_TIMEOUT, self.handle)
            .await
            .expect("daemon did not stop in time")
    }
}
