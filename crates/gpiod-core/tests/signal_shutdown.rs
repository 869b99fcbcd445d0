//! SIGTERM handling. Kept in its own test binary because the signal goes to
//! the whole process.

use std::sync::Arc;
use std::time::Duration;

use gpiod_test_utils::{RecordingHardware, TestPipes};
use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;

#[test_log::test(tokio::test)]
async fn test_sigterm_stops_daemon_and_removes_channels() {
    let pipes = TestPipes::new();
    let hw = Arc::new(RecordingHardware::new());
    let daemon = pipes.spawn(hw.clone());

    // The FIFOs appear on the first poll of the session, which also installs
    // the signal handlers.
    for _ in 0..250 {
        if pipes.config.inbound_path.exists() && pipes.config.outbound_path.exists() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(pipes.config.lock_path.exists());
    tokio::time::sleep(Duration::from_millis(50)).await;

    kill(Pid::this(), Signal::SIGTERM).unwrap();

    let result = daemon.join().await.unwrap();
    assert!(result.is_ok());
    assert!(pipes.is_clean());
    assert!(hw.calls().is_empty());
}
