//! Tracing initialisation for tests.

use tracing_subscriber::EnvFilter;

/// Install a subscriber on the test-harness writer, honouring `RUST_LOG`
/// (default `debug` for gpiod crates).
///
/// Only the first call in a process has an effect.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("warn,gpiod_core=debug")),
        )
        .with_test_writer()
        .try_init();
}
