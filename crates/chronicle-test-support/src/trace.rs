//! Tracing output for tests.

use tracing_subscriber::EnvFilter;

/// Routes `tracing` output through the test harness' captured writer.
///
/// The filter comes from `RUST_LOG` and defaults to `debug`. Safe to call from
/// every test; only the first call installs a subscriber.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug")),
        )
        .with_test_writer()
        .try_init();
}
