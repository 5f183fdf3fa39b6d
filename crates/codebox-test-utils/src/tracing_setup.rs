//! Captured tracing output for tests.

use tracing_subscriber::EnvFilter;

/// Filter used when `RUST_LOG` is unset.
const DEFAULT_TEST_FILTER: &str = "codebox_core=debug,codebox_config=debug";

/// Route `tracing` events through the test harness's captured output.
///
/// Safe to call from every test; only the first call in a process installs
/// the subscriber.
pub fn init_test_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_TEST_FILTER));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}
