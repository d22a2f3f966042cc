//! Tracing setup for tests.

use std::sync::Once;
use tracing_subscriber::EnvFilter;

static INIT: Once = Once::new();

/// Installs a test-friendly tracing subscriber once per process.
///
/// The filter comes from `RUST_LOG` and defaults to `warn`. Output goes
/// through the test writer so it is captured per test.
pub fn init_test_logging() {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
        // Another harness may have installed a global subscriber already.
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}
