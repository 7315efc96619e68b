//! Shared tracing setup for the workspace.

use tracing_subscriber::EnvFilter;

/// Installs a tracing subscriber suitable for test usage.
///
/// By default no logs are printed; enable them for any dependent crate with
/// `--features logging/test_logger`, optionally narrowing via `RUST_LOG`.
pub fn create_test_tracing_subscriber() {
    if cfg!(feature = "test_logger") {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    }
}
