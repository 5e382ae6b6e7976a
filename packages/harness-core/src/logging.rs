//! Tracing bootstrap for tests and tools.

use tracing_subscriber::EnvFilter;

/// Installs a fmt subscriber routed through the libtest writer.
///
/// Honors `RUST_LOG` and defaults to `info`. Safe to call from every test.
pub fn init_test_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_thread_names(true)
        .with_test_writer()
        .try_init();
}
