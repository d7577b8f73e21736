#![allow(dead_code)]
//! Shared integration test utilities.

use std::sync::Once;

use tracing_subscriber::EnvFilter;

static INIT_LOGGING: Once = Once::new();

/// Installs the tracing subscriber once per test binary.
pub fn init_test_logging() {
    INIT_LOGGING.call_once(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("loopexec=debug"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}
