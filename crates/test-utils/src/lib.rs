// crates/test-utils/src/lib.rs

//! Shared helpers for cachedag tests: graph builders and a capturing
//! logger.

pub mod builders;
pub mod logger;

pub use builders::GraphBuilder;
pub use logger::MemoryLogger;

use std::sync::Once;

static INIT: Once = Once::new();

/// Initialise tracing for tests; safe to call from every test.
pub fn init_tracing() {
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_env("CACHEDAG_LOG")
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
            )
            .with_test_writer()
            .try_init();
    });
}
