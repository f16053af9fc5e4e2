//! Structured logging initialization
//!
//! Thin wrapper around `tracing-subscriber` with `RUST_LOG` environment
//! filtering. Call [`init_logging`] once at process startup; library code
//! only ever emits through the `tracing` macros and never installs a
//! subscriber itself.

use std::io::IsTerminal;
use tracing_subscriber::EnvFilter;

/// Initialize the global tracing subscriber
///
/// Honors `RUST_LOG`, defaulting to `info` when unset. ANSI colors are
/// enabled only when stderr is a terminal.
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_ansi(std::io::stderr().is_terminal())
        .with_writer(std::io::stderr)
        .init();
}

/// Initialize logging for tests, tolerating repeated calls
///
/// Tests across modules may race to install a subscriber; only the first
/// wins and the rest are no-ops.
pub fn try_init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_ansi(false)
        .with_test_writer()
        .try_init();
}
