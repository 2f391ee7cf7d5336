//! Logging setup.
//!
//! The engine itself only emits `tracing` events. Binaries embedding it can call
//! [`init`] to install a readable subscriber whose filter comes from the
//! `GRIDDLE_LOG` environment variable (same syntax as `RUST_LOG`).

use std::sync::Once;

use tracing_subscriber::EnvFilter;

/// ENV used to set the log filter
const FILTER_ENV: &str = "GRIDDLE_LOG";

/// Default log level
const DEFAULT_FILTER_LEVEL: &str = "info";

/// Once instance to ensure the logger is only initialized once
static INIT: Once = Once::new();

/// Install the global subscriber. Subsequent calls are no-ops.
pub fn init() {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_env(FILTER_ENV)
            .unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER_LEVEL));
        // Another subscriber may already be installed by the host process.
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .try_init();
    });
}
