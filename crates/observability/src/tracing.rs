//! Tracing/logging initialization.
//!
//! JSON lines on stdout. Decisions are logged under the `gatehouse::decision`
//! target and admin mutations under `gatehouse::admin`, so either can be
//! filtered on its own, e.g. `RUST_LOG=info,gatehouse::decision=warn`.

use tracing_subscriber::EnvFilter;

/// Default filter when `RUST_LOG` is unset.
pub const DEFAULT_FILTER: &str = "info";

/// Initialize tracing/logging for the process.
///
/// Safe to call multiple times (subsequent calls are no-ops).
pub fn init() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .json()
        .with_timer(tracing_subscriber::fmt::time::SystemTime)
        .with_target(true)
        .try_init();
}
