//! Tracing bootstrap for binaries and long-lived embedders.

use tracing_subscriber::{fmt, EnvFilter};

/// Initialise the global tracing subscriber.
///
/// Respects `RUST_LOG`; defaults to `info` for the domainflow crates.
/// Safe to call more than once (subsequent calls are no-ops).
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,domainflow_shared=info,domainflow_orchestration=info"));

    let _ = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}
