//! Tracing subscriber setup for embedders and tests
//!
//! The runtime only emits `tracing` events; installing a subscriber is the
//! host's call. This helper wires the conventional fmt + EnvFilter stack
//! (`RUST_LOG` controls verbosity) and is safe to call more than once.

use tracing_subscriber::EnvFilter;

/// Install the default subscriber. Subsequent calls are no-ops.
pub fn init() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("gantry_runtime=info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}
