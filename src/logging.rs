//! Tracing subscriber setup
//!
//! Logs go to stderr so that a worker's stdout stays a clean response
//! channel. Filtering follows `RUST_LOG`, defaulting to `info`.

use tracing_subscriber::EnvFilter;

/// Default filter when `RUST_LOG` is unset.
pub const DEFAULT_FILTER: &str = "subset_ensemble=info,subset_worker=info";

/// Install the global fmt subscriber.
///
/// Returns `false` if a subscriber was already installed (tests, embedding
/// applications); the existing one is left in place.
pub fn init_tracing() -> bool {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_FILTER.into()),
        )
        .with_writer(std::io::stderr)
        .with_target(true)
        .try_init()
        .is_ok()
}
