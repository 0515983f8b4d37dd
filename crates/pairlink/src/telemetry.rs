//! Logging setup.
//!
//! Every crate in the workspace logs through `tracing`; nothing is printed
//! until the application installs a subscriber. [`init_tracing`] installs
//! the usual one.

use tracing_subscriber::EnvFilter;

/// Installs a `fmt` subscriber filtered by `RUST_LOG`, or by
/// `default_filter` (e.g. `"pairlink=info"`) when `RUST_LOG` is unset.
///
/// Returns `false` if a global subscriber was already installed, which
/// makes it safe to call from every test.
pub fn init_tracing(default_filter: &str) -> bool {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .try_init()
        .is_ok()
}
