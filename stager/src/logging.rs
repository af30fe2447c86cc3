//! Development-time tracing for debugging the stager.
//!
//! # Separation of Concerns
//!
//! - **Tracing (this module)**: Dev diagnostics via `RUST_LOG`, output to stderr.
//!   Not part of the deployment report.
//!
//! - **Reporter (`io/report`)**: The human-readable deployment trace. Always
//!   written, unaffected by `RUST_LOG`.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize tracing subscriber for development logging.
///
/// Reads `RUST_LOG` env var. Falls back to `debug` for this crate when
/// `verbose` is set, otherwise `warn`.
/// Output: stderr, compact format.
///
/// # Example
/// ```bash
/// RUST_LOG=stager=debug stager deploy
/// ```
pub fn init(verbose: bool) {
    let fallback = if verbose { "stager=debug,warn" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .try_init();
}
