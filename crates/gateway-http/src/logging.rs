//! Logging initialization.
//!
//! The level passed to [`init_logging`] is only a default; `RUST_LOG` takes
//! precedence when set:
//!
//! ```bash
//! RUST_LOG=gateway_http=debug gateway
//! ```

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Installs the global subscriber with `level` as the fallback filter.
///
/// Returns an error if a global subscriber is already set.
pub fn init_logging(level: &str) -> Result<(), tracing_subscriber::util::TryInitError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .try_init()
}
