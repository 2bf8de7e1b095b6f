//! Observability infrastructure: tracing and metric descriptions.
//!
//! The core only emits through the `tracing` and `metrics` facades. Binaries
//! call [`init`] once; embedding applications may install their own
//! subscriber and metrics recorder instead.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub mod metrics;

/// Initialize logging to stderr.
///
/// `RUST_LOG` wins when set; otherwise `verbose` selects `debug` and falls
/// back to `level`.
///
/// # Errors
/// Fails if a global subscriber is already installed or the filter is invalid.
pub fn init(verbose: bool, level: &str) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let filter = match std::env::var(EnvFilter::DEFAULT_ENV) {
        Ok(_) => EnvFilter::try_from_default_env()?,
        Err(_) => EnvFilter::try_new(if verbose { "debug" } else { level })?,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(verbose)
                .with_level(true),
        )
        .try_init()?;

    metrics::register_core_metrics();
    tracing::debug!("Observability initialized (level: {})", if verbose { "debug" } else { level });
    Ok(())
}
