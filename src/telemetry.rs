//! Logging setup for binaries and tests embedding the simulator.
//!
//! The library only emits `tracing` events; nothing is printed until a
//! subscriber is installed.

use std::sync::OnceLock;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

static INITIALISED: OnceLock<()> = OnceLock::new();

#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    #[error("tracing has already been initialised")]
    AlreadyInitialised,
    #[error("failed to install the tracing subscriber: {0}")]
    Install(String),
}

fn filter(default_filter: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter))
}

/// Install the global fmt subscriber.
///
/// `RUST_LOG` overrides `default_filter` (e.g. `"tvb=debug"`).
pub fn init_tracing(default_filter: &str) -> Result<(), TelemetryError> {
    INITIALISED
        .set(())
        .map_err(|_| TelemetryError::AlreadyInitialised)?;
    let fmt_layer = tracing_subscriber::fmt::layer().with_target(true);
    Registry::default()
        .with(filter(default_filter))
        .with(fmt_layer)
        .try_init()
        .map_err(|e| TelemetryError::Install(e.to_string()))
}

/// Subscriber active on the current thread until the guard is dropped.
pub fn scoped_tracing(default_filter: &str) -> tracing::subscriber::DefaultGuard {
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_test_writer();
    Registry::default()
        .with(filter(default_filter))
        .with(fmt_layer)
        .set_default()
}
