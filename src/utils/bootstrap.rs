//! Bootstrap utilities for applications embedding tenant-bus.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Environment variable holding the tracing filter directive.
pub const LOG_ENV_VAR: &str = "TENANTBUS_LOG";

/// Initialize tracing with the TENANTBUS_LOG environment variable.
///
/// Defaults to "info" level if TENANTBUS_LOG is not set. Does nothing when a
/// global subscriber is already installed.
pub fn init_tracing() {
    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_env(LOG_ENV_VAR)
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}
