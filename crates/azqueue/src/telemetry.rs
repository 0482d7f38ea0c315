//! Logging setup for applications embedding the queue client.

use crate::config::LoggingConfig;
use crate::error::ConfigurationError;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[cfg(test)]
#[path = "telemetry_tests.rs"]
mod tests;

/// Build the filter: `RUST_LOG` when set, the configured level otherwise
pub fn env_filter(config: &LoggingConfig) -> Result<EnvFilter, ConfigurationError> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(&config.level).map_err(|e| ConfigurationError::Logging {
            message: format!("invalid log level '{}': {e}", config.level),
        }),
    }
}

/// Install the global tracing subscriber.
///
/// Fails instead of panicking when a subscriber is already installed.
pub fn init_tracing(config: &LoggingConfig) -> Result<(), ConfigurationError> {
    let filter = env_filter(config)?;

    let json_layer = config.json_format.then(|| fmt::layer().json());
    let text_layer = (!config.json_format).then(fmt::layer);

    tracing_subscriber::registry()
        .with(filter)
        .with(json_layer)
        .with(text_layer)
        .try_init()
        .map_err(|e| ConfigurationError::Logging {
            message: e.to_string(),
        })
}
