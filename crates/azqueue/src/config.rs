//! Configuration types for queue clients
//!
//! Every field carries a serde default, so an absent file or an entirely
//! unconfigured environment produces a valid configuration. Sources are
//! applied in order, later ones overriding earlier ones:
//!
//! 1. Built-in defaults
//! 2. An optional configuration file (format chosen by extension)
//! 3. Environment variables prefixed `AZQ` with `__` as the separator,
//!    e.g. `AZQ__RETRY__MAX_RETRIES=3` sets `retry.max_retries = 3`

use crate::error::ConfigurationError;
use crate::service::MAX_MESSAGES_PER_REQUEST;
use crate::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::info;

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;

/// Prefix of environment variables read by [`QueueClientConfig::load`]
pub const ENV_PREFIX: &str = "AZQ";

/// Largest packed batch the client will ever build, in bytes
pub const MAX_BATCH_BYTES_LIMIT: usize = 64 * 1024;

/// Queue client configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueClientConfig {
    /// Retry settings applied to every remote call
    pub retry: RetryConfig,

    /// Default polling behaviour for message retrieval
    pub polling: PollingConfig,

    /// Outgoing message batching
    pub batching: BatchingConfig,

    /// Base64-encode message bodies on push
    pub encode_base64: bool,

    /// Logging configuration
    pub logging: LoggingConfig,
}

impl Default for QueueClientConfig {
    fn default() -> Self {
        Self {
            retry: RetryConfig::default(),
            polling: PollingConfig::default(),
            batching: BatchingConfig::default(),
            encode_base64: true,
            logging: LoggingConfig::default(),
        }
    }
}

/// Retry configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries after the first attempt
    pub max_retries: u32,

    /// Fixed delay between attempts, in seconds
    pub delay_seconds: u64,

    /// Status codes swallowed by every client operation
    pub suppress: Vec<u16>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 10,
            delay_seconds: 60,
            suppress: Vec::new(),
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        self.suppress.iter().fold(
            RetryPolicy::new(self.max_retries, Duration::from_secs(self.delay_seconds)),
            |policy, code| policy.with_suppressed(*code),
        )
    }
}

/// Polling configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollingConfig {
    /// Messages requested per fetch
    pub batch_size: u32,

    /// Upper bound for the wait between empty fetches, in seconds
    pub max_backoff_seconds: u64,

    /// Visibility timeout for dequeued messages, in seconds (service default when unset)
    pub visibility_timeout_seconds: Option<u64>,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            batch_size: 32,
            max_backoff_seconds: 120,
            visibility_timeout_seconds: None,
        }
    }
}

/// Batching configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchingConfig {
    /// Longest time a payload waits in the buffer while traffic continues, in seconds
    pub flush_interval_seconds: u64,

    /// Largest packed batch body, in bytes
    pub max_batch_bytes: usize,
}

impl Default for BatchingConfig {
    fn default() -> Self {
        Self {
            flush_interval_seconds: 10,
            max_batch_bytes: 40_000,
        }
    }
}

impl BatchingConfig {
    pub fn flush_interval(&self) -> Duration {
        Duration::from_secs(self.flush_interval_seconds)
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Logging level or filter directive
    pub level: String,

    /// Enable JSON structured logging
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
        }
    }
}

impl QueueClientConfig {
    /// Load configuration from an optional file and the environment.
    ///
    /// A missing `path` is fine; a `path` that does not exist, a malformed
    /// file or an environment value of the wrong type is an error.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigurationError> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            info!(path = %path.display(), "Loading configuration file");
            builder = builder.add_source(config::File::from(path).required(true));
        }

        let settings = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| ConfigurationError::Parsing {
                message: e.to_string(),
            })?;

        let loaded: Self = settings
            .try_deserialize()
            .map_err(|e| ConfigurationError::Parsing {
                message: e.to_string(),
            })?;

        loaded.validate()?;
        Ok(loaded)
    }

    /// Check value ranges that serde cannot express
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.polling.batch_size == 0 || self.polling.batch_size > MAX_MESSAGES_PER_REQUEST {
            return Err(invalid(format!(
                "polling.batch_size must be between 1 and {MAX_MESSAGES_PER_REQUEST}, got {}",
                self.polling.batch_size
            )));
        }

        if self.polling.max_backoff_seconds == 0 {
            return Err(invalid("polling.max_backoff_seconds must be at least 1".to_string()));
        }

        if self.batching.flush_interval_seconds == 0 {
            return Err(invalid(
                "batching.flush_interval_seconds must be at least 1".to_string(),
            ));
        }

        if self.batching.max_batch_bytes == 0
            || self.batching.max_batch_bytes > MAX_BATCH_BYTES_LIMIT
        {
            return Err(invalid(format!(
                "batching.max_batch_bytes must be between 1 and {MAX_BATCH_BYTES_LIMIT}, got {}",
                self.batching.max_batch_bytes
            )));
        }

        Ok(())
    }
}

fn invalid(message: String) -> ConfigurationError {
    ConfigurationError::Invalid { message }
}
