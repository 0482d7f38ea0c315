//! # Retry Module
//!
//! Re-invokes remote operations according to the classifier's verdict.
//!
//! The retry loop uses a fixed delay between attempts and a strict bound:
//! at most `max_retries` retries after the first attempt. Status codes listed
//! in the suppression set are swallowed and reported as
//! [`RetryOutcome::Suppressed`] instead of an error.
//!
//! Poll backoff for empty queues lives here as well, see [`poll_backoff`].

use crate::error::{classify, QueueError, ServiceError};
use std::collections::BTreeSet;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, error, warn};

#[cfg(test)]
#[path = "retry_tests.rs"]
mod tests;

/// Retry policy configuration
///
/// # Examples
///
/// ```rust
/// use azqueue::retry::RetryPolicy;
/// use std::time::Duration;
///
/// // Default policy: 10 retries, 60s fixed delay, nothing suppressed
/// let policy = RetryPolicy::default();
/// assert_eq!(policy.total_attempts(), 11);
///
/// // Treat a missing resource as a no-op
/// let policy = RetryPolicy::new(3, Duration::from_secs(5)).with_suppressed(404);
/// assert!(policy.suppresses(404));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum number of retries after the first attempt
    pub max_retries: u32,

    /// Fixed delay between attempts
    pub delay: Duration,

    /// Status codes for which failures are swallowed
    pub suppress: BTreeSet<u16>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 10,
            delay: Duration::from_secs(60),
            suppress: BTreeSet::new(),
        }
    }
}

/// Result of a retried operation that did not fail
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryOutcome<T> {
    /// The operation returned this value
    Completed(T),

    /// The operation failed with a suppressed status code
    Suppressed { status_code: u16 },
}

impl<T> RetryOutcome<T> {
    pub fn is_suppressed(&self) -> bool {
        matches!(self, Self::Suppressed { .. })
    }

    /// The completed value, if any
    pub fn completed(self) -> Option<T> {
        match self {
            Self::Completed(value) => Some(value),
            Self::Suppressed { .. } => None,
        }
    }
}

impl<T: Default> RetryOutcome<T> {
    /// Map the suppression sentinel to the type's default (`false`, `0`, empty)
    pub fn completed_or_default(self) -> T {
        self.completed().unwrap_or_default()
    }
}

impl RetryPolicy {
    /// Create a new retry policy with an empty suppression set
    pub fn new(max_retries: u32, delay: Duration) -> Self {
        Self {
            max_retries,
            delay,
            suppress: BTreeSet::new(),
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Add a status code to the suppression set
    pub fn with_suppressed(mut self, status_code: u16) -> Self {
        self.suppress.insert(status_code);
        self
    }

    /// Check whether failures with this status code are swallowed
    pub fn suppresses(&self, status_code: u16) -> bool {
        self.suppress.contains(&status_code)
    }

    /// Get total number of invocations (initial + retries)
    pub fn total_attempts(&self) -> u32 {
        self.max_retries + 1
    }

    /// Run `operation`, retrying transient failures.
    ///
    /// The retry counter is incremented and checked before each sleep, so a
    /// persistently failing operation is invoked exactly `max_retries + 1`
    /// times and the delay is slept exactly `max_retries` times.
    pub async fn run<T, F, Fut>(
        &self,
        operation_name: &str,
        mut operation: F,
    ) -> Result<RetryOutcome<T>, QueueError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ServiceError>>,
    {
        let mut retries = 0u32;

        loop {
            let raw = match operation().await {
                Ok(value) => return Ok(RetryOutcome::Completed(value)),
                Err(raw) => raw,
            };

            let error = classify(&raw);
            let status_code = error.status_code();

            if self.suppresses(status_code) {
                debug!(
                    operation = operation_name,
                    status_code = status_code,
                    error = %error,
                    "Error suppressed"
                );
                return Ok(RetryOutcome::Suppressed { status_code });
            }

            if !error.is_retriable() {
                return Err(error);
            }

            if retries >= self.max_retries {
                error!(
                    operation = operation_name,
                    status_code = status_code,
                    attempts = retries + 1,
                    error = %error,
                    "Retries exhausted"
                );
                return Err(error);
            }

            retries += 1;
            warn!(
                operation = operation_name,
                status_code = status_code,
                retry = retries,
                max_retries = self.max_retries,
                delay_secs = self.delay.as_secs_f64(),
                error = %error,
                "Transient failure, retrying"
            );
            tokio::time::sleep(self.delay).await;
        }
    }
}

/// Free-function form of [`RetryPolicy::run`].
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    operation_name: &str,
    operation: F,
) -> Result<RetryOutcome<T>, QueueError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ServiceError>>,
{
    policy.run(operation_name, operation).await
}

/// Delay before poll attempt `attempt` (1-indexed): `min(2^attempt s, max_backoff)`.
///
/// # Examples
///
/// ```rust
/// use azqueue::retry::poll_backoff;
/// use std::time::Duration;
///
/// let cap = Duration::from_secs(120);
/// assert_eq!(poll_backoff(1, cap), Duration::from_secs(2));
/// assert_eq!(poll_backoff(7, cap), cap);
/// ```
pub fn poll_backoff(attempt: u32, max_backoff: Duration) -> Duration {
    2u64.checked_pow(attempt)
        .map(Duration::from_secs)
        .map_or(max_backoff, |delay| delay.min(max_backoff))
}
