//! Read-only queue views for a web frontend.
//!
//! The frontend itself lives elsewhere; this module produces the JSON bodies
//! and status codes it serves.

use crate::client::QueueClientFactory;
use crate::error::{QueueError, SerializationError};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, warn};

#[cfg(test)]
#[path = "dashboard_tests.rs"]
mod tests;

/// Error body returned to the frontend
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub status: u16,
    /// Set when the failure was transient and the request may be repeated
    pub retriable: bool,
    pub timestamp: DateTime<Utc>,
}

impl From<&QueueError> for ErrorResponse {
    fn from(error: &QueueError) -> Self {
        Self {
            error: error.to_string(),
            status: error.status_code(),
            retriable: error.is_retriable(),
            timestamp: Utc::now(),
        }
    }
}

impl ErrorResponse {
    /// JSON body served to the frontend
    pub fn body(&self) -> String {
        serde_json::json!({
            "error": self.error,
            "status": self.status,
            "retriable": self.retriable,
            "timestamp": self.timestamp.to_rfc3339(),
        })
        .to_string()
    }
}

/// Queue listing and size lookups backed by a client factory
#[derive(Debug, Clone)]
pub struct QueueDashboard {
    factory: QueueClientFactory,
}

impl QueueDashboard {
    pub fn new(factory: QueueClientFactory) -> Self {
        Self { factory }
    }

    /// Every queue on the account as a JSON array
    pub async fn all(&self) -> Result<String, QueueError> {
        let client = self.factory.queue(None)?;
        let queues = client.list_queues().await?;
        debug!(count = queues.len(), "Listed queues for dashboard");

        let body = serde_json::to_string(&queues).map_err(SerializationError::from)?;
        Ok(body)
    }

    /// Approximate message count of one queue
    pub async fn queue_size(&self, name: &str) -> Result<u64, QueueError> {
        let client = self.factory.queue(Some(name))?;
        client.size().await
    }

    /// `(status, body)` for the queue listing endpoint
    pub async fn all_response(&self) -> (u16, String) {
        match self.all().await {
            Ok(body) => (200, body),
            Err(error) => error_response(&error),
        }
    }

    /// `(status, body)` for the queue size endpoint
    pub async fn queue_size_response(&self, name: &str) -> (u16, String) {
        match self.queue_size(name).await {
            Ok(size) => (200, size.to_string()),
            Err(error) => error_response(&error),
        }
    }
}

fn error_response(error: &QueueError) -> (u16, String) {
    warn!(status = error.status_code(), error = %error, "Dashboard request failed");
    let response = ErrorResponse::from(error);
    (response.status, response.body())
}
