//! Error types for queue operations and the classifier that maps raw service
//! failures onto them.

use crate::batcher::PackedBatch;
use crate::message::Message;
use std::io::ErrorKind;
use thiserror::Error;

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;

/// Raw failure reported by a [`QueueService`](crate::service::QueueService)
/// implementation before classification.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// The service answered that the queue or message does not exist.
    #[error("{0}")]
    MissingResource(String),

    /// The service answered with a non-success response.
    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    /// The service host name could not be resolved.
    #[error("failed to resolve '{host}': {message}")]
    AddressResolution { host: String, message: String },

    /// Socket-level failure talking to the service.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

/// Classified error surfaced by every queue operation.
///
/// Each variant carries an HTTP-style status code and a retriable flag. The
/// retriable flag describes the transport failure mode, not the logical
/// outcome: a missing queue is a definite answer, a dropped connection is not.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Missing resource: {message}")]
    NotFound { message: String },

    #[error("Service error: {message}")]
    Service { message: String },

    #[error("Connection error: {message}")]
    AddressResolution { message: String },

    #[error("Connection error: {message}")]
    Connection { message: String },

    #[error("Unknown error: {message}")]
    Unknown { message: String },

    #[error("Precondition failed: {field} is required")]
    PreconditionFailed { field: String },

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Serialization failed: {0}")]
    Serialization(#[from] SerializationError),

    #[error("Decode failed: {0}")]
    Decode(#[from] DecodeError),

    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("Failed to delete popped messages: {} failed, {} deleted", .failures.len(), .deleted.len())]
    DeleteFailed {
        deleted: Vec<Message>,
        failures: Vec<DeleteFailure>,
    },

    /// A delete failed with a suppressed status; the service did not
    /// acknowledge the deletion.
    #[error("Delete suppressed with status {status_code}; message not acknowledged")]
    DeleteSuppressed { status_code: u16 },

    /// The service refused a packed batch with a non-retriable error. The
    /// batch is handed back and no longer held by the client.
    #[error("Packed batch of {} payloads rejected: {error}", .batch.len())]
    BatchRejected {
        batch: PackedBatch,
        #[source]
        error: Box<QueueError>,
    },
}

/// A popped message whose deletion was not acknowledged by the service.
#[derive(Debug)]
pub struct DeleteFailure {
    pub message: Message,
    pub error: QueueError,
}

impl QueueError {
    /// HTTP-style status code used when surfacing the error to a frontend.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::NotFound { .. } => 404,
            Self::Service { .. } => 500,
            Self::AddressResolution { .. } => 404,
            Self::Connection { .. } => 504,
            Self::Unknown { .. } => 500,
            Self::PreconditionFailed { .. } => 400,
            Self::Validation(_) => 400,
            Self::Serialization(_) => 400,
            Self::Decode(_) => 500,
            Self::Configuration(_) => 500,
            Self::DeleteFailed { failures, .. } => failures
                .first()
                .map(|failure| failure.error.status_code())
                .unwrap_or(500),
            Self::DeleteSuppressed { status_code } => *status_code,
            Self::BatchRejected { error, .. } => error.status_code(),
        }
    }

    /// Check if the failure is transient and the operation may be retried
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            Self::AddressResolution { .. } | Self::Connection { .. }
        )
    }
}

/// Map a raw service failure to its classified form.
///
/// First match wins; unknown failures are never retriable.
pub fn classify(error: &ServiceError) -> QueueError {
    match error {
        ServiceError::MissingResource(message) => QueueError::NotFound {
            message: message.clone(),
        },
        ServiceError::Http { .. } => QueueError::Service {
            message: error.to_string(),
        },
        ServiceError::AddressResolution { .. } => QueueError::AddressResolution {
            message: error.to_string(),
        },
        ServiceError::Io(io)
            if matches!(
                io.kind(),
                ErrorKind::ConnectionRefused | ErrorKind::ConnectionReset | ErrorKind::TimedOut
            ) =>
        {
            QueueError::Connection {
                message: io.to_string(),
            }
        }
        ServiceError::Io(io) => QueueError::Unknown {
            message: io.to_string(),
        },
        ServiceError::Other(message) => QueueError::Unknown {
            message: message.clone(),
        },
    }
}

/// Errors while turning caller payloads into wire messages
#[derive(Debug, Error)]
pub enum SerializationError {
    #[error("JSON serialization failed: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Message body is not valid UTF-8 and base64 encoding is disabled")]
    InvalidUtf8,

    #[error("Payload of {size} packed bytes exceeds the batch limit of {limit}")]
    PayloadTooLarge { size: usize, limit: usize },
}

/// Errors while turning wire messages back into payloads
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("Message '{message_id}' is not valid base64: {source}")]
    Base64 {
        message_id: String,
        #[source]
        source: base64::DecodeError,
    },

    #[error("Packed message '{message_id}' is not a JSON array of payloads: {source}")]
    PackedBody {
        message_id: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    #[error("Configuration parsing failed: {message}")]
    Parsing { message: String },

    #[error("Logging initialisation failed: {message}")]
    Logging { message: String },
}

/// Validation errors
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Required field missing: {field}")]
    Required { field: String },

    #[error("Invalid format for {field}: {message}")]
    InvalidFormat { field: String, message: String },

    #[error("Value out of range for {field}: {message}")]
    OutOfRange { field: String, message: String },
}
