//! Message types for queue operations including core domain identifiers.

use crate::error::{DecodeError, SerializationError, ValidationError};
use base64::{engine::general_purpose, Engine as _};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;

#[cfg(test)]
#[path = "message_tests.rs"]
mod tests;

// ============================================================================
// Core Domain Identifiers
// ============================================================================

/// Normalized queue name.
///
/// Underscores and dots are stripped before the name is sent anywhere; the
/// service only accepts ASCII alphanumerics and hyphens.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct QueueName(String);

impl QueueName {
    /// Normalize and validate a raw queue name
    pub fn new(raw: &str) -> Result<Self, ValidationError> {
        let name: String = raw.chars().filter(|c| *c != '_' && *c != '.').collect();

        if name.is_empty() {
            return Err(ValidationError::Required {
                field: "queue_name".to_string(),
            });
        }

        if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
            return Err(ValidationError::InvalidFormat {
                field: "queue_name".to_string(),
                message: format!("'{name}' may only contain ASCII alphanumerics and hyphens"),
            });
        }

        Ok(Self(name))
    }

    /// Get queue name as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for QueueName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for QueueName {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

/// Service-assigned message identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(String);

impl MessageId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a random identifier (used by the in-memory service)
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque token issued on dequeue; required together with the message id to
/// delete the message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PopReceipt(String);

impl PopReceipt {
    pub fn new(receipt: impl Into<String>) -> Self {
        Self(receipt.into())
    }

    /// Issue a fresh receipt; every dequeue invalidates the previous one
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for PopReceipt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Timestamp wrapper for consistent time handling
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Create timestamp from DateTime
    pub fn from_datetime(dt: DateTime<Utc>) -> Self {
        Self(dt)
    }

    /// Get underlying DateTime
    pub fn as_datetime(&self) -> DateTime<Utc> {
        self.0
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.format("%Y-%m-%d %H:%M:%S UTC"))
    }
}

// ============================================================================
// Wire Records
// ============================================================================

/// Message record as returned by the queue service.
///
/// `message_text` is the wire text: base64 when the producer encoded it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceMessage {
    pub message_id: String,
    pub pop_receipt: Option<String>,
    pub message_text: String,
    pub insertion_time: Option<DateTime<Utc>>,
    pub expiration_time: Option<DateTime<Utc>>,
    pub time_next_visible: Option<DateTime<Utc>>,
    pub dequeue_count: u32,
}

/// Queue listing record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueInfo {
    pub name: String,
    pub url: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

/// Queue properties returned by the service
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueMetadata {
    /// Approximate: the service does not guarantee an exact count
    pub approximate_message_count: u64,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

// ============================================================================
// Message Types
// ============================================================================

/// A message read from a queue, with its body already decoded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: MessageId,
    /// Absent for peeked messages
    pub pop_receipt: Option<PopReceipt>,
    pub body: Bytes,
    pub inserted_at: Option<Timestamp>,
    pub expires_at: Option<Timestamp>,
    pub next_visible_at: Option<Timestamp>,
    pub dequeue_count: u32,
}

impl Message {
    /// Create a detached message with no service metadata
    pub fn new(id: MessageId, body: Bytes) -> Self {
        Self {
            id,
            pop_receipt: None,
            body,
            inserted_at: None,
            expires_at: None,
            next_visible_at: None,
            dequeue_count: 0,
        }
    }

    /// Attach a pop receipt
    pub fn with_pop_receipt(mut self, receipt: PopReceipt) -> Self {
        self.pop_receipt = Some(receipt);
        self
    }

    /// Build a message from a service record, decoding the body.
    pub fn from_service(record: ServiceMessage, decode_base64: bool) -> Result<Self, DecodeError> {
        let body = decode_body(&record.message_id, &record.message_text, decode_base64)?;

        Ok(Self {
            id: MessageId(record.message_id),
            pop_receipt: record.pop_receipt.map(PopReceipt),
            body,
            inserted_at: record.insertion_time.map(Timestamp::from_datetime),
            expires_at: record.expiration_time.map(Timestamp::from_datetime),
            next_visible_at: record.time_next_visible.map(Timestamp::from_datetime),
            dequeue_count: record.dequeue_count,
        })
    }

    /// Body as UTF-8 text, if it is valid UTF-8
    pub fn body_text(&self) -> Option<&str> {
        std::str::from_utf8(&self.body).ok()
    }

    /// Parse a packed body: a JSON array of payloads
    pub fn unpack<T: DeserializeOwned>(&self) -> Result<Vec<T>, DecodeError> {
        serde_json::from_slice(&self.body).map_err(|source| DecodeError::PackedBody {
            message_id: self.id.to_string(),
            source,
        })
    }
}

// ============================================================================
// Body Codec
// ============================================================================

/// Turn a payload into wire text.
pub fn encode_body(payload: &[u8], encode_base64: bool) -> Result<String, SerializationError> {
    if encode_base64 {
        Ok(general_purpose::STANDARD.encode(payload))
    } else {
        String::from_utf8(payload.to_vec()).map_err(|_| SerializationError::InvalidUtf8)
    }
}

/// Turn wire text back into payload bytes.
pub fn decode_body(
    message_id: &str,
    text: &str,
    decode_base64: bool,
) -> Result<Bytes, DecodeError> {
    if decode_base64 {
        general_purpose::STANDARD
            .decode(text)
            .map(Bytes::from)
            .map_err(|source| DecodeError::Base64 {
                message_id: message_id.to_string(),
                source,
            })
    } else {
        Ok(Bytes::copy_from_slice(text.as_bytes()))
    }
}
