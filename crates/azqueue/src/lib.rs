//! # azqueue
//!
//! Resilient client for storage-account message queues.
//!
//! This library provides:
//! - Classification of raw service failures into retriable and fatal errors
//! - A bounded, fixed-delay retry executor with status-code suppression
//! - Queue entity operations and a blocking poll loop with capped backoff
//! - Packed delivery: many small payloads coalesced into one queue message
//! - An in-memory service for tests and local development
//!
//! ## Module Organization
//!
//! - [`error`] - Error taxonomy and the classifier
//! - [`retry`] - Retry policy, executor and poll backoff
//! - [`service`] - The remote queue service boundary
//! - [`providers`] - Service implementations
//! - [`message`] - Identifiers, wire records and the body codec
//! - [`entity`] - Service handle plus selected queue name
//! - [`batcher`] - Outgoing payload buffer
//! - [`client`] - Queue client and client factory
//! - [`dashboard`] - JSON views for a web frontend
//! - [`config`] / [`telemetry`] - Configuration loading and logging setup
//!
//! ## Example
//!
//! ```rust
//! use azqueue::{GetMessagesOptions, InMemoryQueueService, QueueClientConfig, QueueClientFactory};
//! use std::sync::Arc;
//!
//! # tokio_test::block_on(async {
//! let factory = QueueClientFactory::new(
//!     Arc::new(InMemoryQueueService::default()),
//!     QueueClientConfig::default(),
//! )
//! .unwrap();
//!
//! let mut events = factory.queue(Some("events")).unwrap();
//! events.create(false).await.unwrap();
//! events.push_packed(&serde_json::json!({ "id": 1 })).await.unwrap();
//! assert_eq!(events.flush().await.unwrap(), 1);
//!
//! let payloads: Vec<serde_json::Value> = events
//!     .pop_packed_messages(&GetMessagesOptions::default())
//!     .await
//!     .unwrap();
//! assert_eq!(payloads, vec![serde_json::json!({ "id": 1 })]);
//! # });
//! ```

pub mod batcher;
pub mod client;
pub mod config;
pub mod dashboard;
pub mod entity;
pub mod error;
pub mod message;
pub mod providers;
pub mod retry;
pub mod service;
pub mod telemetry;

// Re-export commonly used types at crate root for convenience
pub use batcher::{MessageBatcher, PackedBatch};
pub use client::{GetMessagesOptions, QueueClient, QueueClientFactory};
pub use config::{
    BatchingConfig, LoggingConfig, PollingConfig, QueueClientConfig, RetryConfig,
};
pub use dashboard::{ErrorResponse, QueueDashboard};
pub use entity::EntityRef;
pub use error::{
    classify, ConfigurationError, DecodeError, DeleteFailure, QueueError, SerializationError,
    ServiceError, ValidationError,
};
pub use message::{
    Message, MessageId, PopReceipt, QueueInfo, QueueMetadata, QueueName, ServiceMessage, Timestamp,
};
pub use providers::{InMemoryConfig, InMemoryQueueService, ServiceOperation};
pub use retry::{poll_backoff, with_retry, RetryOutcome, RetryPolicy};
pub use service::QueueService;
