//! The remote queue service boundary.
//!
//! [`QueueService`] is the opaque RPC surface the client depends on. Every call
//! returns a structured response or a raw [`ServiceError`]; classification and
//! retry happen in the client, never in the service implementation.

use crate::error::ServiceError;
use crate::message::{QueueInfo, QueueMetadata, ServiceMessage};
use async_trait::async_trait;
use std::time::Duration;

/// Largest number of messages a single get/peek may request
pub const MAX_MESSAGES_PER_REQUEST: u32 = 32;

/// Interface implemented by queue service backends
#[async_trait]
pub trait QueueService: Send + Sync {
    /// List queues on the account, optionally filtered by name prefix
    async fn list_queues(&self, prefix: Option<&str>) -> Result<Vec<QueueInfo>, ServiceError>;

    /// Create a queue. Returns `false` when it already existed and
    /// `fail_on_exist` is not set.
    async fn create_queue(&self, name: &str, fail_on_exist: bool) -> Result<bool, ServiceError>;

    /// Delete a queue. Returns `false` when it did not exist and
    /// `fail_not_exist` is not set.
    async fn delete_queue(&self, name: &str, fail_not_exist: bool) -> Result<bool, ServiceError>;

    /// Get queue properties, including the approximate message count
    async fn get_queue_metadata(&self, name: &str) -> Result<QueueMetadata, ServiceError>;

    /// Dequeue up to `count` visible messages, hiding them for
    /// `visibility_timeout` (service default when `None`)
    async fn get_messages(
        &self,
        name: &str,
        count: u32,
        visibility_timeout: Option<Duration>,
    ) -> Result<Vec<ServiceMessage>, ServiceError>;

    /// Read up to `count` visible messages without dequeuing them
    async fn peek_messages(&self, name: &str, count: u32)
        -> Result<Vec<ServiceMessage>, ServiceError>;

    /// Enqueue one message with the given wire text
    async fn put_message(&self, name: &str, message_text: &str) -> Result<(), ServiceError>;

    /// Delete a dequeued message
    async fn delete_message(
        &self,
        name: &str,
        message_id: &str,
        pop_receipt: &str,
    ) -> Result<(), ServiceError>;

    /// Remove every message from the queue
    async fn clear_messages(&self, name: &str) -> Result<(), ServiceError>;
}
