//! In-memory queue service implementation for testing and development.
//!
//! This module provides a fully functional in-process queue service that:
//! - Implements visibility timeouts, pop receipts and message TTL
//! - Enforces the wire text size limit of a real storage queue
//! - Counts calls per operation and replays scripted failures
//!
//! This service is intended for:
//! - Unit and integration testing of queue consumers and producers
//! - Development and prototyping without a storage account
//! - Reference behaviour for real service backends

use crate::error::ServiceError;
use crate::message::{MessageId, PopReceipt, QueueInfo, QueueMetadata, ServiceMessage};
use crate::service::{QueueService, MAX_MESSAGES_PER_REQUEST};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Mutex, RwLock};

#[cfg(test)]
#[path = "memory_tests.rs"]
mod tests;

// ============================================================================
// Configuration
// ============================================================================

/// In-memory service configuration
#[derive(Debug, Clone)]
pub struct InMemoryConfig {
    /// Account name used when building queue URLs
    pub account_name: String,
    /// Visibility timeout applied when a dequeue does not specify one
    pub default_visibility_timeout: Duration,
    /// Time-to-live of every enqueued message
    pub message_ttl: Duration,
    /// Largest accepted wire text, in bytes
    pub max_message_size: usize,
}

impl Default for InMemoryConfig {
    fn default() -> Self {
        Self {
            account_name: "devstoreaccount1".to_string(),
            default_visibility_timeout: Duration::seconds(30),
            message_ttl: Duration::days(7),
            max_message_size: 64 * 1024,
        }
    }
}

/// Service operations, used for call counting and fault injection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServiceOperation {
    ListQueues,
    CreateQueue,
    DeleteQueue,
    GetQueueMetadata,
    GetMessages,
    PeekMessages,
    PutMessage,
    DeleteMessage,
    ClearMessages,
}

// ============================================================================
// Internal Storage Structures
// ============================================================================

/// Storage for all queues, keyed by name so listings come out sorted
struct QueueStorage {
    queues: BTreeMap<String, InMemoryQueue>,
}

/// Internal state for a single queue
#[derive(Default)]
struct InMemoryQueue {
    /// Messages in insertion order
    messages: VecDeque<StoredMessage>,
}

impl InMemoryQueue {
    fn drop_expired(&mut self, now: DateTime<Utc>) {
        self.messages.retain(|m| m.expires_at > now);
    }
}

/// A message stored in the queue with its metadata
#[derive(Clone)]
struct StoredMessage {
    message_id: String,
    message_text: String,
    inserted_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    visible_at: DateTime<Utc>,
    dequeue_count: u32,
    pop_receipt: Option<String>,
}

impl StoredMessage {
    fn is_visible(&self, now: DateTime<Utc>) -> bool {
        now >= self.visible_at
    }

    fn to_record(&self, include_receipt: bool) -> ServiceMessage {
        ServiceMessage {
            message_id: self.message_id.clone(),
            pop_receipt: if include_receipt {
                self.pop_receipt.clone()
            } else {
                None
            },
            message_text: self.message_text.clone(),
            insertion_time: Some(self.inserted_at),
            expiration_time: Some(self.expires_at),
            time_next_visible: Some(self.visible_at),
            dequeue_count: self.dequeue_count,
        }
    }
}

/// Call counters and scripted failures
#[derive(Default)]
struct Instrumentation {
    calls: HashMap<ServiceOperation, usize>,
    faults: HashMap<ServiceOperation, VecDeque<ServiceError>>,
}

// ============================================================================
// InMemoryQueueService
// ============================================================================

/// In-memory queue service implementation
pub struct InMemoryQueueService {
    storage: RwLock<QueueStorage>,
    instrumentation: Mutex<Instrumentation>,
    config: InMemoryConfig,
}

impl InMemoryQueueService {
    /// Create new in-memory service with configuration
    pub fn new(config: InMemoryConfig) -> Self {
        Self {
            storage: RwLock::new(QueueStorage {
                queues: BTreeMap::new(),
            }),
            instrumentation: Mutex::new(Instrumentation::default()),
            config,
        }
    }

    /// Make the next call to `operation` fail with `error`.
    ///
    /// Failures queue up: each scripted failure is consumed by one call.
    pub fn fail_next(&self, operation: ServiceOperation, error: ServiceError) {
        if let Ok(mut instrumentation) = self.instrumentation.lock() {
            instrumentation
                .faults
                .entry(operation)
                .or_default()
                .push_back(error);
        }
    }

    /// Make the next `times` calls to `operation` fail with errors built by `make_error`
    pub fn fail_times<F>(&self, operation: ServiceOperation, times: usize, make_error: F)
    where
        F: Fn() -> ServiceError,
    {
        for _ in 0..times {
            self.fail_next(operation, make_error());
        }
    }

    /// Number of calls made to `operation`, including failed ones
    pub fn calls(&self, operation: ServiceOperation) -> usize {
        self.instrumentation
            .lock()
            .map(|i| i.calls.get(&operation).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    /// Count the call and replay a scripted failure, if one is queued
    fn record(&self, operation: ServiceOperation) -> Result<(), ServiceError> {
        let mut instrumentation = self
            .instrumentation
            .lock()
            .map_err(|_| ServiceError::Other("instrumentation lock poisoned".to_string()))?;

        *instrumentation.calls.entry(operation).or_insert(0) += 1;

        match instrumentation
            .faults
            .get_mut(&operation)
            .and_then(VecDeque::pop_front)
        {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, QueueStorage>, ServiceError> {
        self.storage
            .read()
            .map_err(|_| ServiceError::Other("queue storage lock poisoned".to_string()))
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, QueueStorage>, ServiceError> {
        self.storage
            .write()
            .map_err(|_| ServiceError::Other("queue storage lock poisoned".to_string()))
    }

    fn queue_url(&self, name: &str) -> String {
        format!("memory://{}/{}", self.config.account_name, name)
    }
}

impl Default for InMemoryQueueService {
    fn default() -> Self {
        Self::new(InMemoryConfig::default())
    }
}

fn queue_not_found(name: &str) -> ServiceError {
    ServiceError::MissingResource(format!("The specified queue '{name}' does not exist"))
}

fn validate_count(count: u32) -> Result<(), ServiceError> {
    if count == 0 || count > MAX_MESSAGES_PER_REQUEST {
        return Err(ServiceError::Http {
            status: 400,
            message: format!(
                "numofmessages must be between 1 and {MAX_MESSAGES_PER_REQUEST}, got {count}"
            ),
        });
    }
    Ok(())
}

#[async_trait]
impl QueueService for InMemoryQueueService {
    async fn list_queues(&self, prefix: Option<&str>) -> Result<Vec<QueueInfo>, ServiceError> {
        self.record(ServiceOperation::ListQueues)?;
        let storage = self.read()?;

        Ok(storage
            .queues
            .keys()
            .filter(|name| prefix.map_or(true, |p| name.starts_with(p)))
            .map(|name| QueueInfo {
                name: name.clone(),
                url: Some(self.queue_url(name)),
                metadata: HashMap::new(),
            })
            .collect())
    }

    async fn create_queue(&self, name: &str, fail_on_exist: bool) -> Result<bool, ServiceError> {
        self.record(ServiceOperation::CreateQueue)?;
        let mut storage = self.write()?;

        if storage.queues.contains_key(name) {
            if fail_on_exist {
                return Err(ServiceError::Http {
                    status: 409,
                    message: format!("QueueAlreadyExists: '{name}'"),
                });
            }
            return Ok(false);
        }

        storage
            .queues
            .insert(name.to_string(), InMemoryQueue::default());
        Ok(true)
    }

    async fn delete_queue(&self, name: &str, fail_not_exist: bool) -> Result<bool, ServiceError> {
        self.record(ServiceOperation::DeleteQueue)?;
        let mut storage = self.write()?;

        match storage.queues.remove(name) {
            Some(_) => Ok(true),
            None if fail_not_exist => Err(queue_not_found(name)),
            None => Ok(false),
        }
    }

    async fn get_queue_metadata(&self, name: &str) -> Result<QueueMetadata, ServiceError> {
        self.record(ServiceOperation::GetQueueMetadata)?;
        let mut storage = self.write()?;
        let queue = storage
            .queues
            .get_mut(name)
            .ok_or_else(|| queue_not_found(name))?;

        queue.drop_expired(Utc::now());
        Ok(QueueMetadata {
            approximate_message_count: queue.messages.len() as u64,
            metadata: HashMap::new(),
        })
    }

    async fn get_messages(
        &self,
        name: &str,
        count: u32,
        visibility_timeout: Option<std::time::Duration>,
    ) -> Result<Vec<ServiceMessage>, ServiceError> {
        self.record(ServiceOperation::GetMessages)?;
        validate_count(count)?;

        let hidden_for = match visibility_timeout {
            Some(timeout) => Duration::from_std(timeout).map_err(|e| ServiceError::Http {
                status: 400,
                message: format!("invalid visibilitytimeout: {e}"),
            })?,
            None => self.config.default_visibility_timeout,
        };

        let mut storage = self.write()?;
        let queue = storage
            .queues
            .get_mut(name)
            .ok_or_else(|| queue_not_found(name))?;

        let now = Utc::now();
        queue.drop_expired(now);

        let mut dequeued = Vec::new();
        for message in queue
            .messages
            .iter_mut()
            .filter(|m| m.is_visible(now))
            .take(count as usize)
        {
            message.visible_at = now + hidden_for;
            message.dequeue_count += 1;
            message.pop_receipt = Some(PopReceipt::generate().to_string());
            dequeued.push(message.to_record(true));
        }

        Ok(dequeued)
    }

    async fn peek_messages(
        &self,
        name: &str,
        count: u32,
    ) -> Result<Vec<ServiceMessage>, ServiceError> {
        self.record(ServiceOperation::PeekMessages)?;
        validate_count(count)?;

        let storage = self.read()?;
        let queue = storage
            .queues
            .get(name)
            .ok_or_else(|| queue_not_found(name))?;

        let now = Utc::now();
        Ok(queue
            .messages
            .iter()
            .filter(|m| m.expires_at > now && m.is_visible(now))
            .take(count as usize)
            .map(|m| m.to_record(false))
            .collect())
    }

    async fn put_message(&self, name: &str, message_text: &str) -> Result<(), ServiceError> {
        self.record(ServiceOperation::PutMessage)?;

        if message_text.len() > self.config.max_message_size {
            return Err(ServiceError::Http {
                status: 413,
                message: format!(
                    "RequestBodyTooLarge: {} bytes (max: {})",
                    message_text.len(),
                    self.config.max_message_size
                ),
            });
        }

        let mut storage = self.write()?;
        let queue = storage
            .queues
            .get_mut(name)
            .ok_or_else(|| queue_not_found(name))?;

        let now = Utc::now();
        queue.messages.push_back(StoredMessage {
            message_id: MessageId::generate().to_string(),
            message_text: message_text.to_string(),
            inserted_at: now,
            expires_at: now + self.config.message_ttl,
            visible_at: now,
            dequeue_count: 0,
            pop_receipt: None,
        });
        Ok(())
    }

    async fn delete_message(
        &self,
        name: &str,
        message_id: &str,
        pop_receipt: &str,
    ) -> Result<(), ServiceError> {
        self.record(ServiceOperation::DeleteMessage)?;
        let mut storage = self.write()?;
        let queue = storage
            .queues
            .get_mut(name)
            .ok_or_else(|| queue_not_found(name))?;

        let position = queue
            .messages
            .iter()
            .position(|m| m.message_id == message_id)
            .ok_or_else(|| {
                ServiceError::MissingResource(format!(
                    "The specified message '{message_id}' does not exist"
                ))
            })?;

        if queue.messages[position].pop_receipt.as_deref() != Some(pop_receipt) {
            return Err(ServiceError::Http {
                status: 400,
                message: format!("PopReceiptMismatch for message '{message_id}'"),
            });
        }

        queue.messages.remove(position);
        Ok(())
    }

    async fn clear_messages(&self, name: &str) -> Result<(), ServiceError> {
        self.record(ServiceOperation::ClearMessages)?;
        let mut storage = self.write()?;
        let queue = storage
            .queues
            .get_mut(name)
            .ok_or_else(|| queue_not_found(name))?;

        queue.messages.clear();
        Ok(())
    }
}
