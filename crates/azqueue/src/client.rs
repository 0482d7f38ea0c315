//! Queue client: entity operations, the poll loop and packed delivery.
//!
//! Every remote call made here goes through the client's [`RetryPolicy`].
//! Operations whose failure status is in the suppression set return the
//! type's default value (`false`, `0` or an empty list) instead of an error.

use crate::batcher::MessageBatcher;
use crate::config::{PollingConfig, QueueClientConfig};
use crate::entity::EntityRef;
use crate::error::{ConfigurationError, DeleteFailure, QueueError, ValidationError};
use crate::message::{encode_body, Message, QueueInfo, QueueName};
use crate::retry::{poll_backoff, RetryOutcome, RetryPolicy};
use crate::service::{QueueService, MAX_MESSAGES_PER_REQUEST};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::borrow::Cow;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

#[cfg(test)]
#[path = "client_tests.rs"]
mod tests;

// ============================================================================
// Options
// ============================================================================

/// Options for retrieving messages
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetMessagesOptions {
    /// Messages requested per fetch (1..=32)
    pub count: u32,
    /// How long dequeued messages stay hidden; service default when `None`
    pub visibility_timeout: Option<Duration>,
    /// Base64-decode message bodies
    pub decode_base64: bool,
    /// Keep polling until something arrives; otherwise fetch exactly once
    pub blocking: bool,
    /// Upper bound for the wait between empty fetches
    pub max_backoff: Duration,
}

impl Default for GetMessagesOptions {
    fn default() -> Self {
        Self {
            count: MAX_MESSAGES_PER_REQUEST,
            visibility_timeout: None,
            decode_base64: true,
            blocking: true,
            max_backoff: Duration::from_secs(120),
        }
    }
}

impl GetMessagesOptions {
    pub fn from_config(config: &PollingConfig) -> Self {
        Self {
            count: config.batch_size,
            visibility_timeout: config.visibility_timeout_seconds.map(Duration::from_secs),
            max_backoff: Duration::from_secs(config.max_backoff_seconds),
            ..Self::default()
        }
    }

    pub fn with_count(mut self, count: u32) -> Self {
        self.count = count;
        self
    }

    pub fn with_visibility_timeout(mut self, timeout: Duration) -> Self {
        self.visibility_timeout = Some(timeout);
        self
    }

    pub fn with_decode_base64(mut self, decode: bool) -> Self {
        self.decode_base64 = decode;
        self
    }

    pub fn with_max_backoff(mut self, max_backoff: Duration) -> Self {
        self.max_backoff = max_backoff;
        self
    }

    /// Fetch once and return whatever is there
    pub fn non_blocking(mut self) -> Self {
        self.blocking = false;
        self
    }

    fn validate(&self) -> Result<(), ValidationError> {
        validate_count(self.count)
    }
}

fn validate_count(count: u32) -> Result<(), ValidationError> {
    if count == 0 || count > MAX_MESSAGES_PER_REQUEST {
        return Err(ValidationError::OutOfRange {
            field: "count".to_string(),
            message: format!("must be between 1 and {MAX_MESSAGES_PER_REQUEST}, got {count}"),
        });
    }
    Ok(())
}

// ============================================================================
// QueueClient
// ============================================================================

/// Client bound to one (optional) queue on a [`QueueService`]
pub struct QueueClient {
    entity: EntityRef,
    retry: RetryPolicy,
    polling: GetMessagesOptions,
    encode_base64: bool,
    batcher: MessageBatcher,
}

impl QueueClient {
    pub fn new(entity: EntityRef, config: &QueueClientConfig) -> Self {
        Self {
            entity,
            retry: config.retry.policy(),
            polling: GetMessagesOptions::from_config(&config.polling),
            encode_base64: config.encode_base64,
            batcher: MessageBatcher::new(
                config.batching.flush_interval(),
                config.batching.max_batch_bytes,
                Instant::now(),
            ),
        }
    }

    /// Replace the retry policy used for every remote call
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Polling options built from configuration
    pub fn default_get_options(&self) -> GetMessagesOptions {
        self.polling.clone()
    }

    pub fn name(&self) -> Option<&QueueName> {
        self.entity.name()
    }

    /// Point the client at another queue, or at none.
    ///
    /// Payloads still pending in the batcher are delivered to whichever queue
    /// is selected when they are flushed.
    pub fn select(&mut self, name: Option<&str>) -> Result<(), QueueError> {
        self.entity.select(name)?;
        Ok(())
    }

    /// Payloads accepted by [`QueueClient::push_packed`] but not yet delivered
    pub fn pending_payloads(&self) -> usize {
        self.batcher.pending_payloads()
    }

    // ------------------------------------------------------------------------
    // Queue management
    // ------------------------------------------------------------------------

    /// Check whether the selected queue exists.
    ///
    /// The service lists queues by prefix; only a queue with exactly the
    /// selected name counts, so `orders-dlq` does not make `orders` exist.
    pub async fn exists(&self) -> Result<bool, QueueError> {
        let name = self.entity.require_name()?.as_str();
        let service = self.entity.service();

        let queues = self
            .retry
            .run("exists", move || service.list_queues(Some(name)))
            .await?
            .completed_or_default();

        Ok(queues.iter().any(|queue| queue.name == name))
    }

    /// Create the selected queue.
    ///
    /// Returns `false` when the queue already existed and `fail_if_exists`
    /// is not set.
    pub async fn create(&self, fail_if_exists: bool) -> Result<bool, QueueError> {
        let name = self.entity.require_name()?.as_str();
        let service = self.entity.service();

        let created = self
            .retry
            .run("create", move || service.create_queue(name, fail_if_exists))
            .await?
            .completed_or_default();

        if created {
            info!(queue = name, "Queue created");
        }
        Ok(created)
    }

    /// Delete the selected queue.
    ///
    /// With `fail_if_missing` unset a missing queue is not an error and the
    /// call returns `false`.
    pub async fn delete(&self, fail_if_missing: bool) -> Result<bool, QueueError> {
        let name = self.entity.require_name()?.as_str();
        let service = self.entity.service();

        let policy = if fail_if_missing {
            Cow::Borrowed(&self.retry)
        } else {
            Cow::Owned(self.retry.clone().with_suppressed(404))
        };

        let deleted = policy
            .run("delete", move || service.delete_queue(name, fail_if_missing))
            .await?
            .completed_or_default();

        if deleted {
            info!(queue = name, "Queue deleted");
        }
        Ok(deleted)
    }

    /// Approximate number of messages in the selected queue
    pub async fn size(&self) -> Result<u64, QueueError> {
        let name = self.entity.require_name()?.as_str();
        let service = self.entity.service();

        Ok(self
            .retry
            .run("size", move || service.get_queue_metadata(name))
            .await?
            .completed()
            .map(|metadata| metadata.approximate_message_count)
            .unwrap_or_default())
    }

    /// Remove every message from the selected queue
    pub async fn purge(&self) -> Result<bool, QueueError> {
        let name = self.entity.require_name()?.as_str();
        let service = self.entity.service();

        let outcome = self
            .retry
            .run("purge", move || service.clear_messages(name))
            .await?;

        Ok(!outcome.is_suppressed())
    }

    /// List every queue on the service; no queue needs to be selected
    pub async fn list_queues(&self) -> Result<Vec<QueueInfo>, QueueError> {
        let service = self.entity.service();

        Ok(self
            .retry
            .run("list_queues", move || service.list_queues(None))
            .await?
            .completed_or_default())
    }

    // ------------------------------------------------------------------------
    // Reading
    // ------------------------------------------------------------------------

    /// Retrieve messages, polling with backoff while the queue is empty
    pub async fn get_messages(
        &self,
        options: &GetMessagesOptions,
    ) -> Result<Vec<Message>, QueueError> {
        self.get_messages_until(options, || true).await
    }

    /// Retrieve messages, polling while the queue is empty and
    /// `keep_polling` returns true.
    ///
    /// `keep_polling` is evaluated before every fetch; once it returns false
    /// the call returns an empty list. A non-blocking call fetches once.
    pub async fn get_messages_until<F>(
        &self,
        options: &GetMessagesOptions,
        mut keep_polling: F,
    ) -> Result<Vec<Message>, QueueError>
    where
        F: FnMut() -> bool,
    {
        let name = self.entity.require_name()?.as_str();
        options.validate()?;

        let service = self.entity.service();
        let count = options.count;
        let visibility_timeout = options.visibility_timeout;
        let mut attempt = 0u32;

        loop {
            if !keep_polling() {
                debug!(queue = name, attempts = attempt, "Polling stopped");
                return Ok(Vec::new());
            }

            let records = self
                .retry
                .run("get_messages", move || {
                    service.get_messages(name, count, visibility_timeout)
                })
                .await?
                .completed_or_default();

            if !records.is_empty() {
                return records
                    .into_iter()
                    .map(|record| {
                        Message::from_service(record, options.decode_base64)
                            .map_err(QueueError::from)
                    })
                    .collect();
            }

            if !options.blocking {
                return Ok(Vec::new());
            }

            attempt = attempt.saturating_add(1);
            let delay = poll_backoff(attempt, options.max_backoff);
            debug!(
                queue = name,
                attempt = attempt,
                delay_secs = delay.as_secs(),
                "Queue empty, backing off"
            );
            tokio::time::sleep(delay).await;
        }
    }

    /// Read up to `count` messages without dequeuing them
    pub async fn peek_messages(
        &self,
        count: u32,
        decode_base64: bool,
    ) -> Result<Vec<Message>, QueueError> {
        let name = self.entity.require_name()?.as_str();
        validate_count(count)?;
        let service = self.entity.service();

        let records = self
            .retry
            .run("peek_messages", move || service.peek_messages(name, count))
            .await?
            .completed_or_default();

        records
            .into_iter()
            .map(|record| Message::from_service(record, decode_base64).map_err(QueueError::from))
            .collect()
    }

    /// Retrieve messages and delete them from the queue
    pub async fn pop_messages(
        &self,
        options: &GetMessagesOptions,
    ) -> Result<Vec<Message>, QueueError> {
        self.pop_messages_until(options, || true).await
    }

    /// [`QueueClient::pop_messages`] with a polling predicate.
    ///
    /// Every retrieved message gets its own delete attempt. When any delete
    /// fails the result is [`QueueError::DeleteFailed`], carrying both the
    /// deleted messages and the failures. A delete whose failure status is
    /// suppressed was not acknowledged and is reported as a failure with
    /// [`QueueError::DeleteSuppressed`].
    pub async fn pop_messages_until<F>(
        &self,
        options: &GetMessagesOptions,
        keep_polling: F,
    ) -> Result<Vec<Message>, QueueError>
    where
        F: FnMut() -> bool,
    {
        let messages = self.get_messages_until(options, keep_polling).await?;

        let mut deleted = Vec::with_capacity(messages.len());
        let mut failures = Vec::new();

        for message in messages {
            match self.remove(&message).await {
                Ok(()) => deleted.push(message),
                Err(error) => failures.push(delete_failure(message, error)),
            }
        }

        if failures.is_empty() {
            Ok(deleted)
        } else {
            Err(QueueError::DeleteFailed { deleted, failures })
        }
    }

    /// Pop packed messages and return their payloads in order
    pub async fn pop_packed_messages<T: DeserializeOwned>(
        &self,
        options: &GetMessagesOptions,
    ) -> Result<Vec<T>, QueueError> {
        self.pop_packed_messages_until(options, || true).await
    }

    /// [`QueueClient::pop_packed_messages`] with a polling predicate.
    ///
    /// Each body is unpacked before its message is deleted. A message whose
    /// body does not unpack is left on the queue and becomes visible again
    /// once its visibility timeout lapses. The call fails with
    /// [`QueueError::Decode`] only when no retrieved message unpacked.
    pub async fn pop_packed_messages_until<T, F>(
        &self,
        options: &GetMessagesOptions,
        keep_polling: F,
    ) -> Result<Vec<T>, QueueError>
    where
        T: DeserializeOwned,
        F: FnMut() -> bool,
    {
        let messages = self.get_messages_until(options, keep_polling).await?;

        let mut payloads = Vec::new();
        let mut deleted = Vec::with_capacity(messages.len());
        let mut failures = Vec::new();
        let mut undecodable = None;

        for message in messages {
            let unpacked = match message.unpack::<T>() {
                Ok(unpacked) => unpacked,
                Err(error) => {
                    warn!(
                        message_id = %message.id,
                        error = %error,
                        "Packed body does not unpack, leaving message on the queue"
                    );
                    undecodable.get_or_insert(error);
                    continue;
                }
            };

            match self.remove(&message).await {
                Ok(()) => {
                    payloads.extend(unpacked);
                    deleted.push(message);
                }
                Err(error) => failures.push(delete_failure(message, error)),
            }
        }

        if !failures.is_empty() {
            return Err(QueueError::DeleteFailed { deleted, failures });
        }
        match undecodable {
            Some(error) if deleted.is_empty() => Err(error.into()),
            _ => Ok(payloads),
        }
    }

    /// Delete one dequeued message.
    ///
    /// The message must carry an id and a pop receipt; otherwise the call
    /// fails without contacting the service.
    pub async fn delete_message(&self, message: &Message) -> Result<bool, QueueError> {
        match self.remove(message).await {
            Ok(()) => Ok(true),
            Err(QueueError::DeleteSuppressed { .. }) => Ok(false),
            Err(error) => Err(error),
        }
    }

    /// Delete one message; a suppressed failure is an unacknowledged delete.
    async fn remove(&self, message: &Message) -> Result<(), QueueError> {
        let name = self.entity.require_name()?.as_str();

        if message.id.is_empty() {
            return Err(QueueError::PreconditionFailed {
                field: "message_id".to_string(),
            });
        }
        let pop_receipt = message
            .pop_receipt
            .as_ref()
            .ok_or_else(|| QueueError::PreconditionFailed {
                field: "pop_receipt".to_string(),
            })?
            .as_str();

        let message_id = message.id.as_str();
        let service = self.entity.service();

        let outcome = self
            .retry
            .run("delete_message", move || {
                service.delete_message(name, message_id, pop_receipt)
            })
            .await?;

        match outcome {
            RetryOutcome::Completed(_) => Ok(()),
            RetryOutcome::Suppressed { status_code } => {
                Err(QueueError::DeleteSuppressed { status_code })
            }
        }
    }

    // ------------------------------------------------------------------------
    // Writing
    // ------------------------------------------------------------------------

    /// Submit one message. Returns `false` when the failure was suppressed.
    pub async fn push(&self, payload: &[u8], encode_base64: bool) -> Result<bool, QueueError> {
        let name = self.entity.require_name()?.as_str();
        let text = encode_body(payload, encode_base64)?;
        let text = text.as_str();
        let service = self.entity.service();

        let outcome = self
            .retry
            .run("push", move || service.put_message(name, text))
            .await?;

        Ok(!outcome.is_suppressed())
    }

    /// Buffer a payload for packed delivery and send whatever batches the
    /// time and size bounds seal.
    ///
    /// A payload that cannot be serialized fails immediately and leaves the
    /// buffer untouched.
    pub async fn push_packed<T: Serialize + ?Sized>(&mut self, payload: &T) -> Result<(), QueueError> {
        self.entity.require_name()?;
        self.batcher.offer(payload, Instant::now())?;
        self.deliver_sealed().await?;
        Ok(())
    }

    /// Seal the buffer and deliver every pending batch.
    ///
    /// Returns the number of payloads delivered.
    pub async fn flush(&mut self) -> Result<usize, QueueError> {
        self.entity.require_name()?;
        self.batcher.seal(Instant::now());
        let delivered = self.deliver_sealed().await?;

        if delivered > 0 {
            info!(
                queue = ?self.entity.name(),
                payloads = delivered,
                "Flushed packed messages"
            );
        }
        Ok(delivered)
    }

    /// Push sealed batches oldest first, acknowledging each on success.
    ///
    /// A suppressed push, or a transient failure that outlived its retries,
    /// leaves that batch and every later one in the backlog for the next
    /// attempt. Any other failure is final for that batch: it leaves the
    /// backlog and comes back to the caller in [`QueueError::BatchRejected`].
    async fn deliver_sealed(&mut self) -> Result<usize, QueueError> {
        let mut delivered = 0;

        while let Some((body, payloads)) = self
            .batcher
            .next_sealed()
            .map(|batch| (batch.body(), batch.len()))
        {
            match self.push(body.as_bytes(), self.encode_base64).await {
                Ok(true) => {}
                Ok(false) => {
                    warn!(
                        queue = ?self.entity.name(),
                        payloads = payloads,
                        "Packed push suppressed, batch kept for the next flush"
                    );
                    break;
                }
                Err(error) if error.is_retriable() => return Err(error),
                Err(error) => {
                    warn!(
                        queue = ?self.entity.name(),
                        payloads = payloads,
                        error = %error,
                        "Packed batch refused by the service, dropping it from the backlog"
                    );
                    return Err(match self.batcher.reject() {
                        Some(batch) => QueueError::BatchRejected {
                            batch,
                            error: Box::new(error),
                        },
                        None => error,
                    });
                }
            }

            self.batcher.acknowledge();
            delivered += payloads;
            debug!(
                queue = ?self.entity.name(),
                payloads = payloads,
                bytes = body.len(),
                "Delivered packed batch"
            );
        }

        Ok(delivered)
    }
}

fn delete_failure(message: Message, error: QueueError) -> DeleteFailure {
    warn!(
        message_id = %message.id,
        error = %error,
        "Failed to delete popped message"
    );
    DeleteFailure { message, error }
}

impl std::fmt::Debug for QueueClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueClient")
            .field("entity", &self.entity)
            .field("retry", &self.retry)
            .field("encode_base64", &self.encode_base64)
            .field("pending_payloads", &self.pending_payloads())
            .finish_non_exhaustive()
    }
}

impl Drop for QueueClient {
    fn drop(&mut self) {
        let pending = self.pending_payloads();
        if pending > 0 {
            warn!(
                queue = ?self.entity.name(),
                pending_payloads = pending,
                "Queue client dropped with undelivered payloads; call flush() before shutdown"
            );
        }
    }
}

// ============================================================================
// QueueClientFactory
// ============================================================================

/// Binds a service to a validated configuration and hands out clients
#[derive(Clone)]
pub struct QueueClientFactory {
    service: Arc<dyn QueueService>,
    config: QueueClientConfig,
}

impl QueueClientFactory {
    pub fn new(
        service: Arc<dyn QueueService>,
        config: QueueClientConfig,
    ) -> Result<Self, ConfigurationError> {
        config.validate()?;
        Ok(Self { service, config })
    }

    /// Build a client for `name`, or an unbound client for account-level calls
    pub fn queue(&self, name: Option<&str>) -> Result<QueueClient, QueueError> {
        let entity = EntityRef::new(Arc::clone(&self.service), name)?;
        Ok(QueueClient::new(entity, &self.config))
    }

    pub fn config(&self) -> &QueueClientConfig {
        &self.config
    }
}

impl std::fmt::Debug for QueueClientFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueClientFactory")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
