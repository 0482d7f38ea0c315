//! # Outgoing Message Batching
//!
//! Coalesces small payloads into packed messages: one wire message whose body
//! is a JSON array of payloads. The batcher only decides *when* a batch is
//! sealed; delivery is the client's job. Sealed batches wait in a backlog
//! until the client acknowledges that the service accepted them, so a failed
//! push never loses payloads.
//!
//! There is no background timer. A buffer that stops receiving payloads is
//! sealed by the next [`MessageBatcher::offer`] or by an explicit
//! [`MessageBatcher::seal`].

use crate::error::SerializationError;
use serde::Serialize;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

#[cfg(test)]
#[path = "batcher_tests.rs"]
mod tests;

/// A group of payloads sent as a single packed message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackedBatch {
    fragments: Vec<String>,
}

impl PackedBatch {
    fn single(fragment: String) -> Self {
        Self {
            fragments: vec![fragment],
        }
    }

    /// The packed message body: a JSON array of the payloads in offer order
    pub fn body(&self) -> String {
        format!("[{}]", self.fragments.join(","))
    }

    /// Number of payloads in the batch
    pub fn len(&self) -> usize {
        self.fragments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }

    /// Serialized payloads in offer order
    pub fn fragments(&self) -> &[String] {
        &self.fragments
    }

    /// Size of [`PackedBatch::body`] in bytes
    pub fn packed_len(&self) -> usize {
        packed_len(self.fragments.iter().map(String::len))
    }
}

/// Time- and size-bounded buffer of serialized payloads
#[derive(Debug)]
pub struct MessageBatcher {
    flush_interval: Duration,
    max_batch_bytes: usize,
    buffer: Vec<String>,
    buffered_bytes: usize,
    backlog: VecDeque<PackedBatch>,
    last_flush: Instant,
}

impl MessageBatcher {
    pub fn new(flush_interval: Duration, max_batch_bytes: usize, now: Instant) -> Self {
        Self {
            flush_interval,
            max_batch_bytes,
            buffer: Vec::new(),
            buffered_bytes: 0,
            backlog: VecDeque::new(),
            last_flush: now,
        }
    }

    /// Add a payload, sealing batches as the time and size bounds require.
    ///
    /// Returns the number of batches sealed by this call. The payload is
    /// serialized and measured before anything else happens: a payload that
    /// cannot be serialized, or that would not fit in a batch on its own, is
    /// rejected with the buffer and the backlog untouched.
    pub fn offer<T: Serialize + ?Sized>(
        &mut self,
        payload: &T,
        now: Instant,
    ) -> Result<usize, SerializationError> {
        let fragment = serde_json::to_string(payload)?;
        let size = packed_len([fragment.len()]);
        if size > self.max_batch_bytes {
            return Err(SerializationError::PayloadTooLarge {
                size,
                limit: self.max_batch_bytes,
            });
        }

        let sealed_before = self.backlog.len();

        if now.saturating_duration_since(self.last_flush) >= self.flush_interval {
            self.seal_buffer();
            self.backlog.push_back(PackedBatch::single(fragment));
            self.last_flush = now;
        } else if self.len_with(&fragment) > self.max_batch_bytes {
            self.seal_buffer();
            self.last_flush = now;
            self.append(fragment);
        } else {
            self.append(fragment);
        }

        let sealed = self.backlog.len() - sealed_before;
        if sealed > 0 {
            debug!(
                sealed = sealed,
                backlog = self.backlog.len(),
                "Sealed packed batches"
            );
        }
        Ok(sealed)
    }

    /// Seal whatever is buffered, regardless of the bounds.
    ///
    /// Returns the number of payloads sealed.
    pub fn seal(&mut self, now: Instant) -> usize {
        let sealed = self.seal_buffer();
        self.last_flush = now;
        sealed
    }

    /// Oldest sealed batch not yet acknowledged
    pub fn next_sealed(&self) -> Option<&PackedBatch> {
        self.backlog.front()
    }

    /// Drop the oldest sealed batch after successful delivery
    pub fn acknowledge(&mut self) -> Option<PackedBatch> {
        self.backlog.pop_front()
    }

    /// Take the oldest sealed batch back out after the service refused it
    /// for good, so the batches behind it can still be delivered.
    pub fn reject(&mut self) -> Option<PackedBatch> {
        let batch = self.backlog.pop_front();
        if let Some(batch) = &batch {
            debug!(
                payloads = batch.len(),
                backlog = self.backlog.len(),
                "Rejected packed batch removed from backlog"
            );
        }
        batch
    }

    /// Payloads not yet delivered, buffered or sealed
    pub fn pending_payloads(&self) -> usize {
        self.buffer.len() + self.backlog.iter().map(PackedBatch::len).sum::<usize>()
    }

    pub fn buffered_payloads(&self) -> usize {
        self.buffer.len()
    }

    /// Packed size of the open buffer in bytes (0 when empty)
    pub fn buffered_bytes(&self) -> usize {
        self.buffered_bytes
    }

    pub fn sealed_batches(&self) -> usize {
        self.backlog.len()
    }

    fn len_with(&self, fragment: &str) -> usize {
        if self.buffer.is_empty() {
            packed_len([fragment.len()])
        } else {
            self.buffered_bytes + 1 + fragment.len()
        }
    }

    fn append(&mut self, fragment: String) {
        self.buffered_bytes = self.len_with(&fragment);
        self.buffer.push(fragment);
    }

    fn seal_buffer(&mut self) -> usize {
        if self.buffer.is_empty() {
            return 0;
        }

        let fragments = std::mem::take(&mut self.buffer);
        let sealed = fragments.len();
        self.buffered_bytes = 0;
        self.backlog.push_back(PackedBatch { fragments });
        sealed
    }
}

/// Length of `[a,b,c]` for fragments of the given lengths
fn packed_len<I>(lengths: I) -> usize
where
    I: IntoIterator<Item = usize>,
{
    let (count, total) = lengths
        .into_iter()
        .fold((0usize, 0usize), |(count, total), len| (count + 1, total + len));
    2 + total + count.saturating_sub(1)
}
