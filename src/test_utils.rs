//! Test utilities for PipeForge
//!
//! This module provides deterministic test doubles: an in-memory consumer
//! replaying a fixed queue, recording/failing middlewares, a collecting
//! dead-letter publisher, and a manually advanced clock.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

use crate::clock::Clock;
use crate::consumer::{ConsumedRecord, RecordConsumer};
use crate::envelope::{MessageEnvelope, RecordMetadata};
use crate::error::{Error, Result};
use crate::middleware::{DeadLetterPublisher, DeadLetterRecord, MessageMiddleware, Next};

/// Build a string-keyed test record on partition 0 of topic "events"
pub fn test_record(key: &str, value: &str, offset: i64) -> ConsumedRecord<String, String> {
    ConsumedRecord {
        key: key.to_string(),
        value: value.to_string(),
        metadata: RecordMetadata {
            topic: "events".to_string(),
            partition: 0,
            offset,
            timestamp: None,
        },
    }
}

/// Build a standalone test envelope
pub fn test_envelope(key: &str, value: &str, offset: i64) -> MessageEnvelope<String, String> {
    let record = test_record(key, value, offset);
    MessageEnvelope::new(
        record.key,
        record.value,
        record.metadata,
        CancellationToken::new(),
    )
}

/// In-memory consumer replaying a fixed queue of records
///
/// Tracks subscribe, commit and close calls through shared handles so
/// tests keep visibility after the processor takes ownership.
pub struct InMemoryConsumer<K, V> {
    pending: VecDeque<ConsumedRecord<K, V>>,
    subscribe_calls: Arc<Mutex<u32>>,
    committed: Arc<Mutex<Vec<RecordMetadata>>>,
    close_calls: Arc<Mutex<u32>>,
    fail_next_commit: Option<String>,
    closed: bool,
}

impl<K, V> InMemoryConsumer<K, V> {
    /// Create a consumer that will yield the given records in order
    pub fn new(records: Vec<ConsumedRecord<K, V>>) -> Self {
        Self {
            pending: records.into(),
            subscribe_calls: Arc::new(Mutex::new(0)),
            committed: Arc::new(Mutex::new(Vec::new())),
            close_calls: Arc::new(Mutex::new(0)),
            fail_next_commit: None,
            closed: false,
        }
    }

    /// Shared handle to the committed offsets, in commit order
    pub fn committed_handle(&self) -> Arc<Mutex<Vec<RecordMetadata>>> {
        Arc::clone(&self.committed)
    }

    /// Shared handle to the close-call counter
    pub fn close_count_handle(&self) -> Arc<Mutex<u32>> {
        Arc::clone(&self.close_calls)
    }

    /// Shared handle to the subscribe-call counter
    pub fn subscribe_count_handle(&self) -> Arc<Mutex<u32>> {
        Arc::clone(&self.subscribe_calls)
    }

    /// Make the next commit call fail with the given message
    pub fn fail_next_commit(&mut self, message: &str) {
        self.fail_next_commit = Some(message.to_string());
    }
}

#[async_trait]
impl<K, V> RecordConsumer<K, V> for InMemoryConsumer<K, V>
where
    K: Send,
    V: Send,
{
    async fn subscribe(&mut self) -> Result<()> {
        *self.subscribe_calls.lock().unwrap() += 1;
        Ok(())
    }

    async fn next_record(&mut self) -> Result<Option<ConsumedRecord<K, V>>> {
        if self.closed {
            return Ok(None);
        }
        Ok(self.pending.pop_front())
    }

    async fn commit(&mut self, metadata: &RecordMetadata) -> Result<()> {
        if let Some(message) = self.fail_next_commit.take() {
            return Err(Error::commit(message));
        }
        self.committed.lock().unwrap().push(metadata.clone());
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        if !self.closed {
            self.closed = true;
        }
        *self.close_calls.lock().unwrap() += 1;
        Ok(())
    }
}

/// Middleware recording every key it sees, optionally failing on one key
pub struct RecordingMiddleware {
    name: &'static str,
    seen: Arc<Mutex<Vec<String>>>,
    fail_on_key: Option<String>,
}

impl RecordingMiddleware {
    /// Create a middleware that passes every message through
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            seen: Arc::new(Mutex::new(Vec::new())),
            fail_on_key: None,
        }
    }

    /// Create a middleware that errors whenever it sees the given key
    pub fn failing_on(name: &'static str, key: &str) -> Self {
        Self {
            name,
            seen: Arc::new(Mutex::new(Vec::new())),
            fail_on_key: Some(key.to_string()),
        }
    }

    /// Shared handle to the keys seen, in invocation order
    pub fn seen_handle(&self) -> Arc<Mutex<Vec<String>>> {
        Arc::clone(&self.seen)
    }
}

#[async_trait]
impl MessageMiddleware<String, String> for RecordingMiddleware {
    async fn handle(
        &self,
        envelope: MessageEnvelope<String, String>,
        next: Next<'_, String, String>,
    ) -> Result<MessageEnvelope<String, String>> {
        self.seen.lock().unwrap().push(envelope.key.clone());

        if self.fail_on_key.as_deref() == Some(envelope.key.as_str()) {
            return Err(Error::processing(format!(
                "{} rejected key {}",
                self.name, envelope.key
            )));
        }

        next.run(envelope).await
    }
}

/// Middleware that marks every envelope failed without erroring
pub struct VetoMiddleware;

#[async_trait]
impl MessageMiddleware<String, String> for VetoMiddleware {
    async fn handle(
        &self,
        envelope: MessageEnvelope<String, String>,
        _next: Next<'_, String, String>,
    ) -> Result<MessageEnvelope<String, String>> {
        Ok(envelope.into_failed())
    }
}

/// Dead-letter publisher collecting records in memory
pub struct CollectingPublisher {
    records: Mutex<Vec<DeadLetterRecord>>,
    fail_next: Mutex<Option<String>>,
}

impl Default for CollectingPublisher {
    fn default() -> Self {
        Self::new()
    }
}

impl CollectingPublisher {
    /// Create an empty publisher
    pub fn new() -> Self {
        Self {
            records: Mutex::new(Vec::new()),
            fail_next: Mutex::new(None),
        }
    }

    /// All records published so far
    pub fn records(&self) -> Vec<DeadLetterRecord> {
        self.records.lock().unwrap().clone()
    }

    /// Make the next publish call fail with the given message
    pub fn fail_next_publish(&self, message: &str) {
        *self.fail_next.lock().unwrap() = Some(message.to_string());
    }
}

#[async_trait]
impl DeadLetterPublisher for CollectingPublisher {
    async fn publish(&self, record: DeadLetterRecord) -> Result<()> {
        if let Some(message) = self.fail_next.lock().unwrap().take() {
            return Err(Error::dead_letter(message));
        }
        self.records.lock().unwrap().push(record);
        Ok(())
    }
}

/// Manually advanced clock for deterministic elapsed-time tests
pub struct ManualClock {
    origin: Instant,
    offset: Mutex<Duration>,
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ManualClock {
    /// Create a clock frozen at its origin
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            offset: Mutex::new(Duration::ZERO),
        }
    }

    /// Advance the clock by the given duration
    pub fn advance(&self, by: Duration) {
        *self.offset.lock().unwrap() += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.origin + *self.offset.lock().unwrap()
    }
}
