//! Consumer abstraction over the broker client
//!
//! The pipeline never talks to the broker library directly; it goes
//! through [`RecordConsumer`], a small polymorphic seam with exactly one
//! production implementation ([`KafkaRecordConsumer`]) and in-memory test
//! doubles that replay a fixed queue.

mod kafka;

pub use kafka::KafkaRecordConsumer;

use async_trait::async_trait;

use crate::envelope::RecordMetadata;
use crate::error::Result;

/// A raw record pulled from the broker, before envelope wrapping
#[derive(Debug, Clone, PartialEq)]
pub struct ConsumedRecord<K, V> {
    /// Record key
    pub key: K,

    /// Record value
    pub value: V,

    /// Source log position
    pub metadata: RecordMetadata,
}

/// Pull-based consumer over a partitioned log
///
/// The handle owns the underlying connection. Errors returned here are
/// structural: they describe the consume loop itself, not one message,
/// and the processor lets them propagate to the host.
#[async_trait]
pub trait RecordConsumer<K, V>: Send {
    /// Subscribe to the configured topic(s); idempotent
    async fn subscribe(&mut self) -> Result<()>;

    /// Pull the next record; `None` signals the end of the stream
    async fn next_record(&mut self) -> Result<Option<ConsumedRecord<K, V>>>;

    /// Mark the given record's offset as processed
    ///
    /// Called at most once per record, in consumption order.
    async fn commit(&mut self, metadata: &RecordMetadata) -> Result<()>;

    /// Release underlying connections; idempotent
    async fn close(&mut self) -> Result<()>;
}
