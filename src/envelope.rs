//! Message envelope flowing through the middleware chain

use tokio_util::sync::CancellationToken;

/// Position of a consumed record in the source log
///
/// Opaque to middleware; the processor uses it only to commit the offset
/// after successful processing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordMetadata {
    /// Originating topic
    pub topic: String,

    /// Source partition
    pub partition: i32,

    /// Offset within the partition
    pub offset: i64,

    /// Broker timestamp in milliseconds, if present
    pub timestamp: Option<i64>,
}

/// A single consumed record as it flows through the middleware chain
///
/// The envelope is a pure data holder: key, value and metadata are
/// read-only by contract, and only the `failed` flag may change — and only
/// from `false` to `true`. A middleware that wants to veto the commit
/// without raising an error returns a copy via [`into_failed`].
///
/// [`into_failed`]: MessageEnvelope::into_failed
#[derive(Debug, Clone)]
pub struct MessageEnvelope<K, V> {
    /// Record key
    pub key: K,

    /// Record value
    pub value: V,

    /// Source log position
    pub metadata: RecordMetadata,

    /// Cancellation handle scoped to the current consume-loop iteration
    pub cancellation: CancellationToken,

    failed: bool,
}

impl<K, V> MessageEnvelope<K, V> {
    /// Create a fresh envelope with the failed flag cleared
    pub fn new(key: K, value: V, metadata: RecordMetadata, cancellation: CancellationToken) -> Self {
        Self {
            key,
            value,
            metadata,
            cancellation,
            failed: false,
        }
    }

    /// Whether processing of this record has failed
    pub fn failed(&self) -> bool {
        self.failed
    }

    /// Consume the envelope, returning it marked as failed
    pub fn into_failed(mut self) -> Self {
        self.failed = true;
        self
    }

    /// Mark the envelope as failed in place
    pub fn mark_failed(&mut self) {
        self.failed = true;
    }
}

impl<K: PartialEq, V: PartialEq> PartialEq for MessageEnvelope<K, V> {
    fn eq(&self, other: &Self) -> bool {
        // Cancellation tokens carry no identity worth comparing
        self.key == other.key
            && self.value == other.value
            && self.metadata == other.metadata
            && self.failed == other.failed
    }
}
