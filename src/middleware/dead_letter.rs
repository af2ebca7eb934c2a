//! Dead-letter middleware
//!
//! The processor never retries a failed message in place; re-queueing is a
//! middleware concern. This middleware snapshots every failed record and
//! re-publishes it to a dead-letter topic so operators can inspect or
//! replay it later. Publish failures are logged, never escalated — the
//! message is already failed.

use async_trait::async_trait;
use backoff::ExponentialBackoff;
use chrono::{DateTime, Utc};
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::ClientConfig;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

use super::{MessageMiddleware, Next};
use crate::envelope::MessageEnvelope;
use crate::error::{Error, Result};

/// Serialized snapshot of a record that failed processing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetterRecord {
    /// Topic the record was consumed from
    pub source_topic: String,

    /// Source partition
    pub partition: i32,

    /// Source offset
    pub offset: i64,

    /// Record key as JSON
    pub key: Value,

    /// Record value as JSON
    pub value: Value,

    /// Error description
    pub error: String,

    /// When the failure was observed
    pub failed_at: DateTime<Utc>,
}

/// Sink for dead-lettered records
#[async_trait]
pub trait DeadLetterPublisher: Send + Sync {
    /// Publish one failed record
    async fn publish(&self, record: DeadLetterRecord) -> Result<()>;
}

/// Production publisher writing to a Kafka dead-letter topic
///
/// Sends are retried with exponential backoff for a bounded interval; the
/// producer should be configured idempotent so retries cannot duplicate.
pub struct KafkaDeadLetterPublisher {
    producer: FutureProducer,
    topic: String,
    send_timeout: Duration,
}

impl KafkaDeadLetterPublisher {
    /// Create a publisher from an rdkafka producer configuration
    pub fn new(config: ClientConfig, topic: String) -> Result<Self> {
        let producer: FutureProducer = config.create()?;

        Ok(Self {
            producer,
            topic,
            send_timeout: Duration::from_secs(30),
        })
    }
}

#[async_trait]
impl DeadLetterPublisher for KafkaDeadLetterPublisher {
    async fn publish(&self, record: DeadLetterRecord) -> Result<()> {
        let payload = serde_json::to_string(&record)?;
        let key = format!("{}-{}", record.partition, record.offset);

        let backoff = ExponentialBackoff {
            max_elapsed_time: Some(Duration::from_secs(10)),
            ..Default::default()
        };

        let operation = || async {
            let future_record = FutureRecord::to(&self.topic).payload(&payload).key(&key);
            match self.producer.send(future_record, self.send_timeout).await {
                Ok(_) => Ok(()),
                Err((kafka_error, _)) => Err(backoff::Error::transient(Error::dead_letter(
                    format!("Failed to send to dead-letter topic: {}", kafka_error),
                ))),
            }
        };

        backoff::future::retry(backoff, operation).await?;

        info!(
            topic = %self.topic,
            source_partition = record.partition,
            source_offset = record.offset,
            "Record dead-lettered"
        );

        Ok(())
    }
}

/// Middleware that dead-letters every record the inner chain fails on
pub struct DeadLetterMiddleware {
    publisher: Arc<dyn DeadLetterPublisher>,
}

impl DeadLetterMiddleware {
    /// Create the middleware around a publisher
    pub fn new(publisher: Arc<dyn DeadLetterPublisher>) -> Self {
        Self { publisher }
    }

    async fn dead_letter<K, V>(&self, envelope: &MessageEnvelope<K, V>, reason: String)
    where
        K: Serialize,
        V: Serialize,
    {
        let record = DeadLetterRecord {
            source_topic: envelope.metadata.topic.clone(),
            partition: envelope.metadata.partition,
            offset: envelope.metadata.offset,
            key: serde_json::to_value(&envelope.key).unwrap_or(Value::Null),
            value: serde_json::to_value(&envelope.value).unwrap_or(Value::Null),
            error: reason,
            failed_at: Utc::now(),
        };

        if let Err(publish_err) = self.publisher.publish(record).await {
            error!(
                topic = %envelope.metadata.topic,
                partition = envelope.metadata.partition,
                offset = envelope.metadata.offset,
                error = %publish_err,
                "Failed to dead-letter record"
            );
        }
    }
}

#[async_trait]
impl<K, V> MessageMiddleware<K, V> for DeadLetterMiddleware
where
    K: Clone + Serialize + Send + Sync + 'static,
    V: Clone + Serialize + Send + Sync + 'static,
{
    async fn handle(
        &self,
        envelope: MessageEnvelope<K, V>,
        next: Next<'_, K, V>,
    ) -> Result<MessageEnvelope<K, V>> {
        let checkpoint = envelope.clone();

        match next.run(envelope).await {
            Ok(result) if !result.failed() => Ok(result),
            Ok(result) => {
                self.dead_letter(&result, "marked failed by middleware".to_string())
                    .await;
                Ok(result)
            },
            Err(err) => {
                self.dead_letter(&checkpoint, err.to_string()).await;
                // Re-propagate so an outer error boundary still records it
                Err(err)
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::RecordMetadata;
    use crate::middleware::MiddlewareChain;
    use crate::test_utils::CollectingPublisher;
    use tokio_util::sync::CancellationToken;

    fn envelope() -> MessageEnvelope<String, String> {
        MessageEnvelope::new(
            "key1".to_string(),
            "value".to_string(),
            RecordMetadata {
                topic: "events".to_string(),
                partition: 2,
                offset: 9,
                timestamp: None,
            },
            CancellationToken::new(),
        )
    }

    struct AlwaysFails;

    #[async_trait]
    impl MessageMiddleware<String, String> for AlwaysFails {
        async fn handle(
            &self,
            _envelope: MessageEnvelope<String, String>,
            _next: Next<'_, String, String>,
        ) -> Result<MessageEnvelope<String, String>> {
            Err(Error::processing("handler rejected record"))
        }
    }

    #[tokio::test]
    async fn test_dead_letters_on_inner_error_and_repropagates() {
        let publisher = Arc::new(CollectingPublisher::new());
        let chain = MiddlewareChain::new(vec![
            Arc::new(DeadLetterMiddleware::new(
                Arc::clone(&publisher) as Arc<dyn DeadLetterPublisher>
            )) as Arc<dyn MessageMiddleware<String, String>>,
            Arc::new(AlwaysFails),
        ]);

        let result = chain.invoke(envelope()).await;
        assert!(result.is_err());

        let records = publisher.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].source_topic, "events");
        assert_eq!(records[0].partition, 2);
        assert_eq!(records[0].offset, 9);
        assert!(records[0].error.contains("handler rejected record"));
    }

    #[tokio::test]
    async fn test_success_is_not_dead_lettered() {
        let publisher = Arc::new(CollectingPublisher::new());
        let chain = MiddlewareChain::new(vec![Arc::new(DeadLetterMiddleware::new(
            Arc::clone(&publisher) as Arc<dyn DeadLetterPublisher>,
        ))
            as Arc<dyn MessageMiddleware<String, String>>]);

        let output = chain.invoke(envelope()).await.unwrap();
        assert!(!output.failed());
        assert!(publisher.records().is_empty());
    }

    #[tokio::test]
    async fn test_publish_failure_does_not_mask_processing_error() {
        let publisher = Arc::new(CollectingPublisher::new());
        publisher.fail_next_publish("sink unavailable");

        let chain = MiddlewareChain::new(vec![
            Arc::new(DeadLetterMiddleware::new(
                Arc::clone(&publisher) as Arc<dyn DeadLetterPublisher>
            )) as Arc<dyn MessageMiddleware<String, String>>,
            Arc::new(AlwaysFails),
        ]);

        let result = chain.invoke(envelope()).await;
        match result {
            Err(Error::Processing(msg)) => assert!(msg.contains("handler rejected record")),
            other => panic!("expected processing error, got {:?}", other.map(|_| ())),
        }
    }
}
