//! Kafka record consumer with manual offset management

use anyhow::anyhow;
use async_trait::async_trait;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::{BorrowedMessage, Message};
use rdkafka::topic_partition_list::TopicPartitionList;
use rdkafka::Offset;
use serde::de::DeserializeOwned;
use std::marker::PhantomData;
use tracing::{debug, info, warn};

use super::{ConsumedRecord, RecordConsumer};
use crate::config::PipelineConfig;
use crate::envelope::RecordMetadata;
use crate::error::{Error, Result};

/// Production consumer wrapping an rdkafka `StreamConsumer`
///
/// Auto-commit is disabled; offsets are committed synchronously, one past
/// the processed record, only when the processor asks for it. Key and
/// value are decoded from JSON.
pub struct KafkaRecordConsumer<K, V> {
    consumer: StreamConsumer,
    topic: String,
    closed: bool,
    _marker: PhantomData<fn() -> (K, V)>,
}

impl<K, V> KafkaRecordConsumer<K, V>
where
    K: DeserializeOwned + Send,
    V: DeserializeOwned + Send,
{
    /// Create a consumer from pipeline configuration
    pub fn new(config: &PipelineConfig) -> Result<Self> {
        let consumer: StreamConsumer = config
            .build_consumer_config()
            .create()
            .map_err(|e| anyhow!("Failed to create Kafka consumer: {}", e))?;

        Ok(Self {
            consumer,
            topic: config.topic.clone(),
            closed: false,
            _marker: PhantomData,
        })
    }

    fn decode(&self, message: &BorrowedMessage<'_>) -> Result<ConsumedRecord<K, V>> {
        let key_bytes = message
            .key()
            .ok_or_else(|| Error::processing("message has no key"))?;
        let payload = message
            .payload()
            .ok_or_else(|| Error::processing("message has no payload"))?;

        let key: K = serde_json::from_slice(key_bytes)?;
        let value: V = serde_json::from_slice(payload)?;

        Ok(ConsumedRecord {
            key,
            value,
            metadata: RecordMetadata {
                topic: message.topic().to_string(),
                partition: message.partition(),
                offset: message.offset(),
                timestamp: message.timestamp().to_millis(),
            },
        })
    }
}

#[async_trait]
impl<K, V> RecordConsumer<K, V> for KafkaRecordConsumer<K, V>
where
    K: DeserializeOwned + Send,
    V: DeserializeOwned + Send,
{
    async fn subscribe(&mut self) -> Result<()> {
        self.consumer
            .subscribe(&[&self.topic])
            .map_err(|e| Error::consumer(format!("Failed to subscribe to topic: {}", e)))?;

        info!(topic = %self.topic, "Subscribed to topic");
        Ok(())
    }

    async fn next_record(&mut self) -> Result<Option<ConsumedRecord<K, V>>> {
        loop {
            let message = self.consumer.recv().await?;

            match self.decode(&message) {
                Ok(record) => return Ok(Some(record)),
                Err(decode_err) => {
                    // An undecodable payload is a dead record, not a broken
                    // loop: skip it without commit and keep pulling.
                    warn!(
                        topic = message.topic(),
                        partition = message.partition(),
                        offset = message.offset(),
                        error = %decode_err,
                        "Skipping undecodable record"
                    );
                },
            }
        }
    }

    async fn commit(&mut self, metadata: &RecordMetadata) -> Result<()> {
        let mut offsets = TopicPartitionList::new();
        offsets
            .add_partition_offset(
                &metadata.topic,
                metadata.partition,
                Offset::Offset(metadata.offset + 1),
            )
            .map_err(|e| Error::commit(format!("Failed to track offset: {}", e)))?;

        self.consumer
            .commit(&offsets, CommitMode::Sync)
            .map_err(|e| Error::commit(format!("Failed to commit offset: {}", e)))?;

        debug!(
            topic = %metadata.topic,
            partition = metadata.partition,
            offset = metadata.offset,
            "Offset committed"
        );
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.consumer.unsubscribe();
        info!(topic = %self.topic, "Consumer closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_consumer_creation() {
        let config = PipelineConfig::default();
        let result: Result<KafkaRecordConsumer<String, serde_json::Value>> =
            KafkaRecordConsumer::new(&config);
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let config = PipelineConfig::default();
        let mut consumer: KafkaRecordConsumer<String, serde_json::Value> =
            KafkaRecordConsumer::new(&config).unwrap();

        consumer.close().await.unwrap();
        consumer.close().await.unwrap();
    }
}
