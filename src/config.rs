//! Configuration module for PipeForge
//!
//! Loads and validates pipeline configuration from environment variables,
//! providing strongly-typed settings for the consumer, the dead-letter
//! producer and the circuit breaker.

use envconfig::Envconfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::middleware::CircuitBreakerConfig;

/// Pipeline configuration
#[derive(Debug, Clone, Deserialize, Serialize, Envconfig)]
pub struct PipelineConfig {
    /// Kafka broker addresses (comma-separated)
    #[envconfig(from = "KAFKA_BROKERS", default = "localhost:9092")]
    pub brokers: String,

    /// Consumer group ID
    #[envconfig(from = "KAFKA_GROUP_ID", default = "pipeforge-consumer")]
    pub group_id: String,

    /// Topic to consume from
    #[envconfig(from = "KAFKA_TOPIC", default = "events")]
    pub topic: String,

    /// Dead-letter topic for failed records
    #[envconfig(from = "KAFKA_DEAD_LETTER_TOPIC", default = "events-dlq")]
    pub dead_letter_topic: String,

    /// Auto offset reset (earliest, latest)
    #[envconfig(from = "KAFKA_AUTO_OFFSET_RESET", default = "earliest")]
    pub auto_offset_reset: String,

    /// Session timeout in milliseconds
    #[envconfig(from = "KAFKA_SESSION_TIMEOUT_MS", default = "30000")]
    pub session_timeout_ms: u32,

    /// Maximum poll interval in milliseconds
    #[envconfig(from = "KAFKA_MAX_POLL_INTERVAL_MS", default = "300000")]
    pub max_poll_interval_ms: u32,

    /// Consecutive failures before the circuit breaker opens
    #[envconfig(from = "BREAKER_FAILURE_THRESHOLD", default = "5")]
    pub breaker_failure_threshold: u32,

    /// Seconds the circuit breaker stays open before probing
    #[envconfig(from = "BREAKER_OPEN_DURATION_SECS", default = "30")]
    pub breaker_open_duration_secs: u64,

    /// Log level
    #[envconfig(from = "LOG_LEVEL", default = "info")]
    pub log_level: String,

    /// Environment (development, staging, production)
    #[envconfig(from = "ENVIRONMENT", default = "development")]
    pub environment: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            brokers: "localhost:9092".to_string(),
            group_id: "pipeforge-consumer".to_string(),
            topic: "events".to_string(),
            dead_letter_topic: "events-dlq".to_string(),
            auto_offset_reset: "earliest".to_string(),
            session_timeout_ms: 30000,
            max_poll_interval_ms: 300000,
            breaker_failure_threshold: 5,
            breaker_open_duration_secs: 30,
            log_level: "info".to_string(),
            environment: "development".to_string(),
        }
    }
}

impl PipelineConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if it exists (for local development)
        dotenv::dotenv().ok();

        let config = Self::init_from_env().map_err(Error::from)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.brokers.is_empty() {
            return Err(Error::config("Kafka brokers cannot be empty"));
        }
        if self.topic.is_empty() {
            return Err(Error::config("Topic cannot be empty"));
        }
        if self.breaker_failure_threshold == 0 {
            return Err(Error::config("Breaker failure threshold must be at least 1"));
        }
        Ok(())
    }

    /// Get session timeout as Duration
    pub fn session_timeout(&self) -> Duration {
        Duration::from_millis(self.session_timeout_ms as u64)
    }

    /// Get max poll interval as Duration
    pub fn max_poll_interval(&self) -> Duration {
        Duration::from_millis(self.max_poll_interval_ms as u64)
    }

    /// Circuit breaker constants derived from this configuration
    pub fn breaker(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: self.breaker_failure_threshold,
            open_duration: Duration::from_secs(self.breaker_open_duration_secs),
        }
    }

    /// Build rdkafka consumer configuration
    ///
    /// Auto-commit stays disabled: the processor owns the commit decision.
    pub fn build_consumer_config(&self) -> rdkafka::ClientConfig {
        let mut config = rdkafka::ClientConfig::new();

        config
            .set("bootstrap.servers", &self.brokers)
            .set("group.id", &self.group_id)
            .set("enable.auto.commit", "false")
            .set("session.timeout.ms", self.session_timeout_ms.to_string())
            .set(
                "max.poll.interval.ms",
                self.max_poll_interval_ms.to_string(),
            )
            .set("enable.partition.eof", "false")
            .set("auto.offset.reset", &self.auto_offset_reset)
            .set("isolation.level", "read_committed");

        config
    }

    /// Build rdkafka producer configuration for the dead-letter topic
    pub fn build_producer_config(&self) -> rdkafka::ClientConfig {
        let mut config = rdkafka::ClientConfig::new();

        config
            .set("bootstrap.servers", &self.brokers)
            .set("message.timeout.ms", "30000")
            .set("enable.idempotence", "true")
            .set("acks", "all");

        config
    }

    /// Log configuration at startup
    pub fn log_config(&self) {
        tracing::info!(
            brokers = %self.brokers,
            group_id = %self.group_id,
            topic = %self.topic,
            dead_letter_topic = %self.dead_letter_topic,
            "Kafka configuration"
        );

        tracing::info!(
            failure_threshold = self.breaker_failure_threshold,
            open_duration_secs = self.breaker_open_duration_secs,
            "Circuit breaker configuration"
        );
    }
}
