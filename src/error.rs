//! Error handling module for PipeForge
//!
//! This module defines the error types used throughout the pipeline,
//! providing a unified error handling strategy that distinguishes
//! per-message processing failures from structural broker failures.

use thiserror::Error;

/// Result type alias for PipeForge operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for PipeForge
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Broker-level consumer errors (subscribe/pull/connectivity)
    #[error("Consumer error: {0}")]
    Consumer(String),

    /// Offset commit errors
    #[error("Commit error: {0}")]
    Commit(String),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Per-message processing failures raised by middleware
    #[error("Processing error: {0}")]
    Processing(String),

    /// Dead-letter publish errors
    #[error("Dead-letter error: {0}")]
    DeadLetter(String),

    /// Generic internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a configuration error
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Error::Config(msg.into())
    }

    /// Create a consumer error
    pub fn consumer<S: Into<String>>(msg: S) -> Self {
        Error::Consumer(msg.into())
    }

    /// Create a commit error
    pub fn commit<S: Into<String>>(msg: S) -> Self {
        Error::Commit(msg.into())
    }

    /// Create a processing error
    pub fn processing<S: Into<String>>(msg: S) -> Self {
        Error::Processing(msg.into())
    }

    /// Create a dead-letter error
    pub fn dead_letter<S: Into<String>>(msg: S) -> Self {
        Error::DeadLetter(msg.into())
    }

    /// Create an internal error
    pub fn internal<S: Into<String>>(msg: S) -> Self {
        Error::Internal(msg.into())
    }

    /// Check if this error is structural, i.e. a failure of the consume
    /// loop itself rather than of one message.
    ///
    /// Structural errors propagate out of the processor so the hosting
    /// process can apply its restart/backoff policy; everything else is
    /// contained to a single message.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            Error::Config(_) | Error::Consumer(_) | Error::Commit(_)
        )
    }
}

/// Convert from rdkafka errors to our Error type
impl From<rdkafka::error::KafkaError> for Error {
    fn from(err: rdkafka::error::KafkaError) -> Self {
        Error::Consumer(err.to_string())
    }
}

/// Convert from anyhow::Error to our Error type
impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Error::Internal(err.to_string())
    }
}

/// Convert from envconfig::Error to our Error type
impl From<envconfig::Error> for Error {
    fn from(err: envconfig::Error) -> Self {
        Error::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_structural_classification() {
        assert!(Error::consumer("test").is_structural());
        assert!(Error::commit("test").is_structural());
        assert!(Error::config("test").is_structural());
        assert!(!Error::processing("test").is_structural());
        assert!(!Error::dead_letter("test").is_structural());
        assert!(!Error::internal("test").is_structural());
    }

    #[test]
    fn test_error_display() {
        let err = Error::processing("handler blew up");
        assert_eq!(err.to_string(), "Processing error: handler blew up");

        let err = Error::commit("broker unreachable");
        assert_eq!(err.to_string(), "Commit error: broker unreachable");
    }
}
