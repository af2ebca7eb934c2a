//! PipeForge Library
//!
//! A message-consumption pipeline over a partitioned log: records are
//! pulled sequentially, passed through an ordered middleware chain, and
//! their offsets committed only on fully successful processing. Built-in
//! middlewares provide a per-message failure boundary, a circuit breaker
//! for downstream dependencies, and dead-letter publishing.

pub mod clock;
pub mod config;
pub mod consumer;
pub mod envelope;
pub mod error;
pub mod logging;
pub mod middleware;
pub mod processor;
pub mod test_utils;

// Re-export commonly used types at the crate root
pub use clock::{Clock, SystemClock};
pub use config::PipelineConfig;
pub use consumer::{ConsumedRecord, KafkaRecordConsumer, RecordConsumer};
pub use envelope::{MessageEnvelope, RecordMetadata};
pub use error::{Error, Result};
pub use middleware::{
    CircuitBreakerConfig, CircuitBreakerMiddleware, CircuitState, DeadLetterMiddleware,
    DeadLetterPublisher, DeadLetterRecord, ErrorHandlingMiddleware, KafkaDeadLetterPublisher,
    MessageMiddleware, MiddlewareChain, Next,
};
pub use processor::{MessageProcessor, ProcessorBuilder};
