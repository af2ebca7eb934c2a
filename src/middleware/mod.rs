//! Middleware chain for message processing
//!
//! This module provides:
//! - The [`MessageMiddleware`] contract hosts implement for business logic
//! - The [`Next`] continuation representing the remainder of the chain
//! - [`MiddlewareChain`], the immutable composed pipeline
//! - Built-in middlewares: error handling, circuit breaker, dead letter

mod circuit_breaker;
mod dead_letter;
mod error_handling;

pub use circuit_breaker::{CircuitBreakerConfig, CircuitBreakerMiddleware, CircuitState};
pub use dead_letter::{
    DeadLetterMiddleware, DeadLetterPublisher, DeadLetterRecord, KafkaDeadLetterPublisher,
};
pub use error_handling::ErrorHandlingMiddleware;

use async_trait::async_trait;
use std::sync::Arc;

use crate::envelope::MessageEnvelope;
use crate::error::Result;

/// A unit of processing in the message pipeline
///
/// Middlewares are composed onion-style: the first-registered middleware is
/// the outermost wrapper and sees the message first and last. Each
/// middleware receives the current envelope and a [`Next`] continuation
/// bound to the remaining chain, and decides whether to call it,
/// short-circuit, return a failed copy of the envelope, or return an error.
///
/// Contract: `next` must be invoked at most once. Calling it a second time
/// for the same message is undefined behavior; this is documented rather
/// than enforced at runtime to keep the hot path free of bookkeeping.
#[async_trait]
pub trait MessageMiddleware<K, V>: Send + Sync
where
    K: Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    /// Process one envelope, delegating to `next` for the rest of the chain
    async fn handle(
        &self,
        envelope: MessageEnvelope<K, V>,
        next: Next<'_, K, V>,
    ) -> Result<MessageEnvelope<K, V>>;
}

/// Continuation over the remaining middleware chain
///
/// The terminal link is a fixed pass-through: running an empty continuation
/// returns the envelope unchanged.
pub struct Next<'a, K, V> {
    remaining: &'a [Arc<dyn MessageMiddleware<K, V>>],
}

impl<'a, K, V> Next<'a, K, V>
where
    K: Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    fn new(remaining: &'a [Arc<dyn MessageMiddleware<K, V>>]) -> Self {
        Self { remaining }
    }

    /// Run the rest of the chain on the given envelope
    pub async fn run(self, envelope: MessageEnvelope<K, V>) -> Result<MessageEnvelope<K, V>> {
        match self.remaining.split_first() {
            Some((head, rest)) => head.handle(envelope, Next::new(rest)).await,
            None => Ok(envelope),
        }
    }
}

/// An immutable, ordered middleware pipeline
///
/// The stack is captured once at build time; invoking the chain allocates
/// no new composition state per message.
pub struct MiddlewareChain<K, V> {
    stack: Arc<[Arc<dyn MessageMiddleware<K, V>>]>,
}

impl<K, V> Clone for MiddlewareChain<K, V> {
    fn clone(&self) -> Self {
        Self {
            stack: Arc::clone(&self.stack),
        }
    }
}

impl<K, V> MiddlewareChain<K, V>
where
    K: Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    /// Compose a chain from middlewares in outer-to-inner order
    pub fn new(middlewares: Vec<Arc<dyn MessageMiddleware<K, V>>>) -> Self {
        Self {
            stack: middlewares.into(),
        }
    }

    /// Number of middlewares in the chain
    pub fn len(&self) -> usize {
        self.stack.len()
    }

    /// Whether the chain has no middlewares
    pub fn is_empty(&self) -> bool {
        self.stack.is_empty()
    }

    /// Pass one envelope through the full chain
    pub async fn invoke(&self, envelope: MessageEnvelope<K, V>) -> Result<MessageEnvelope<K, V>> {
        Next::new(&self.stack).run(envelope).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::RecordMetadata;
    use std::sync::Mutex;
    use tokio_util::sync::CancellationToken;

    fn envelope() -> MessageEnvelope<String, String> {
        MessageEnvelope::new(
            "key".to_string(),
            "value".to_string(),
            RecordMetadata {
                topic: "events".to_string(),
                partition: 0,
                offset: 1,
                timestamp: None,
            },
            CancellationToken::new(),
        )
    }

    /// Records enter/exit order to verify onion composition
    struct Tracing {
        name: &'static str,
        trace: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl MessageMiddleware<String, String> for Tracing {
        async fn handle(
            &self,
            envelope: MessageEnvelope<String, String>,
            next: Next<'_, String, String>,
        ) -> Result<MessageEnvelope<String, String>> {
            self.trace.lock().unwrap().push(format!("{}:enter", self.name));
            let result = next.run(envelope).await;
            self.trace.lock().unwrap().push(format!("{}:exit", self.name));
            result
        }
    }

    /// Marks the envelope failed without calling next
    struct Veto;

    #[async_trait]
    impl MessageMiddleware<String, String> for Veto {
        async fn handle(
            &self,
            envelope: MessageEnvelope<String, String>,
            _next: Next<'_, String, String>,
        ) -> Result<MessageEnvelope<String, String>> {
            Ok(envelope.into_failed())
        }
    }

    #[tokio::test]
    async fn test_empty_chain_is_pass_through() {
        let chain: MiddlewareChain<String, String> = MiddlewareChain::new(Vec::new());
        let input = envelope();
        let output = chain.invoke(input.clone()).await.unwrap();
        assert_eq!(output, input);
    }

    #[tokio::test]
    async fn test_registration_order_is_onion_order() {
        let trace = Arc::new(Mutex::new(Vec::new()));
        let chain = MiddlewareChain::new(vec![
            Arc::new(Tracing {
                name: "outer",
                trace: Arc::clone(&trace),
            }) as Arc<dyn MessageMiddleware<String, String>>,
            Arc::new(Tracing {
                name: "inner",
                trace: Arc::clone(&trace),
            }),
        ]);

        chain.invoke(envelope()).await.unwrap();

        let trace = trace.lock().unwrap();
        assert_eq!(
            *trace,
            vec!["outer:enter", "inner:enter", "inner:exit", "outer:exit"]
        );
    }

    #[tokio::test]
    async fn test_short_circuit_skips_downstream() {
        let trace = Arc::new(Mutex::new(Vec::new()));
        let chain = MiddlewareChain::new(vec![
            Arc::new(Veto) as Arc<dyn MessageMiddleware<String, String>>,
            Arc::new(Tracing {
                name: "downstream",
                trace: Arc::clone(&trace),
            }),
        ]);

        let output = chain.invoke(envelope()).await.unwrap();
        assert!(output.failed());
        assert!(trace.lock().unwrap().is_empty());
    }
}
