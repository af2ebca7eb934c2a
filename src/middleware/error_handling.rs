//! Failure boundary middleware
//!
//! Wraps the remainder of the chain and converts unhandled errors from
//! inner middlewares into a failed envelope instead of propagating them.
//! Register it outside any middleware whose errors it should absorb; a
//! chain without one propagates errors to the processor's last-resort
//! boundary.

use async_trait::async_trait;
use std::fmt::Debug;
use tracing::error;

use super::{MessageMiddleware, Next};
use crate::envelope::MessageEnvelope;
use crate::error::{Error, Result};

/// Hook invoked when an inner middleware fails
///
/// Returning `Some(envelope)` substitutes that envelope for the failed
/// record; `None` keeps the pre-invocation copy. Either way the boundary
/// marks the result failed before handing it back.
pub type ErrorHook<K, V> =
    dyn Fn(&MessageEnvelope<K, V>, &Error) -> Option<MessageEnvelope<K, V>> + Send + Sync;

/// Middleware that absorbs inner failures into a failed envelope
pub struct ErrorHandlingMiddleware<K, V> {
    on_error: Box<ErrorHook<K, V>>,
}

impl<K, V> ErrorHandlingMiddleware<K, V>
where
    K: Debug + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    /// Create a boundary with the default hook, which logs key and error
    pub fn new() -> Self {
        Self {
            on_error: Box::new(|envelope, err| {
                error!(
                    key = ?envelope.key,
                    topic = %envelope.metadata.topic,
                    partition = envelope.metadata.partition,
                    offset = envelope.metadata.offset,
                    error = %err,
                    "Message processing failed"
                );
                None
            }),
        }
    }

    /// Create a boundary with an observe-only failure hook
    pub fn with_hook<F>(hook: F) -> Self
    where
        F: Fn(&MessageEnvelope<K, V>, &Error) + Send + Sync + 'static,
    {
        Self {
            on_error: Box::new(move |envelope, err| {
                hook(envelope, err);
                None
            }),
        }
    }

    /// Create a boundary whose hook may substitute the returned envelope,
    /// e.g. to redact a payload before it reaches a dead-letter middleware
    pub fn with_replacing_hook<F>(hook: F) -> Self
    where
        F: Fn(&MessageEnvelope<K, V>, &Error) -> Option<MessageEnvelope<K, V>>
            + Send
            + Sync
            + 'static,
    {
        Self {
            on_error: Box::new(hook),
        }
    }
}

impl<K, V> Default for ErrorHandlingMiddleware<K, V>
where
    K: Debug + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<K, V> MessageMiddleware<K, V> for ErrorHandlingMiddleware<K, V>
where
    K: Clone + Debug + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    async fn handle(
        &self,
        envelope: MessageEnvelope<K, V>,
        next: Next<'_, K, V>,
    ) -> Result<MessageEnvelope<K, V>> {
        // Keep a pre-invocation copy so a failed inner chain cannot lose
        // the record's identity.
        let checkpoint = envelope.clone();

        match next.run(envelope).await {
            Ok(result) => Ok(result),
            Err(err) => {
                let replacement = (self.on_error)(&checkpoint, &err);
                Ok(replacement.unwrap_or(checkpoint).into_failed())
            },
        }
    }
}
