//! Message processor: the consume-process-commit loop
//!
//! One processor owns one consumer and runs a single sequential loop:
//! pull the next record, wrap it into an envelope, pass it through the
//! middleware chain, and commit the offset only when the envelope comes
//! back non-failed. A failure never stops the loop; only cancellation or
//! a structural broker error does.

use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::consumer::RecordConsumer;
use crate::envelope::MessageEnvelope;
use crate::error::{Error, Result};
use crate::logging::LogMetrics;
use crate::middleware::{MessageMiddleware, MiddlewareChain};

/// Builder assembling a processor from middlewares and a consumer
///
/// Middlewares are registered outer-to-inner: the first `middleware` call
/// is the outermost wrapper.
pub struct ProcessorBuilder<K, V, C> {
    middlewares: Vec<Arc<dyn MessageMiddleware<K, V>>>,
    consumer: Option<C>,
}

impl<K, V, C> ProcessorBuilder<K, V, C>
where
    K: Send + Sync + 'static,
    V: Send + Sync + 'static,
    C: RecordConsumer<K, V>,
{
    /// Create an empty builder
    pub fn new() -> Self {
        Self {
            middlewares: Vec::new(),
            consumer: None,
        }
    }

    /// Register a middleware at the end of the chain
    pub fn middleware<M>(mut self, middleware: M) -> Self
    where
        M: MessageMiddleware<K, V> + 'static,
    {
        self.middlewares.push(Arc::new(middleware));
        self
    }

    /// Register an already-shared middleware, e.g. a circuit breaker
    /// guarding a dependency across several processors
    pub fn shared_middleware(mut self, middleware: Arc<dyn MessageMiddleware<K, V>>) -> Self {
        self.middlewares.push(middleware);
        self
    }

    /// Supply the consumer the processor will own
    pub fn consumer(mut self, consumer: C) -> Self {
        self.consumer = Some(consumer);
        self
    }

    /// Compose the chain and build the processor
    pub fn build(self) -> Result<MessageProcessor<K, V, C>> {
        let consumer = self
            .consumer
            .ok_or_else(|| Error::config("Processor requires a consumer"))?;

        Ok(MessageProcessor {
            consumer,
            chain: MiddlewareChain::new(self.middlewares),
        })
    }
}

impl<K, V, C> Default for ProcessorBuilder<K, V, C>
where
    K: Send + Sync + 'static,
    V: Send + Sync + 'static,
    C: RecordConsumer<K, V>,
{
    fn default() -> Self {
        Self::new()
    }
}

/// Sequential message processor over one consumer
pub struct MessageProcessor<K, V, C> {
    consumer: C,
    chain: MiddlewareChain<K, V>,
}

impl<K, V, C> MessageProcessor<K, V, C>
where
    K: Send + Sync + 'static,
    V: Send + Sync + 'static,
    C: RecordConsumer<K, V>,
{
    /// Start assembling a processor
    pub fn builder() -> ProcessorBuilder<K, V, C> {
        ProcessorBuilder::new()
    }

    /// Run the consume-process-commit cycle until cancelled
    ///
    /// Structural errors (subscribe, pull, commit, or a broker-level
    /// error surfaced through the chain) propagate to the caller after a
    /// best-effort close; per-message failures never do.
    /// The consumer is closed exactly once on every exit path.
    pub async fn process_messages(mut self, shutdown: CancellationToken) -> Result<()> {
        let result = match self.consumer.subscribe().await {
            Ok(()) => self.consume_loop(&shutdown).await,
            Err(err) => Err(err),
        };

        if let Err(close_err) = self.consumer.close().await {
            warn!(error = %close_err, "Failed to close consumer cleanly");
        }

        result
    }

    async fn consume_loop(&mut self, shutdown: &CancellationToken) -> Result<()> {
        info!("Starting consume loop");

        loop {
            let record = tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    info!("Cancellation requested, stopping consume loop");
                    return Ok(());
                },
                record = self.consumer.next_record() => record?,
            };

            let Some(record) = record else {
                info!("End of stream, stopping consume loop");
                return Ok(());
            };

            let metadata = record.metadata.clone();
            let envelope = MessageEnvelope::new(
                record.key,
                record.value,
                record.metadata,
                shutdown.child_token(),
            );

            match self.chain.invoke(envelope).await {
                Ok(result) if !result.failed() => {
                    self.consumer.commit(&metadata).await?;
                    debug!(
                        topic = %metadata.topic,
                        partition = metadata.partition,
                        offset = metadata.offset,
                        "Message processed and committed"
                    );
                },
                Ok(_) => {
                    warn!(
                        topic = %metadata.topic,
                        partition = metadata.partition,
                        offset = metadata.offset,
                        "Message failed, skipping without commit"
                    );
                    LogMetrics::counter("messages_skipped", 1, &[("topic", &metadata.topic)]);
                },
                Err(err) if err.is_structural() => {
                    // A middleware surfaced a broker-level failure. Same
                    // policy as a failed pull: stop and let the host restart.
                    error!(
                        topic = %metadata.topic,
                        partition = metadata.partition,
                        offset = metadata.offset,
                        error = %err,
                        "Structural error from middleware chain, stopping"
                    );
                    return Err(err);
                },
                Err(err) => {
                    // Last line of defense: no error-handling middleware
                    // absorbed this, but the loop must survive it.
                    error!(
                        topic = %metadata.topic,
                        partition = metadata.partition,
                        offset = metadata.offset,
                        error = %err,
                        "Unhandled processing error, skipping without commit"
                    );
                    LogMetrics::counter("messages_skipped", 1, &[("topic", &metadata.topic)]);
                },
            }
        }
    }
}
