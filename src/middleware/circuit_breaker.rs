//! Circuit breaker middleware
//!
//! Guards a downstream dependency invoked by inner middlewares. After a
//! run of consecutive failures the breaker opens and fast-fails every
//! message for a fixed interval, then lets a single probe through to
//! decide whether to close again.
//!
//! Failure-propagation policy: the breaker records failures and re-throws
//! them. It never swallows an error itself; an [`ErrorHandlingMiddleware`]
//! registered further out owns logging and the failed flag.
//!
//! [`ErrorHandlingMiddleware`]: super::ErrorHandlingMiddleware

use async_trait::async_trait;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use super::{MessageMiddleware, Next};
use crate::clock::{Clock, SystemClock};
use crate::envelope::MessageEnvelope;
use crate::error::Result;

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Normal operation; failures are counted
    Closed,

    /// Failure threshold exceeded; calls are short-circuited
    Open,

    /// Open interval elapsed; one probe call is allowed through
    HalfOpen,
}

/// Circuit breaker tuning constants
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that trip the breaker
    pub failure_threshold: u32,

    /// How long the breaker stays open before probing
    pub open_duration: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            open_duration: Duration::from_secs(30),
        }
    }
}

struct BreakerInner {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    probe_in_flight: bool,
}

/// Stateful middleware that fast-fails after repeated downstream failures
///
/// One instance lives for the process's lifetime and may be shared (via
/// `Arc`) between processors protecting the same dependency; all state
/// transitions happen behind a mutex.
pub struct CircuitBreakerMiddleware {
    config: CircuitBreakerConfig,
    clock: Arc<dyn Clock>,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreakerMiddleware {
    /// Create a breaker with the given thresholds and the system clock
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Create a breaker with an injected time source
    pub fn with_clock(config: CircuitBreakerConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                opened_at: None,
                probe_in_flight: false,
            }),
        }
    }

    /// Current state snapshot
    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    /// Current consecutive-failure count
    pub fn consecutive_failures(&self) -> u32 {
        self.lock().consecutive_failures
    }

    // A poisoned lock only means another thread panicked mid-transition;
    // the counters remain usable, so recover the guard instead of panicking.
    fn lock(&self) -> MutexGuard<'_, BreakerInner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Decide whether the current call may proceed
    ///
    /// Returns `Some(probing)` if the call is admitted, `None` if it must
    /// be short-circuited.
    fn admit(&self, now: Instant) -> Option<bool> {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed => Some(false),
            CircuitState::Open => {
                let elapsed = inner
                    .opened_at
                    .map(|at| now.duration_since(at) >= self.config.open_duration)
                    .unwrap_or(true);
                if !elapsed {
                    return None;
                }
                inner.state = CircuitState::HalfOpen;
                inner.probe_in_flight = true;
                warn!(state = "half_open", "Circuit breaker probing downstream");
                Some(true)
            },
            CircuitState::HalfOpen => {
                // Exactly one trial call: while a probe is in flight,
                // concurrent callers are short-circuited.
                if inner.probe_in_flight {
                    None
                } else {
                    inner.probe_in_flight = true;
                    Some(true)
                }
            },
        }
    }

    fn on_success(&self, probing: bool) {
        let mut inner = self.lock();
        if probing {
            inner.probe_in_flight = false;
            debug!("Circuit breaker probe succeeded");
            inner.state = CircuitState::Closed;
            inner.consecutive_failures = 0;
            inner.opened_at = None;
            warn!(state = "closed", "Circuit breaker closed");
            return;
        }

        // A call admitted while still closed can finish after a concurrent
        // caller tripped the breaker; only the probe may close it again.
        if inner.state == CircuitState::Closed {
            inner.consecutive_failures = 0;
        }
    }

    fn on_failure(&self, probing: bool, now: Instant) {
        let mut inner = self.lock();
        if probing {
            inner.probe_in_flight = false;
            inner.state = CircuitState::Open;
            inner.opened_at = Some(now);
            warn!(state = "open", "Circuit breaker probe failed, reopening");
            return;
        }

        inner.consecutive_failures += 1;
        if inner.state == CircuitState::Closed
            && inner.consecutive_failures >= self.config.failure_threshold
        {
            inner.state = CircuitState::Open;
            inner.opened_at = Some(now);
            warn!(
                state = "open",
                failures = inner.consecutive_failures,
                "Circuit breaker opened"
            );
        }
    }
}

#[async_trait]
impl<K, V> MessageMiddleware<K, V> for CircuitBreakerMiddleware
where
    K: Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    async fn handle(
        &self,
        envelope: MessageEnvelope<K, V>,
        next: Next<'_, K, V>,
    ) -> Result<MessageEnvelope<K, V>> {
        let now = self.clock.now();

        let probing = match self.admit(now) {
            Some(probing) => probing,
            None => {
                debug!(
                    topic = %envelope.metadata.topic,
                    partition = envelope.metadata.partition,
                    offset = envelope.metadata.offset,
                    "Circuit breaker open, short-circuiting message"
                );
                return Ok(envelope.into_failed());
            },
        };

        match next.run(envelope).await {
            Ok(result) if !result.failed() => {
                self.on_success(probing);
                Ok(result)
            },
            Ok(result) => {
                // A failed envelope returned without an error is a business
                // veto, not a dependency failure: leave the counter alone.
                if probing {
                    self.lock().probe_in_flight = false;
                }
                Ok(result)
            },
            Err(err) => {
                self.on_failure(probing, self.clock.now());
                Err(err)
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::RecordMetadata;
    use crate::error::Error;
    use crate::middleware::MiddlewareChain;
    use crate::test_utils::ManualClock;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio_util::sync::CancellationToken;

    fn envelope() -> MessageEnvelope<String, String> {
        MessageEnvelope::new(
            "key".to_string(),
            "value".to_string(),
            RecordMetadata {
                topic: "events".to_string(),
                partition: 0,
                offset: 0,
                timestamp: None,
            },
            CancellationToken::new(),
        )
    }

    /// Downstream stand-in that fails while `failures_left` is positive
    struct Downstream {
        invocations: AtomicU32,
        failures_left: AtomicU32,
    }

    impl Downstream {
        fn failing(times: u32) -> Arc<Self> {
            Arc::new(Self {
                invocations: AtomicU32::new(0),
                failures_left: AtomicU32::new(times),
            })
        }

        fn invocations(&self) -> u32 {
            self.invocations.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl MessageMiddleware<String, String> for Downstream {
        async fn handle(
            &self,
            envelope: MessageEnvelope<String, String>,
            next: Next<'_, String, String>,
        ) -> Result<MessageEnvelope<String, String>> {
            self.invocations.fetch_add(1, Ordering::SeqCst);
            let left = self.failures_left.load(Ordering::SeqCst);
            if left > 0 {
                self.failures_left.store(left - 1, Ordering::SeqCst);
                return Err(Error::processing("downstream unavailable"));
            }
            next.run(envelope).await
        }
    }

    fn breaker_chain(
        breaker: Arc<CircuitBreakerMiddleware>,
        downstream: Arc<Downstream>,
    ) -> MiddlewareChain<String, String> {
        MiddlewareChain::new(vec![
            breaker as Arc<dyn MessageMiddleware<String, String>>,
            downstream,
        ])
    }

    fn config() -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: 5,
            open_duration: Duration::from_secs(30),
        }
    }

    #[tokio::test]
    async fn test_closed_breaker_passes_through_and_resets_counter() {
        let clock = Arc::new(ManualClock::new());
        let breaker = Arc::new(CircuitBreakerMiddleware::with_clock(config(), clock));
        let downstream = Downstream::failing(2);
        let chain = breaker_chain(Arc::clone(&breaker), Arc::clone(&downstream));

        for _ in 0..2 {
            assert!(chain.invoke(envelope()).await.is_err());
        }
        assert_eq!(breaker.consecutive_failures(), 2);
        assert_eq!(breaker.state(), CircuitState::Closed);

        // A success resets the counter to zero
        chain.invoke(envelope()).await.unwrap();
        assert_eq!(breaker.consecutive_failures(), 0);
    }

    #[tokio::test]
    async fn test_opens_at_threshold_and_short_circuits() {
        let clock = Arc::new(ManualClock::new());
        let breaker = Arc::new(CircuitBreakerMiddleware::with_clock(config(), clock));
        let downstream = Downstream::failing(5);
        let chain = breaker_chain(Arc::clone(&breaker), Arc::clone(&downstream));

        for _ in 0..5 {
            assert!(chain.invoke(envelope()).await.is_err());
        }
        assert_eq!(breaker.state(), CircuitState::Open);

        // 6th call: short-circuited, downstream never invoked
        let output = chain.invoke(envelope()).await.unwrap();
        assert!(output.failed());
        assert_eq!(downstream.invocations(), 5);
    }

    #[tokio::test]
    async fn test_half_open_probe_success_closes() {
        let clock = Arc::new(ManualClock::new());
        let breaker = Arc::new(CircuitBreakerMiddleware::with_clock(
            config(),
            Arc::clone(&clock) as Arc<dyn Clock>,
        ));
        let downstream = Downstream::failing(5);
        let chain = breaker_chain(Arc::clone(&breaker), Arc::clone(&downstream));

        for _ in 0..5 {
            assert!(chain.invoke(envelope()).await.is_err());
        }
        assert_eq!(breaker.state(), CircuitState::Open);

        clock.advance(Duration::from_secs(31));

        // Probe invokes the dependency exactly once and succeeds
        let output = chain.invoke(envelope()).await.unwrap();
        assert!(!output.failed());
        assert_eq!(downstream.invocations(), 6);
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.consecutive_failures(), 0);

        // Next call at the same instant is processed normally
        let output = chain.invoke(envelope()).await.unwrap();
        assert!(!output.failed());
        assert_eq!(downstream.invocations(), 7);
    }

    #[tokio::test]
    async fn test_half_open_probe_failure_reopens_with_fresh_interval() {
        let clock = Arc::new(ManualClock::new());
        let breaker = Arc::new(CircuitBreakerMiddleware::with_clock(
            config(),
            Arc::clone(&clock) as Arc<dyn Clock>,
        ));
        let downstream = Downstream::failing(6);
        let chain = breaker_chain(Arc::clone(&breaker), Arc::clone(&downstream));

        for _ in 0..5 {
            assert!(chain.invoke(envelope()).await.is_err());
        }

        clock.advance(Duration::from_secs(31));

        // Probe fails: back to open
        assert!(chain.invoke(envelope()).await.is_err());
        assert_eq!(breaker.state(), CircuitState::Open);
        assert_eq!(downstream.invocations(), 6);

        // The open interval restarted; still short-circuited shortly after
        clock.advance(Duration::from_secs(10));
        let output = chain.invoke(envelope()).await.unwrap();
        assert!(output.failed());
        assert_eq!(downstream.invocations(), 6);

        // A full fresh interval later the next probe goes through
        clock.advance(Duration::from_secs(21));
        let output = chain.invoke(envelope()).await.unwrap();
        assert!(!output.failed());
        assert_eq!(downstream.invocations(), 7);
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_stale_success_cannot_close_an_open_breaker() {
        use tokio::sync::Notify;

        // Downstream that succeeds only after being released, so a success
        // admitted while the breaker was closed can land after it opened.
        struct Gated {
            entered: Arc<Notify>,
            release: Arc<Notify>,
        }

        #[async_trait]
        impl MessageMiddleware<String, String> for Gated {
            async fn handle(
                &self,
                envelope: MessageEnvelope<String, String>,
                _next: Next<'_, String, String>,
            ) -> Result<MessageEnvelope<String, String>> {
                self.entered.notify_one();
                self.release.notified().await;
                Ok(envelope)
            }
        }

        let breaker = Arc::new(CircuitBreakerMiddleware::new(config()));
        let entered = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());

        let slow_chain = MiddlewareChain::new(vec![
            Arc::clone(&breaker) as Arc<dyn MessageMiddleware<String, String>>,
            Arc::new(Gated {
                entered: Arc::clone(&entered),
                release: Arc::clone(&release),
            }),
        ]);
        let failing_chain = breaker_chain(Arc::clone(&breaker), Downstream::failing(5));

        let slow_call = tokio::spawn({
            let chain = slow_chain.clone();
            async move { chain.invoke(envelope()).await }
        });
        entered.notified().await;

        // The breaker trips while the admitted call is still in flight
        for _ in 0..5 {
            assert!(failing_chain.invoke(envelope()).await.is_err());
        }
        assert_eq!(breaker.state(), CircuitState::Open);

        release.notify_one();
        let output = slow_call.await.unwrap().unwrap();
        assert!(!output.failed());

        // The stale success did not erase the freshly opened interval
        assert_eq!(breaker.state(), CircuitState::Open);
        let short_circuited = slow_chain.invoke(envelope()).await.unwrap();
        assert!(short_circuited.failed());
    }

    #[tokio::test]
    async fn test_business_veto_does_not_touch_counter() {
        struct VetoInner;

        #[async_trait]
        impl MessageMiddleware<String, String> for VetoInner {
            async fn handle(
                &self,
                envelope: MessageEnvelope<String, String>,
                _next: Next<'_, String, String>,
            ) -> Result<MessageEnvelope<String, String>> {
                Ok(envelope.into_failed())
            }
        }

        let breaker = Arc::new(CircuitBreakerMiddleware::new(config()));
        let chain = MiddlewareChain::new(vec![
            Arc::clone(&breaker) as Arc<dyn MessageMiddleware<String, String>>,
            Arc::new(VetoInner),
        ]);

        let output = chain.invoke(envelope()).await.unwrap();
        assert!(output.failed());
        assert_eq!(breaker.consecutive_failures(), 0);
        assert_eq!(breaker.state(), CircuitState::Closed);
    }
}
