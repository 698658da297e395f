//! Retry policy, per-execution retry bookkeeping and the retry interceptor.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::interceptor::{AttemptResult, Interceptor};
use crate::transport::TransportError;
use crate::RequestId;

/// Retry configuration.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of retries after the first attempt.
    pub max_retries: u32,
    /// Backoff strategy.
    pub backoff: BackoffStrategy,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff: BackoffStrategy::Constant(Duration::from_millis(500)),
        }
    }
}

impl RetryPolicy {
    /// Retry up to `max_retries` times, waiting `retry_delay` between attempts.
    pub fn new(max_retries: u32, retry_delay: Duration) -> Self {
        Self {
            max_retries,
            backoff: BackoffStrategy::Constant(retry_delay),
        }
    }

    /// Create a retry policy with exponential backoff.
    pub fn exponential(max_retries: u32, initial_delay: Duration) -> Self {
        Self {
            max_retries,
            backoff: BackoffStrategy::Exponential {
                initial: initial_delay,
                max: Duration::from_secs(30),
                multiplier: 2.0,
            },
        }
    }

    /// Create a retry policy with linear backoff.
    pub fn linear(max_retries: u32, delay: Duration) -> Self {
        Self {
            max_retries,
            backoff: BackoffStrategy::Linear {
                delay,
                max: Duration::from_secs(30),
            },
        }
    }

    /// Create a retry policy with no delay.
    pub fn immediate(max_retries: u32) -> Self {
        Self {
            max_retries,
            backoff: BackoffStrategy::None,
        }
    }

    /// Never retry.
    pub fn disabled() -> Self {
        Self::immediate(0)
    }

    /// Delay before retry number `retry` (0-indexed).
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        self.backoff.delay_for_attempt(retry)
    }

    /// Whether a transport failure is eligible for retry at all.
    pub fn is_retryable(&self, error: &TransportError) -> bool {
        error.kind().is_network()
    }
}

/// Backoff strategy for retries.
#[derive(Debug, Clone)]
pub enum BackoffStrategy {
    /// No delay between retries.
    None,
    /// Constant delay between retries.
    Constant(Duration),
    /// Linear backoff: delay increases by a fixed amount.
    Linear {
        /// Delay increment per attempt.
        delay: Duration,
        /// Maximum delay.
        max: Duration,
    },
    /// Exponential backoff: delay doubles each attempt.
    Exponential {
        /// Initial delay.
        initial: Duration,
        /// Maximum delay.
        max: Duration,
        /// Multiplier (typically 2.0).
        multiplier: f64,
    },
}

impl BackoffStrategy {
    /// Calculate delay for a given attempt (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        match self {
            Self::None => Duration::ZERO,
            Self::Constant(d) => *d,
            Self::Linear { delay, max } => {
                let total = delay.saturating_mul(attempt + 1);
                total.min(*max)
            }
            Self::Exponential { initial, max, multiplier } => {
                let factor = multiplier.powi(attempt as i32);
                Duration::try_from_secs_f64(initial.as_secs_f64() * factor)
                    .map_or(*max, |delay| delay.min(*max))
            }
        }
    }
}

/// Retry progress of one execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryState {
    /// No retry recorded yet.
    Fresh,
    /// `n` retries have been scheduled.
    Retrying(u32),
    /// The retry budget is spent.
    Exhausted,
}

/// Retry counters keyed by execution.
///
/// Every read-increment-write of a counter happens under one lock, so
/// concurrent executions never lose an update.
#[derive(Debug, Default)]
pub struct RetryLedger {
    counters: Mutex<HashMap<RequestId, u32>>,
}

impl RetryLedger {
    /// Create an empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state for `id`.
    pub fn state(&self, id: RequestId) -> RetryState {
        match self.counters.lock().get(&id) {
            Some(n) => RetryState::Retrying(*n),
            None => RetryState::Fresh,
        }
    }

    /// Record a retryable failure and move to the next state.
    ///
    /// Returns `Retrying(n)` when retry number `n` may proceed, or `Exhausted`
    /// once `max_retries` have been used. The counter stays until
    /// [`discard`](Self::discard), so a spent budget stays spent for the rest
    /// of the execution.
    pub fn record_failure(&self, id: RequestId, max_retries: u32) -> RetryState {
        let mut counters = self.counters.lock();
        let used = counters.entry(id).or_insert(0);
        if *used < max_retries {
            *used += 1;
            RetryState::Retrying(*used)
        } else {
            RetryState::Exhausted
        }
    }

    /// Forget `id`.
    pub fn discard(&self, id: RequestId) {
        self.counters.lock().remove(&id);
    }

    /// Number of executions currently tracked.
    pub fn len(&self) -> usize {
        self.counters.lock().len()
    }

    /// Whether no execution is tracked.
    pub fn is_empty(&self) -> bool {
        self.counters.lock().is_empty()
    }
}

/// Schedules retries for network failures according to a [`RetryPolicy`].
///
/// Responses of any status, and non-network failures, pass through untouched.
pub struct RetryInterceptor {
    policy: RetryPolicy,
    ledger: Arc<RetryLedger>,
}

impl RetryInterceptor {
    /// Create a retry interceptor.
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            ledger: Arc::new(RetryLedger::new()),
        }
    }

    /// Retry policy in use.
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Shared retry bookkeeping.
    pub fn ledger(&self) -> &Arc<RetryLedger> {
        &self.ledger
    }
}

#[async_trait]
impl Interceptor for RetryInterceptor {
    async fn intercept(&self, mut result: AttemptResult) -> AttemptResult {
        let retryable = result
            .error()
            .is_some_and(|error| self.policy.is_retryable(error));

        let Some(id) = result.request_id else {
            // Without an execution id no count survives between attempts;
            // only the first attempt may be retried.
            if retryable && result.attempt == 0 && self.policy.max_retries > 0 {
                debug!("Retrying request without execution id once");
                result.schedule_retry(self.policy.delay_for_retry(0));
            }
            return result;
        };

        if !retryable {
            return result;
        }

        match self.ledger.record_failure(id, self.policy.max_retries) {
            RetryState::Retrying(n) => {
                let delay = self.policy.delay_for_retry(n - 1);
                debug!(
                    request_id = %id,
                    retry = n,
                    max_retries = self.policy.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    "Scheduling retry after network failure"
                );
                result.schedule_retry(delay);
            }
            RetryState::Exhausted | RetryState::Fresh => {
                warn!(
                    request_id = %id,
                    attempts = result.attempt + 1,
                    "Retry budget exhausted"
                );
            }
        }

        result
    }

    fn finish(&self, request_id: RequestId) {
        self.ledger.discard(request_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Request, Response};
    use bytes::Bytes;
    use http::{HeaderMap, Method, StatusCode};

    fn request() -> Request {
        Request::new(Method::GET, url::Url::parse("https://api.example.com").unwrap())
    }

    fn lost(id: Option<RequestId>, attempt: u32) -> AttemptResult {
        let mut result = AttemptResult::new(request(), Err(TransportError::connect("refused")));
        result.request_id = id;
        result.attempt = attempt;
        result
    }

    #[test]
    fn test_exponential_backoff() {
        let strategy = BackoffStrategy::Exponential {
            initial: Duration::from_millis(100),
            max: Duration::from_secs(10),
            multiplier: 2.0,
        };

        assert_eq!(strategy.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(strategy.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(strategy.delay_for_attempt(2), Duration::from_millis(400));
        assert_eq!(strategy.delay_for_attempt(3), Duration::from_millis(800));
    }

    #[test]
    fn test_linear_backoff() {
        let strategy = BackoffStrategy::Linear {
            delay: Duration::from_millis(100),
            max: Duration::from_secs(1),
        };

        assert_eq!(strategy.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(strategy.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(strategy.delay_for_attempt(9), Duration::from_secs(1));
    }

    #[test]
    fn test_constant_backoff() {
        let strategy = BackoffStrategy::Constant(Duration::from_millis(500));

        assert_eq!(strategy.delay_for_attempt(0), Duration::from_millis(500));
        assert_eq!(strategy.delay_for_attempt(5), Duration::from_millis(500));
    }

    #[test]
    fn test_ledger_state_machine() {
        let ledger = RetryLedger::new();
        let id = RequestId::new();

        assert_eq!(ledger.state(id), RetryState::Fresh);
        assert_eq!(ledger.record_failure(id, 2), RetryState::Retrying(1));
        assert_eq!(ledger.record_failure(id, 2), RetryState::Retrying(2));
        assert_eq!(ledger.state(id), RetryState::Retrying(2));
        assert_eq!(ledger.record_failure(id, 2), RetryState::Exhausted);
        assert_eq!(ledger.record_failure(id, 2), RetryState::Exhausted);
        assert_eq!(ledger.state(id), RetryState::Retrying(2));

        ledger.discard(id);
        assert_eq!(ledger.state(id), RetryState::Fresh);
        assert!(ledger.is_empty());
    }

    #[test]
    fn test_ledger_counts_concurrently() {
        let ledger = Arc::new(RetryLedger::new());
        let ids: Vec<RequestId> = (0..4).map(|_| RequestId::new()).collect();

        let handles: Vec<_> = ids
            .iter()
            .copied()
            .map(|id| {
                let ledger = Arc::clone(&ledger);
                std::thread::spawn(move || {
                    for _ in 0..50 {
                        ledger.record_failure(id, 100);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        for id in ids {
            assert_eq!(ledger.state(id), RetryState::Retrying(50));
        }
    }

    #[tokio::test]
    async fn test_interceptor_retries_network_failures_until_exhausted() {
        let interceptor = RetryInterceptor::new(RetryPolicy::new(2, Duration::from_millis(10)));
        let id = RequestId::new();

        let first = interceptor.intercept(lost(Some(id), 0)).await;
        assert_eq!(first.retry_after(), Some(Duration::from_millis(10)));
        let second = interceptor.intercept(lost(Some(id), 1)).await;
        assert!(second.retry_after().is_some());
        let third = interceptor.intercept(lost(Some(id), 2)).await;
        assert_eq!(third.retry_after(), None);
        assert_eq!(interceptor.ledger().len(), 1);

        interceptor.finish(id);
        assert!(interceptor.ledger().is_empty());
    }

    #[tokio::test]
    async fn test_non_network_failure_keeps_spent_budget() {
        let interceptor = RetryInterceptor::new(RetryPolicy::immediate(1));
        let id = RequestId::new();

        assert!(interceptor.intercept(lost(Some(id), 0)).await.retry_after().is_some());

        let mut malformed =
            AttemptResult::new(request(), Err(TransportError::malformed("garbage")));
        malformed.request_id = Some(id);
        malformed.attempt = 1;
        assert_eq!(interceptor.intercept(malformed).await.retry_after(), None);
        assert_eq!(interceptor.ledger().state(id), RetryState::Retrying(1));

        assert_eq!(interceptor.intercept(lost(Some(id), 2)).await.retry_after(), None);
    }

    #[test]
    fn test_exponential_backoff_keeps_sub_millisecond_delays() {
        let strategy = BackoffStrategy::Exponential {
            initial: Duration::from_micros(250),
            max: Duration::from_secs(1),
            multiplier: 2.0,
        };

        assert_eq!(strategy.delay_for_attempt(0), Duration::from_micros(250));
        assert_eq!(strategy.delay_for_attempt(1), Duration::from_micros(500));
        assert_eq!(strategy.delay_for_attempt(200), Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_interceptor_ignores_responses_and_non_network_failures() {
        let interceptor = RetryInterceptor::new(RetryPolicy::new(3, Duration::ZERO));
        let id = RequestId::new();

        let request = request();
        let response = Response::new(
            StatusCode::SERVICE_UNAVAILABLE,
            HeaderMap::new(),
            Bytes::new(),
            request.url().clone(),
        );
        let mut result = AttemptResult::new(request.clone(), Ok(response));
        result.request_id = Some(id);
        assert_eq!(interceptor.intercept(result).await.retry_after(), None);

        let mut result = AttemptResult::new(request, Err(TransportError::malformed("garbage")));
        result.request_id = Some(id);
        assert_eq!(interceptor.intercept(result).await.retry_after(), None);
    }

    #[tokio::test]
    async fn test_missing_id_retries_once() {
        let interceptor = RetryInterceptor::new(RetryPolicy::new(5, Duration::ZERO));

        assert!(interceptor.intercept(lost(None, 0)).await.retry_after().is_some());
        assert!(interceptor.intercept(lost(None, 1)).await.retry_after().is_none());
        assert!(interceptor.ledger().is_empty());
    }

    #[test]
    fn test_finish_discards_state() {
        let interceptor = RetryInterceptor::new(RetryPolicy::default());
        let id = RequestId::new();
        interceptor.ledger().record_failure(id, 3);
        interceptor.finish(id);
        assert!(interceptor.ledger().is_empty());
    }
}
