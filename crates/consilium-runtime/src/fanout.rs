//! Fan-out query: concurrent, rate-limited dispatch to many backends.
//!
//! Every request becomes one unit:
//! 1. Fail fast if the backend's circuit is open
//! 2. Acquire a token from the request's provider bucket
//! 3. Invoke the backend
//! 4. Retry retryable failures per the [`RetryPolicy`], from step 2
//!
//! The per-request timeout is one budget for the whole unit, retries
//! included. It starts when the first token is granted, so time queued
//! behind the provider's rate limit does not count against it.
//!
//! Units run concurrently on the calling task and are joined in request
//! order. A unit's failure is a [`BackendResult::Failure`] value; it never
//! cancels or delays its siblings.

use backon::Retryable;
use futures::future::join_all;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use consilium_core::FailureKind;

use crate::backend::{BackendError, BackendRequest, BackendResponse, ModelBackend};
use crate::config::RuntimeConfig;
use crate::limiter::ProviderLimiterRegistry;
use crate::resilience::{CircuitBreaker, CircuitBreakerConfig, RetryPolicy};
use crate::RuntimeError;

/// Outcome of one dispatched request. Exactly one per request.
#[derive(Debug, Clone, PartialEq)]
pub enum BackendResult {
    Success {
        backend_id: String,
        response: BackendResponse,
        attempts: u32,
    },
    Failure {
        backend_id: String,
        kind: FailureKind,
        detail: String,
        attempts: u32,
    },
}

impl BackendResult {
    pub fn backend_id(&self) -> &str {
        match self {
            BackendResult::Success { backend_id, .. } | BackendResult::Failure { backend_id, .. } => {
                backend_id
            }
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, BackendResult::Success { .. })
    }

    /// Response text of a success.
    pub fn text(&self) -> Option<&str> {
        match self {
            BackendResult::Success { response, .. } => Some(response.text()),
            BackendResult::Failure { .. } => None,
        }
    }

    /// Backend calls made for this unit (0 when it failed fast).
    pub fn attempts(&self) -> u32 {
        match self {
            BackendResult::Success { attempts, .. } | BackendResult::Failure { attempts, .. } => {
                *attempts
            }
        }
    }

    fn failure(
        backend_id: &str,
        kind: FailureKind,
        detail: impl Into<String>,
        attempts: u32,
    ) -> Self {
        BackendResult::Failure {
            backend_id: backend_id.to_string(),
            kind,
            detail: detail.into(),
            attempts,
        }
    }
}

/// Per-call dispatch settings.
#[derive(Debug, Clone)]
pub struct DispatchOptions {
    /// Bound on each unit, retries included
    pub per_request_timeout: Duration,

    /// Units unresolved at this instant become timeouts
    pub deadline: Option<Instant>,

    /// Cancelling resolves every unresolved unit as a timeout
    pub cancel: Option<CancellationToken>,
}

impl DispatchOptions {
    pub fn new(per_request_timeout: Duration) -> Self {
        Self {
            per_request_timeout,
            deadline: None,
            cancel: None,
        }
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Resolves when the deadline passes or the token is cancelled.
    async fn interrupted(&self) -> Interrupt {
        let deadline = async {
            match self.deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending().await,
            }
        };
        let cancelled = async {
            match &self.cancel {
                Some(token) => token.cancelled().await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            biased;
            _ = cancelled => Interrupt::Cancelled,
            _ = deadline => Interrupt::DeadlineExceeded,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Interrupt {
    Cancelled,
    DeadlineExceeded,
}

impl fmt::Display for Interrupt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Interrupt::Cancelled => write!(f, "cancelled"),
            Interrupt::DeadlineExceeded => write!(f, "deadline exceeded"),
        }
    }
}

/// Why a single attempt failed.
#[derive(Debug)]
enum AttemptError {
    Backend(BackendError),
    TimedOut(Duration),
}

impl AttemptError {
    fn is_retryable(&self) -> bool {
        match self {
            AttemptError::Backend(e) => e.is_retryable(),
            // The unit's time budget is spent.
            AttemptError::TimedOut(_) => false,
        }
    }

    fn kind(&self) -> FailureKind {
        match self {
            AttemptError::Backend(BackendError::Timeout(_)) | AttemptError::TimedOut(_) => {
                FailureKind::Timeout
            }
            AttemptError::Backend(_) => FailureKind::BackendError,
        }
    }
}

impl fmt::Display for AttemptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttemptError::Backend(e) => write!(f, "{e}"),
            AttemptError::TimedOut(timeout) => write!(f, "timed out after {timeout:?}"),
        }
    }
}

/// Time budget shared by every attempt of one unit.
struct UnitBudget {
    timeout: Duration,
    deadline: OnceLock<Instant>,
}

impl UnitBudget {
    fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            deadline: OnceLock::new(),
        }
    }

    /// Start the clock on first call; later calls return the same deadline.
    fn start(&self) -> Instant {
        *self
            .deadline
            .get_or_init(|| Instant::now().checked_add(self.timeout).unwrap_or_else(far_future))
    }

    fn deadline(&self) -> Option<Instant> {
        self.deadline.get().copied()
    }

    /// Delay before the next attempt, or `None` to stop retrying.
    ///
    /// Never shorter than a provider's `retry_after`, and never past the
    /// unit's deadline.
    fn next_delay(&self, error: &AttemptError, delay: Option<Duration>) -> Option<Duration> {
        let mut delay = delay?;
        if let AttemptError::Backend(e) = error {
            if let Some(retry_after) = e.retry_after() {
                delay = delay.max(retry_after);
            }
        }
        match self.deadline() {
            Some(deadline) if Instant::now() + delay >= deadline => None,
            _ => Some(delay),
        }
    }
}

fn far_future() -> Instant {
    // Roughly 30 years, as tokio does for unbounded sleeps.
    Instant::now() + Duration::from_secs(86400 * 365 * 30)
}

/// Dispatches requests to registered backends under per-provider limits.
pub struct FanOutQuery {
    backends: HashMap<String, Arc<dyn ModelBackend>>,
    limiters: Arc<ProviderLimiterRegistry>,
    retry: RetryPolicy,
    circuit_breaker: CircuitBreaker,
}

impl FanOutQuery {
    pub fn new(limiters: Arc<ProviderLimiterRegistry>) -> Self {
        Self {
            backends: HashMap::new(),
            limiters,
            retry: RetryPolicy::default(),
            circuit_breaker: CircuitBreaker::default(),
        }
    }

    /// Limiters, retry policy and circuit breaker per config.
    pub fn from_config(config: &RuntimeConfig) -> Self {
        Self::new(Arc::new(config.limiter_registry()))
            .with_retry(config.retry.clone())
            .with_circuit_breaker(config.circuit_breaker.clone())
    }

    /// Register a backend under its id.
    pub fn with_backend(mut self, backend: Arc<dyn ModelBackend>) -> Self {
        self.backends.insert(backend.id().to_string(), backend);
        self
    }

    pub fn with_retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    pub fn with_circuit_breaker(mut self, config: CircuitBreakerConfig) -> Self {
        self.circuit_breaker = CircuitBreaker::new(config);
        self
    }

    pub fn limiters(&self) -> &Arc<ProviderLimiterRegistry> {
        &self.limiters
    }

    pub fn circuit_breaker(&self) -> &CircuitBreaker {
        &self.circuit_breaker
    }

    pub fn has_backend(&self, backend_id: &str) -> bool {
        self.backends.contains_key(backend_id)
    }

    /// Check that every request names a registered backend and a provider
    /// the limiter registry accepts.
    pub fn validate(&self, requests: &[BackendRequest]) -> Result<(), RuntimeError> {
        for request in requests {
            if !self.has_backend(&request.backend_id) {
                return Err(RuntimeError::UnknownBackend(request.backend_id.clone()));
            }
            self.limiters.check(&request.provider_id)?;
        }
        Ok(())
    }

    /// Dispatch all requests concurrently.
    ///
    /// Results are in request order. Only caller errors (unknown backend or
    /// provider) are `Err`, and they are reported before anything runs.
    pub async fn dispatch(
        &self,
        requests: &[BackendRequest],
        per_request_timeout: Duration,
    ) -> Result<Vec<BackendResult>, RuntimeError> {
        let options = DispatchOptions::new(per_request_timeout);
        self.dispatch_with(requests, &options).await
    }

    /// [`dispatch`](Self::dispatch) with a deadline and/or cancellation.
    pub async fn dispatch_with(
        &self,
        requests: &[BackendRequest],
        options: &DispatchOptions,
    ) -> Result<Vec<BackendResult>, RuntimeError> {
        self.validate(requests)?;

        let units = requests.iter().map(|request| self.run_unit(request, options));
        let results = join_all(units).await;

        let failures = results.iter().filter(|r| !r.is_success()).count();
        tracing::debug!(requests = requests.len(), failures, "Fan-out complete");
        Ok(results)
    }

    async fn run_unit(&self, request: &BackendRequest, options: &DispatchOptions) -> BackendResult {
        let attempts = AtomicU32::new(0);

        tokio::select! {
            biased;
            interrupt = options.interrupted() => {
                tracing::warn!(
                    backend = %request.backend_id,
                    reason = %interrupt,
                    "Unit abandoned"
                );
                BackendResult::failure(
                    &request.backend_id,
                    FailureKind::Timeout,
                    interrupt.to_string(),
                    attempts.load(Ordering::Relaxed),
                )
            }
            result = self.execute(request, options.per_request_timeout, &attempts) => result,
        }
    }

    async fn execute(
        &self,
        request: &BackendRequest,
        timeout: Duration,
        attempts: &AtomicU32,
    ) -> BackendResult {
        let backend_id = request.backend_id.as_str();
        let Some(backend) = self.backends.get(backend_id) else {
            return BackendResult::failure(
                backend_id,
                FailureKind::BackendError,
                "no backend registered",
                0,
            );
        };

        if !self.circuit_breaker.allow(backend_id) {
            tracing::warn!(backend = %backend_id, "Circuit open, failing fast");
            return BackendResult::failure(backend_id, FailureKind::BackendError, "circuit open", 0);
        }

        let budget = UnitBudget::new(timeout);
        let outcome = (|| self.attempt(backend.as_ref(), request, &budget, attempts))
            .retry(self.retry.backoff())
            .sleep(tokio::time::sleep)
            .when(AttemptError::is_retryable)
            .adjust(|error: &AttemptError, delay: Option<Duration>| budget.next_delay(error, delay))
            .notify(|error: &AttemptError, delay: Duration| {
                tracing::warn!(
                    backend = %backend_id,
                    attempt = attempts.load(Ordering::Relaxed),
                    delay = ?delay,
                    error = %error,
                    "Retrying backend call"
                );
            })
            .await;

        let attempts = attempts.load(Ordering::Relaxed);
        match outcome {
            Ok(response) => {
                self.circuit_breaker.record_success(backend_id);
                BackendResult::Success {
                    backend_id: backend_id.to_string(),
                    response,
                    attempts,
                }
            }
            Err(error) => {
                self.circuit_breaker.record_failure(backend_id);
                let kind = error.kind();
                tracing::warn!(
                    backend = %backend_id,
                    kind = %kind,
                    attempts,
                    error = %error,
                    "Backend unit failed"
                );
                BackendResult::failure(backend_id, kind, error.to_string(), attempts)
            }
        }
    }

    async fn attempt(
        &self,
        backend: &dyn ModelBackend,
        request: &BackendRequest,
        budget: &UnitBudget,
        attempts: &AtomicU32,
    ) -> Result<BackendResponse, AttemptError> {
        let acquire = self.limiters.acquire(&request.provider_id);
        let acquired = match budget.deadline() {
            // Retries wait for tokens inside the budget.
            Some(deadline) => tokio::time::timeout_at(deadline, acquire)
                .await
                .map_err(|_| AttemptError::TimedOut(budget.timeout))?,
            None => acquire.await,
        };
        acquired.map_err(|e| AttemptError::Backend(BackendError::Other(e.to_string())))?;
        attempts.fetch_add(1, Ordering::Relaxed);

        let call = backend.invoke(&request.messages);
        match tokio::time::timeout_at(budget.start(), call).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(e)) => Err(AttemptError::Backend(e)),
            Err(_) => Err(AttemptError::TimedOut(budget.timeout)),
        }
    }
}

impl fmt::Debug for FanOutQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut backends: Vec<&String> = self.backends.keys().collect();
        backends.sort();
        f.debug_struct("FanOutQuery")
            .field("backends", &backends)
            .field("retry", &self.retry)
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::backend::ChatMessage;
    use async_trait::async_trait;

    /// What a scripted backend does on each call.
    #[derive(Debug, Clone)]
    pub(crate) enum Script {
        Reply(String),
        Fail(BackendError),
        Hang,
        Delay(Duration, String),
        FailTimes(u32, BackendError, String),
    }

    pub(crate) struct ScriptedBackend {
        id: String,
        script: Script,
        pub(crate) calls: AtomicU32,
    }

    impl ScriptedBackend {
        pub(crate) fn new(id: &str, script: Script) -> Arc<Self> {
            Arc::new(Self {
                id: id.to_string(),
                script,
                calls: AtomicU32::new(0),
            })
        }

        pub(crate) fn reply(id: &str, text: &str) -> Arc<Self> {
            Self::new(id, Script::Reply(text.to_string()))
        }

        pub(crate) fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ModelBackend for ScriptedBackend {
        fn id(&self) -> &str {
            &self.id
        }

        async fn invoke(&self, _messages: &[ChatMessage]) -> Result<BackendResponse, BackendError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.script {
                Script::Reply(text) => Ok(BackendResponse::new(text.as_str())),
                Script::Fail(error) => Err(error.clone()),
                Script::Hang => std::future::pending().await,
                Script::Delay(delay, text) => {
                    tokio::time::sleep(*delay).await;
                    Ok(BackendResponse::new(text.as_str()))
                }
                Script::FailTimes(times, error, text) => {
                    if call < *times {
                        Err(error.clone())
                    } else {
                        Ok(BackendResponse::new(text.as_str()))
                    }
                }
            }
        }
    }

    fn request(backend_id: &str) -> BackendRequest {
        BackendRequest::new(backend_id, vec![ChatMessage::user("Rate this.")])
    }

    fn fast_retry(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::default()
            .with_max_attempts(max_attempts)
            .with_delays(Duration::from_millis(10), Duration::from_millis(100))
            .with_jitter(false)
    }

    fn query() -> FanOutQuery {
        FanOutQuery::new(Arc::new(ProviderLimiterRegistry::default()))
            .with_retry(RetryPolicy::none())
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_is_isolated_at_any_position() {
        let ids = ["openai/gpt-4o", "anthropic/claude", "google/gemini"];

        for failing in 0..ids.len() {
            let query = ids.iter().enumerate().fold(query(), |query, (i, id)| {
                let script = if i == failing {
                    Script::Fail(BackendError::Other("boom".into()))
                } else {
                    Script::Reply(format!("reply {i}"))
                };
                query.with_backend(ScriptedBackend::new(id, script))
            });

            let requests: Vec<BackendRequest> = ids.iter().map(|id| request(id)).collect();
            let results = query
                .dispatch(&requests, Duration::from_secs(30))
                .await
                .unwrap();

            assert_eq!(results.len(), 3);
            for (i, result) in results.iter().enumerate() {
                assert_eq!(result.backend_id(), ids[i]);
                if i == failing {
                    assert!(matches!(
                        result,
                        BackendResult::Failure { kind: FailureKind::BackendError, detail, .. }
                            if detail == "boom"
                    ));
                } else {
                    assert_eq!(result.text(), Some(format!("reply {i}").as_str()));
                }
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_backend_times_out() {
        let query = query()
            .with_backend(ScriptedBackend::new("local/stuck", Script::Hang))
            .with_backend(ScriptedBackend::reply("openai/gpt-4o", "fine"));

        let start = Instant::now();
        let results = query
            .dispatch(
                &[request("local/stuck"), request("openai/gpt-4o")],
                Duration::from_secs(5),
            )
            .await
            .unwrap();

        assert!(matches!(
            results[0],
            BackendResult::Failure { kind: FailureKind::Timeout, .. }
        ));
        assert!(results[1].is_success());
        assert!(start.elapsed() < Duration::from_secs(6));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_bounds_the_whole_unit() {
        let stuck = ScriptedBackend::new("local/stuck", Script::Hang);
        let query = FanOutQuery::new(Arc::new(ProviderLimiterRegistry::default()))
            .with_retry(RetryPolicy::default())
            .with_backend(stuck.clone());

        let start = Instant::now();
        let results = query
            .dispatch(&[request("local/stuck")], Duration::from_secs(5))
            .await
            .unwrap();

        assert!(start.elapsed() < Duration::from_secs(6));
        assert!(matches!(
            results[0],
            BackendResult::Failure { kind: FailureKind::Timeout, attempts: 1, .. }
        ));
        assert_eq!(stuck.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_failures_share_one_budget() {
        // Each call fails after 4s; a 10s budget leaves room for two calls.
        struct SlowFailure;

        #[async_trait]
        impl ModelBackend for SlowFailure {
            fn id(&self) -> &str {
                "openai/gpt-4o"
            }

            async fn invoke(&self, _messages: &[ChatMessage]) -> Result<BackendResponse, BackendError> {
                tokio::time::sleep(Duration::from_secs(4)).await;
                Err(BackendError::Transport("reset".into()))
            }
        }

        let query = query()
            .with_retry(fast_retry(10))
            .with_backend(Arc::new(SlowFailure));

        let start = Instant::now();
        let results = query
            .dispatch(&[request("openai/gpt-4o")], Duration::from_secs(10))
            .await
            .unwrap();

        assert!(start.elapsed() < Duration::from_millis(10_050));
        assert!(!results[0].is_success());
        assert!(results[0].attempts() <= 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_waits_for_retry_after() {
        let limited = ScriptedBackend::new(
            "openai/gpt-4o",
            Script::FailTimes(
                1,
                BackendError::RateLimited {
                    retry_after: Some(Duration::from_secs(30)),
                },
                "ok".into(),
            ),
        );
        let query = query()
            .with_retry(fast_retry(3))
            .with_backend(limited.clone());

        let start = Instant::now();
        let results = query
            .dispatch(&[request("openai/gpt-4o")], Duration::from_secs(120))
            .await
            .unwrap();

        assert!(start.elapsed() >= Duration::from_secs(30));
        assert_eq!(results[0].text(), Some("ok"));
        assert_eq!(results[0].attempts(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_after_past_budget_gives_up() {
        let limited = ScriptedBackend::new(
            "openai/gpt-4o",
            Script::Fail(BackendError::RateLimited {
                retry_after: Some(Duration::from_secs(60)),
            }),
        );
        let query = query()
            .with_retry(fast_retry(3))
            .with_backend(limited.clone());

        let start = Instant::now();
        let results = query
            .dispatch(&[request("openai/gpt-4o")], Duration::from_secs(10))
            .await
            .unwrap();

        assert!(start.elapsed() < Duration::from_secs(1));
        assert!(matches!(
            results[0],
            BackendResult::Failure { kind: FailureKind::BackendError, attempts: 1, .. }
        ));
        assert_eq!(limited.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_order_follows_requests_not_completion() {
        let query = query()
            .with_backend(ScriptedBackend::new(
                "slow/model",
                Script::Delay(Duration::from_secs(3), "slow".into()),
            ))
            .with_backend(ScriptedBackend::reply("fast/model", "fast"));

        let results = query
            .dispatch(&[request("slow/model"), request("fast/model")], Duration::from_secs(10))
            .await
            .unwrap();
        assert_eq!(results[0].backend_id(), "slow/model");
        assert_eq!(results[0].text(), Some("slow"));
        assert_eq!(results[1].text(), Some("fast"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retryable_errors_are_retried() {
        let flaky = ScriptedBackend::new(
            "openai/gpt-4o",
            Script::FailTimes(2, BackendError::Transport("reset".into()), "ok".into()),
        );
        let query = query()
            .with_retry(fast_retry(3))
            .with_backend(flaky.clone());

        let results = query
            .dispatch(&[request("openai/gpt-4o")], Duration::from_secs(10))
            .await
            .unwrap();
        assert_eq!(results[0].text(), Some("ok"));
        assert_eq!(results[0].attempts(), 3);
        assert_eq!(flaky.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_errors_are_not_retried() {
        let rejecting = ScriptedBackend::new(
            "openai/gpt-4o",
            Script::Fail(BackendError::Api {
                status: 400,
                message: "bad request".into(),
            }),
        );
        let query = query()
            .with_retry(fast_retry(5))
            .with_backend(rejecting.clone());

        let results = query
            .dispatch(&[request("openai/gpt-4o")], Duration::from_secs(10))
            .await
            .unwrap();
        assert!(!results[0].is_success());
        assert_eq!(results[0].attempts(), 1);
        assert_eq!(rejecting.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_each_attempt_takes_a_token() {
        let limiters = Arc::new(ProviderLimiterRegistry::strict().with_provider("openai", 60.0));
        let flaky = ScriptedBackend::new(
            "openai/gpt-4o",
            Script::FailTimes(1, BackendError::Transport("reset".into()), "ok".into()),
        );
        let query = FanOutQuery::new(Arc::clone(&limiters))
            .with_retry(fast_retry(2))
            .with_backend(flaky);

        query
            .dispatch(&[request("openai/gpt-4o")], Duration::from_secs(10))
            .await
            .unwrap();

        let available = limiters.bucket("openai").unwrap().available().await;
        assert!(available < 58.1);
    }

    #[tokio::test]
    async fn test_unknown_provider_rejected_before_dispatch() {
        let known = ScriptedBackend::reply("anthropic/claude", "ok");
        let query = FanOutQuery::new(Arc::new(
            ProviderLimiterRegistry::strict().with_provider("anthropic", 60.0),
        ))
        .with_backend(known.clone())
        .with_backend(ScriptedBackend::reply("mistral/large", "ok"));

        let result = query
            .dispatch(
                &[request("anthropic/claude"), request("mistral/large")],
                Duration::from_secs(10),
            )
            .await;
        assert!(matches!(result, Err(RuntimeError::UnknownProvider(p)) if p == "mistral"));
        assert_eq!(known.calls(), 0);
    }

    #[tokio::test]
    async fn test_unknown_backend_rejected() {
        let result = query()
            .dispatch(&[request("openai/gpt-4o")], Duration::from_secs(10))
            .await;
        assert!(matches!(result, Err(RuntimeError::UnknownBackend(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_circuit_fails_fast() {
        let failing = ScriptedBackend::new(
            "openai/gpt-4o",
            Script::Fail(BackendError::Api {
                status: 500,
                message: "down".into(),
            }),
        );
        let query = query()
            .with_circuit_breaker(CircuitBreakerConfig {
                failure_threshold: 1,
                ..Default::default()
            })
            .with_backend(failing.clone());

        let requests = [request("openai/gpt-4o")];
        query.dispatch(&requests, Duration::from_secs(10)).await.unwrap();
        let results = query.dispatch(&requests, Duration::from_secs(10)).await.unwrap();

        assert!(matches!(
            &results[0],
            BackendResult::Failure { detail, attempts: 0, .. } if detail == "circuit open"
        ));
        assert_eq!(failing.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_resolves_unfinished_units_as_timeouts() {
        let query = query()
            .with_backend(ScriptedBackend::new("local/stuck", Script::Hang))
            .with_backend(ScriptedBackend::reply("openai/gpt-4o", "done"));

        let token = CancellationToken::new();
        let trigger = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            trigger.cancel();
        });

        let options = DispatchOptions::new(Duration::from_secs(60)).with_cancel(token);
        let results = query
            .dispatch_with(&[request("local/stuck"), request("openai/gpt-4o")], &options)
            .await
            .unwrap();

        assert!(matches!(
            &results[0],
            BackendResult::Failure { kind: FailureKind::Timeout, detail, .. } if detail == "cancelled"
        ));
        assert_eq!(results[1].text(), Some("done"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_resolves_unfinished_units_as_timeouts() {
        let query = query().with_backend(ScriptedBackend::new("local/stuck", Script::Hang));

        let options = DispatchOptions::new(Duration::from_secs(60))
            .with_deadline(Instant::now() + Duration::from_secs(2));
        let results = query
            .dispatch_with(&[request("local/stuck")], &options)
            .await
            .unwrap();

        assert!(matches!(
            &results[0],
            BackendResult::Failure { kind: FailureKind::Timeout, detail, attempts: 1, .. }
                if detail == "deadline exceeded"
        ));
    }
}
