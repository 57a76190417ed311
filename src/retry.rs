//! Retry decisions, backoff timing and the retry loop.
//!
//! Deciding *whether* to retry ([`should_retry`]) and *how long* to wait
//! ([`compute_delay`]) are separate pure functions; [`RetryExecutor`] only
//! sequences them around a [`Transport`].

use std::{
    collections::HashSet,
    fmt,
    panic::{catch_unwind, AssertUnwindSafe},
    sync::Arc,
    time::Duration,
};

use async_trait::async_trait;
use rand::Rng;
use reqwest::{header::RETRY_AFTER, Method};

use crate::{
    context::{call_hook, Hooks, NoopHooks},
    ApiRequest, ApiResponse, CallContext, GuacError, Result, Transport, TransportError,
    TransportErrorKind,
};

/// Outcome of a single send.
#[derive(Clone, Copy, Debug)]
pub enum AttemptOutcome<'a> {
    Response(&'a ApiResponse),
    TransportError(&'a TransportError),
}

/// One send and its outcome; never outlives the retry loop.
#[derive(Clone, Copy, Debug)]
pub struct Attempt<'a> {
    /// 1-based attempt number.
    pub number: u32,
    pub outcome: AttemptOutcome<'a>,
}

/// Custom retry decision.
///
/// `Some(decision)` overrides the policy's computed decision; `None` keeps it.
pub type RetryPredicate =
    Arc<dyn Fn(&ApiRequest, &Attempt<'_>) -> Option<bool> + Send + Sync>;

/// Immutable retry configuration.
#[derive(Clone)]
pub struct RetryPolicy {
    /// Total sends per call, including the first. Zero is treated as one.
    pub max_attempts: u32,
    pub retry_methods: HashSet<Method>,
    pub retry_statuses: HashSet<u16>,
    /// Transport failures worth another send, for any method.
    ///
    /// `Timeout` may fire after the server received the request, so a POST or
    /// PATCH can be applied twice. Drop it for non-idempotent workloads.
    pub retry_on: HashSet<TransportErrorKind>,
    /// Honor `Retry-After` on retryable responses.
    pub respect_retry_after: bool,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
    /// Uniform jitter added to each delay, `[lo, hi)`.
    pub jitter: (Duration, Duration),
    pub predicate: Option<RetryPredicate>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_methods: [
                Method::GET,
                Method::HEAD,
                Method::OPTIONS,
                Method::TRACE,
                Method::PUT,
                Method::DELETE,
            ]
            .into_iter()
            .collect(),
            retry_statuses: [408, 429, 500, 502, 503, 504].into_iter().collect(),
            retry_on: [
                TransportErrorKind::Connect,
                TransportErrorKind::ConnectTimeout,
                TransportErrorKind::Timeout,
                TransportErrorKind::Protocol,
            ]
            .into_iter()
            .collect(),
            respect_retry_after: true,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(8),
            backoff_multiplier: 2.0,
            jitter: (Duration::ZERO, Duration::from_millis(250)),
            predicate: None,
        }
    }
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("retry_methods", &self.retry_methods)
            .field("retry_statuses", &self.retry_statuses)
            .field("retry_on", &self.retry_on)
            .field("respect_retry_after", &self.respect_retry_after)
            .field("base_delay", &self.base_delay)
            .field("max_delay", &self.max_delay)
            .field("backoff_multiplier", &self.backoff_multiplier)
            .field("jitter", &self.jitter)
            .field("predicate", &self.predicate.as_ref().map(|_| "<fn>"))
            .finish()
    }
}

impl RetryPolicy {
    /// A policy that sends exactly once.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_retry_methods(mut self, methods: impl IntoIterator<Item = Method>) -> Self {
        self.retry_methods = methods.into_iter().collect();
        self
    }

    pub fn with_retry_statuses(mut self, statuses: impl IntoIterator<Item = u16>) -> Self {
        self.retry_statuses = statuses.into_iter().collect();
        self
    }

    pub fn with_retry_on(mut self, kinds: impl IntoIterator<Item = TransportErrorKind>) -> Self {
        self.retry_on = kinds.into_iter().collect();
        self
    }

    pub fn with_respect_retry_after(mut self, respect: bool) -> Self {
        self.respect_retry_after = respect;
        self
    }

    pub fn with_backoff(mut self, base_delay: Duration, max_delay: Duration, multiplier: f64) -> Self {
        self.base_delay = base_delay;
        self.max_delay = max_delay;
        self.backoff_multiplier = multiplier;
        self
    }

    pub fn with_jitter(mut self, lo: Duration, hi: Duration) -> Self {
        self.jitter = (lo, hi);
        self
    }

    pub fn with_predicate<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&ApiRequest, &Attempt<'_>) -> Option<bool> + Send + Sync + 'static,
    {
        self.predicate = Some(Arc::new(predicate));
        self
    }

    pub(crate) fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }
}

/// Parses a `Retry-After` value given in seconds.
///
/// Missing, empty, non-numeric and non-finite values yield `None`; negative
/// values clamp to zero and values too large for a `Duration` saturate.
/// HTTP-date values are not supported.
pub fn parse_retry_after(value: Option<&str>) -> Option<Duration> {
    let seconds: f64 = value?.trim().parse().ok()?;
    if !seconds.is_finite() {
        return None;
    }
    Some(Duration::try_from_secs_f64(seconds.max(0.0)).unwrap_or(Duration::MAX))
}

/// Computed retry decision for one attempt, before any custom predicate.
pub fn default_decision(policy: &RetryPolicy, request: &ApiRequest, attempt: &Attempt<'_>) -> bool {
    match attempt.outcome {
        AttemptOutcome::TransportError(err) => policy.retry_on.contains(&err.kind()),
        AttemptOutcome::Response(response) => {
            policy.retry_methods.contains(&request.method)
                && policy.retry_statuses.contains(&response.status)
        }
    }
}

/// Decides whether `attempt` should be followed by another send.
///
/// A configured predicate overrides the default decision. If it abstains
/// (`None`) or panics, the default decision stands.
pub fn should_retry(policy: &RetryPolicy, request: &ApiRequest, attempt: &Attempt<'_>) -> bool {
    let computed = default_decision(policy, request, attempt);
    let Some(predicate) = &policy.predicate else {
        return computed;
    };

    match catch_unwind(AssertUnwindSafe(|| predicate(request, attempt))) {
        Ok(Some(decision)) => decision,
        Ok(None) => computed,
        Err(_) => {
            #[cfg(feature = "tracing")]
            tracing::warn!("retry predicate panicked; using default decision");
            computed
        }
    }
}

/// Delay before the attempt following `attempt` (1-based).
pub fn compute_delay<R: Rng>(
    policy: &RetryPolicy,
    attempt: u32,
    response: Option<&ApiResponse>,
    rng: &mut R,
) -> Duration {
    let max = policy.max_delay.as_secs_f64();
    let jitter = sample_jitter(policy.jitter, rng);

    if policy.respect_retry_after {
        let hint = response.and_then(|response| parse_retry_after(response.header(RETRY_AFTER.as_str())));
        if let Some(hint) = hint {
            return seconds(max.min(hint.as_secs_f64() + jitter), policy.max_delay);
        }
    }

    let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
    let backoff = policy.base_delay.as_secs_f64() * policy.backoff_multiplier.powi(exponent);
    let capped = if backoff.is_finite() { backoff.min(max) } else { max };
    seconds(capped + jitter, policy.max_delay)
}

fn sample_jitter<R: Rng>((lo, hi): (Duration, Duration), rng: &mut R) -> f64 {
    let (lo, hi) = (lo.as_secs_f64(), hi.as_secs_f64());
    if hi > lo {
        rng.gen_range(lo..hi)
    } else {
        lo
    }
}

fn seconds(value: f64, fallback: Duration) -> Duration {
    Duration::try_from_secs_f64(value.max(0.0)).unwrap_or(fallback)
}

/// Suspension primitive used between attempts.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, delay: Duration);
}

/// Suspends the calling task on the tokio timer.
#[derive(Clone, Copy, Debug, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, delay: Duration) {
        tokio::time::sleep(delay).await;
    }
}

/// Drives the retry loop for one call. Holds no per-call state.
#[derive(Clone)]
pub struct RetryExecutor {
    policy: Arc<RetryPolicy>,
    sleeper: Arc<dyn Sleeper>,
    hooks: Arc<dyn Hooks>,
}

impl fmt::Debug for RetryExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryExecutor")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl RetryExecutor {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy: Arc::new(policy),
            sleeper: Arc::new(TokioSleeper),
            hooks: Arc::new(NoopHooks),
        }
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn with_hooks(mut self, hooks: Arc<dyn Hooks>) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Sends `request` until it succeeds, is not retryable, or attempts run out.
    ///
    /// The final response is returned whatever its status; only a final
    /// transport failure or a cancellation becomes an error.
    pub async fn execute(
        &self,
        transport: &dyn Transport,
        request: &ApiRequest,
        ctx: &CallContext,
    ) -> Result<ApiResponse> {
        let max_attempts = self.policy.attempts();
        let mut number = 1u32;

        loop {
            call_hook("on_request", || self.hooks.on_request(request, number));
            let result = ctx.run(transport.send(request)).await?;
            if let Ok(response) = &result {
                call_hook("on_response", || self.hooks.on_response(request, response));
            }

            if number >= max_attempts {
                return result.map_err(GuacError::Transport);
            }

            let attempt = Attempt {
                number,
                outcome: match &result {
                    Ok(response) => AttemptOutcome::Response(response),
                    Err(err) => AttemptOutcome::TransportError(err),
                },
            };
            if !should_retry(&self.policy, request, &attempt) {
                return result.map_err(GuacError::Transport);
            }

            let delay = compute_delay(
                &self.policy,
                number,
                result.as_ref().ok(),
                &mut rand::thread_rng(),
            );

            #[cfg(feature = "tracing")]
            tracing::debug!(
                method = %request.method,
                path = %request.path,
                attempt = number,
                delay_ms = delay.as_millis() as u64,
                "retrying request"
            );

            ctx.run(self.sleeper.sleep(delay)).await?;
            number += 1;
        }
    }
}
