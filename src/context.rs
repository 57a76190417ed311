use std::{
    future::{pending, Future},
    panic::{catch_unwind, AssertUnwindSafe},
};

use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;

use crate::{ApiRequest, ApiResponse, GuacError, Result};

/// Per-call cancellation and deadline.
///
/// Observed at every suspension point of a call: token refresh, each send and
/// each backoff delay.
#[derive(Clone, Debug, Default)]
pub struct CallContext {
    cancel: Option<CancellationToken>,
    deadline: Option<Instant>,
}

impl CallContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_timeout(self, timeout: std::time::Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Drives `fut` unless the call is cancelled or its deadline passes first.
    pub(crate) async fn run<F: Future>(&self, fut: F) -> Result<F::Output> {
        let cancelled = async {
            match &self.cancel {
                Some(token) => token.cancelled().await,
                None => pending().await,
            }
        };
        let expired = async {
            match self.deadline {
                Some(deadline) => sleep_until(deadline).await,
                None => pending().await,
            }
        };

        tokio::select! {
            biased;
            _ = cancelled => Err(GuacError::Cancelled),
            _ = expired => Err(GuacError::DeadlineExceeded),
            output = fut => Ok(output),
        }
    }
}

/// Observability callbacks invoked around every attempt.
///
/// Hooks cannot influence control flow; a panicking hook is logged and ignored.
pub trait Hooks: Send + Sync {
    fn on_request(&self, _request: &ApiRequest, _attempt: u32) {}

    fn on_response(&self, _request: &ApiRequest, _response: &ApiResponse) {}
}

/// Hooks that do nothing.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopHooks;

impl Hooks for NoopHooks {}

pub(crate) fn call_hook(name: &str, hook: impl FnOnce()) {
    if catch_unwind(AssertUnwindSafe(hook)).is_err() {
        #[cfg(feature = "tracing")]
        tracing::warn!(hook = name, "observability hook panicked; ignoring");
        #[cfg(not(feature = "tracing"))]
        let _ = name;
    }
}
