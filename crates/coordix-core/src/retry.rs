//! The `Task` abstraction and the `retry` engine.
//!
//! Per the design notes, retry/backoff configuration is not conflated with
//! the host runtime's `Future`: a [`Task`] is a builder that captures
//! `{fn, retry, backoff, timeout, abort}` and exposes [`Task::run`] (await
//! to completion) and [`Task::detach`] (fire-and-forget via `tokio::spawn`).

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::backoff::BackoffPolicy;
use crate::error::CoordError;

/// Classifies an error as retryable (`true`) or terminal (`false`).
pub type RetryPolicy = Arc<dyn Fn(&anyhow::Error) -> bool + Send + Sync>;

/// Configuration for [`retry`] / [`Task`].
pub struct RetryConfig {
    /// Maximum number of invocations of the retried function. `0` means "do
    /// not invoke at all" (an explicit edge case, not an error).
    pub max_attempts: u32,
    /// Delay policy between attempts.
    pub backoff_policy: BackoffPolicy,
    /// Decides whether a given error should trigger another attempt.
    pub retry_policy: RetryPolicy,
    /// Bounds the total wall-time spent retrying (first attempt included).
    pub retry_timeout: Option<Duration>,
    /// Cooperative cancellation signal.
    pub abort_signal: Option<CancellationToken>,
}

impl RetryConfig {
    /// A config that retries every error up to `max_attempts` times with no
    /// backoff delay and no timeout/abort signal. Convenient for tests.
    #[must_use]
    pub fn new(max_attempts: u32, backoff_policy: BackoffPolicy) -> Self {
        Self {
            max_attempts,
            backoff_policy,
            retry_policy: Arc::new(|_| true),
            retry_timeout: None,
            abort_signal: None,
        }
    }

    /// Overrides which errors are considered retryable.
    #[must_use]
    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    /// Bounds total retry wall-time.
    #[must_use]
    pub fn with_retry_timeout(mut self, timeout: Duration) -> Self {
        self.retry_timeout = Some(timeout);
        self
    }

    /// Attaches a cancellation token.
    #[must_use]
    pub fn with_abort_signal(mut self, token: CancellationToken) -> Self {
        self.abort_signal = Some(token);
        self
    }
}

/// Runs `make_future` up to `config.max_attempts` times, honoring backoff,
/// `retry_timeout` and `abort_signal`.
///
/// `make_future` is called once per attempt (it must build a fresh future
/// each time, since futures are single-shot).
///
/// # Errors
///
/// - Returns the original error unwrapped (no retry attempted) the moment
///   `config.retry_policy` returns `false` for it.
/// - Returns [`CoordError::RetryExhausted`] once `max_attempts` invocations
///   have all failed.
/// - Returns [`CoordError::Aborted`] if `abort_signal` trips before the next
///   attempt or before a backoff sleep completes.
/// - Returns the last error, unwrapped, if `retry_timeout` elapses (the spec
///   models this the same way as "no wrap": the caller already knows it
///   timed out from the elapsed wall clock).
pub async fn retry<F, Fut, T>(mut make_future: F, config: RetryConfig) -> Result<T, anyhow::Error>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, anyhow::Error>>,
{
    if config.max_attempts == 0 {
        return Err(CoordError::Aborted.into());
    }

    let deadline = config.retry_timeout.map(|d| tokio::time::Instant::now() + d);
    let mut attempt = 0u32;
    let mut last_error: Option<anyhow::Error> = None;

    loop {
        attempt += 1;

        if let Some(token) = &config.abort_signal {
            if token.is_cancelled() {
                return Err(CoordError::Aborted.into());
            }
        }

        let result = if let Some(token) = &config.abort_signal {
            tokio::select! {
                biased;
                () = token.cancelled() => return Err(CoordError::Aborted.into()),
                res = make_future(attempt) => res,
            }
        } else {
            make_future(attempt).await
        };

        let error = match result {
            Ok(value) => return Ok(value),
            Err(error) => error,
        };

        if !(config.retry_policy)(&error) {
            return Err(error);
        }

        if attempt >= config.max_attempts {
            return Err(CoordError::RetryExhausted {
                attempts: attempt,
                source: error,
            }
            .into());
        }

        if let Some(deadline) = deadline {
            if tokio::time::Instant::now() >= deadline {
                return Err(error);
            }
        }

        let delay = config.backoff_policy.delay_for(attempt, &error);
        last_error = Some(error);

        if let Some(token) = &config.abort_signal {
            tokio::select! {
                biased;
                () = token.cancelled() => return Err(CoordError::Aborted.into()),
                () = tokio::time::sleep(delay) => {}
            }
        } else {
            tokio::time::sleep(delay).await;
        }

        if let Some(deadline) = deadline {
            if tokio::time::Instant::now() >= deadline {
                return Err(last_error.take().unwrap_or_else(|| anyhow::anyhow!("retry timeout elapsed")));
            }
        }
    }
}

/// A builder capturing `{fn, retry, backoff, timeout, abort}`, runnable via
/// [`Task::run`] or detachable via [`Task::detach`].
///
/// Deliberately distinct from a bare `Future`: a `Task` can be built once and
/// run multiple times, since `factory` is re-invoked on every attempt and the
/// whole config is cheaply cloneable-by-reference (`Arc` internals).
pub struct Task<F, T> {
    factory: F,
    config: RetryConfig,
    _marker: std::marker::PhantomData<T>,
}

impl<F, Fut, T> Task<F, T>
where
    F: FnMut(u32) -> Fut + Send + 'static,
    Fut: Future<Output = Result<T, anyhow::Error>> + Send,
    T: Send + 'static,
{
    /// Builds a task from a per-attempt future factory and a retry config.
    pub fn new(factory: F, config: RetryConfig) -> Self {
        Self {
            factory,
            config,
            _marker: std::marker::PhantomData,
        }
    }

    /// Awaits the task to completion, applying retry/backoff/timeout/abort.
    pub async fn run(self) -> Result<T, anyhow::Error> {
        retry(self.factory, self.config).await
    }
}

impl<F, Fut, T> Task<F, T>
where
    F: FnMut(u32) -> Fut + Send + 'static,
    Fut: Future<Output = Result<T, anyhow::Error>> + Send + 'static,
    T: Send + 'static,
{
    /// Fire-and-forget: spawns the task on the current Tokio runtime and
    /// returns immediately. Errors are logged, not surfaced.
    pub fn detach(self) {
        tokio::spawn(async move {
            if let Err(error) = self.run().await {
                tracing::warn!(error = %error, "detached task failed");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    #[tokio::test]
    async fn retry_exhausted_after_exact_attempt_count() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = calls.clone();

        let config = RetryConfig::new(4, BackoffPolicy::constant(Duration::ZERO, None));
        let result: Result<(), _> = retry(
            move |_attempt| {
                calls_clone.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(anyhow::anyhow!("always fails")) }
            },
            config,
        )
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 4);
        let err = result.unwrap_err();
        let coord_err = err.downcast::<CoordError>().unwrap();
        assert!(matches!(coord_err, CoordError::RetryExhausted { attempts: 4, .. }));
    }

    #[tokio::test]
    async fn max_attempts_zero_never_invokes() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = calls.clone();

        let config = RetryConfig::new(0, BackoffPolicy::constant(Duration::ZERO, None));
        let result: Result<(), _> = retry(
            move |_attempt| {
                calls_clone.fetch_add(1, Ordering::SeqCst);
                async { Ok::<(), anyhow::Error>(()) }
            },
            config,
        )
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn non_retryable_error_surfaces_unwrapped() {
        let config = RetryConfig::new(5, BackoffPolicy::constant(Duration::ZERO, None))
            .with_retry_policy(Arc::new(|_| false));

        let result: Result<(), _> =
            retry(|_attempt| async { Err(anyhow::anyhow!("terminal")) }, config).await;

        assert_eq!(result.unwrap_err().to_string(), "terminal");
    }

    #[tokio::test]
    async fn succeeds_before_exhausting_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = calls.clone();

        let config = RetryConfig::new(10, BackoffPolicy::constant(Duration::ZERO, None));
        let result = retry(
            move |attempt| {
                let calls_clone = calls_clone.clone();
                async move {
                    calls_clone.fetch_add(1, Ordering::SeqCst);
                    if attempt < 3 {
                        Err(anyhow::anyhow!("not yet"))
                    } else {
                        Ok(attempt)
                    }
                }
            },
            config,
        )
        .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn abort_signal_short_circuits() {
        let token = CancellationToken::new();
        token.cancel();

        let config = RetryConfig::new(5, BackoffPolicy::constant(Duration::ZERO, None))
            .with_abort_signal(token);

        let result: Result<(), _> =
            retry(|_attempt| async { Err(anyhow::anyhow!("irrelevant")) }, config).await;

        let err = result.unwrap_err().downcast::<CoordError>().unwrap();
        assert!(matches!(err, CoordError::Aborted));
    }

    #[tokio::test]
    async fn task_run_applies_retry_config() {
        let task = Task::new(
            |_attempt| async { Ok::<_, anyhow::Error>(42) },
            RetryConfig::new(1, BackoffPolicy::constant(Duration::ZERO, None)),
        );
        assert_eq!(task.run().await.unwrap(), 42);
    }
}
