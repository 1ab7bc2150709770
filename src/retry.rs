//! Bounded retries with exponential backoff.

use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::api::ApiError;
use crate::poll::sleep_or_cancel;

/// Limits applied to a retried call.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of calls, including the first one.
    pub max_attempts: u32,
    /// Pause after the first failed call.
    pub initial_backoff: Duration,
    /// Upper bound for a single pause.
    pub max_backoff: Duration,
    /// Retries stop once the next pause would cross this budget.
    pub max_elapsed: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
            max_elapsed: Duration::from_secs(5 * 60),
        }
    }
}

impl RetryPolicy {
    /// Returns a copy with a different elapsed budget.
    #[must_use]
    pub const fn with_max_elapsed(mut self, max_elapsed: Duration) -> Self {
        self.max_elapsed = max_elapsed;
        self
    }
}

/// Failure reported by one attempt.
#[derive(Debug)]
pub enum Attempt<E> {
    /// The call may succeed if repeated.
    Retry(E),
    /// The call must not be repeated.
    Stop(E),
}

/// Errors returned by [`retry_with`].
#[derive(Debug, Error)]
pub enum RetryError<E> {
    /// Every permitted attempt failed with a retryable error.
    #[error("gave up after {attempts} attempts: {source}")]
    Exhausted {
        /// Number of calls made.
        attempts: u32,
        /// Error from the last call.
        #[source]
        source: E,
    },
    /// An attempt failed with a non-retryable error.
    #[error("{source}")]
    Permanent {
        /// Error from the failing call.
        #[source]
        source: E,
    },
    /// The caller cancelled between attempts.
    #[error("cancelled while retrying")]
    Cancelled,
}

impl<E> RetryError<E> {
    /// Returns the error reported by the last attempt, if any.
    #[must_use]
    pub const fn last_error(&self) -> Option<&E> {
        match self {
            Self::Exhausted { source, .. } | Self::Permanent { source } => Some(source),
            Self::Cancelled => None,
        }
    }
}

/// Runs `op` until it succeeds, reports [`Attempt::Stop`], or the policy is
/// exhausted. `op` receives the one-based attempt number.
///
/// # Errors
///
/// Returns [`RetryError`] describing why retrying ended.
pub async fn retry_with<T, E, F, Fut>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    mut op: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, Attempt<E>>>,
    E: std::fmt::Display,
{
    let started = Instant::now();
    let mut backoff = policy.initial_backoff;
    let mut attempt = 1_u32;

    loop {
        let outcome = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(RetryError::Cancelled),
            outcome = op(attempt) => outcome,
        };

        let source = match outcome {
            Ok(value) => return Ok(value),
            Err(Attempt::Stop(source)) => return Err(RetryError::Permanent { source }),
            Err(Attempt::Retry(source)) => source,
        };

        if attempt >= policy.max_attempts || started.elapsed() + backoff > policy.max_elapsed {
            return Err(RetryError::Exhausted {
                attempts: attempt,
                source,
            });
        }

        debug!(attempt, backoff = ?backoff, error = %source, "retrying after transient failure");
        if !sleep_or_cancel(backoff, cancel).await {
            return Err(RetryError::Cancelled);
        }
        backoff = backoff.saturating_mul(2).min(policy.max_backoff);
        attempt = attempt.saturating_add(1);
    }
}

/// Retries `op` while it fails with a retryable [`ApiError`].
///
/// # Errors
///
/// Returns [`RetryError`] describing why retrying ended.
pub async fn retry_transient<T, F, Fut>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    mut op: F,
) -> Result<T, RetryError<ApiError>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ApiError>>,
{
    retry_with(policy, cancel, |_| {
        let call = op();
        async move {
            call.await.map_err(|err| {
                if err.is_retryable() {
                    Attempt::Retry(err)
                } else {
                    Attempt::Stop(err)
                }
            })
        }
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::cell::Cell;
    use std::future::ready;

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 4,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(3),
            max_elapsed: Duration::from_secs(60),
        }
    }

    #[rstest]
    #[tokio::test(start_paused = true)]
    async fn transient_errors_are_retried_until_success() {
        let calls = Cell::new(0_u32);
        let started = Instant::now();

        let value = retry_transient(&policy(), &CancellationToken::new(), || {
            calls.set(calls.get() + 1);
            ready(if calls.get() < 3 {
                Err(ApiError::http(503, None, "unavailable"))
            } else {
                Ok("done")
            })
        })
        .await
        .expect("third attempt succeeds");

        assert_eq!(value, "done");
        assert_eq!(calls.get(), 3);
        assert_eq!(started.elapsed(), Duration::from_secs(3));
    }

    #[rstest]
    #[tokio::test(start_paused = true)]
    async fn terminal_errors_are_not_retried() {
        let calls = Cell::new(0_u32);

        let err = retry_transient(&policy(), &CancellationToken::new(), || {
            calls.set(calls.get() + 1);
            ready(Err::<(), _>(ApiError::http(400, Some("INVALID_ATTRIBUTE"), "bad")))
        })
        .await
        .expect_err("terminal error must stop");

        assert_eq!(calls.get(), 1);
        assert!(matches!(err, RetryError::Permanent { .. }), "{err}");
    }

    #[rstest]
    #[tokio::test(start_paused = true)]
    async fn attempts_are_bounded_and_backoff_is_capped() {
        let calls = Cell::new(0_u32);
        let started = Instant::now();

        let err = retry_transient(&policy(), &CancellationToken::new(), || {
            calls.set(calls.get() + 1);
            ready(Err::<(), _>(ApiError::http(409, None, "conflict")))
        })
        .await
        .expect_err("retries must run out");

        assert!(
            matches!(err, RetryError::Exhausted { attempts: 4, .. }),
            "{err}"
        );
        assert_eq!(calls.get(), 4);
        // Pauses of 1s, 2s, then 3s (capped).
        assert_eq!(started.elapsed(), Duration::from_secs(6));
    }

    #[rstest]
    #[tokio::test(start_paused = true)]
    async fn elapsed_budget_stops_retrying() {
        let calls = Cell::new(0_u32);
        let tight = policy().with_max_elapsed(Duration::from_secs(2));

        let err = retry_transient(&tight, &CancellationToken::new(), || {
            calls.set(calls.get() + 1);
            ready(Err::<(), _>(ApiError::http(500, None, "boom")))
        })
        .await
        .expect_err("budget must run out");

        // 1s pause fits, the following 2s pause would cross the budget.
        assert!(
            matches!(err, RetryError::Exhausted { attempts: 2, .. }),
            "{err}"
        );
        assert_eq!(calls.get(), 2);
    }

    #[rstest]
    #[tokio::test(start_paused = true)]
    async fn cancellation_stops_retrying() {
        let cancel = CancellationToken::new();
        let calls = Cell::new(0_u32);

        let err = retry_transient(&policy(), &cancel, || {
            calls.set(calls.get() + 1);
            cancel.cancel();
            ready(Err::<(), _>(ApiError::http(503, None, "unavailable")))
        })
        .await
        .expect_err("cancelled retry must fail");

        assert!(matches!(err, RetryError::Cancelled), "{err}");
        assert_eq!(calls.get(), 1);
    }

    #[rstest]
    #[tokio::test(start_paused = true)]
    async fn custom_classification_uses_attempt_number() {
        let err = retry_with(&policy(), &CancellationToken::new(), |attempt| {
            ready(if attempt < 2 {
                Err::<(), _>(Attempt::Retry(String::from("again")))
            } else {
                Err(Attempt::Stop(String::from("stop")))
            })
        })
        .await
        .expect_err("second attempt stops");

        assert_eq!(err.last_error().map(String::as_str), Some("stop"));
    }
}
