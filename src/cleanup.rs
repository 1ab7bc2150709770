//! Compensating delete when a create wait runs out of time.
//!
//! A create call may succeed remotely while the wait for a usable state times
//! out. Unless the operator opted out, the half-created entity is deleted so
//! nothing is left behind that the host tool does not know about.

use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tokio::time::timeout;
use tracing::{info, warn};

use crate::poll::WaitError;

const DEFAULT_CLEANUP_TIMEOUT: Duration = Duration::from_secs(20 * 60);

/// Whether and how long to clean up after a create wait times out.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct CleanupPolicy {
    /// Run the compensating delete when the create wait times out.
    pub delete_on_create_timeout: bool,
    /// Upper bound for the compensating delete, independent of the create
    /// deadline.
    pub cleanup_timeout: Duration,
}

impl Default for CleanupPolicy {
    fn default() -> Self {
        Self {
            delete_on_create_timeout: true,
            cleanup_timeout: DEFAULT_CLEANUP_TIMEOUT,
        }
    }
}

impl CleanupPolicy {
    /// Builds a policy with the default cleanup timeout.
    #[must_use]
    pub fn new(delete_on_create_timeout: bool) -> Self {
        Self {
            delete_on_create_timeout,
            ..Self::default()
        }
    }
}

/// Errors returned by [`run_create_with_cleanup`].
#[derive(Debug, Error)]
pub enum CreateTimeoutError<E> {
    /// The create call itself failed; nothing was cleaned up.
    #[error("create call failed: {source}")]
    Create {
        /// Underlying API error.
        #[source]
        source: E,
    },
    /// The wait failed for a reason other than the deadline.
    #[error("{source}")]
    Wait {
        /// Underlying wait error.
        #[source]
        source: WaitError<E>,
    },
    /// The wait timed out and the compensating delete was run.
    #[error(
        "{source}; will run cleanup because delete_on_create_timeout is true. If you suspect a transient error, wait before retrying to allow resource deletion to finish"
    )]
    TimedOutCleanupRan {
        /// Timeout reported by the wait.
        #[source]
        source: WaitError<E>,
    },
    /// The wait timed out and cleanup was disabled.
    #[error("{source}; cleanup won't be run because delete_on_create_timeout is false")]
    TimedOutCleanupSkipped {
        /// Timeout reported by the wait.
        #[source]
        source: WaitError<E>,
    },
}

impl<E> CreateTimeoutError<E> {
    /// Returns `true` when the create wait ran out of time.
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(
            self,
            Self::TimedOutCleanupRan { .. } | Self::TimedOutCleanupSkipped { .. }
        )
    }
}

/// Runs a create call followed by its wait, deleting the created entity when
/// the wait times out and the policy allows it.
///
/// `wait` and `cleanup` both receive the handle returned by `create`.
/// Cleanup failures are logged and never replace the timeout error.
///
/// # Errors
///
/// Returns [`CreateTimeoutError`] when the create call or the wait fails.
pub async fn run_create_with_cleanup<C, V, E, X, CreateFut, Wait, WaitFut, Cleanup, CleanupFut>(
    policy: &CleanupPolicy,
    create: CreateFut,
    wait: Wait,
    cleanup: Cleanup,
) -> Result<V, CreateTimeoutError<E>>
where
    C: Clone,
    CreateFut: Future<Output = Result<C, E>>,
    Wait: FnOnce(C) -> WaitFut,
    WaitFut: Future<Output = Result<V, WaitError<E>>>,
    Cleanup: FnOnce(C) -> CleanupFut,
    CleanupFut: Future<Output = Result<(), X>>,
    E: std::fmt::Display,
    X: std::fmt::Display,
{
    let handle = create
        .await
        .map_err(|source| CreateTimeoutError::Create { source })?;

    let source = match wait(handle.clone()).await {
        Ok(value) => return Ok(value),
        Err(err) if err.is_timeout() => err,
        Err(source) => return Err(CreateTimeoutError::Wait { source }),
    };

    if !policy.delete_on_create_timeout {
        warn!(error = %source, "create wait timed out; cleanup disabled");
        return Err(CreateTimeoutError::TimedOutCleanupSkipped { source });
    }

    info!(
        cleanup_timeout = ?policy.cleanup_timeout,
        "create wait timed out; deleting the partially created entity"
    );
    match timeout(policy.cleanup_timeout, cleanup(handle)).await {
        Ok(Ok(())) => info!("cleanup after create timeout finished"),
        Ok(Err(err)) => warn!(error = %err, "cleanup after create timeout failed"),
        Err(_) => warn!(
            cleanup_timeout = ?policy.cleanup_timeout,
            "cleanup after create timeout did not finish in time"
        ),
    }
    Err(CreateTimeoutError::TimedOutCleanupRan { source })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::ApiError;
    use rstest::rstest;
    use std::cell::Cell;
    use std::future::{pending, ready};

    fn timed_out() -> WaitError<ApiError> {
        WaitError::Timeout {
            operation: String::from("create widget"),
            timeout: Duration::from_secs(60),
            last_status: Some(String::from("PENDING")),
        }
    }

    #[rstest]
    #[tokio::test]
    async fn create_failure_skips_wait_and_cleanup() {
        let waited = Cell::new(false);
        let cleaned = Cell::new(false);

        let err = run_create_with_cleanup(
            &CleanupPolicy::default(),
            ready(Err::<String, _>(ApiError::http(400, None, "bad request"))),
            |_: String| {
                waited.set(true);
                ready(Ok::<(), WaitError<ApiError>>(()))
            },
            |_: String| {
                cleaned.set(true);
                ready(Ok::<(), ApiError>(()))
            },
        )
        .await
        .expect_err("create failure must surface");

        assert!(matches!(err, CreateTimeoutError::Create { .. }), "{err}");
        assert!(!waited.get());
        assert!(!cleaned.get());
    }

    #[rstest]
    #[tokio::test]
    async fn successful_wait_returns_value() {
        let value = run_create_with_cleanup(
            &CleanupPolicy::default(),
            ready(Ok::<_, ApiError>(String::from("id-1"))),
            |id: String| ready(Ok::<_, WaitError<ApiError>>(format!("{id} ready"))),
            |_: String| ready(Ok::<(), ApiError>(())),
        )
        .await
        .expect("create should succeed");

        assert_eq!(value, "id-1 ready");
    }

    #[rstest]
    #[tokio::test]
    async fn non_timeout_wait_failure_skips_cleanup() {
        let cleaned = Cell::new(false);

        let err = run_create_with_cleanup(
            &CleanupPolicy::default(),
            ready(Ok::<_, ApiError>(String::from("id-1"))),
            |_: String| {
                ready(Err::<(), _>(WaitError::FailureStatus {
                    operation: String::from("create widget"),
                    status: String::from("FAILED"),
                    message: String::from("entered failure status FAILED"),
                }))
            },
            |_: String| {
                cleaned.set(true);
                ready(Ok::<(), ApiError>(()))
            },
        )
        .await
        .expect_err("failure status must surface");

        assert!(matches!(err, CreateTimeoutError::Wait { .. }), "{err}");
        assert!(!cleaned.get());
    }

    #[rstest]
    #[tokio::test]
    async fn timeout_runs_cleanup_once_when_enabled() {
        let cleanups = Cell::new(0_u32);

        let err = run_create_with_cleanup(
            &CleanupPolicy::new(true),
            ready(Ok::<_, ApiError>(String::from("id-1"))),
            |_: String| ready(Err::<(), _>(timed_out())),
            |id: String| {
                assert_eq!(id, "id-1");
                cleanups.set(cleanups.get() + 1);
                ready(Ok::<(), ApiError>(()))
            },
        )
        .await
        .expect_err("timeout must surface");

        assert_eq!(cleanups.get(), 1);
        assert!(err.is_timeout());
        assert!(
            err.to_string()
                .contains("will run cleanup because delete_on_create_timeout is true"),
            "{err}"
        );
    }

    #[rstest]
    #[tokio::test]
    async fn timeout_skips_cleanup_when_disabled() {
        let cleaned = Cell::new(false);

        let err = run_create_with_cleanup(
            &CleanupPolicy::new(false),
            ready(Ok::<_, ApiError>(String::from("id-1"))),
            |_: String| ready(Err::<(), _>(timed_out())),
            |_: String| {
                cleaned.set(true);
                ready(Ok::<(), ApiError>(()))
            },
        )
        .await
        .expect_err("timeout must surface");

        assert!(!cleaned.get());
        assert!(
            err.to_string()
                .contains("cleanup won't be run because delete_on_create_timeout is false"),
            "{err}"
        );
    }

    #[rstest]
    #[tokio::test]
    async fn cleanup_failure_keeps_timeout_error() {
        let err = run_create_with_cleanup(
            &CleanupPolicy::default(),
            ready(Ok::<_, ApiError>(String::from("id-1"))),
            |_: String| ready(Err::<(), _>(timed_out())),
            |_: String| ready(Err::<(), _>(ApiError::http(500, None, "delete failed"))),
        )
        .await
        .expect_err("timeout must surface");

        assert!(
            matches!(err, CreateTimeoutError::TimedOutCleanupRan { .. }),
            "{err}"
        );
    }

    #[rstest]
    #[tokio::test(start_paused = true)]
    async fn hanging_cleanup_is_bounded() {
        let policy = CleanupPolicy {
            delete_on_create_timeout: true,
            cleanup_timeout: Duration::from_secs(30),
        };
        let started = tokio::time::Instant::now();

        let err = run_create_with_cleanup(
            &policy,
            ready(Ok::<_, ApiError>(String::from("id-1"))),
            |_: String| ready(Err::<(), _>(timed_out())),
            |_: String| pending::<Result<(), ApiError>>(),
        )
        .await
        .expect_err("timeout must surface");

        assert!(err.is_timeout());
        assert_eq!(started.elapsed(), Duration::from_secs(30));
    }
}
