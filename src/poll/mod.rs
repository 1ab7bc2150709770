//! Poll-until-target-state for long-running remote operations.
//!
//! A [`PendingOperation`] names the status sets that mean "still working",
//! "done", and "failed", plus the timing of the wait. [`wait_for`] drives an
//! observe-only refresh closure until one of those outcomes is reached, the
//! deadline passes, or the caller cancels.

use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tokio::time::{Instant, sleep, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

mod attempt;

pub use attempt::{DeleteAttempt, STATUS_DELETED, STATUS_PROVISIONED, wait_for_deletion};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(20 * 60);
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// How a refresh that reports no status is treated.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub enum EmptyStatus {
    /// Treat the observation as pending and keep polling.
    #[default]
    KeepPolling,
    /// Treat the observation as if it reported the given status.
    MapTo(String),
    /// Stop with [`WaitError::MissingStatus`].
    Fail,
}

/// Description of a long-running remote operation to wait on.
#[derive(Clone, Debug)]
pub struct PendingOperation {
    name: String,
    pending: Vec<String>,
    target: Vec<String>,
    failure: Vec<String>,
    timeout: Duration,
    poll_interval: Duration,
    initial_delay: Duration,
    empty_status: EmptyStatus,
}

impl PendingOperation {
    /// Creates an operation with empty status sets and default timing.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            pending: Vec::new(),
            target: Vec::new(),
            failure: Vec::new(),
            timeout: DEFAULT_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            initial_delay: Duration::ZERO,
            empty_status: EmptyStatus::default(),
        }
    }

    /// Sets the statuses that mean the operation is still in progress.
    #[must_use]
    pub fn pending<I, S>(mut self, statuses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.pending = statuses.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the statuses that mean the operation succeeded.
    #[must_use]
    pub fn target<I, S>(mut self, statuses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.target = statuses.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the statuses that mean the operation failed.
    #[must_use]
    pub fn failure<I, S>(mut self, statuses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.failure = statuses.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the overall deadline, measured from the start of the wait.
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the pause between polls.
    #[must_use]
    pub const fn poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Sets the pause before the first poll.
    #[must_use]
    pub const fn initial_delay(mut self, initial_delay: Duration) -> Self {
        self.initial_delay = initial_delay;
        self
    }

    /// Sets how an empty status is treated.
    #[must_use]
    pub fn on_empty_status(mut self, policy: EmptyStatus) -> Self {
        self.empty_status = policy;
        self
    }

    /// Operation name used in logs and errors.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Overall deadline.
    #[must_use]
    pub const fn wait_timeout(&self) -> Duration {
        self.timeout
    }

    fn expected(&self) -> Vec<String> {
        self.pending
            .iter()
            .chain(&self.target)
            .chain(&self.failure)
            .cloned()
            .collect()
    }
}

/// One refresh result: the observed value and its lifecycle status.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Observation<V> {
    /// Observed remote value.
    pub value: V,
    /// Lifecycle status; empty when the remote reported none.
    pub status: String,
    /// Extra context carried into [`WaitError::FailureStatus`].
    pub detail: Option<String>,
}

impl<V> Observation<V> {
    /// Builds an observation without detail.
    #[must_use]
    pub fn new(value: V, status: impl Into<String>) -> Self {
        Self {
            value,
            status: status.into(),
            detail: None,
        }
    }

    /// Attaches a failure message.
    #[must_use]
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// Errors raised while waiting for a target status.
#[derive(Debug, Error)]
pub enum WaitError<E> {
    /// The refresh call itself failed.
    #[error("{operation}: refresh failed: {source}")]
    Refresh {
        /// Operation being waited on.
        operation: String,
        /// Underlying refresh error.
        #[source]
        source: E,
    },
    /// The remote entity reached a failure status.
    #[error("{operation}: {message}")]
    FailureStatus {
        /// Operation being waited on.
        operation: String,
        /// Failure status that was observed.
        status: String,
        /// Human readable failure message.
        message: String,
    },
    /// The remote entity reported a status outside every known set.
    #[error("{operation}: unexpected status '{status}', expected one of [{}]", .expected.join(", "))]
    UnexpectedStatus {
        /// Operation being waited on.
        operation: String,
        /// Status that was observed.
        status: String,
        /// Every status the operation knows about.
        expected: Vec<String>,
    },
    /// The remote entity reported no status and the policy forbids that.
    #[error("{operation}: remote entity reported no status")]
    MissingStatus {
        /// Operation being waited on.
        operation: String,
    },
    /// The deadline passed before a target or failure status was observed.
    #[error("{operation}: timed out after {timeout:?} (last status: {})", .last_status.as_deref().unwrap_or("none"))]
    Timeout {
        /// Operation being waited on.
        operation: String,
        /// Configured deadline.
        timeout: Duration,
        /// Last status observed, if any.
        last_status: Option<String>,
    },
    /// The caller cancelled the wait.
    #[error("{operation}: cancelled")]
    Cancelled {
        /// Operation being waited on.
        operation: String,
    },
}

impl<E> WaitError<E> {
    /// Returns `true` when the wait ran out of time.
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Returns `true` when the caller cancelled the wait.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }
}

enum Step<V> {
    Done(V),
    Continue(String),
}

/// Polls `refresh` until the observed status is a target status.
///
/// The wait sleeps `initial_delay`, then refreshes every `poll_interval`.
/// Target statuses win over failure statuses, which win over pending ones.
/// Every refresh and every sleep is raced against `cancel` and the deadline.
///
/// # Errors
///
/// Returns [`WaitError`] when the refresh fails, a failure or unknown status
/// is observed, the deadline passes, or `cancel` fires.
pub async fn wait_for<V, E, F, Fut>(
    operation: &PendingOperation,
    cancel: &CancellationToken,
    mut refresh: F,
) -> Result<V, WaitError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Observation<V>, E>>,
{
    let started = Instant::now();
    let deadline = started + operation.timeout;
    info!(
        operation = operation.name(),
        timeout = ?operation.timeout,
        "waiting for target status"
    );

    let mut last_status = None;
    pause::<E>(operation, cancel, operation.initial_delay, deadline).await?;

    loop {
        let observation = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(cancelled(operation)),
            result = refresh() => result.map_err(|source| WaitError::Refresh {
                operation: operation.name.clone(),
                source,
            })?,
            () = sleep_until(deadline) => return Err(timed_out(operation, last_status)),
        };

        match classify::<V, E>(operation, observation)? {
            Step::Done(value) => {
                info!(
                    operation = operation.name(),
                    elapsed = ?started.elapsed(),
                    "target status reached"
                );
                return Ok(value);
            }
            Step::Continue(status) => {
                debug!(operation = operation.name(), status = %status, "still pending");
                last_status = Some(status);
            }
        }

        let now = Instant::now();
        if now >= deadline {
            return Err(timed_out(operation, last_status));
        }
        pause::<E>(
            operation,
            cancel,
            operation.poll_interval.min(deadline - now),
            deadline,
        )
        .await?;
    }
}

fn classify<V, E>(
    operation: &PendingOperation,
    observation: Observation<V>,
) -> Result<Step<V>, WaitError<E>> {
    let Observation {
        value,
        status,
        detail,
    } = observation;

    let resolved = if status.is_empty() {
        match &operation.empty_status {
            EmptyStatus::KeepPolling => return Ok(Step::Continue(status)),
            EmptyStatus::MapTo(mapped) => mapped.clone(),
            EmptyStatus::Fail => {
                return Err(WaitError::MissingStatus {
                    operation: operation.name.clone(),
                });
            }
        }
    } else {
        status
    };

    if operation.target.contains(&resolved) {
        return Ok(Step::Done(value));
    }
    if operation.failure.contains(&resolved) {
        let message = detail.unwrap_or_else(|| format!("entered failure status {resolved}"));
        return Err(WaitError::FailureStatus {
            operation: operation.name.clone(),
            status: resolved,
            message,
        });
    }
    if operation.pending.contains(&resolved) {
        return Ok(Step::Continue(resolved));
    }
    Err(WaitError::UnexpectedStatus {
        operation: operation.name.clone(),
        status: resolved,
        expected: operation.expected(),
    })
}

async fn pause<E>(
    operation: &PendingOperation,
    cancel: &CancellationToken,
    duration: Duration,
    deadline: Instant,
) -> Result<(), WaitError<E>> {
    if duration.is_zero() {
        return if cancel.is_cancelled() {
            Err(cancelled(operation))
        } else {
            Ok(())
        };
    }
    let wake = (Instant::now() + duration).min(deadline);
    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(cancelled(operation)),
        () = sleep_until(wake) => Ok(()),
    }
}

fn cancelled<E>(operation: &PendingOperation) -> WaitError<E> {
    WaitError::Cancelled {
        operation: operation.name.clone(),
    }
}

fn timed_out<E>(operation: &PendingOperation, last_status: Option<String>) -> WaitError<E> {
    WaitError::Timeout {
        operation: operation.name.clone(),
        timeout: operation.timeout,
        last_status,
    }
}

/// Sleeps for `duration` unless `cancel` fires first.
///
/// Returns `false` when cancelled.
pub async fn sleep_or_cancel(duration: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        biased;
        () = cancel.cancelled() => false,
        () = sleep(duration) => true,
    }
}
