//! Delete loops whose "refresh" has a side effect.
//!
//! Some entities can only be removed by retrying the delete call until the
//! remote side accepts it. The attempt is an explicit operation here, adapted
//! onto the observe-only [`wait_for`](super::wait_for) contract through two
//! synthetic statuses.

use std::future::Future;

use tokio_util::sync::CancellationToken;

use super::{Observation, PendingOperation, WaitError, wait_for};

/// Synthetic status reported while the entity still exists.
pub const STATUS_PROVISIONED: &str = "provisioned";
/// Synthetic status reported once the entity is gone.
pub const STATUS_DELETED: &str = "deleted";

/// Outcome of one attempt-delete-and-report-status call.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DeleteAttempt {
    /// The entity is gone.
    Deleted,
    /// The entity still exists; try again after the poll interval.
    StillProvisioned,
}

impl DeleteAttempt {
    const fn status(self) -> &'static str {
        match self {
            Self::Deleted => STATUS_DELETED,
            Self::StillProvisioned => STATUS_PROVISIONED,
        }
    }
}

/// Repeats `attempt` until it reports [`DeleteAttempt::Deleted`].
///
/// Timing and the operation name come from `operation`; its status sets are
/// replaced with [`STATUS_PROVISIONED`] (pending) and [`STATUS_DELETED`]
/// (target).
///
/// # Errors
///
/// Returns [`WaitError`] when an attempt fails, the deadline passes, or
/// `cancel` fires.
pub async fn wait_for_deletion<E, F, Fut>(
    operation: &PendingOperation,
    cancel: &CancellationToken,
    mut attempt: F,
) -> Result<(), WaitError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<DeleteAttempt, E>>,
{
    let deletion = operation
        .clone()
        .pending([STATUS_PROVISIONED])
        .target([STATUS_DELETED])
        .failure(Vec::<String>::new());

    wait_for(&deletion, cancel, || {
        let outcome = attempt();
        async move { outcome.await.map(|result| Observation::new((), result.status())) }
    })
    .await
}
