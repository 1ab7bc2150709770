//! Reconcilers for the remote entities managed by driftless.
//!
//! Each reconciler owns an implementation of the matching API trait and
//! exposes `create`, `read`, `update`, `delete`, and `import` operations.
//! Persisted identifiers are [`CompositeKey`] encodings; every failure is a
//! [`ReconcileError`] carrying the operation context.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::api::ApiError;
use crate::error::{EntityKind, Operation, OperationContext, ReconcileError};
use crate::state_id::CompositeKey;

pub mod access_list;
pub mod global_cluster;
pub mod network_container;
pub mod network_peering;
pub mod outage_simulation;

/// Wait deadlines for the create, update, and delete operations.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Timeouts {
    /// Deadline for create waits.
    pub create: Duration,
    /// Deadline for update waits.
    pub update: Duration,
    /// Deadline for delete waits.
    pub delete: Duration,
}

impl Timeouts {
    /// Uses the same deadline for every operation.
    #[must_use]
    pub const fn uniform(timeout: Duration) -> Self {
        Self {
            create: timeout,
            update: timeout,
            delete: timeout,
        }
    }
}

/// Awaits one remote call, racing it against `cancel`.
pub(crate) async fn call<T, Fut>(
    context: &OperationContext,
    cancel: &CancellationToken,
    request: Fut,
) -> Result<T, ReconcileError>
where
    Fut: Future<Output = Result<T, ApiError>>,
{
    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(context.cancelled()),
        result = request => result.map_err(|source| context.api(source)),
    }
}

/// Like [`call`], but maps a not-found response to `None`.
pub(crate) async fn call_optional<T, Fut>(
    context: &OperationContext,
    cancel: &CancellationToken,
    request: Fut,
) -> Result<Option<T>, ReconcileError>
where
    Fut: Future<Output = Result<T, ApiError>>,
{
    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(context.cancelled()),
        result = request => match result {
            Ok(value) => Ok(Some(value)),
            Err(source) if source.is_not_found() => Ok(None),
            Err(source) => Err(context.api(source)),
        },
    }
}

/// Decodes a persisted identifier and builds the context for `operation`.
pub(crate) fn decode_key(
    operation: Operation,
    entity: EntityKind,
    id: &str,
    fields: &[&str],
) -> Result<(CompositeKey, OperationContext), ReconcileError> {
    let key = CompositeKey::decode(id, fields)
        .map_err(|source| OperationContext::new(operation, entity, id).state_id(source))?;
    let context = OperationContext::new(operation, entity, key.to_string());
    Ok((key, context))
}

/// Parses an operator supplied import identifier and builds the import context.
pub(crate) fn parse_import(
    entity: EntityKind,
    raw: &str,
    fields: &[&str],
) -> Result<(CompositeKey, OperationContext), ReconcileError> {
    let key = CompositeKey::from_import_id(raw, fields)
        .map_err(|source| OperationContext::new(Operation::Import, entity, raw).state_id(source))?;
    let context = OperationContext::new(Operation::Import, entity, key.to_string());
    Ok((key, context))
}

/// Reads a field the key is known to hold.
pub(crate) fn key_field<'k>(
    context: &OperationContext,
    key: &'k CompositeKey,
    field: &str,
) -> Result<&'k str, ReconcileError> {
    key.require(field).map_err(|source| context.state_id(source))
}
