//! Error taxonomy for reconciliation operations.
//!
//! Every failure returned by a reconciler carries an [`OperationContext`]
//! naming the operation, the entity kind, and the composite key, so callers
//! can report which resource failed without re-deriving it.

use std::fmt;

use thiserror::Error;

use crate::api::{ApiError, ErrorClass};
use crate::cleanup::CreateTimeoutError;
use crate::poll::WaitError;
use crate::reconcile::SetDiffError;
use crate::retry::RetryError;
use crate::state_id::StateIdError;

/// Lifecycle operation being reconciled.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Operation {
    /// Create a new entity.
    Create,
    /// Observe an existing entity.
    Read,
    /// Move an existing entity toward desired state.
    Update,
    /// Remove an entity.
    Delete,
    /// Adopt an existing entity from an operator supplied identifier.
    Import,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Create => "create",
            Self::Read => "read",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Import => "import",
        })
    }
}

/// Remote entity family.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum EntityKind {
    /// Cluster outage simulation.
    OutageSimulation,
    /// Network container.
    NetworkContainer,
    /// Network peering connection.
    NetworkPeering,
    /// Global cluster configuration.
    GlobalClusterConfig,
    /// Project IP access-list entry.
    ProjectAccessListEntry,
    /// Service account access-list entry.
    ServiceAccountAccessListEntry,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::OutageSimulation => "cluster outage simulation",
            Self::NetworkContainer => "network container",
            Self::NetworkPeering => "network peering",
            Self::GlobalClusterConfig => "global cluster config",
            Self::ProjectAccessListEntry => "project IP access list entry",
            Self::ServiceAccountAccessListEntry => "service account access list entry",
        })
    }
}

/// Operation, entity kind, and key attached to every reconcile error.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct OperationContext {
    /// Operation that failed.
    pub operation: Operation,
    /// Entity family.
    pub entity: EntityKind,
    /// Human readable composite key, possibly empty before an id exists.
    pub key: String,
}

impl OperationContext {
    /// Builds a context.
    #[must_use]
    pub fn new(operation: Operation, entity: EntityKind, key: impl Into<String>) -> Self {
        Self {
            operation,
            entity,
            key: key.into(),
        }
    }

    /// Wraps an API error.
    #[must_use]
    pub fn api(&self, source: ApiError) -> ReconcileError {
        ReconcileError::Api {
            context: self.clone(),
            source,
        }
    }

    /// Wraps a wait error.
    #[must_use]
    pub fn wait(&self, source: WaitError<ApiError>) -> ReconcileError {
        ReconcileError::Wait {
            context: self.clone(),
            source: Box::new(source),
        }
    }

    /// Wraps a create-with-cleanup error.
    #[must_use]
    pub fn create_timeout(&self, source: CreateTimeoutError<ApiError>) -> ReconcileError {
        ReconcileError::CreateTimeout {
            context: self.clone(),
            source: Box::new(source),
        }
    }

    /// Wraps a retry error.
    #[must_use]
    pub fn retry(&self, source: RetryError<ApiError>) -> ReconcileError {
        ReconcileError::Retry {
            context: self.clone(),
            source: Box::new(source),
        }
    }

    /// Builds a configuration error.
    #[must_use]
    pub fn configuration(&self, message: impl Into<String>) -> ReconcileError {
        ReconcileError::Configuration {
            context: self.clone(),
            message: message.into(),
        }
    }

    /// Wraps a state id error.
    #[must_use]
    pub fn state_id(&self, source: StateIdError) -> ReconcileError {
        ReconcileError::StateId {
            context: self.clone(),
            source,
        }
    }

    /// Wraps a set diff error.
    #[must_use]
    pub fn set_diff(&self, source: SetDiffError) -> ReconcileError {
        ReconcileError::SetDiff {
            context: self.clone(),
            source,
        }
    }

    /// Builds a cancellation error.
    #[must_use]
    pub fn cancelled(&self) -> ReconcileError {
        ReconcileError::Cancelled {
            context: self.clone(),
        }
    }
}

impl fmt::Display for OperationContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.operation, self.entity)?;
        if !self.key.is_empty() {
            write!(f, " ({})", self.key)?;
        }
        Ok(())
    }
}

/// Coarse failure class, independent of where the failure happened.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorKind {
    /// The remote entity does not exist.
    NotFound,
    /// A conflict or transient failure; retrying later may succeed.
    Transient,
    /// The remote API rejected the request.
    Terminal,
    /// The remote entity reached a failure status.
    FailureStatus,
    /// A wait ran out of time.
    Timeout,
    /// Desired state or identifiers are invalid.
    Configuration,
    /// The caller cancelled the operation.
    Cancelled,
}

/// Errors returned by reconcilers.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// A remote call failed.
    #[error("{context}: {source}")]
    Api {
        /// Operation context.
        context: OperationContext,
        /// Underlying API error.
        #[source]
        source: ApiError,
    },
    /// A wait for a target status failed.
    #[error("{context}: {source}")]
    Wait {
        /// Operation context.
        context: OperationContext,
        /// Underlying wait error.
        #[source]
        source: Box<WaitError<ApiError>>,
    },
    /// A create wait failed, possibly after running cleanup.
    #[error("{context}: {source}")]
    CreateTimeout {
        /// Operation context.
        context: OperationContext,
        /// Underlying create error.
        #[source]
        source: Box<CreateTimeoutError<ApiError>>,
    },
    /// A retried call gave up.
    #[error("{context}: {source}")]
    Retry {
        /// Operation context.
        context: OperationContext,
        /// Underlying retry error.
        #[source]
        source: Box<RetryError<ApiError>>,
    },
    /// Desired state is invalid.
    #[error("{context}: invalid configuration: {message}")]
    Configuration {
        /// Operation context.
        context: OperationContext,
        /// What is wrong and how to fix it.
        message: String,
    },
    /// A persisted or imported identifier is invalid.
    #[error("{context}: {source}")]
    StateId {
        /// Operation context.
        context: OperationContext,
        /// Underlying codec error.
        #[source]
        source: StateIdError,
    },
    /// A set-valued attribute changed in a way that cannot be applied.
    #[error("{context}: {source}")]
    SetDiff {
        /// Operation context.
        context: OperationContext,
        /// Underlying diff error.
        #[source]
        source: SetDiffError,
    },
    /// Key fields changed; the entity must be replaced, not updated.
    #[error("{context}: changing {} requires replacing the resource", .fields.join(", "))]
    ReplacementRequired {
        /// Operation context.
        context: OperationContext,
        /// Key fields that changed.
        fields: Vec<String>,
    },
    /// The entity does not support this operation.
    #[error("{context}: operation is not supported")]
    Unsupported {
        /// Operation context.
        context: OperationContext,
    },
    /// The caller cancelled the operation.
    #[error("{context}: cancelled")]
    Cancelled {
        /// Operation context.
        context: OperationContext,
    },
}

impl ReconcileError {
    /// Operation context of the failure.
    #[must_use]
    pub const fn context(&self) -> &OperationContext {
        match self {
            Self::Api { context, .. }
            | Self::Wait { context, .. }
            | Self::CreateTimeout { context, .. }
            | Self::Retry { context, .. }
            | Self::Configuration { context, .. }
            | Self::StateId { context, .. }
            | Self::SetDiff { context, .. }
            | Self::ReplacementRequired { context, .. }
            | Self::Unsupported { context }
            | Self::Cancelled { context } => context,
        }
    }

    /// Classifies the failure.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Api { source, .. } => api_kind(source),
            Self::Wait { source, .. } => wait_kind(source),
            Self::CreateTimeout { source, .. } => match source.as_ref() {
                CreateTimeoutError::Create { source } => api_kind(source),
                CreateTimeoutError::Wait { source } => wait_kind(source),
                CreateTimeoutError::TimedOutCleanupRan { .. }
                | CreateTimeoutError::TimedOutCleanupSkipped { .. } => ErrorKind::Timeout,
            },
            Self::Retry { source, .. } => match source.as_ref() {
                RetryError::Exhausted { .. } => ErrorKind::Transient,
                RetryError::Permanent { source } => api_kind(source),
                RetryError::Cancelled => ErrorKind::Cancelled,
            },
            Self::Configuration { .. }
            | Self::StateId { .. }
            | Self::SetDiff { .. }
            | Self::ReplacementRequired { .. }
            | Self::Unsupported { .. } => ErrorKind::Configuration,
            Self::Cancelled { .. } => ErrorKind::Cancelled,
        }
    }

    /// Returns `true` when the remote entity does not exist.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }
}

fn api_kind(error: &ApiError) -> ErrorKind {
    match error.class() {
        ErrorClass::NotFound => ErrorKind::NotFound,
        ErrorClass::Transient => ErrorKind::Transient,
        ErrorClass::Terminal => ErrorKind::Terminal,
    }
}

fn wait_kind(error: &WaitError<ApiError>) -> ErrorKind {
    match error {
        WaitError::Refresh { source, .. } => api_kind(source),
        WaitError::FailureStatus { .. }
        | WaitError::UnexpectedStatus { .. }
        | WaitError::MissingStatus { .. } => ErrorKind::FailureStatus,
        WaitError::Timeout { .. } => ErrorKind::Timeout,
        WaitError::Cancelled { .. } => ErrorKind::Cancelled,
    }
}
