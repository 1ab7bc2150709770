//! Core library for the `driftless` reconciliation engine.
//!
//! The crate reconciles declarative desired state for MongoDB Atlas entities
//! against the remote API: it pages through list endpoints, polls long-running
//! operations until a target status, cleans up half-created entities when a
//! create wait times out, applies set differences in a safe order, and
//! encodes every persisted identifier with one canonical codec.
//!
//! Entity reconcilers live in [`resources`]; each one takes its API client by
//! injection so [`client::AtlasClient`] and [`test_support::ScriptedAtlas`]
//! are interchangeable.

pub mod api;
pub mod cleanup;
pub mod client;
pub mod config;
pub mod error;
pub mod matcher;
pub mod paging;
pub mod poll;
pub mod reconcile;
pub mod resources;
pub mod retry;
pub mod state_id;
pub mod test_support;

pub use api::{ApiError, ApiFuture, ErrorClass, Page, PageRequest};
pub use cleanup::{CleanupPolicy, CreateTimeoutError, run_create_with_cleanup};
pub use client::{AtlasClient, ClientError};
pub use config::{AtlasConfig, ConfigError};
pub use error::{EntityKind, ErrorKind, Operation, OperationContext, ReconcileError};
pub use matcher::{find_entry, find_in_pages};
pub use paging::{PageFn, PageSource, PagedLister};
pub use poll::{EmptyStatus, Observation, PendingOperation, WaitError, wait_for};
pub use reconcile::{AllOrNothingDelta, SetDelta, SetDiffError, diff_all_or_nothing, diff_keyed};
pub use retry::{Attempt, RetryError, RetryPolicy, retry_transient, retry_with};
pub use state_id::{CompositeKey, StateIdError, decode_state_id, encode_state_id};
