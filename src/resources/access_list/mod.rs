//! Access-list entries of projects and service accounts.
//!
//! An entry is identified by exactly one of a CIDR block, an IP address, or
//! an AWS security group. Atlas only exposes entries through paginated
//! lists, so reads and create confirmations search the list page by page.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::{Timeouts, decode_key, key_field, parse_import};
use crate::api::{AccessListApi, AccessListEntry, AccessListScope, ApiError, Page};
use crate::error::{EntityKind, Operation, OperationContext, ReconcileError};
use crate::matcher::find_in_pages;
use crate::paging::PageFn;
use crate::poll::{Observation, PendingOperation, wait_for};
use crate::retry::{RetryPolicy, retry_transient};
use crate::state_id::CompositeKey;

const PENDING: &str = "pending";
const CREATED: &str = "created";
const PRESENT: &str = "present";
const ABSENT: &str = "absent";

const POLL_INTERVAL: Duration = Duration::from_secs(10);
const DEFAULT_ITEMS_PER_PAGE: u32 = 100;

/// Default deadlines for access-list entries.
pub const DEFAULT_TIMEOUTS: Timeouts = Timeouts::uniform(Duration::from_secs(45 * 60));

/// Desired access-list entry. Exactly one of `cidr_block`, `ip_address`,
/// and `aws_security_group` must be set.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DesiredAccessListEntry {
    /// Project or service account owning the list.
    pub scope: AccessListScope,
    /// CIDR block, for example `10.0.0.0/24`.
    pub cidr_block: Option<String>,
    /// Single IP address.
    pub ip_address: Option<String>,
    /// AWS security group; project scope only.
    pub aws_security_group: Option<String>,
    /// Free-form comment.
    pub comment: Option<String>,
}

impl DesiredAccessListEntry {
    /// Builds a CIDR block entry.
    #[must_use]
    pub fn cidr_block(scope: AccessListScope, cidr_block: impl Into<String>) -> Self {
        Self {
            scope,
            cidr_block: Some(cidr_block.into()),
            ip_address: None,
            aws_security_group: None,
            comment: None,
        }
    }

    /// Builds an IP address entry.
    #[must_use]
    pub fn ip_address(scope: AccessListScope, ip_address: impl Into<String>) -> Self {
        Self {
            scope,
            cidr_block: None,
            ip_address: Some(ip_address.into()),
            aws_security_group: None,
            comment: None,
        }
    }

    /// Returns the one discriminator that identifies the entry.
    fn entry(&self, context: &OperationContext) -> Result<&str, ReconcileError> {
        let set: Vec<&str> = [
            self.cidr_block.as_deref(),
            self.ip_address.as_deref(),
            self.aws_security_group.as_deref(),
        ]
        .into_iter()
        .flatten()
        .filter(|value| !value.trim().is_empty())
        .collect();
        match set.as_slice() {
            [entry] => Ok(*entry),
            [] => Err(context.configuration(
                "one of cidr_block, ip_address or aws_security_group must be set",
            )),
            _ => Err(context.configuration(
                "only one of cidr_block, ip_address or aws_security_group may be set",
            )),
        }
    }

    fn body(&self) -> AccessListEntry {
        AccessListEntry {
            cidr_block: self.cidr_block.clone(),
            ip_address: self.ip_address.clone(),
            aws_security_group: self.aws_security_group.clone(),
            comment: self.comment.clone(),
            created_at: None,
        }
    }
}

/// Observed access-list entry.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AccessListEntryState {
    /// Encoded composite key.
    pub id: String,
    /// Project or service account owning the list.
    pub scope: AccessListScope,
    /// Discriminator value identifying the entry.
    pub entry: String,
    /// Remote representation.
    pub remote: AccessListEntry,
}

impl AccessListEntryState {
    fn new(scope: &AccessListScope, entry: &str, remote: AccessListEntry) -> Self {
        Self {
            id: entry_key(scope, entry).encode(),
            scope: scope.clone(),
            entry: entry.to_owned(),
            remote,
        }
    }
}

fn entity_of(scope: &AccessListScope) -> EntityKind {
    match scope {
        AccessListScope::Project { .. } => EntityKind::ProjectAccessListEntry,
        AccessListScope::ServiceAccount { .. } => EntityKind::ServiceAccountAccessListEntry,
    }
}

fn entry_key(scope: &AccessListScope, entry: &str) -> CompositeKey {
    scope
        .key_fields()
        .into_iter()
        .collect::<CompositeKey>()
        .with("entry", entry)
}

fn scope_of(context: &OperationContext, key: &CompositeKey) -> Result<AccessListScope, ReconcileError> {
    if let Some(project_id) = key.get("project_id") {
        return Ok(AccessListScope::Project {
            project_id: project_id.to_owned(),
        });
    }
    Ok(AccessListScope::ServiceAccount {
        org_id: key_field(context, key, "org_id")?.to_owned(),
        client_id: key_field(context, key, "client_id")?.to_owned(),
    })
}

fn decode_entry(
    operation: Operation,
    id: &str,
) -> Result<(AccessListScope, String, OperationContext), ReconcileError> {
    let (key, context) = decode_key(operation, EntityKind::ProjectAccessListEntry, id, &["entry"])?;
    let scope = scope_of(&context, &key)?;
    let entry = key_field(&context, &key, "entry")?.to_owned();
    let context = OperationContext::new(operation, entity_of(&scope), context.key);
    Ok((scope, entry, context))
}

/// Reconciles project and service account access-list entries.
#[derive(Clone, Debug)]
pub struct AccessListReconciler<A> {
    api: A,
    timeouts: Timeouts,
    retry: RetryPolicy,
    items_per_page: u32,
}

impl<A: AccessListApi> AccessListReconciler<A> {
    /// Creates a reconciler with default deadlines, retry policy, and page
    /// size.
    #[must_use]
    pub fn new(api: A) -> Self {
        Self {
            api,
            timeouts: DEFAULT_TIMEOUTS,
            retry: RetryPolicy::default(),
            items_per_page: DEFAULT_ITEMS_PER_PAGE,
        }
    }

    /// Overrides the operation deadlines.
    #[must_use]
    pub const fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Overrides the retry policy for transient create and delete failures.
    #[must_use]
    pub const fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Overrides the page size of list searches.
    #[must_use]
    pub const fn with_items_per_page(mut self, items_per_page: u32) -> Self {
        self.items_per_page = items_per_page;
        self
    }

    /// Adds the entry and waits until it shows up in the list.
    ///
    /// The page returned by the create call is searched first; later polls
    /// list from page 1 again. A not-found list keeps the wait going.
    ///
    /// # Errors
    ///
    /// Returns [`ReconcileError::Configuration`] unless exactly one
    /// discriminator is set, [`ReconcileError::Retry`] when the create call
    /// keeps failing, and [`ReconcileError::Wait`] when the entry never shows
    /// up.
    pub async fn create(
        &self,
        desired: &DesiredAccessListEntry,
        cancel: &CancellationToken,
    ) -> Result<AccessListEntryState, ReconcileError> {
        let scope = &desired.scope;
        let mut context = OperationContext::new(Operation::Create, entity_of(scope), "");
        let entry = desired.entry(&context)?;
        context.key = entry_key(scope, entry).to_string();

        let body = [desired.body()];
        let first_page = retry_transient(&self.retry, cancel, || {
            self.api.create_access_list_entries(scope, &body)
        })
        .await
        .map_err(|source| context.retry(source))?;
        info!(entry, "access list entry submitted");

        let confirm = PendingOperation::new("confirm access list entry")
            .pending([PENDING])
            .target([CREATED])
            .timeout(self.timeouts.create)
            .poll_interval(POLL_INTERVAL);
        let mut seeded = Some(first_page);
        let found = wait_for(&confirm, cancel, || {
            let page = seeded.take();
            async move {
                match self.find(scope, entry, page).await {
                    Ok(Some(remote)) => Ok(Observation::new(Some(remote), CREATED)),
                    Ok(None) => Ok(Observation::new(None, PENDING)),
                    Err(err) if err.is_not_found() || err.is_retryable() => {
                        debug!(error = %err, "access list not readable yet");
                        Ok(Observation::new(None, PENDING))
                    }
                    Err(err) => Err(err),
                }
            }
        })
        .await
        .map_err(|source| context.wait(source))?;

        Ok(AccessListEntryState::new(
            scope,
            entry,
            found.unwrap_or_else(|| desired.body()),
        ))
    }

    /// Searches the list for the entry. `Ok(None)` means it is gone.
    ///
    /// # Errors
    ///
    /// Returns [`ReconcileError`] when the identifier is malformed or a list
    /// call fails with anything other than not-found.
    pub async fn read(
        &self,
        id: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<AccessListEntryState>, ReconcileError> {
        let (scope, entry, context) = decode_entry(Operation::Read, id)?;
        match self.search(&context, cancel, &scope, &entry).await? {
            Some(remote) => Ok(Some(AccessListEntryState::new(&scope, &entry, remote))),
            None => Ok(None),
        }
    }

    /// Removes the entry and waits until the list no longer holds it.
    ///
    /// # Errors
    ///
    /// Returns [`ReconcileError::Retry`] when the delete call keeps failing
    /// and [`ReconcileError::Wait`] when the entry does not disappear.
    pub async fn delete(&self, id: &str, cancel: &CancellationToken) -> Result<(), ReconcileError> {
        let (scope, entry, context) = decode_entry(Operation::Delete, id)?;
        let scope = &scope;
        let entry = entry.as_str();

        retry_transient(&self.retry, cancel, || async move {
            match self.api.delete_access_list_entry(scope, entry).await {
                Err(err) if err.is_not_found() => Ok(()),
                other => other,
            }
        })
        .await
        .map_err(|source| context.retry(source))?;

        let removal = PendingOperation::new("wait for access list entry removal")
            .pending([PRESENT])
            .target([ABSENT])
            .timeout(self.timeouts.delete)
            .poll_interval(POLL_INTERVAL);
        wait_for(&removal, cancel, || async move {
            match self.find(scope, entry, None).await {
                Ok(Some(_)) => Ok(Observation::new((), PRESENT)),
                Ok(None) => Ok(Observation::new((), ABSENT)),
                Err(err) if err.is_not_found() => Ok(Observation::new((), ABSENT)),
                Err(err) => Err(err),
            }
        })
        .await
        .map_err(|source| context.wait(source))
    }

    /// Adopts a project entry from `{project_id}-{entry}`.
    ///
    /// # Errors
    ///
    /// Returns [`ReconcileError`] when the identifier is malformed or the
    /// entry is not in the list.
    pub async fn import_project_entry(
        &self,
        raw: &str,
        cancel: &CancellationToken,
    ) -> Result<AccessListEntryState, ReconcileError> {
        self.import(EntityKind::ProjectAccessListEntry, raw, &["project_id", "entry"], cancel)
            .await
    }

    /// Adopts a service account entry from `{org_id}-{client_id}-{entry}`.
    ///
    /// # Errors
    ///
    /// Returns [`ReconcileError`] when the identifier is malformed or the
    /// entry is not in the list.
    pub async fn import_service_account_entry(
        &self,
        raw: &str,
        cancel: &CancellationToken,
    ) -> Result<AccessListEntryState, ReconcileError> {
        self.import(
            EntityKind::ServiceAccountAccessListEntry,
            raw,
            &["org_id", "client_id", "entry"],
            cancel,
        )
        .await
    }

    async fn import(
        &self,
        entity: EntityKind,
        raw: &str,
        fields: &[&str],
        cancel: &CancellationToken,
    ) -> Result<AccessListEntryState, ReconcileError> {
        let (key, context) = parse_import(entity, raw, fields)?;
        let scope = scope_of(&context, &key)?;
        let entry = key_field(&context, &key, "entry")?;
        let remote = self
            .search(&context, cancel, &scope, entry)
            .await?
            .ok_or_else(|| context.api(ApiError::http(404, None, "entry is not in the access list")))?;
        Ok(AccessListEntryState::new(&scope, entry, remote))
    }

    async fn search(
        &self,
        context: &OperationContext,
        cancel: &CancellationToken,
        scope: &AccessListScope,
        entry: &str,
    ) -> Result<Option<AccessListEntry>, ReconcileError> {
        tokio::select! {
            biased;
            () = cancel.cancelled() => Err(context.cancelled()),
            result = self.find(scope, entry, None) => match result {
                Ok(found) => Ok(found),
                Err(err) if err.is_not_found() => Ok(None),
                Err(err) => Err(context.api(err)),
            },
        }
    }

    async fn find(
        &self,
        scope: &AccessListScope,
        entry: &str,
        first_page: Option<Page<AccessListEntry>>,
    ) -> Result<Option<AccessListEntry>, ApiError> {
        let source = PageFn::new(|request| self.api.list_access_list_entries(scope, request));
        find_in_pages(source, self.items_per_page, first_page, |candidate| {
            candidate.matches(entry)
        })
        .await
    }
}
