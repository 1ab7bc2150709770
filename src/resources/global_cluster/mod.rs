//! Global cluster configuration: managed namespaces and custom zone mappings.
//!
//! Both collections are sets of immutable members. Namespaces are added and
//! removed one by one; zone mappings can only be added or removed as a whole.

use std::collections::BTreeMap;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::{call, call_optional, decode_key, key_field, parse_import};
use crate::api::{
    ApiError, CustomZoneMappingsRequest, GlobalClusterApi, GlobalClusterConfig, ManagedNamespace,
    ZoneMapping,
};
use crate::error::{EntityKind, Operation, OperationContext, ReconcileError};
use crate::reconcile::{AllOrNothingDelta, diff_all_or_nothing, diff_keyed};
use crate::retry::{Attempt, RetryError, RetryPolicy, retry_with};
use crate::state_id::CompositeKey;

const ENTITY: EntityKind = EntityKind::GlobalClusterConfig;
const KEY_FIELDS: &[&str] = &["project_id", "cluster_name"];
const DUPLICATE_MANAGED_NAMESPACE: &str = "DUPLICATE_MANAGED_NAMESPACE";
const DUPLICATE_RETRY_WINDOW: Duration = Duration::from_secs(2 * 60);
const ZONE_MAPPINGS: &str = "custom_zone_mappings";

/// Desired global writes configuration of one cluster.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct DesiredGlobalClusterConfig {
    /// Project holding the cluster.
    pub project_id: String,
    /// Global cluster name.
    pub cluster_name: String,
    /// Sharded collections, keyed by `collection:db`.
    pub managed_namespaces: Vec<ManagedNamespace>,
    /// Location to zone mappings, keyed by location.
    pub custom_zone_mappings: Vec<ZoneMapping>,
}

impl DesiredGlobalClusterConfig {
    fn key(&self) -> CompositeKey {
        CompositeKey::new()
            .with("project_id", &self.project_id)
            .with("cluster_name", &self.cluster_name)
    }
}

/// Observed global writes configuration.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct GlobalClusterConfigState {
    /// Encoded composite key.
    pub id: String,
    /// Project holding the cluster.
    pub project_id: String,
    /// Global cluster name.
    pub cluster_name: String,
    /// Sharded collections.
    pub managed_namespaces: Vec<ManagedNamespace>,
    /// Location code to zone identifier.
    pub custom_zone_mapping: BTreeMap<String, String>,
}

impl GlobalClusterConfigState {
    fn new(key: &CompositeKey, project_id: &str, cluster_name: &str, remote: GlobalClusterConfig) -> Self {
        Self {
            id: key.encode(),
            project_id: project_id.to_owned(),
            cluster_name: cluster_name.to_owned(),
            managed_namespaces: remote.managed_namespaces,
            custom_zone_mapping: remote.custom_zone_mapping,
        }
    }
}

fn zone_location(mapping: &ZoneMapping) -> String {
    mapping.location.clone()
}

/// Reconciles global cluster configurations.
#[derive(Clone, Debug)]
pub struct GlobalClusterReconciler<A> {
    api: A,
    duplicate_retry: RetryPolicy,
}

impl<A: GlobalClusterApi> GlobalClusterReconciler<A> {
    /// Creates a reconciler that retries duplicate namespaces for two
    /// minutes.
    #[must_use]
    pub fn new(api: A) -> Self {
        Self {
            api,
            duplicate_retry: RetryPolicy::default().with_max_elapsed(DUPLICATE_RETRY_WINDOW),
        }
    }

    /// Overrides the retry policy used when a namespace already exists.
    #[must_use]
    pub const fn with_duplicate_retry(mut self, policy: RetryPolicy) -> Self {
        self.duplicate_retry = policy;
        self
    }

    /// Adds every managed namespace, then the custom zone mappings.
    ///
    /// A namespace rejected as a duplicate is removed before the next
    /// attempt; namespaces added earlier in the same call are kept. When the zone mappings cannot be
    /// added the namespaces are removed again.
    ///
    /// # Errors
    ///
    /// Returns [`ReconcileError::Retry`] when a namespace cannot be added and
    /// [`ReconcileError::Api`] when the zone mappings or the final read fail.
    pub async fn create(
        &self,
        desired: &DesiredGlobalClusterConfig,
        cancel: &CancellationToken,
    ) -> Result<GlobalClusterConfigState, ReconcileError> {
        let key = desired.key();
        let context = OperationContext::new(Operation::Create, ENTITY, key.to_string());
        diff_keyed(&[], &desired.managed_namespaces, ManagedNamespace::set_key)
            .map_err(|source| context.set_diff(source))?;
        diff_keyed(&[], &desired.custom_zone_mappings, zone_location)
            .map_err(|source| context.set_diff(source))?;

        let project_id = desired.project_id.as_str();
        let cluster_name = desired.cluster_name.as_str();
        for namespace in &desired.managed_namespaces {
            self.add_namespace(project_id, cluster_name, namespace, cancel)
                .await
                .map_err(|source| context.retry(source))?;
        }

        if !desired.custom_zone_mappings.is_empty() {
            let request = CustomZoneMappingsRequest {
                custom_zone_mappings: desired.custom_zone_mappings.clone(),
            };
            if let Err(err) = call(
                &context,
                cancel,
                self.api
                    .create_custom_zone_mappings(project_id, cluster_name, &request),
            )
            .await
            {
                warn!(error = %err, "custom zone mappings rejected; removing managed namespaces");
                self.remove_namespaces(&context, project_id, cluster_name, &desired.managed_namespaces, cancel)
                    .await?;
                return Err(err);
            }
        }

        info!(project_id, cluster_name, "configured global cluster");
        let remote = call(
            &context,
            cancel,
            self.api.get_global_cluster_config(project_id, cluster_name),
        )
        .await?;
        Ok(GlobalClusterConfigState::new(&key, project_id, cluster_name, remote))
    }

    /// Observes the configuration. `Ok(None)` means the cluster is gone.
    ///
    /// # Errors
    ///
    /// Returns [`ReconcileError`] when the identifier is malformed or the call
    /// fails with anything other than not-found.
    pub async fn read(
        &self,
        id: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<GlobalClusterConfigState>, ReconcileError> {
        let (key, context) = decode_key(Operation::Read, ENTITY, id, KEY_FIELDS)?;
        let project_id = key_field(&context, &key, "project_id")?;
        let cluster_name = key_field(&context, &key, "cluster_name")?;
        let remote = call_optional(
            &context,
            cancel,
            self.api.get_global_cluster_config(project_id, cluster_name),
        )
        .await?;
        Ok(remote.map(|remote| GlobalClusterConfigState::new(&key, project_id, cluster_name, remote)))
    }

    /// Moves the configuration from `current` to `desired`.
    ///
    /// Both diffs are computed before any call: removed namespaces go first,
    /// then added ones, then the zone mapping change.
    ///
    /// # Errors
    ///
    /// Returns [`ReconcileError::SetDiff`] when a member changes in place or
    /// only some zone mappings are removed, and
    /// [`ReconcileError::ReplacementRequired`] when the cluster changes.
    pub async fn update(
        &self,
        id: &str,
        current: &DesiredGlobalClusterConfig,
        desired: &DesiredGlobalClusterConfig,
        cancel: &CancellationToken,
    ) -> Result<GlobalClusterConfigState, ReconcileError> {
        let (key, context) = decode_key(Operation::Update, ENTITY, id, KEY_FIELDS)?;
        let replaced = current.key().changed_fields(&desired.key());
        if !replaced.is_empty() {
            return Err(ReconcileError::ReplacementRequired {
                context,
                fields: replaced,
            });
        }
        let namespaces = diff_keyed(
            &current.managed_namespaces,
            &desired.managed_namespaces,
            ManagedNamespace::set_key,
        )
        .map_err(|source| context.set_diff(source))?;
        let zones = diff_all_or_nothing(
            ZONE_MAPPINGS,
            &current.custom_zone_mappings,
            &desired.custom_zone_mappings,
            zone_location,
        )
        .map_err(|source| context.set_diff(source))?;

        let project_id = key_field(&context, &key, "project_id")?;
        let cluster_name = key_field(&context, &key, "cluster_name")?;
        let ctx = &context;
        namespaces
            .apply(
                |namespace: &ManagedNamespace| {
                    let namespace = namespace.clone();
                    async move {
                        self.remove_namespace(ctx, project_id, cluster_name, &namespace, cancel)
                            .await
                    }
                },
                |namespace: &ManagedNamespace| {
                    let namespace = namespace.clone();
                    async move {
                        call(
                            ctx,
                            cancel,
                            self.api
                                .create_managed_namespace(project_id, cluster_name, &namespace),
                        )
                        .await
                    }
                },
            )
            .await?;

        match zones {
            AllOrNothingDelta::Unchanged => {}
            AllOrNothingDelta::RemoveAll => {
                call(
                    &context,
                    cancel,
                    self.api
                        .delete_all_custom_zone_mappings(project_id, cluster_name),
                )
                .await?;
            }
            AllOrNothingDelta::Add(custom_zone_mappings) => {
                let request = CustomZoneMappingsRequest {
                    custom_zone_mappings,
                };
                call(
                    &context,
                    cancel,
                    self.api
                        .create_custom_zone_mappings(project_id, cluster_name, &request),
                )
                .await?;
            }
        }

        let remote = call(
            &context,
            cancel,
            self.api.get_global_cluster_config(project_id, cluster_name),
        )
        .await?;
        Ok(GlobalClusterConfigState::new(&key, project_id, cluster_name, remote))
    }

    /// Removes the applied namespaces and, when any were applied, every custom
    /// zone mapping.
    ///
    /// # Errors
    ///
    /// Returns [`ReconcileError::Api`] when a removal fails.
    pub async fn delete(
        &self,
        id: &str,
        applied: &DesiredGlobalClusterConfig,
        cancel: &CancellationToken,
    ) -> Result<(), ReconcileError> {
        let (key, context) = decode_key(Operation::Delete, ENTITY, id, KEY_FIELDS)?;
        let project_id = key_field(&context, &key, "project_id")?;
        let cluster_name = key_field(&context, &key, "cluster_name")?;

        self.remove_namespaces(&context, project_id, cluster_name, &applied.managed_namespaces, cancel)
            .await?;
        if !applied.custom_zone_mappings.is_empty() {
            call(
                &context,
                cancel,
                self.api
                    .delete_all_custom_zone_mappings(project_id, cluster_name),
            )
            .await?;
        }
        Ok(())
    }

    /// Adopts a configuration from `{project_id}-{cluster_name}`.
    ///
    /// # Errors
    ///
    /// Returns [`ReconcileError`] when the identifier is malformed or the
    /// configuration cannot be fetched.
    pub async fn import(
        &self,
        raw: &str,
        cancel: &CancellationToken,
    ) -> Result<GlobalClusterConfigState, ReconcileError> {
        let (key, context) = parse_import(ENTITY, raw, KEY_FIELDS)?;
        let project_id = key_field(&context, &key, "project_id")?;
        let cluster_name = key_field(&context, &key, "cluster_name")?;
        let remote = call(
            &context,
            cancel,
            self.api.get_global_cluster_config(project_id, cluster_name),
        )
        .await?;
        Ok(GlobalClusterConfigState::new(&key, project_id, cluster_name, remote))
    }

    async fn add_namespace(
        &self,
        project_id: &str,
        cluster_name: &str,
        namespace: &ManagedNamespace,
        cancel: &CancellationToken,
    ) -> Result<(), RetryError<ApiError>> {
        retry_with(&self.duplicate_retry, cancel, |attempt| async move {
            let err = match self
                .api
                .create_managed_namespace(project_id, cluster_name, namespace)
                .await
            {
                Ok(()) => return Ok(()),
                Err(err) => err,
            };
            if !err.has_error_code(DUPLICATE_MANAGED_NAMESPACE) {
                return Err(Attempt::Stop(err));
            }
            warn!(
                attempt,
                namespace = %namespace.set_key(),
                "managed namespace already exists; removing it before retrying"
            );
            match self.delete_namespace(project_id, cluster_name, namespace).await {
                Ok(()) => Err(Attempt::Retry(err)),
                Err(remove_err) => Err(Attempt::Stop(remove_err)),
            }
        })
        .await
    }

    async fn remove_namespaces(
        &self,
        context: &OperationContext,
        project_id: &str,
        cluster_name: &str,
        namespaces: &[ManagedNamespace],
        cancel: &CancellationToken,
    ) -> Result<(), ReconcileError> {
        for namespace in namespaces {
            self.remove_namespace(context, project_id, cluster_name, namespace, cancel)
                .await?;
        }
        Ok(())
    }

    async fn remove_namespace(
        &self,
        context: &OperationContext,
        project_id: &str,
        cluster_name: &str,
        namespace: &ManagedNamespace,
        cancel: &CancellationToken,
    ) -> Result<(), ReconcileError> {
        call(
            context,
            cancel,
            self.delete_namespace(project_id, cluster_name, namespace),
        )
        .await
    }

    /// Removes one namespace; a namespace that is already gone counts as
    /// removed.
    async fn delete_namespace(
        &self,
        project_id: &str,
        cluster_name: &str,
        namespace: &ManagedNamespace,
    ) -> Result<(), ApiError> {
        match self
            .api
            .delete_managed_namespace(project_id, cluster_name, &namespace.db, &namespace.collection)
            .await
        {
            Err(err) if err.is_not_found() => Ok(()),
            other => other,
        }
    }
}
