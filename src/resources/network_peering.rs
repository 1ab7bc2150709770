//! Network peering connections between an Atlas container and a customer
//! network.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::{Timeouts, call, call_optional, decode_key, key_field, parse_import};
use crate::api::{ApiError, NetworkContainerApi, NetworkPeering, NetworkPeeringApi, PeeringRequest, PeeringTarget};
use crate::cleanup::{CleanupPolicy, run_create_with_cleanup};
use crate::error::{EntityKind, Operation, OperationContext, ReconcileError};
use crate::poll::{EmptyStatus, Observation, PendingOperation, WaitError, wait_for};
use crate::state_id::CompositeKey;

const ENTITY: EntityKind = EntityKind::NetworkPeering;
const KEY_FIELDS: &[&str] = &["project_id", "peer_id", "provider_name"];

const CONNECTING: [&str; 4] = ["INITIATING", "FINALIZING", "ADDING_PEER", "WAITING_FOR_USER"];
const CONNECTED: [&str; 2] = ["AVAILABLE", "PENDING_ACCEPTANCE"];
const REMOVING: [&str; 8] = [
    "AVAILABLE",
    "INITIATING",
    "PENDING_ACCEPTANCE",
    "FINALIZING",
    "ADDING_PEER",
    "WAITING_FOR_USER",
    "TERMINATING",
    "DELETING",
];
const WAITING_FOR_USER: &str = "WAITING_FOR_USER";
const PENDING_ACCEPTANCE: &str = "PENDING_ACCEPTANCE";
const FAILED: &str = "FAILED";
const DELETED: &str = "DELETED";

const CREATE_POLL_INTERVAL: Duration = Duration::from_secs(10);
const CREATE_INITIAL_DELAY: Duration = Duration::from_secs(30);
const UPDATE_POLL_INTERVAL: Duration = Duration::from_secs(30);
const UPDATE_INITIAL_DELAY: Duration = Duration::from_secs(60);
const DELETE_POLL_INTERVAL: Duration = Duration::from_secs(30);
const DELETE_INITIAL_DELAY: Duration = Duration::from_secs(10);

/// Default deadlines for peering connections.
pub const DEFAULT_TIMEOUTS: Timeouts = Timeouts::uniform(Duration::from_secs(60 * 60));

/// Desired peering connection.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DesiredNetworkPeering {
    /// Owning project.
    pub project_id: String,
    /// Atlas container the connection starts from.
    pub container_id: String,
    /// Customer side of the connection.
    pub target: PeeringTarget,
}

impl DesiredNetworkPeering {
    fn request(&self, context: &OperationContext) -> Result<PeeringRequest, ReconcileError> {
        let fields: Vec<(&str, &str)> = match &self.target {
            PeeringTarget::Aws {
                accepter_region_name,
                aws_account_id,
                route_table_cidr_block,
                vpc_id,
            } => vec![
                ("accepter_region_name", accepter_region_name.as_str()),
                ("aws_account_id", aws_account_id.as_str()),
                ("route_table_cidr_block", route_table_cidr_block.as_str()),
                ("vpc_id", vpc_id.as_str()),
            ],
            PeeringTarget::Azure {
                azure_directory_id,
                azure_subscription_id,
                resource_group_name,
                vnet_name,
            } => vec![
                ("azure_directory_id", azure_directory_id.as_str()),
                ("azure_subscription_id", azure_subscription_id.as_str()),
                ("resource_group_name", resource_group_name.as_str()),
                ("vnet_name", vnet_name.as_str()),
            ],
            PeeringTarget::Gcp {
                gcp_project_id,
                network_name,
            } => vec![
                ("gcp_project_id", gcp_project_id.as_str()),
                ("network_name", network_name.as_str()),
            ],
        };
        if let Some((field, _)) = fields.iter().find(|(_, value)| value.trim().is_empty()) {
            return Err(context.configuration(format!(
                "`{field}` must be set when `provider_name` is `{}`",
                self.target.provider_name()
            )));
        }
        if self.container_id.trim().is_empty() {
            return Err(context.configuration("`container_id` must be set"));
        }
        Ok(PeeringRequest {
            container_id: self.container_id.clone(),
            target: self.target.clone(),
        })
    }

    /// Fields that cannot change without replacing the connection. Only the
    /// AWS target can be patched in place.
    fn identity(&self) -> CompositeKey {
        let key = CompositeKey::new()
            .with("project_id", &self.project_id)
            .with("container_id", &self.container_id)
            .with("provider_name", self.target.provider_name());
        match &self.target {
            PeeringTarget::Aws { .. } => key,
            PeeringTarget::Azure {
                azure_directory_id,
                azure_subscription_id,
                resource_group_name,
                vnet_name,
            } => key
                .with("azure_directory_id", azure_directory_id)
                .with("azure_subscription_id", azure_subscription_id)
                .with("resource_group_name", resource_group_name)
                .with("vnet_name", vnet_name),
            PeeringTarget::Gcp {
                gcp_project_id,
                network_name,
            } => key
                .with("gcp_project_id", gcp_project_id)
                .with("network_name", network_name),
        }
    }
}

/// Observed peering connection.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct NetworkPeeringState {
    /// Encoded composite key.
    pub id: String,
    /// Owning project.
    pub project_id: String,
    /// Remote peering identifier.
    pub peer_id: String,
    /// Cloud provider of the connection.
    pub provider_name: String,
    /// Remote representation.
    pub peering: NetworkPeering,
}

impl NetworkPeeringState {
    fn new(project_id: &str, provider_name: &str, peering: NetworkPeering) -> Self {
        Self {
            id: peering_key(project_id, &peering.id, provider_name).encode(),
            project_id: project_id.to_owned(),
            peer_id: peering.id.clone(),
            provider_name: provider_name.to_owned(),
            peering,
        }
    }

    /// Lifecycle status as reported by the provider specific field.
    #[must_use]
    pub fn status(&self) -> &str {
        self.peering.lifecycle_status()
    }
}

fn peering_key(project_id: &str, peer_id: &str, provider_name: &str) -> CompositeKey {
    CompositeKey::new()
        .with("project_id", project_id)
        .with("peer_id", peer_id)
        .with("provider_name", provider_name)
}

/// Reconciles network peering connections.
///
/// The API must also serve containers: a connection waiting for the customer
/// is reported as pending acceptance once its container is provisioned.
#[derive(Clone, Debug)]
pub struct NetworkPeeringReconciler<A> {
    api: A,
    timeouts: Timeouts,
    cleanup: CleanupPolicy,
}

impl<A> NetworkPeeringReconciler<A>
where
    A: NetworkPeeringApi + NetworkContainerApi,
{
    /// Creates a reconciler with default deadlines and cleanup enabled.
    #[must_use]
    pub fn new(api: A) -> Self {
        Self {
            api,
            timeouts: DEFAULT_TIMEOUTS,
            cleanup: CleanupPolicy::default(),
        }
    }

    /// Overrides the operation deadlines.
    #[must_use]
    pub const fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Overrides the create-timeout cleanup policy.
    #[must_use]
    pub const fn with_cleanup_policy(mut self, cleanup: CleanupPolicy) -> Self {
        self.cleanup = cleanup;
        self
    }

    /// Creates a connection and waits until it is available or waiting for
    /// acceptance on the customer side.
    ///
    /// # Errors
    ///
    /// Returns [`ReconcileError::Configuration`] when a provider field is
    /// empty and [`ReconcileError::CreateTimeout`] when the create call or the
    /// wait fails.
    pub async fn create(
        &self,
        desired: &DesiredNetworkPeering,
        cancel: &CancellationToken,
    ) -> Result<NetworkPeeringState, ReconcileError> {
        let context = OperationContext::new(
            Operation::Create,
            ENTITY,
            format!(
                "project_id={}, container_id={}",
                desired.project_id, desired.container_id
            ),
        );
        let request = desired.request(&context)?;
        if cancel.is_cancelled() {
            return Err(context.cancelled());
        }

        let project_id = desired.project_id.as_str();
        let cleanup_context = &context;
        let connect = connect_operation("create network peering")
            .timeout(self.timeouts.create)
            .poll_interval(CREATE_POLL_INTERVAL)
            .initial_delay(CREATE_INITIAL_DELAY);

        let peering = run_create_with_cleanup(
            &self.cleanup,
            self.api.create_peering(project_id, &request),
            |created: NetworkPeering| async move {
                info!(project_id, peer_id = %created.id, "created network peering");
                wait_for(&connect, cancel, || self.observe(project_id, &created.id)).await
            },
            |created: NetworkPeering| async move {
                self.delete_and_wait(cleanup_context, project_id, &created.id, cancel)
                    .await
            },
        )
        .await
        .map_err(|source| context.create_timeout(source))?;

        Ok(NetworkPeeringState::new(
            project_id,
            desired.target.provider_name(),
            peering,
        ))
    }

    /// Observes the connection. `Ok(None)` means it no longer exists.
    ///
    /// # Errors
    ///
    /// Returns [`ReconcileError`] when the identifier is malformed or the call
    /// fails with anything other than not-found, and a failure-status error
    /// carrying the error state when the connection has `FAILED`.
    pub async fn read(
        &self,
        id: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<NetworkPeeringState>, ReconcileError> {
        let (key, context) = decode_key(Operation::Read, ENTITY, id, KEY_FIELDS)?;
        let project_id = key_field(&context, &key, "project_id")?;
        let peer_id = key_field(&context, &key, "peer_id")?;
        let provider_name = key_field(&context, &key, "provider_name")?;
        let remote = call_optional(&context, cancel, self.api.get_peering(project_id, peer_id)).await?;
        let Some(peering) = remote else {
            return Ok(None);
        };
        if peering.lifecycle_status() == FAILED {
            return Err(context.wait(WaitError::FailureStatus {
                operation: String::from("read network peering"),
                status: FAILED.to_owned(),
                message: failed_state_message(&peering),
            }));
        }
        Ok(Some(NetworkPeeringState::new(project_id, provider_name, peering)))
    }

    /// Patches an AWS connection and waits for it to settle again.
    ///
    /// # Errors
    ///
    /// Returns [`ReconcileError::ReplacementRequired`] when a field other than
    /// the AWS target changes, and [`ReconcileError::Wait`] when the
    /// connection does not settle.
    pub async fn update(
        &self,
        id: &str,
        current: &DesiredNetworkPeering,
        desired: &DesiredNetworkPeering,
        cancel: &CancellationToken,
    ) -> Result<NetworkPeeringState, ReconcileError> {
        let (key, context) = decode_key(Operation::Update, ENTITY, id, KEY_FIELDS)?;
        let replaced = current.identity().changed_fields(&desired.identity());
        if !replaced.is_empty() {
            return Err(ReconcileError::ReplacementRequired {
                context,
                fields: replaced,
            });
        }
        let project_id = key_field(&context, &key, "project_id")?;
        let peer_id = key_field(&context, &key, "peer_id")?;
        let provider_name = key_field(&context, &key, "provider_name")?;

        if current == desired {
            debug!(peer_id, "network peering unchanged");
            let remote = call(&context, cancel, self.api.get_peering(project_id, peer_id)).await?;
            return Ok(NetworkPeeringState::new(project_id, provider_name, remote));
        }

        let request = desired.request(&context)?;
        call(
            &context,
            cancel,
            self.api.update_peering(project_id, peer_id, &request),
        )
        .await?;

        let settle = connect_operation("update network peering")
            .timeout(self.timeouts.update)
            .poll_interval(UPDATE_POLL_INTERVAL)
            .initial_delay(UPDATE_INITIAL_DELAY);
        let peering = wait_for(&settle, cancel, || self.observe(project_id, peer_id))
            .await
            .map_err(|source| context.wait(source))?;
        Ok(NetworkPeeringState::new(project_id, provider_name, peering))
    }

    /// Deletes the connection and waits until it is gone. A connection that
    /// is already gone counts as deleted.
    ///
    /// # Errors
    ///
    /// Returns [`ReconcileError`] when the delete call or the wait fails.
    pub async fn delete(&self, id: &str, cancel: &CancellationToken) -> Result<(), ReconcileError> {
        let (key, context) = decode_key(Operation::Delete, ENTITY, id, KEY_FIELDS)?;
        let project_id = key_field(&context, &key, "project_id")?;
        let peer_id = key_field(&context, &key, "peer_id")?;
        self.delete_and_wait(&context, project_id, peer_id, cancel).await
    }

    /// Adopts a connection from `{project_id}-{peer_id}-{provider_name}`.
    ///
    /// # Errors
    ///
    /// Returns [`ReconcileError`] when the identifier is malformed or the
    /// connection cannot be fetched.
    pub async fn import(
        &self,
        raw: &str,
        cancel: &CancellationToken,
    ) -> Result<NetworkPeeringState, ReconcileError> {
        let (key, context) = parse_import(ENTITY, raw, KEY_FIELDS)?;
        let project_id = key_field(&context, &key, "project_id")?;
        let peer_id = key_field(&context, &key, "peer_id")?;
        let provider_name = key_field(&context, &key, "provider_name")?;
        let remote = call(&context, cancel, self.api.get_peering(project_id, peer_id)).await?;
        Ok(NetworkPeeringState::new(project_id, provider_name, remote))
    }

    async fn delete_and_wait(
        &self,
        context: &OperationContext,
        project_id: &str,
        peer_id: &str,
        cancel: &CancellationToken,
    ) -> Result<(), ReconcileError> {
        let deleted = call_optional(context, cancel, self.api.delete_peering(project_id, peer_id)).await?;
        if deleted.is_none() {
            debug!(peer_id, "network peering already gone");
            return Ok(());
        }

        let removal = PendingOperation::new("delete network peering")
            .pending(REMOVING)
            .target([DELETED])
            .timeout(self.timeouts.delete)
            .poll_interval(DELETE_POLL_INTERVAL)
            .initial_delay(DELETE_INITIAL_DELAY);
        wait_for(&removal, cancel, || self.observe_removal(project_id, peer_id))
            .await
            .map_err(|source| context.wait(source))
    }

    async fn observe(
        &self,
        project_id: &str,
        peer_id: &str,
    ) -> Result<Observation<NetworkPeering>, ApiError> {
        let peering = self.api.get_peering(project_id, peer_id).await?;
        let mut status = peering.lifecycle_status().to_owned();
        if status == WAITING_FOR_USER {
            let container = self.api.get_container(project_id, &peering.container_id).await?;
            if container.provisioned {
                status = PENDING_ACCEPTANCE.to_owned();
            }
        }
        debug!(peer_id, status = %status, "network peering status");
        let detail = failed_state_message(&peering);
        Ok(Observation::new(peering, status).with_detail(detail))
    }

    async fn observe_removal(
        &self,
        project_id: &str,
        peer_id: &str,
    ) -> Result<Observation<()>, ApiError> {
        match self.api.get_peering(project_id, peer_id).await {
            Ok(peering) => Ok(Observation::new((), peering.lifecycle_status())),
            Err(err) if err.is_not_found() => Ok(Observation::new((), DELETED)),
            Err(err) => Err(err),
        }
    }
}

fn failed_state_message(peering: &NetworkPeering) -> String {
    format!(
        "peer networking is in a failed state: {}",
        peering.error_detail()
    )
}

fn connect_operation(name: &str) -> PendingOperation {
    PendingOperation::new(name)
        .pending(CONNECTING)
        .target(CONNECTED)
        .failure([FAILED])
        .on_empty_status(EmptyStatus::Fail)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::test_support::ScriptedAtlas;
    use rstest::rstest;
    use serde_json::json;

    fn gcp() -> DesiredNetworkPeering {
        DesiredNetworkPeering {
            project_id: String::from("p1"),
            container_id: String::from("c1"),
            target: PeeringTarget::Gcp {
                gcp_project_id: String::from("gcp-project"),
                network_name: String::from("default"),
            },
        }
    }

    fn peering(status: &str) -> serde_json::Value {
        json!({
            "id": "peer1",
            "containerId": "c1",
            "providerName": "GCP",
            "status": status,
            "errorState": "ROUTE_CONFLICT"
        })
    }

    #[rstest]
    #[tokio::test(start_paused = true)]
    async fn waiting_for_user_with_provisioned_container_is_accepted() {
        let api = ScriptedAtlas::new();
        api.push_json("create_peering", peering("INITIATING"));
        api.push_json("get_peering", peering("WAITING_FOR_USER"));
        api.push_json("get_container", json!({"id": "c1", "providerName": "GCP", "provisioned": true}));
        let reconciler = NetworkPeeringReconciler::new(api.clone());

        let state = reconciler
            .create(&gcp(), &CancellationToken::new())
            .await
            .expect("create should succeed");

        assert_eq!(state.peer_id, "peer1");
        assert_eq!(state.provider_name, "GCP");
        assert_eq!(
            api.endpoints(),
            vec!["create_peering", "get_peering", "get_container"]
        );
    }

    #[rstest]
    #[tokio::test]
    async fn read_surfaces_failed_connection() {
        let api = ScriptedAtlas::new();
        api.push_json("get_peering", peering("FAILED"));
        let reconciler = NetworkPeeringReconciler::new(api.clone());
        let id = peering_key("p1", "peer1", "GCP").encode();

        let err = reconciler
            .read(&id, &CancellationToken::new())
            .await
            .expect_err("failed connection must be reported");

        assert_eq!(err.kind(), ErrorKind::FailureStatus);
        assert!(
            err.to_string()
                .contains("peer networking is in a failed state: ROUTE_CONFLICT"),
            "{err}"
        );
        assert_eq!(api.endpoints(), vec!["get_peering"]);
    }

    #[rstest]
    #[tokio::test(start_paused = true)]
    async fn failed_peering_reports_error_state() {
        let api = ScriptedAtlas::new();
        api.push_json("create_peering", peering("INITIATING"));
        api.push_json("get_peering", peering("FAILED"));
        let reconciler = NetworkPeeringReconciler::new(api.clone());

        let err = reconciler
            .create(&gcp(), &CancellationToken::new())
            .await
            .expect_err("failed peering must fail");

        assert_eq!(err.kind(), ErrorKind::FailureStatus);
        assert!(
            err.to_string()
                .contains("peer networking is in a failed state: ROUTE_CONFLICT"),
            "{err}"
        );
        assert_eq!(api.call_count("delete_peering"), 0);
    }

    #[rstest]
    #[tokio::test]
    async fn empty_target_field_is_rejected() {
        let api = ScriptedAtlas::new();
        let reconciler = NetworkPeeringReconciler::new(api.clone());
        let desired = DesiredNetworkPeering {
            target: PeeringTarget::Gcp {
                gcp_project_id: String::from("gcp-project"),
                network_name: String::new(),
            },
            ..gcp()
        };

        let err = reconciler
            .create(&desired, &CancellationToken::new())
            .await
            .expect_err("empty network name must fail");

        assert!(
            err.to_string()
                .ends_with("`network_name` must be set when `provider_name` is `GCP`"),
            "{err}"
        );
        assert!(api.calls().is_empty());
    }

    #[rstest]
    #[tokio::test]
    async fn gcp_network_change_requires_replacement() {
        let reconciler = NetworkPeeringReconciler::new(ScriptedAtlas::new());
        let desired = DesiredNetworkPeering {
            target: PeeringTarget::Gcp {
                gcp_project_id: String::from("gcp-project"),
                network_name: String::from("other"),
            },
            ..gcp()
        };
        let id = peering_key("p1", "peer1", "GCP").encode();

        let err = reconciler
            .update(&id, &gcp(), &desired, &CancellationToken::new())
            .await
            .expect_err("network change must fail");

        assert!(
            matches!(&err, ReconcileError::ReplacementRequired { fields, .. } if fields == &[String::from("network_name")]),
            "{err}"
        );
    }

    #[rstest]
    #[tokio::test(start_paused = true)]
    async fn delete_waits_until_not_found() {
        let api = ScriptedAtlas::new();
        api.push_ok("delete_peering");
        api.push_json("get_peering", peering("TERMINATING"));
        api.push_error("get_peering", ApiError::http(404, None, "gone"));
        let reconciler = NetworkPeeringReconciler::new(api.clone());

        reconciler
            .delete(
                &peering_key("p1", "peer1", "GCP").encode(),
                &CancellationToken::new(),
            )
            .await
            .expect("delete should succeed");

        assert_eq!(
            api.endpoints(),
            vec!["delete_peering", "get_peering", "get_peering"]
        );
    }

    #[rstest]
    #[tokio::test]
    async fn delete_of_missing_peering_succeeds() {
        let api = ScriptedAtlas::new();
        api.push_error("delete_peering", ApiError::http(404, None, "gone"));
        let reconciler = NetworkPeeringReconciler::new(api.clone());

        reconciler
            .delete(
                &peering_key("p1", "peer1", "GCP").encode(),
                &CancellationToken::new(),
            )
            .await
            .expect("delete should succeed");

        assert_eq!(api.endpoints(), vec!["delete_peering"]);
    }
}
