//! Network peering containers.
//!
//! A container reserves the Atlas CIDR block of one cloud provider. It can
//! only be removed once nothing is provisioned inside it, so deletion retries
//! the delete call until the remote side accepts it.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::{Timeouts, call, call_optional, decode_key, key_field, parse_import};
use crate::api::{ApiError, ContainerRequest, NetworkContainer, NetworkContainerApi};
use crate::error::{EntityKind, Operation, OperationContext, ReconcileError};
use crate::poll::{DeleteAttempt, PendingOperation, wait_for_deletion};
use crate::state_id::CompositeKey;

const ENTITY: EntityKind = EntityKind::NetworkContainer;
const KEY_FIELDS: &[&str] = &["project_id", "container_id"];

const DELETE_POLL_INTERVAL: Duration = Duration::from_secs(10);
const DELETE_INITIAL_DELAY: Duration = Duration::from_secs(2 * 60);

/// Default deadlines for containers.
pub const DEFAULT_TIMEOUTS: Timeouts = Timeouts::uniform(Duration::from_secs(60 * 60));

/// Cloud providers a container may belong to.
pub const PROVIDERS: [&str; 3] = ["AWS", "AZURE", "GCP"];

/// Desired network container.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DesiredNetworkContainer {
    /// Owning project.
    pub project_id: String,
    /// `AWS`, `AZURE`, or `GCP`. Changing it replaces the container.
    pub provider_name: String,
    /// CIDR block reserved for Atlas.
    pub atlas_cidr_block: String,
    /// AWS region; required for AWS.
    pub region_name: Option<String>,
    /// Azure region; required for Azure.
    pub region: Option<String>,
    /// GCP regions; optional.
    pub regions: Option<Vec<String>>,
}

impl DesiredNetworkContainer {
    fn request(&self, context: &OperationContext) -> Result<ContainerRequest, ReconcileError> {
        let mut request = ContainerRequest {
            provider_name: self.provider_name.clone(),
            atlas_cidr_block: self.atlas_cidr_block.clone(),
            region_name: None,
            region: None,
            regions: None,
        };
        match self.provider_name.as_str() {
            "AWS" => {
                request.region_name = Some(required_region(context, self.region_name.as_deref(), "region_name")?);
            }
            "AZURE" => {
                request.region = Some(required_region(context, self.region.as_deref(), "region")?);
            }
            "GCP" => request.regions.clone_from(&self.regions),
            other => {
                return Err(context.configuration(format!(
                    "`provider_name` must be one of {}, got '{other}'",
                    PROVIDERS.join(", ")
                )));
            }
        }
        Ok(request)
    }

    fn identity(&self) -> CompositeKey {
        CompositeKey::new()
            .with("project_id", &self.project_id)
            .with("provider_name", &self.provider_name)
    }
}

fn required_region(
    context: &OperationContext,
    value: Option<&str>,
    field: &str,
) -> Result<String, ReconcileError> {
    value
        .map(str::trim)
        .filter(|region| !region.is_empty())
        .map(|region| region.to_uppercase().replace('-', "_"))
        .ok_or_else(|| {
            context.configuration(format!("`{field}` must be set for this provider"))
        })
}

/// Observed network container.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct NetworkContainerState {
    /// Encoded composite key.
    pub id: String,
    /// Owning project.
    pub project_id: String,
    /// Remote container identifier.
    pub container_id: String,
    /// Remote representation.
    pub container: NetworkContainer,
}

impl NetworkContainerState {
    fn new(project_id: &str, container: NetworkContainer) -> Self {
        Self {
            id: container_key(project_id, &container.id).encode(),
            project_id: project_id.to_owned(),
            container_id: container.id.clone(),
            container,
        }
    }
}

fn container_key(project_id: &str, container_id: &str) -> CompositeKey {
    CompositeKey::new()
        .with("project_id", project_id)
        .with("container_id", container_id)
}

/// Reconciles network containers.
#[derive(Clone, Debug)]
pub struct NetworkContainerReconciler<A> {
    api: A,
    timeouts: Timeouts,
}

impl<A: NetworkContainerApi> NetworkContainerReconciler<A> {
    /// Creates a reconciler with default deadlines.
    #[must_use]
    pub fn new(api: A) -> Self {
        Self {
            api,
            timeouts: DEFAULT_TIMEOUTS,
        }
    }

    /// Overrides the operation deadlines.
    #[must_use]
    pub const fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Creates a container.
    ///
    /// # Errors
    ///
    /// Returns [`ReconcileError::Configuration`] when a provider specific
    /// region is missing, and [`ReconcileError::Api`] when the call fails.
    pub async fn create(
        &self,
        desired: &DesiredNetworkContainer,
        cancel: &CancellationToken,
    ) -> Result<NetworkContainerState, ReconcileError> {
        let context = OperationContext::new(
            Operation::Create,
            ENTITY,
            format!("project_id={}", desired.project_id),
        );
        let request = desired.request(&context)?;
        let created = call(
            &context,
            cancel,
            self.api.create_container(&desired.project_id, &request),
        )
        .await?;
        info!(
            project_id = %desired.project_id,
            container_id = %created.id,
            "created network container"
        );
        Ok(NetworkContainerState::new(&desired.project_id, created))
    }

    /// Observes the container. `Ok(None)` means it no longer exists.
    ///
    /// # Errors
    ///
    /// Returns [`ReconcileError`] when the identifier is malformed or the call
    /// fails with anything other than not-found.
    pub async fn read(
        &self,
        id: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<NetworkContainerState>, ReconcileError> {
        let (key, context) = decode_key(Operation::Read, ENTITY, id, KEY_FIELDS)?;
        let project_id = key_field(&context, &key, "project_id")?;
        let container_id = key_field(&context, &key, "container_id")?;
        let remote = call_optional(
            &context,
            cancel,
            self.api.get_container(project_id, container_id),
        )
        .await?;
        Ok(remote.map(|container| NetworkContainerState::new(project_id, container)))
    }

    /// Moves the container from `current` to `desired`.
    ///
    /// Nothing is sent when the two agree.
    ///
    /// # Errors
    ///
    /// Returns [`ReconcileError::ReplacementRequired`] when the project or
    /// provider changes.
    pub async fn update(
        &self,
        id: &str,
        current: &DesiredNetworkContainer,
        desired: &DesiredNetworkContainer,
        cancel: &CancellationToken,
    ) -> Result<NetworkContainerState, ReconcileError> {
        let (key, context) = decode_key(Operation::Update, ENTITY, id, KEY_FIELDS)?;
        let replaced = current.identity().changed_fields(&desired.identity());
        if !replaced.is_empty() {
            return Err(ReconcileError::ReplacementRequired {
                context,
                fields: replaced,
            });
        }
        let project_id = key_field(&context, &key, "project_id")?;
        let container_id = key_field(&context, &key, "container_id")?;

        if current == desired {
            debug!(container_id, "network container unchanged");
            let remote = call(&context, cancel, self.api.get_container(project_id, container_id))
                .await?;
            return Ok(NetworkContainerState::new(project_id, remote));
        }

        let request = desired.request(&context)?;
        let updated = call(
            &context,
            cancel,
            self.api.update_container(project_id, container_id, &request),
        )
        .await?;
        Ok(NetworkContainerState::new(project_id, updated))
    }

    /// Deletes the container, retrying until nothing is provisioned in it.
    ///
    /// # Errors
    ///
    /// Returns [`ReconcileError::Wait`] when the delete does not complete
    /// before the deadline, an observation fails, or the delete call is
    /// rejected with a terminal error.
    pub async fn delete(&self, id: &str, cancel: &CancellationToken) -> Result<(), ReconcileError> {
        let (key, context) = decode_key(Operation::Delete, ENTITY, id, KEY_FIELDS)?;
        let project_id = key_field(&context, &key, "project_id")?;
        let container_id = key_field(&context, &key, "container_id")?;

        let deletion = PendingOperation::new("delete network container")
            .timeout(self.timeouts.delete)
            .poll_interval(DELETE_POLL_INTERVAL)
            .initial_delay(DELETE_INITIAL_DELAY);
        wait_for_deletion(&deletion, cancel, || self.attempt_delete(project_id, container_id))
            .await
            .map_err(|source| context.wait(source))
    }

    /// Adopts a container from `{project_id}-{container_id}`.
    ///
    /// # Errors
    ///
    /// Returns [`ReconcileError`] when the identifier is malformed or the
    /// container cannot be fetched.
    pub async fn import(
        &self,
        raw: &str,
        cancel: &CancellationToken,
    ) -> Result<NetworkContainerState, ReconcileError> {
        let (key, context) = parse_import(ENTITY, raw, KEY_FIELDS)?;
        let project_id = key_field(&context, &key, "project_id")?;
        let container_id = key_field(&context, &key, "container_id")?;
        let remote = call(&context, cancel, self.api.get_container(project_id, container_id)).await?;
        Ok(NetworkContainerState::new(project_id, remote))
    }

    async fn attempt_delete(
        &self,
        project_id: &str,
        container_id: &str,
    ) -> Result<DeleteAttempt, ApiError> {
        let container = match self.api.get_container(project_id, container_id).await {
            Ok(container) => container,
            Err(err) if err.is_not_found() => return Ok(DeleteAttempt::Deleted),
            Err(err) => return Err(err),
        };
        if container.provisioned {
            return Ok(DeleteAttempt::StillProvisioned);
        }
        match self.api.delete_container(project_id, container_id).await {
            Ok(()) => Ok(DeleteAttempt::Deleted),
            Err(err) if err.is_not_found() => Ok(DeleteAttempt::Deleted),
            Err(err) if err.is_retryable() => {
                debug!(container_id, error = %err, "container not deletable yet");
                Ok(DeleteAttempt::StillProvisioned)
            }
            Err(err) => Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::test_support::ScriptedAtlas;
    use rstest::rstest;
    use serde_json::json;

    fn aws() -> DesiredNetworkContainer {
        DesiredNetworkContainer {
            project_id: String::from("p1"),
            provider_name: String::from("AWS"),
            atlas_cidr_block: String::from("10.8.0.0/21"),
            region_name: Some(String::from("us-east-1")),
            region: None,
            regions: None,
        }
    }

    fn container(provisioned: bool) -> serde_json::Value {
        json!({
            "id": "c1",
            "providerName": "AWS",
            "atlasCidrBlock": "10.8.0.0/21",
            "regionName": "US_EAST_1",
            "provisioned": provisioned
        })
    }

    fn id() -> String {
        container_key("p1", "c1").encode()
    }

    #[rstest]
    #[tokio::test]
    async fn create_normalises_aws_region() {
        let api = ScriptedAtlas::new();
        api.push_json("create_container", container(false));
        let reconciler = NetworkContainerReconciler::new(api.clone());

        let state = reconciler
            .create(&aws(), &CancellationToken::new())
            .await
            .expect("create should succeed");

        assert_eq!(state.id, id());
        let body = api.calls()[0].body.clone().expect("create sends a body");
        assert_eq!(body["regionName"], "US_EAST_1");
        assert!(body.get("region").is_none());
    }

    #[rstest]
    #[case("AZURE", "`region` must be set for this provider")]
    #[case("ORACLE", "`provider_name` must be one of AWS, AZURE, GCP, got 'ORACLE'")]
    #[tokio::test]
    async fn create_rejects_incomplete_provider_settings(
        #[case] provider: &str,
        #[case] message: &str,
    ) {
        let api = ScriptedAtlas::new();
        let reconciler = NetworkContainerReconciler::new(api.clone());
        let desired = DesiredNetworkContainer {
            provider_name: provider.to_owned(),
            ..aws()
        };

        let err = reconciler
            .create(&desired, &CancellationToken::new())
            .await
            .expect_err("invalid settings must fail");

        assert_eq!(err.kind(), ErrorKind::Configuration);
        assert!(err.to_string().ends_with(message), "{err}");
        assert!(api.calls().is_empty());
    }

    #[rstest]
    #[tokio::test]
    async fn provider_change_requires_replacement() {
        let reconciler = NetworkContainerReconciler::new(ScriptedAtlas::new());
        let desired = DesiredNetworkContainer {
            provider_name: String::from("GCP"),
            ..aws()
        };

        let err = reconciler
            .update(&id(), &aws(), &desired, &CancellationToken::new())
            .await
            .expect_err("provider change must fail");

        match err {
            ReconcileError::ReplacementRequired { fields, .. } => {
                assert_eq!(fields, vec![String::from("provider_name")]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[rstest]
    #[tokio::test]
    async fn cidr_change_updates_in_place() {
        let api = ScriptedAtlas::new();
        api.push_json("update_container", container(false));
        let reconciler = NetworkContainerReconciler::new(api.clone());
        let desired = DesiredNetworkContainer {
            atlas_cidr_block: String::from("10.9.0.0/21"),
            ..aws()
        };

        reconciler
            .update(&id(), &aws(), &desired, &CancellationToken::new())
            .await
            .expect("update should succeed");

        assert_eq!(api.endpoints(), vec!["update_container"]);
        assert_eq!(api.calls()[0].args, vec!["p1", "c1"]);
    }

    #[rstest]
    #[tokio::test(start_paused = true)]
    async fn delete_retries_while_container_is_in_use() {
        let api = ScriptedAtlas::new();
        api.push_json("get_container", container(true));
        api.push_json("get_container", container(false));
        api.push_error(
            "delete_container",
            ApiError::http(409, Some("CONTAINERS_IN_USE"), "in use"),
        );
        api.push_ok("delete_container");
        let reconciler = NetworkContainerReconciler::new(api.clone());

        reconciler
            .delete(&id(), &CancellationToken::new())
            .await
            .expect("delete should succeed");

        assert_eq!(
            api.endpoints(),
            vec![
                "get_container",
                "get_container",
                "delete_container",
                "get_container",
                "delete_container"
            ]
        );
    }

    #[rstest]
    #[tokio::test(start_paused = true)]
    async fn delete_of_missing_container_succeeds() {
        let api = ScriptedAtlas::new();
        api.push_error("get_container", ApiError::http(404, None, "gone"));
        let reconciler = NetworkContainerReconciler::new(api.clone());

        reconciler
            .delete(&id(), &CancellationToken::new())
            .await
            .expect("delete should succeed");

        assert_eq!(api.call_count("delete_container"), 0);
    }

    #[rstest]
    #[tokio::test(start_paused = true)]
    async fn delete_rejected_with_terminal_error_fails_without_retrying() {
        let api = ScriptedAtlas::new();
        api.push_json("get_container", container(false));
        api.push_error("delete_container", ApiError::http(403, None, "forbidden"));
        let reconciler = NetworkContainerReconciler::new(api.clone());
        let started = tokio::time::Instant::now();

        let err = reconciler
            .delete(&id(), &CancellationToken::new())
            .await
            .expect_err("forbidden delete must fail");

        assert_eq!(err.kind(), ErrorKind::Terminal);
        assert!(err.to_string().contains("forbidden"), "{err}");
        assert_eq!(api.call_count("delete_container"), 1);
        assert_eq!(started.elapsed(), DELETE_INITIAL_DELAY);
    }
}
