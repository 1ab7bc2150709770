//! Cluster outage simulation lifecycle.
//!
//! Starting a simulation is a long-running operation. When the start wait
//! times out the simulation is ended again, provided the cleanup policy
//! allows it, so no cluster is left with regions artificially offline.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::{Timeouts, call, call_optional, decode_key, key_field, parse_import};
use crate::api::{ApiError, OutageFilter, OutageSimulation, OutageSimulationApi, OutageSimulationRequest};
use crate::cleanup::{CleanupPolicy, run_create_with_cleanup};
use crate::error::{EntityKind, Operation, OperationContext, ReconcileError};
use crate::poll::{Observation, PendingOperation, wait_for};
use crate::state_id::CompositeKey;

const ENTITY: EntityKind = EntityKind::OutageSimulation;
const KEY_FIELDS: &[&str] = &["project_id", "cluster_name"];

const STARTING: [&str; 2] = ["START_REQUESTED", "STARTING"];
const ENDING: [&str; 3] = ["RECOVERY_REQUESTED", "RECOVERING", "COMPLETE"];
/// Status of a running simulation.
pub const STATUS_SIMULATING: &str = "SIMULATING";
/// Status of a simulation that failed to start.
pub const STATUS_FAILED: &str = "FAILED";
/// Synthetic status used once the simulation no longer exists.
pub const STATUS_DELETED: &str = "DELETED";

const POLL_INTERVAL: Duration = Duration::from_secs(60);
const INITIAL_DELAY: Duration = Duration::from_secs(60);
const DELETABLE_TIMEOUT: Duration = Duration::from_secs(20 * 60);
const START_MARGIN: Duration = Duration::from_secs(60);

/// Default deadlines for outage simulations.
pub const DEFAULT_TIMEOUTS: Timeouts = Timeouts::uniform(Duration::from_secs(25 * 60));

/// Desired outage simulation for one cluster.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DesiredOutageSimulation {
    /// Project holding the cluster.
    pub project_id: String,
    /// Cluster to take regions offline for.
    pub cluster_name: String,
    /// Regions to take offline. At least one is required.
    pub outage_filters: Vec<OutageFilter>,
}

impl DesiredOutageSimulation {
    /// Creates a desired simulation without filters.
    #[must_use]
    pub fn new(project_id: impl Into<String>, cluster_name: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            cluster_name: cluster_name.into(),
            outage_filters: Vec::new(),
        }
    }

    /// Adds an outage filter.
    #[must_use]
    pub fn with_filter(mut self, filter: OutageFilter) -> Self {
        self.outage_filters.push(filter);
        self
    }

    fn key(&self) -> CompositeKey {
        CompositeKey::new()
            .with("project_id", &self.project_id)
            .with("cluster_name", &self.cluster_name)
    }
}

/// Observed outage simulation.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct OutageSimulationState {
    /// Encoded composite key.
    pub id: String,
    /// Project holding the cluster.
    pub project_id: String,
    /// Cluster under simulation.
    pub cluster_name: String,
    /// Remote simulation identifier.
    pub simulation_id: Option<String>,
    /// Remote lifecycle status.
    pub state: Option<String>,
    /// When the simulation was requested.
    pub start_request_date: Option<String>,
    /// Regions taken offline.
    pub outage_filters: Vec<OutageFilter>,
}

impl OutageSimulationState {
    fn from_remote(key: &CompositeKey, project_id: &str, cluster_name: &str, remote: OutageSimulation) -> Self {
        Self {
            id: key.encode(),
            project_id: project_id.to_owned(),
            cluster_name: cluster_name.to_owned(),
            simulation_id: remote.id,
            state: remote.state,
            start_request_date: remote.start_request_date,
            outage_filters: remote.outage_filters,
        }
    }
}

/// Reconciles cluster outage simulations.
#[derive(Clone, Debug)]
pub struct OutageSimulationReconciler<A> {
    api: A,
    timeouts: Timeouts,
    cleanup: CleanupPolicy,
}

impl<A: OutageSimulationApi> OutageSimulationReconciler<A> {
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

    /// Starts a simulation and waits until it is running.
    ///
    /// The wait deadline is the create timeout minus one minute. A simulation
    /// that disappears during the wait is a failure.
    ///
    /// # Errors
    ///
    /// Returns [`ReconcileError::Configuration`] when no filter is given,
    /// [`ReconcileError::CreateTimeout`] when the start call or the wait
    /// fails, and [`ReconcileError::Cancelled`] when `cancel` fires first.
    pub async fn create(
        &self,
        desired: &DesiredOutageSimulation,
        cancel: &CancellationToken,
    ) -> Result<OutageSimulationState, ReconcileError> {
        let key = desired.key();
        let context = OperationContext::new(Operation::Create, ENTITY, key.to_string());
        if desired.outage_filters.is_empty() {
            return Err(context.configuration("at least one outage filter is required"));
        }
        if cancel.is_cancelled() {
            return Err(context.cancelled());
        }

        let project_id = desired.project_id.as_str();
        let cluster_name = desired.cluster_name.as_str();
        let request = OutageSimulationRequest {
            outage_filters: desired.outage_filters.clone(),
        };
        let start = PendingOperation::new("start outage simulation")
            .pending(STARTING)
            .target([STATUS_SIMULATING])
            .failure([STATUS_FAILED])
            .timeout(self.timeouts.create.saturating_sub(START_MARGIN))
            .poll_interval(POLL_INTERVAL)
            .initial_delay(INITIAL_DELAY);

        info!(project_id, cluster_name, "starting cluster outage simulation");
        let running = run_create_with_cleanup(
            &self.cleanup_policy(),
            self.api
                .start_outage_simulation(project_id, cluster_name, &request),
            |_started| {
                wait_for(&start, cancel, || async move {
                    self.api
                        .get_outage_simulation(project_id, cluster_name)
                        .await
                        .map(|remote| {
                            let status = remote.state.clone().unwrap_or_default();
                            Observation::new(remote, status)
                        })
                })
            },
            |_started| self.end_after_start_timeout(&context, project_id, cluster_name, cancel),
        )
        .await
        .map_err(|source| context.create_timeout(source))?;

        Ok(OutageSimulationState::from_remote(
            &key,
            project_id,
            cluster_name,
            running,
        ))
    }

    /// Observes the simulation. `Ok(None)` means it no longer exists.
    ///
    /// # Errors
    ///
    /// Returns [`ReconcileError`] when the identifier is malformed or the call
    /// fails with anything other than not-found.
    pub async fn read(
        &self,
        id: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<OutageSimulationState>, ReconcileError> {
        let (key, context) = decode_key(Operation::Read, ENTITY, id, KEY_FIELDS)?;
        let project_id = key_field(&context, &key, "project_id")?;
        let cluster_name = key_field(&context, &key, "cluster_name")?;

        let remote = call_optional(
            &context,
            cancel,
            self.api.get_outage_simulation(project_id, cluster_name),
        )
        .await?;
        Ok(remote.map(|remote| OutageSimulationState::from_remote(&key, project_id, cluster_name, remote)))
    }

    /// Outage simulations cannot be changed once started.
    ///
    /// # Errors
    ///
    /// Always returns [`ReconcileError::Unsupported`].
    pub fn update(&self, id: &str) -> Result<OutageSimulationState, ReconcileError> {
        Err(ReconcileError::Unsupported {
            context: OperationContext::new(Operation::Update, ENTITY, id),
        })
    }

    /// Ends the simulation and waits until it is gone.
    ///
    /// # Errors
    ///
    /// Returns [`ReconcileError`] when the end call or the wait fails.
    pub async fn delete(&self, id: &str, cancel: &CancellationToken) -> Result<(), ReconcileError> {
        let (key, context) = decode_key(Operation::Delete, ENTITY, id, KEY_FIELDS)?;
        let project_id = key_field(&context, &key, "project_id")?;
        let cluster_name = key_field(&context, &key, "cluster_name")?;
        self.end_and_wait(&context, project_id, cluster_name, self.timeouts.delete, cancel)
            .await
    }

    /// Adopts a running simulation from `{project_id}-{cluster_name}`.
    ///
    /// # Errors
    ///
    /// Returns [`ReconcileError`] when the identifier is malformed or the
    /// simulation cannot be fetched.
    pub async fn import(
        &self,
        raw: &str,
        cancel: &CancellationToken,
    ) -> Result<OutageSimulationState, ReconcileError> {
        let (key, context) = parse_import(ENTITY, raw, KEY_FIELDS)?;
        let project_id = key_field(&context, &key, "project_id")?;
        let cluster_name = key_field(&context, &key, "cluster_name")?;
        let remote = call(
            &context,
            cancel,
            self.api.get_outage_simulation(project_id, cluster_name),
        )
        .await?;
        Ok(OutageSimulationState::from_remote(&key, project_id, cluster_name, remote))
    }

    async fn observe(
        &self,
        project_id: &str,
        cluster_name: &str,
    ) -> Result<Observation<String>, ApiError> {
        match self.api.get_outage_simulation(project_id, cluster_name).await {
            Ok(remote) => {
                let status = remote.state.unwrap_or_default();
                Ok(Observation::new(status.clone(), status))
            }
            Err(err) if err.is_not_found() => {
                Ok(Observation::new(STATUS_DELETED.to_owned(), STATUS_DELETED))
            }
            Err(err) => Err(err),
        }
    }

    /// Widens the cleanup budget so the deletable wait and the end wait both
    /// fit inside it.
    fn cleanup_policy(&self) -> CleanupPolicy {
        let required = DELETABLE_TIMEOUT.saturating_add(self.timeouts.delete);
        CleanupPolicy {
            cleanup_timeout: self.cleanup.cleanup_timeout.max(required),
            ..self.cleanup
        }
    }

    async fn end_after_start_timeout(
        &self,
        context: &OperationContext,
        project_id: &str,
        cluster_name: &str,
        cancel: &CancellationToken,
    ) -> Result<(), ReconcileError> {
        let deletable = PendingOperation::new("wait for deletable outage simulation")
            .pending(STARTING)
            .target([STATUS_SIMULATING, STATUS_FAILED, STATUS_DELETED])
            .timeout(DELETABLE_TIMEOUT)
            .poll_interval(POLL_INTERVAL)
            .initial_delay(INITIAL_DELAY);

        let status = match wait_for(&deletable, cancel, || self.observe(project_id, cluster_name)).await {
            Ok(status) => status,
            Err(err) => {
                warn!(error = %err, "outage simulation never reached a deletable state");
                return Ok(());
            }
        };
        if status != STATUS_SIMULATING {
            info!(status = %status, "outage simulation needs no cleanup");
            return Ok(());
        }
        self.end_and_wait(context, project_id, cluster_name, self.timeouts.delete, cancel)
            .await
    }

    async fn end_and_wait(
        &self,
        context: &OperationContext,
        project_id: &str,
        cluster_name: &str,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<(), ReconcileError> {
        info!(project_id, cluster_name, "ending cluster outage simulation");
        let ended = call_optional(
            context,
            cancel,
            self.api.end_outage_simulation(project_id, cluster_name),
        )
        .await?;
        if ended.is_none() {
            return Ok(());
        }

        let end = PendingOperation::new("end outage simulation")
            .pending(ENDING)
            .target([STATUS_DELETED])
            .timeout(timeout)
            .poll_interval(POLL_INTERVAL)
            .initial_delay(INITIAL_DELAY);
        wait_for(&end, cancel, || self.observe(project_id, cluster_name))
            .await
            .map(|_| ())
            .map_err(|source| context.wait(source))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::test_support::ScriptedAtlas;
    use rstest::rstest;
    use serde_json::json;

    fn desired() -> DesiredOutageSimulation {
        DesiredOutageSimulation::new("p1", "c1").with_filter(OutageFilter::region("AWS", "US_EAST_1"))
    }

    fn simulation(state: &str) -> serde_json::Value {
        json!({
            "id": "sim1",
            "clusterName": "c1",
            "groupId": "p1",
            "state": state,
            "outageFilters": [{"cloudProvider": "AWS", "regionName": "US_EAST_1", "type": "REGION"}]
        })
    }

    #[rstest]
    #[tokio::test]
    async fn create_requires_a_filter() {
        let api = ScriptedAtlas::new();
        let reconciler = OutageSimulationReconciler::new(api.clone());

        let err = reconciler
            .create(
                &DesiredOutageSimulation::new("p1", "c1"),
                &CancellationToken::new(),
            )
            .await
            .expect_err("filters are required");

        assert_eq!(err.kind(), ErrorKind::Configuration);
        assert!(api.calls().is_empty());
    }

    #[rstest]
    #[tokio::test(start_paused = true)]
    async fn create_waits_until_simulating() {
        let api = ScriptedAtlas::new();
        api.push_json("start_outage_simulation", simulation("START_REQUESTED"));
        api.push_json("get_outage_simulation", simulation("STARTING"));
        api.push_json("get_outage_simulation", simulation("SIMULATING"));
        let reconciler = OutageSimulationReconciler::new(api.clone());

        let state = reconciler
            .create(&desired(), &CancellationToken::new())
            .await
            .expect("create should succeed");

        assert_eq!(state.state.as_deref(), Some("SIMULATING"));
        assert_eq!(state.simulation_id.as_deref(), Some("sim1"));
        assert_eq!(
            CompositeKey::decode(&state.id, KEY_FIELDS).expect("id decodes"),
            CompositeKey::new()
                .with("project_id", "p1")
                .with("cluster_name", "c1")
        );
        assert_eq!(api.call_count("get_outage_simulation"), 2);
        assert_eq!(api.call_count("end_outage_simulation"), 0);
    }

    #[rstest]
    #[tokio::test(start_paused = true)]
    async fn disappearing_simulation_fails_create() {
        let api = ScriptedAtlas::new();
        api.push_json("start_outage_simulation", simulation("START_REQUESTED"));
        api.push_error("get_outage_simulation", ApiError::http(404, None, "gone"));
        let reconciler = OutageSimulationReconciler::new(api.clone());

        let err = reconciler
            .create(&desired(), &CancellationToken::new())
            .await
            .expect_err("missing simulation must fail");

        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(api.call_count("end_outage_simulation"), 0);
    }

    #[rstest]
    #[tokio::test(start_paused = true)]
    async fn delete_ends_and_waits_for_removal() {
        let api = ScriptedAtlas::new();
        api.push_json("end_outage_simulation", simulation("RECOVERY_REQUESTED"));
        api.push_json("get_outage_simulation", simulation("RECOVERING"));
        api.push_error("get_outage_simulation", ApiError::http(404, None, "gone"));
        let reconciler = OutageSimulationReconciler::new(api.clone());
        let id = desired().key().encode();

        reconciler
            .delete(&id, &CancellationToken::new())
            .await
            .expect("delete should succeed");

        assert_eq!(
            api.endpoints(),
            vec![
                "end_outage_simulation",
                "get_outage_simulation",
                "get_outage_simulation"
            ]
        );
    }

    #[rstest]
    #[tokio::test]
    async fn read_maps_not_found_to_none() {
        let api = ScriptedAtlas::new();
        api.push_error("get_outage_simulation", ApiError::http(404, None, "gone"));
        let reconciler = OutageSimulationReconciler::new(api);

        let state = reconciler
            .read(&desired().key().encode(), &CancellationToken::new())
            .await
            .expect("read should succeed");

        assert_eq!(state, None);
    }

    #[rstest]
    fn update_is_unsupported() {
        let reconciler = OutageSimulationReconciler::new(ScriptedAtlas::new());
        let err = reconciler.update("id").expect_err("update must fail");
        assert!(matches!(err, ReconcileError::Unsupported { .. }), "{err}");
    }

    #[rstest]
    #[tokio::test]
    async fn import_splits_project_and_cluster() {
        let api = ScriptedAtlas::new();
        api.push_json("get_outage_simulation", simulation("SIMULATING"));
        let reconciler = OutageSimulationReconciler::new(api.clone());

        let state = reconciler
            .import("p1-my-cluster", &CancellationToken::new())
            .await
            .expect("import should succeed");

        assert_eq!(state.project_id, "p1");
        assert_eq!(state.cluster_name, "my-cluster");
        assert_eq!(api.calls()[0].args, vec!["p1", "my-cluster"]);
    }
}
