//! Test support utilities shared across unit and integration tests.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::env;
use std::ffi::OsString;
use std::future::ready;
use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::{Mutex as AsyncMutex, MutexGuard};

use crate::api::{
    AccessListApi, AccessListEntry, AccessListScope, ApiError, ApiFuture, ContainerRequest,
    CustomZoneMappingsRequest, GlobalClusterApi, GlobalClusterConfig, ManagedNamespace,
    NetworkContainer, NetworkContainerApi, NetworkPeering, NetworkPeeringApi,
    OutageSimulation, OutageSimulationApi, OutageSimulationRequest, Page, PageRequest,
    PeeringRequest,
};

/// Records a single call made through [`ScriptedAtlas`].
#[derive(Clone, Debug, PartialEq)]
pub struct ApiCall {
    /// Trait method name, for example `get_outage_simulation`.
    pub endpoint: &'static str,
    /// Path parameters in call order.
    pub args: Vec<String>,
    /// Request body, when the call sends one.
    pub body: Option<Value>,
}

#[derive(Debug, Default)]
struct Script {
    responses: HashMap<&'static str, VecDeque<Result<Value, ApiError>>>,
    calls: Vec<ApiCall>,
}

/// Scripted Atlas API double.
///
/// Responses are queued per endpoint and replayed in FIFO order; the last
/// queued response for an endpoint repeats for every further call. Calls to an
/// endpoint with nothing queued fail with a transport error.
#[derive(Clone, Debug, Default)]
pub struct ScriptedAtlas {
    inner: Arc<Mutex<Script>>,
}

impl ScriptedAtlas {
    /// Creates a double with no queued responses.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn script(&self) -> std::sync::MutexGuard<'_, Script> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queues a raw JSON response.
    pub fn push_json(&self, endpoint: &'static str, body: Value) {
        self.script()
            .responses
            .entry(endpoint)
            .or_default()
            .push_back(Ok(body));
    }

    /// Queues a typed response.
    ///
    /// # Panics
    ///
    /// Panics when `body` cannot be serialized, which indicates a broken test.
    pub fn push<T: Serialize>(&self, endpoint: &'static str, body: &T) {
        let value = serde_json::to_value(body)
            .unwrap_or_else(|err| panic!("scripted body for {endpoint} must serialize: {err}"));
        self.push_json(endpoint, value);
    }

    /// Queues an empty success response.
    pub fn push_ok(&self, endpoint: &'static str) {
        self.push_json(endpoint, Value::Null);
    }

    /// Queues an error response.
    pub fn push_error(&self, endpoint: &'static str, error: ApiError) {
        self.script()
            .responses
            .entry(endpoint)
            .or_default()
            .push_back(Err(error));
    }

    /// Returns a snapshot of all calls recorded so far.
    #[must_use]
    pub fn calls(&self) -> Vec<ApiCall> {
        self.script().calls.clone()
    }

    /// Returns the endpoint names in call order.
    #[must_use]
    pub fn endpoints(&self) -> Vec<&'static str> {
        self.script().calls.iter().map(|call| call.endpoint).collect()
    }

    /// Counts calls made to one endpoint.
    #[must_use]
    pub fn call_count(&self, endpoint: &str) -> usize {
        self.script()
            .calls
            .iter()
            .filter(|call| call.endpoint == endpoint)
            .count()
    }

    fn respond<T: DeserializeOwned>(
        &self,
        endpoint: &'static str,
        args: &[&str],
        body: Option<Value>,
    ) -> Result<T, ApiError> {
        let mut script = self.script();
        script.calls.push(ApiCall {
            endpoint,
            args: args.iter().map(|arg| (*arg).to_owned()).collect(),
            body,
        });

        let queue = script.responses.entry(endpoint).or_default();
        let next = if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        };
        let value = next.ok_or_else(|| ApiError::Transport {
            message: format!("no scripted response for {endpoint}"),
        })??;
        serde_json::from_value(value).map_err(|err| ApiError::Decode {
            message: err.to_string(),
        })
    }

    fn reply<'a, T>(
        &self,
        endpoint: &'static str,
        args: &[&str],
        body: Option<Value>,
    ) -> ApiFuture<'a, T>
    where
        T: DeserializeOwned + Send + 'a,
    {
        Box::pin(ready(self.respond(endpoint, args, body)))
    }
}

fn body_of<T: Serialize>(body: &T) -> Option<Value> {
    serde_json::to_value(body).ok()
}

fn scope_args(scope: &AccessListScope) -> Vec<&str> {
    scope.key_fields().into_iter().map(|(_, value)| value).collect()
}

impl OutageSimulationApi for ScriptedAtlas {
    fn start_outage_simulation<'a>(
        &'a self,
        project_id: &'a str,
        cluster_name: &'a str,
        request: &'a OutageSimulationRequest,
    ) -> ApiFuture<'a, OutageSimulation> {
        self.reply(
            "start_outage_simulation",
            &[project_id, cluster_name],
            body_of(request),
        )
    }

    fn get_outage_simulation<'a>(
        &'a self,
        project_id: &'a str,
        cluster_name: &'a str,
    ) -> ApiFuture<'a, OutageSimulation> {
        self.reply("get_outage_simulation", &[project_id, cluster_name], None)
    }

    fn end_outage_simulation<'a>(
        &'a self,
        project_id: &'a str,
        cluster_name: &'a str,
    ) -> ApiFuture<'a, OutageSimulation> {
        self.reply("end_outage_simulation", &[project_id, cluster_name], None)
    }
}

impl NetworkContainerApi for ScriptedAtlas {
    fn create_container<'a>(
        &'a self,
        project_id: &'a str,
        request: &'a ContainerRequest,
    ) -> ApiFuture<'a, NetworkContainer> {
        self.reply("create_container", &[project_id], body_of(request))
    }

    fn get_container<'a>(
        &'a self,
        project_id: &'a str,
        container_id: &'a str,
    ) -> ApiFuture<'a, NetworkContainer> {
        self.reply("get_container", &[project_id, container_id], None)
    }

    fn update_container<'a>(
        &'a self,
        project_id: &'a str,
        container_id: &'a str,
        request: &'a ContainerRequest,
    ) -> ApiFuture<'a, NetworkContainer> {
        self.reply(
            "update_container",
            &[project_id, container_id],
            body_of(request),
        )
    }

    fn delete_container<'a>(
        &'a self,
        project_id: &'a str,
        container_id: &'a str,
    ) -> ApiFuture<'a, ()> {
        self.reply("delete_container", &[project_id, container_id], None)
    }
}

impl NetworkPeeringApi for ScriptedAtlas {
    fn create_peering<'a>(
        &'a self,
        project_id: &'a str,
        request: &'a PeeringRequest,
    ) -> ApiFuture<'a, NetworkPeering> {
        self.reply("create_peering", &[project_id], body_of(request))
    }

    fn get_peering<'a>(
        &'a self,
        project_id: &'a str,
        peer_id: &'a str,
    ) -> ApiFuture<'a, NetworkPeering> {
        self.reply("get_peering", &[project_id, peer_id], None)
    }

    fn update_peering<'a>(
        &'a self,
        project_id: &'a str,
        peer_id: &'a str,
        request: &'a PeeringRequest,
    ) -> ApiFuture<'a, NetworkPeering> {
        self.reply("update_peering", &[project_id, peer_id], body_of(request))
    }

    fn delete_peering<'a>(&'a self, project_id: &'a str, peer_id: &'a str) -> ApiFuture<'a, ()> {
        self.reply("delete_peering", &[project_id, peer_id], None)
    }
}

impl GlobalClusterApi for ScriptedAtlas {
    fn get_global_cluster_config<'a>(
        &'a self,
        project_id: &'a str,
        cluster_name: &'a str,
    ) -> ApiFuture<'a, GlobalClusterConfig> {
        self.reply("get_global_cluster_config", &[project_id, cluster_name], None)
    }

    fn create_managed_namespace<'a>(
        &'a self,
        project_id: &'a str,
        cluster_name: &'a str,
        namespace: &'a ManagedNamespace,
    ) -> ApiFuture<'a, ()> {
        self.reply(
            "create_managed_namespace",
            &[project_id, cluster_name],
            body_of(namespace),
        )
    }

    fn delete_managed_namespace<'a>(
        &'a self,
        project_id: &'a str,
        cluster_name: &'a str,
        db: &'a str,
        collection: &'a str,
    ) -> ApiFuture<'a, ()> {
        self.reply(
            "delete_managed_namespace",
            &[project_id, cluster_name, db, collection],
            None,
        )
    }

    fn create_custom_zone_mappings<'a>(
        &'a self,
        project_id: &'a str,
        cluster_name: &'a str,
        request: &'a CustomZoneMappingsRequest,
    ) -> ApiFuture<'a, ()> {
        self.reply(
            "create_custom_zone_mappings",
            &[project_id, cluster_name],
            body_of(request),
        )
    }

    fn delete_all_custom_zone_mappings<'a>(
        &'a self,
        project_id: &'a str,
        cluster_name: &'a str,
    ) -> ApiFuture<'a, ()> {
        self.reply(
            "delete_all_custom_zone_mappings",
            &[project_id, cluster_name],
            None,
        )
    }
}

impl AccessListApi for ScriptedAtlas {
    fn create_access_list_entries<'a>(
        &'a self,
        scope: &'a AccessListScope,
        entries: &'a [AccessListEntry],
    ) -> ApiFuture<'a, Page<AccessListEntry>> {
        self.reply(
            "create_access_list_entries",
            &scope_args(scope),
            body_of(&entries),
        )
    }

    fn list_access_list_entries<'a>(
        &'a self,
        scope: &'a AccessListScope,
        page: PageRequest,
    ) -> ApiFuture<'a, Page<AccessListEntry>> {
        let page_num = page.page_num.to_string();
        let mut args = scope_args(scope);
        args.push(&page_num);
        self.reply("list_access_list_entries", &args, None)
    }

    fn delete_access_list_entry<'a>(
        &'a self,
        scope: &'a AccessListScope,
        entry: &'a str,
    ) -> ApiFuture<'a, ()> {
        let mut args = scope_args(scope);
        args.push(entry);
        self.reply("delete_access_list_entry", &args, None)
    }
}

/// Builds a page of access-list entries holding the given CIDR blocks.
#[must_use]
pub fn cidr_page(cidr_blocks: &[&str], total_count: u64) -> Page<AccessListEntry> {
    Page::new(
        cidr_blocks
            .iter()
            .map(|cidr| AccessListEntry {
                cidr_block: Some((*cidr).to_owned()),
                ..AccessListEntry::default()
            })
            .collect(),
        total_count,
    )
}

/// Global mutex used to serialise environment mutation in tests.
pub static ENV_LOCK: AsyncMutex<()> = AsyncMutex::const_new(());

/// Guard that holds the env mutex and restores variables on drop.
pub struct EnvGuard {
    previous: Vec<(String, Option<OsString>)>,
    _guard: MutexGuard<'static, ()>,
}

impl EnvGuard {
    /// Sets and removes environment variables while holding a global mutex.
    /// A `None` value removes the variable.
    pub async fn apply(pairs: &[(&str, Option<&str>)]) -> Self {
        debug_assert!(
            {
                let mut seen = BTreeSet::new();
                pairs.iter().all(|(key, _)| seen.insert(*key))
            },
            "duplicate environment variable keys passed to EnvGuard::apply"
        );

        let guard = ENV_LOCK.lock().await;
        let mut previous = Vec::with_capacity(pairs.len());
        for (key, value) in pairs {
            previous.push(((*key).to_owned(), env::var_os(key)));
            // SAFETY: Environment mutation is serialised by `ENV_LOCK`, preventing races.
            unsafe {
                match value {
                    Some(val) => env::set_var(key, val),
                    None => env::remove_var(key),
                }
            }
        }

        Self {
            previous,
            _guard: guard,
        }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, old) in &self.previous {
            // SAFETY: Environment mutation is serialised by holding `_guard`.
            unsafe {
                match old {
                    Some(val) => env::set_var(key, val),
                    None => env::remove_var(key),
                }
            }
        }
    }
}
