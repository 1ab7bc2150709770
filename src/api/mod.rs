//! Remote API contract consumed by the reconciliation engine.
//!
//! The remote service is treated as a black-box CRUD and list service. Each
//! entity family gets its own client trait so reconcilers only depend on the
//! calls they make; [`crate::client::AtlasClient`] implements all of them and
//! [`crate::test_support::ScriptedAtlas`] provides a scripted double.

use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};
use thiserror::Error;

mod models;

pub use models::{
    AccessListEntry, AccessListScope, ContainerRequest, CustomZoneMappingsRequest,
    GlobalClusterConfig, ManagedNamespace, NetworkContainer, NetworkPeering, OutageFilter,
    OutageSimulation, OutageSimulationRequest, PeeringRequest, PeeringTarget, ZoneMapping,
};

/// Error codes that the API reports for conditions worth retrying.
pub const TRANSIENT_ERROR_CODES: &[&str] = &["UNEXPECTED_ERROR", "CONTAINERS_IN_USE"];

/// Future returned by remote API calls.
pub type ApiFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, ApiError>> + Send + 'a>>;

/// Coarse classification of an [`ApiError`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorClass {
    /// The entity does not exist (HTTP 404).
    NotFound,
    /// Conflict or transient failure that may succeed when retried.
    Transient,
    /// Any other failure; retrying will not help.
    Terminal,
}

/// Errors surfaced by remote API calls.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ApiError {
    /// The API answered with a non-success HTTP status.
    #[error("HTTP {status} {}: {message}", .error_code.as_deref().unwrap_or("UNKNOWN_ERROR"))]
    Status {
        /// HTTP status code.
        status: u16,
        /// Machine readable error code, for example `CONTAINERS_IN_USE`.
        error_code: Option<String>,
        /// Human readable detail returned by the API.
        message: String,
    },
    /// The request never produced an HTTP response.
    #[error("request failed: {message}")]
    Transport {
        /// Transport level error message.
        message: String,
    },
    /// The response body could not be decoded.
    #[error("unexpected response body: {message}")]
    Decode {
        /// Decoder message.
        message: String,
    },
}

impl ApiError {
    /// Builds an HTTP status error.
    #[must_use]
    pub fn http(status: u16, error_code: Option<&str>, message: impl Into<String>) -> Self {
        Self::Status {
            status,
            error_code: error_code.map(str::to_owned),
            message: message.into(),
        }
    }

    /// Returns the HTTP status when the API answered.
    #[must_use]
    pub const fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            Self::Transport { .. } | Self::Decode { .. } => None,
        }
    }

    /// Returns `true` when the API reported the given error code.
    #[must_use]
    pub fn has_error_code(&self, code: &str) -> bool {
        matches!(self, Self::Status { error_code: Some(actual), .. } if actual == code)
    }

    /// Returns `true` for HTTP 404.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::Status { status: 404, .. })
    }

    /// Returns `true` when retrying the call may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.class() == ErrorClass::Transient
    }

    /// Classifies the error following the API's HTTP status semantics.
    #[must_use]
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Status { status: 404, .. } => ErrorClass::NotFound,
            Self::Status {
                status: 409 | 429 | 500 | 502 | 503 | 504,
                ..
            }
            | Self::Transport { .. } => ErrorClass::Transient,
            Self::Status {
                error_code: Some(code),
                ..
            } if TRANSIENT_ERROR_CODES.contains(&code.as_str()) => ErrorClass::Transient,
            Self::Status { .. } | Self::Decode { .. } => ErrorClass::Terminal,
        }
    }
}

/// One page of a paginated collection.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    /// Items on this page.
    #[serde(rename = "results", default = "Vec::new")]
    pub items: Vec<T>,
    /// Total number of items across all pages.
    #[serde(default)]
    pub total_count: u64,
}

impl<T> Page<T> {
    /// Builds a page from its items and the collection total.
    #[must_use]
    pub const fn new(items: Vec<T>, total_count: u64) -> Self {
        Self { items, total_count }
    }
}

/// Pagination parameters sent as `pageNum` and `itemsPerPage`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct PageRequest {
    /// One-based page number.
    pub page_num: u32,
    /// Page size.
    pub items_per_page: u32,
}

/// Cluster outage simulation endpoints.
pub trait OutageSimulationApi: Send + Sync {
    /// Starts an outage simulation for a cluster.
    fn start_outage_simulation<'a>(
        &'a self,
        project_id: &'a str,
        cluster_name: &'a str,
        request: &'a OutageSimulationRequest,
    ) -> ApiFuture<'a, OutageSimulation>;

    /// Fetches the current outage simulation for a cluster.
    fn get_outage_simulation<'a>(
        &'a self,
        project_id: &'a str,
        cluster_name: &'a str,
    ) -> ApiFuture<'a, OutageSimulation>;

    /// Requests the end of the outage simulation.
    fn end_outage_simulation<'a>(
        &'a self,
        project_id: &'a str,
        cluster_name: &'a str,
    ) -> ApiFuture<'a, OutageSimulation>;
}

/// Network container endpoints.
pub trait NetworkContainerApi: Send + Sync {
    /// Creates a network container.
    fn create_container<'a>(
        &'a self,
        project_id: &'a str,
        request: &'a ContainerRequest,
    ) -> ApiFuture<'a, NetworkContainer>;

    /// Fetches a network container.
    fn get_container<'a>(
        &'a self,
        project_id: &'a str,
        container_id: &'a str,
    ) -> ApiFuture<'a, NetworkContainer>;

    /// Updates a network container in place.
    fn update_container<'a>(
        &'a self,
        project_id: &'a str,
        container_id: &'a str,
        request: &'a ContainerRequest,
    ) -> ApiFuture<'a, NetworkContainer>;

    /// Deletes a network container.
    fn delete_container<'a>(&'a self, project_id: &'a str, container_id: &'a str)
    -> ApiFuture<'a, ()>;
}

/// Network peering endpoints.
pub trait NetworkPeeringApi: Send + Sync {
    /// Creates a peering connection.
    fn create_peering<'a>(
        &'a self,
        project_id: &'a str,
        request: &'a PeeringRequest,
    ) -> ApiFuture<'a, NetworkPeering>;

    /// Fetches a peering connection.
    fn get_peering<'a>(&'a self, project_id: &'a str, peer_id: &'a str)
    -> ApiFuture<'a, NetworkPeering>;

    /// Updates a peering connection in place.
    fn update_peering<'a>(
        &'a self,
        project_id: &'a str,
        peer_id: &'a str,
        request: &'a PeeringRequest,
    ) -> ApiFuture<'a, NetworkPeering>;

    /// Deletes a peering connection.
    fn delete_peering<'a>(&'a self, project_id: &'a str, peer_id: &'a str) -> ApiFuture<'a, ()>;
}

/// Global cluster (global writes) endpoints.
pub trait GlobalClusterApi: Send + Sync {
    /// Fetches managed namespaces and custom zone mappings.
    fn get_global_cluster_config<'a>(
        &'a self,
        project_id: &'a str,
        cluster_name: &'a str,
    ) -> ApiFuture<'a, GlobalClusterConfig>;

    /// Adds one managed namespace.
    fn create_managed_namespace<'a>(
        &'a self,
        project_id: &'a str,
        cluster_name: &'a str,
        namespace: &'a ManagedNamespace,
    ) -> ApiFuture<'a, ()>;

    /// Removes one managed namespace.
    fn delete_managed_namespace<'a>(
        &'a self,
        project_id: &'a str,
        cluster_name: &'a str,
        db: &'a str,
        collection: &'a str,
    ) -> ApiFuture<'a, ()>;

    /// Adds custom zone mappings.
    fn create_custom_zone_mappings<'a>(
        &'a self,
        project_id: &'a str,
        cluster_name: &'a str,
        request: &'a CustomZoneMappingsRequest,
    ) -> ApiFuture<'a, ()>;

    /// Removes every custom zone mapping of the cluster.
    fn delete_all_custom_zone_mappings<'a>(
        &'a self,
        project_id: &'a str,
        cluster_name: &'a str,
    ) -> ApiFuture<'a, ()>;
}

/// Access-list endpoints for projects and service accounts.
pub trait AccessListApi: Send + Sync {
    /// Adds entries and returns the first page of the resulting list.
    fn create_access_list_entries<'a>(
        &'a self,
        scope: &'a AccessListScope,
        entries: &'a [AccessListEntry],
    ) -> ApiFuture<'a, Page<AccessListEntry>>;

    /// Lists one page of entries.
    fn list_access_list_entries<'a>(
        &'a self,
        scope: &'a AccessListScope,
        page: PageRequest,
    ) -> ApiFuture<'a, Page<AccessListEntry>>;

    /// Deletes the entry identified by its discriminator.
    fn delete_access_list_entry<'a>(
        &'a self,
        scope: &'a AccessListScope,
        entry: &'a str,
    ) -> ApiFuture<'a, ()>;
}
