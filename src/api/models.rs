//! Typed request and response bodies for the remote API.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Region filter describing which part of a cluster an outage affects.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutageFilter {
    /// Cloud provider, for example `AWS`.
    pub cloud_provider: String,
    /// Provider region name, for example `US_EAST_1`.
    pub region_name: String,
    /// Filter type; the API currently only accepts `REGION`.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub filter_type: Option<String>,
}

impl OutageFilter {
    /// Builds a region filter.
    #[must_use]
    pub fn region(cloud_provider: impl Into<String>, region_name: impl Into<String>) -> Self {
        Self {
            cloud_provider: cloud_provider.into(),
            region_name: region_name.into(),
            filter_type: Some(String::from("REGION")),
        }
    }
}

/// Request body that starts an outage simulation.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutageSimulationRequest {
    /// Regions to take offline.
    pub outage_filters: Vec<OutageFilter>,
}

/// Outage simulation as reported by the API.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OutageSimulation {
    /// Simulation identifier.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Cluster under simulation.
    pub cluster_name: String,
    /// Project that owns the cluster.
    pub group_id: String,
    /// Lifecycle state, for example `SIMULATING`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    /// Timestamp of the start request.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_request_date: Option<String>,
    /// Regions taken offline.
    pub outage_filters: Vec<OutageFilter>,
}

/// Request body for creating or updating a network container.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerRequest {
    /// `AWS`, `AZURE`, or `GCP`.
    pub provider_name: String,
    /// CIDR block Atlas uses for the cluster nodes.
    pub atlas_cidr_block: String,
    /// AWS region.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region_name: Option<String>,
    /// Azure region.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    /// GCP regions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub regions: Option<Vec<String>>,
}

/// Network container as reported by the API.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NetworkContainer {
    /// Container identifier.
    pub id: String,
    /// `AWS`, `AZURE`, or `GCP`.
    pub provider_name: String,
    /// CIDR block Atlas uses for the cluster nodes.
    pub atlas_cidr_block: String,
    /// AWS region.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region_name: Option<String>,
    /// Azure region.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    /// GCP regions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub regions: Option<Vec<String>>,
    /// Whether clusters are deployed into the container.
    pub provisioned: bool,
    /// AWS VPC identifier.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vpc_id: Option<String>,
    /// Azure subscription identifier.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub azure_subscription_id: Option<String>,
    /// Azure virtual network name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vnet_name: Option<String>,
    /// GCP project identifier.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gcp_project_id: Option<String>,
    /// GCP network name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub network_name: Option<String>,
}

/// Provider specific peering target.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(tag = "providerName")]
pub enum PeeringTarget {
    /// AWS VPC peering.
    #[serde(rename = "AWS", rename_all = "camelCase")]
    Aws {
        /// Region of the peer VPC.
        accepter_region_name: String,
        /// Account owning the peer VPC.
        aws_account_id: String,
        /// CIDR block of the peer VPC.
        route_table_cidr_block: String,
        /// Peer VPC identifier.
        vpc_id: String,
    },
    /// Azure VNet peering.
    #[serde(rename = "AZURE", rename_all = "camelCase")]
    Azure {
        /// Azure AD directory identifier.
        azure_directory_id: String,
        /// Azure subscription identifier.
        azure_subscription_id: String,
        /// Resource group of the peer VNet.
        resource_group_name: String,
        /// Peer VNet name.
        vnet_name: String,
    },
    /// GCP VPC network peering.
    #[serde(rename = "GCP", rename_all = "camelCase")]
    Gcp {
        /// GCP project identifier.
        gcp_project_id: String,
        /// Peer network name.
        network_name: String,
    },
}

impl PeeringTarget {
    /// Returns the provider name the API expects.
    #[must_use]
    pub const fn provider_name(&self) -> &'static str {
        match self {
            Self::Aws { .. } => "AWS",
            Self::Azure { .. } => "AZURE",
            Self::Gcp { .. } => "GCP",
        }
    }
}

/// Request body for creating or updating a peering connection.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PeeringRequest {
    /// Network container the peering attaches to.
    pub container_id: String,
    /// Provider specific target.
    #[serde(flatten)]
    pub target: PeeringTarget,
}

/// Peering connection as reported by the API.
///
/// AWS connections report `statusName` and `errorStateName`; Azure and GCP
/// report `status` and `errorState`.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NetworkPeering {
    /// Peering identifier.
    pub id: String,
    /// Network container the peering attaches to.
    pub container_id: String,
    /// `AWS`, `AZURE`, or `GCP`.
    pub provider_name: String,
    /// Azure and GCP lifecycle status.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    /// AWS lifecycle status.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_name: Option<String>,
    /// Azure and GCP error detail.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_state: Option<String>,
    /// AWS error detail.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_state_name: Option<String>,
    /// GCP error message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Region of the AWS peer VPC.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accepter_region_name: Option<String>,
    /// AWS account owning the peer VPC.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aws_account_id: Option<String>,
    /// CIDR block of the AWS peer VPC.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub route_table_cidr_block: Option<String>,
    /// AWS peer VPC identifier.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vpc_id: Option<String>,
    /// AWS peering connection identifier.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connection_id: Option<String>,
    /// Azure AD directory identifier.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub azure_directory_id: Option<String>,
    /// Azure subscription identifier.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub azure_subscription_id: Option<String>,
    /// Resource group of the Azure peer VNet.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_group_name: Option<String>,
    /// Azure peer VNet name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vnet_name: Option<String>,
    /// GCP project identifier.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gcp_project_id: Option<String>,
    /// GCP peer network name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub network_name: Option<String>,
}

impl NetworkPeering {
    /// Returns the lifecycle status regardless of provider.
    #[must_use]
    pub fn lifecycle_status(&self) -> &str {
        self.status_name
            .as_deref()
            .filter(|status| !status.is_empty())
            .or(self.status.as_deref())
            .unwrap_or_default()
    }

    /// Returns the error detail regardless of provider.
    #[must_use]
    pub fn error_detail(&self) -> &str {
        [
            self.error_state_name.as_deref(),
            self.error_state.as_deref(),
            self.error_message.as_deref(),
        ]
        .into_iter()
        .flatten()
        .find(|detail| !detail.is_empty())
        .unwrap_or_default()
    }
}

/// Namespace sharded across zones of a global cluster.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ManagedNamespace {
    /// Database name.
    pub db: String,
    /// Collection name.
    pub collection: String,
    /// Custom shard key field.
    pub custom_shard_key: String,
    /// Whether the custom shard key is hashed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_custom_shard_key_hashed: Option<bool>,
    /// Whether the shard key is unique.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_shard_key_unique: Option<bool>,
}

impl ManagedNamespace {
    /// Key that identifies the namespace within a cluster.
    #[must_use]
    pub fn set_key(&self) -> String {
        format!("{}:{}", self.collection, self.db)
    }
}

/// Mapping from a location code to a zone.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ZoneMapping {
    /// ISO location code, for example `US-NY`.
    pub location: String,
    /// Zone name the location maps to.
    pub zone: String,
}

/// Request body for adding custom zone mappings.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomZoneMappingsRequest {
    /// Mappings to add.
    pub custom_zone_mappings: Vec<ZoneMapping>,
}

/// Global writes configuration as reported by the API.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GlobalClusterConfig {
    /// Managed namespaces.
    pub managed_namespaces: Vec<ManagedNamespace>,
    /// Location code to zone identifier.
    pub custom_zone_mapping: BTreeMap<String, String>,
}

/// Owner of an access list.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum AccessListScope {
    /// Project IP access list.
    Project {
        /// Project identifier.
        project_id: String,
    },
    /// Service account access list inside an organization.
    ServiceAccount {
        /// Organization identifier.
        org_id: String,
        /// Service account client identifier.
        client_id: String,
    },
}

impl AccessListScope {
    /// Field names and values that identify the scope.
    #[must_use]
    pub fn key_fields(&self) -> Vec<(&'static str, &str)> {
        match self {
            Self::Project { project_id } => vec![("project_id", project_id.as_str())],
            Self::ServiceAccount { org_id, client_id } => vec![
                ("org_id", org_id.as_str()),
                ("client_id", client_id.as_str()),
            ],
        }
    }
}

/// Access-list entry, used both as request and response body.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AccessListEntry {
    /// CIDR block.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cidr_block: Option<String>,
    /// Single IP address.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
    /// AWS security group identifier.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aws_security_group: Option<String>,
    /// Free-form comment.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    /// Creation timestamp.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
}

impl AccessListEntry {
    /// Returns `true` when any discriminator equals `entry`.
    #[must_use]
    pub fn matches(&self, entry: &str) -> bool {
        [
            self.cidr_block.as_deref(),
            self.ip_address.as_deref(),
            self.aws_security_group.as_deref(),
        ]
        .into_iter()
        .flatten()
        .any(|value| value == entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn peering_request_flattens_provider_tag() {
        let request = PeeringRequest {
            container_id: String::from("c1"),
            target: PeeringTarget::Gcp {
                gcp_project_id: String::from("gp"),
                network_name: String::from("net"),
            },
        };
        let json = serde_json::to_value(&request)
            .unwrap_or_else(|err| panic!("serialize request: {err}"));
        assert_eq!(
            json,
            serde_json::json!({
                "containerId": "c1",
                "providerName": "GCP",
                "gcpProjectId": "gp",
                "networkName": "net",
            })
        );
    }

    #[rstest]
    #[case(serde_json::json!({"statusName": "AVAILABLE", "status": "ignored"}), "AVAILABLE")]
    #[case(serde_json::json!({"status": "PENDING_ACCEPTANCE"}), "PENDING_ACCEPTANCE")]
    #[case(serde_json::json!({"statusName": "", "status": "FAILED"}), "FAILED")]
    #[case(serde_json::json!({}), "")]
    fn peering_status_prefers_aws_field(
        #[case] body: serde_json::Value,
        #[case] expected: &str,
    ) {
        let peering: NetworkPeering =
            serde_json::from_value(body).unwrap_or_else(|err| panic!("decode peering: {err}"));
        assert_eq!(peering.lifecycle_status(), expected);
    }

    #[test]
    fn access_list_entry_matches_any_discriminator() {
        let entry = AccessListEntry {
            cidr_block: Some(String::from("10.0.0.0/16")),
            aws_security_group: Some(String::from("sg-1")),
            ..AccessListEntry::default()
        };
        assert!(entry.matches("10.0.0.0/16"));
        assert!(entry.matches("sg-1"));
        assert!(!entry.matches("10.0.0.1"));
    }

    #[test]
    fn namespace_key_is_collection_then_db() {
        let namespace = ManagedNamespace {
            db: String::from("sales"),
            collection: String::from("orders"),
            ..ManagedNamespace::default()
        };
        assert_eq!(namespace.set_key(), "orders:sales");
    }
}
