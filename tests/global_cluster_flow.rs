//! Global cluster configuration lifecycle against the scripted API.

use driftless::api::{ManagedNamespace, ZoneMapping};
use driftless::resources::global_cluster::{DesiredGlobalClusterConfig, GlobalClusterReconciler};
use driftless::test_support::ScriptedAtlas;
use driftless::ErrorKind;
use rstest::{fixture, rstest};
use serde_json::json;
use tokio_util::sync::CancellationToken;

fn namespace(db: &str, collection: &str) -> ManagedNamespace {
    ManagedNamespace {
        db: db.to_owned(),
        collection: collection.to_owned(),
        custom_shard_key: String::from("region"),
        is_custom_shard_key_hashed: None,
        is_shard_key_unique: None,
    }
}

#[fixture]
fn desired() -> DesiredGlobalClusterConfig {
    DesiredGlobalClusterConfig {
        project_id: String::from("p1"),
        cluster_name: String::from("global"),
        managed_namespaces: vec![namespace("shop", "orders")],
        custom_zone_mappings: Vec::new(),
    }
}

fn remote_config() -> serde_json::Value {
    json!({
        "managedNamespaces": [
            {"db": "shop", "collection": "orders", "customShardKey": "region"},
            {"db": "shop", "collection": "carts", "customShardKey": "region"}
        ],
        "customZoneMapping": {"DE": "5b48f6f0", "US": "5b48f6f1"}
    })
}

#[rstest]
#[tokio::test]
async fn config_lifecycle(desired: DesiredGlobalClusterConfig) {
    let api = ScriptedAtlas::new();
    api.push_ok("create_managed_namespace");
    api.push_ok("delete_managed_namespace");
    api.push_ok("create_custom_zone_mappings");
    api.push_ok("delete_all_custom_zone_mappings");
    api.push_json("get_global_cluster_config", remote_config());
    let reconciler = GlobalClusterReconciler::new(api.clone());
    let cancel = CancellationToken::new();

    let created = reconciler
        .create(&desired, &cancel)
        .await
        .expect("create should succeed");

    let target = DesiredGlobalClusterConfig {
        managed_namespaces: vec![namespace("shop", "orders"), namespace("shop", "carts")],
        custom_zone_mappings: vec![
            ZoneMapping {
                location: String::from("US"),
                zone: String::from("Zone 1"),
            },
            ZoneMapping {
                location: String::from("DE"),
                zone: String::from("Zone 2"),
            },
        ],
        ..desired.clone()
    };
    let updated = reconciler
        .update(&created.id, &desired, &target, &cancel)
        .await
        .expect("update should succeed");
    assert_eq!(updated.managed_namespaces.len(), 2);
    assert_eq!(updated.custom_zone_mapping.len(), 2);

    reconciler
        .delete(&updated.id, &target, &cancel)
        .await
        .expect("delete should succeed");

    assert_eq!(
        api.endpoints(),
        vec![
            "create_managed_namespace",
            "get_global_cluster_config",
            "create_managed_namespace",
            "create_custom_zone_mappings",
            "get_global_cluster_config",
            "delete_managed_namespace",
            "delete_managed_namespace",
            "delete_all_custom_zone_mappings"
        ]
    );
    let zone_body = api
        .calls()
        .into_iter()
        .find(|call| call.endpoint == "create_custom_zone_mappings")
        .and_then(|call| call.body)
        .expect("zone mapping body recorded");
    assert_eq!(zone_body["customZoneMappings"].as_array().map(Vec::len), Some(2));
}

#[rstest]
#[tokio::test]
async fn duplicate_namespaces_are_rejected_before_any_call(desired: DesiredGlobalClusterConfig) {
    let api = ScriptedAtlas::new();
    let reconciler = GlobalClusterReconciler::new(api.clone());
    let duplicated = DesiredGlobalClusterConfig {
        managed_namespaces: vec![namespace("shop", "orders"), namespace("shop", "orders")],
        ..desired
    };

    let err = reconciler
        .create(&duplicated, &CancellationToken::new())
        .await
        .expect_err("duplicates must fail");

    assert_eq!(err.kind(), ErrorKind::Configuration);
    assert!(api.calls().is_empty());
}

#[rstest]
#[tokio::test]
async fn import_reads_the_remote_configuration() {
    let api = ScriptedAtlas::new();
    api.push_json("get_global_cluster_config", remote_config());
    let reconciler = GlobalClusterReconciler::new(api.clone());

    let state = reconciler
        .import("p1-global-cluster", &CancellationToken::new())
        .await
        .expect("import should succeed");

    assert_eq!(state.cluster_name, "global-cluster");
    assert_eq!(api.calls()[0].args, vec!["p1", "global-cluster"]);
}
