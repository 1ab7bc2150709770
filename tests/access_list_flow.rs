//! Access-list lifecycles for project and service account scopes.

use driftless::api::{AccessListEntry, AccessListScope};
use driftless::resources::access_list::{AccessListReconciler, DesiredAccessListEntry};
use driftless::test_support::{ScriptedAtlas, cidr_page};
use driftless::{ApiError, ErrorKind, Page, RetryPolicy};
use rstest::rstest;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn service_account() -> AccessListScope {
    AccessListScope::ServiceAccount {
        org_id: String::from("o1"),
        client_id: String::from("mdb_sa_id_1"),
    }
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn service_account_entry_lifecycle() {
    let api = ScriptedAtlas::new();
    api.push("create_access_list_entries", &cidr_page(&["10.0.0.0/24"], 1));
    let reconciler = AccessListReconciler::new(api.clone());
    let cancel = CancellationToken::new();

    let created = reconciler
        .create(
            &DesiredAccessListEntry::cidr_block(service_account(), "10.0.0.0/24"),
            &cancel,
        )
        .await
        .expect("create should succeed");

    api.push("list_access_list_entries", &cidr_page(&["10.0.0.0/24"], 1));
    let read = reconciler
        .read(&created.id, &cancel)
        .await
        .expect("read should succeed")
        .expect("entry should exist");
    assert_eq!(read.entry, "10.0.0.0/24");

    api.push_ok("delete_access_list_entry");
    api.push("list_access_list_entries", &cidr_page(&[], 0));
    reconciler
        .delete(&created.id, &cancel)
        .await
        .expect("delete should succeed");

    let delete = api
        .calls()
        .into_iter()
        .find(|call| call.endpoint == "delete_access_list_entry")
        .expect("delete call recorded");
    assert_eq!(delete.args, vec!["o1", "mdb_sa_id_1", "10.0.0.0/24"]);
}

#[rstest]
#[tokio::test]
async fn service_account_import_splits_three_fields() {
    let api = ScriptedAtlas::new();
    api.push(
        "list_access_list_entries",
        &Page::new(
            vec![AccessListEntry {
                ip_address: Some(String::from("192.0.2.7")),
                ..AccessListEntry::default()
            }],
            1,
        ),
    );
    let reconciler = AccessListReconciler::new(api);

    let state = reconciler
        .import_service_account_entry("o1-mdb_sa_id_1-192.0.2.7", &CancellationToken::new())
        .await
        .expect("import should succeed");

    assert_eq!(state.scope, service_account());
    assert_eq!(state.entry, "192.0.2.7");
}

#[rstest]
#[tokio::test]
async fn import_of_missing_entry_is_not_found() {
    let api = ScriptedAtlas::new();
    api.push("list_access_list_entries", &cidr_page(&["10.9.0.0/16"], 1));
    let reconciler = AccessListReconciler::new(api);

    let err = reconciler
        .import_project_entry("p1-10.0.0.0/24", &CancellationToken::new())
        .await
        .expect_err("missing entry must fail");

    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn create_gives_up_after_bounded_retries() {
    let api = ScriptedAtlas::new();
    api.push_error(
        "create_access_list_entries",
        ApiError::http(503, None, "unavailable"),
    );
    let policy = RetryPolicy {
        max_attempts: 3,
        ..RetryPolicy::default()
    }
    .with_max_elapsed(Duration::from_secs(60));
    let reconciler = AccessListReconciler::new(api.clone()).with_retry_policy(policy);

    let err = reconciler
        .create(
            &DesiredAccessListEntry::ip_address(
                AccessListScope::Project {
                    project_id: String::from("p1"),
                },
                "192.0.2.7",
            ),
            &CancellationToken::new(),
        )
        .await
        .expect_err("persistent outage must fail");

    assert_eq!(err.kind(), ErrorKind::Transient);
    assert_eq!(api.call_count("create_access_list_entries"), 3);
}
