//! Unit tests for keyed set diffs.

use std::cell::RefCell;
use std::future::ready;

use rstest::rstest;

use super::*;

#[derive(Clone, Debug, Eq, PartialEq)]
struct Member {
    key: &'static str,
    value: &'static str,
}

const fn member(key: &'static str, value: &'static str) -> Member {
    Member { key, value }
}

fn key(member: &Member) -> &'static str {
    member.key
}

#[rstest]
fn splits_members_into_add_and_remove_in_input_order() {
    let old = [member("a", "1"), member("b", "2"), member("c", "3")];
    let new = [member("d", "4"), member("b", "2"), member("e", "5")];

    let delta = diff_keyed(&old, &new, key).expect("diff should succeed");

    assert_eq!(delta.to_remove, vec![member("a", "1"), member("c", "3")]);
    assert_eq!(delta.to_add, vec![member("d", "4"), member("e", "5")]);
}

#[rstest]
fn identical_sets_produce_empty_delta() {
    let set = [member("a", "1"), member("b", "2")];
    let delta = diff_keyed(&set, &set, key).expect("diff should succeed");
    assert!(delta.is_empty());
}

#[rstest]
fn changed_member_with_same_key_is_rejected() {
    let old = [member("a", "1")];
    let new = [member("a", "changed")];

    let err = diff_keyed(&old, &new, key).expect_err("in-place change must fail");

    assert_eq!(
        err,
        SetDiffError::ImmutableMember {
            key: String::from("a")
        }
    );
}

#[rstest]
#[case(&[member("a", "1"), member("a", "2")], &[])]
#[case(&[], &[member("b", "1"), member("b", "1")])]
fn repeated_keys_are_rejected(#[case] old: &[Member], #[case] new: &[Member]) {
    let err = diff_keyed(old, new, key).expect_err("duplicate key must fail");
    assert!(matches!(err, SetDiffError::DuplicateKey { .. }), "{err}");
}

#[rstest]
fn partial_removal_of_group_is_rejected() {
    let old = [member("US-NY", "z1"), member("DE", "z2")];
    let new = [member("US-NY", "z1")];

    let err = diff_all_or_nothing("custom_zone_mappings", &old, &new, key)
        .expect_err("partial deletion must fail");

    assert_eq!(
        err.to_string(),
        "partial deletion of custom_zone_mappings is not allowed; \
         remove either all custom_zone_mappings or none"
    );
}

#[rstest]
fn emptying_group_removes_all() {
    let old = [member("US-NY", "z1"), member("DE", "z2")];
    let delta = diff_all_or_nothing("custom_zone_mappings", &old, &[], key)
        .expect("removing everything is allowed");
    assert_eq!(delta, AllOrNothingDelta::RemoveAll);
}

#[rstest]
fn growing_group_adds_new_members_only() {
    let old = [member("US-NY", "z1")];
    let new = [member("US-NY", "z1"), member("DE", "z2")];
    let delta = diff_all_or_nothing("custom_zone_mappings", &old, &new, key)
        .expect("additions are allowed");
    assert_eq!(delta, AllOrNothingDelta::Add(vec![member("DE", "z2")]));
}

#[rstest]
fn unchanged_group_needs_no_calls() {
    let set = [member("US-NY", "z1")];
    let delta =
        diff_all_or_nothing("custom_zone_mappings", &set, &set, key).expect("no change");
    assert_eq!(delta, AllOrNothingDelta::Unchanged);
}

#[rstest]
#[tokio::test]
async fn apply_removes_everything_before_adding() {
    let old = [member("a", "1"), member("b", "2")];
    let new = [member("c", "3"), member("d", "4")];
    let delta = diff_keyed(&old, &new, key).expect("diff should succeed");
    let log = RefCell::new(Vec::new());

    delta
        .apply(
            |removed: &Member| {
                log.borrow_mut().push(format!("remove {}", removed.key));
                ready(Ok::<(), String>(()))
            },
            |added: &Member| {
                log.borrow_mut().push(format!("add {}", added.key));
                ready(Ok(()))
            },
        )
        .await
        .expect("apply should succeed");

    assert_eq!(
        log.into_inner(),
        vec!["remove a", "remove b", "add c", "add d"]
    );
}

#[rstest]
#[tokio::test]
async fn apply_stops_at_first_failed_removal() {
    let old = [member("a", "1"), member("b", "2")];
    let new = [member("c", "3")];
    let delta = diff_keyed(&old, &new, key).expect("diff should succeed");
    let log = RefCell::new(Vec::new());

    let err = delta
        .apply(
            |removed: &Member| {
                log.borrow_mut().push(format!("remove {}", removed.key));
                ready(Err::<(), _>(String::from("remove failed")))
            },
            |added: &Member| {
                log.borrow_mut().push(format!("add {}", added.key));
                ready(Ok(()))
            },
        )
        .await
        .expect_err("removal failure must stop apply");

    assert_eq!(err, "remove failed");
    assert_eq!(log.into_inner(), vec!["remove a"]);
}
