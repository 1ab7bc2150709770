//! Behavioural smoke tests for the `driftless` binary.

use assert_cmd::cargo::cargo_bin_cmd;
use driftless::encode_state_id;
use predicates::str::contains;

#[test]
fn cli_without_arguments_prints_usage() {
    let mut cmd = cargo_bin_cmd!("driftless");
    cmd.assert().failure().stderr(contains("Usage"));
}

#[test]
fn state_id_encode_prints_canonical_id() {
    let expected = encode_state_id([("project_id", "p1"), ("cluster_name", "my-cluster")]);
    let mut cmd = cargo_bin_cmd!("driftless");
    cmd.args(["state-id", "encode", "project_id=p1", "cluster_name=my-cluster"]);

    cmd.assert().success().stdout(format!("{expected}\n"));
}

#[test]
fn state_id_import_keeps_dashes_in_last_field() {
    let expected = encode_state_id([("project_id", "p1"), ("entry", "sg-0123")]);
    let mut cmd = cargo_bin_cmd!("driftless");
    cmd.args(["state-id", "import", "p1-sg-0123", "--fields", "project_id,entry"]);

    cmd.assert().success().stdout(format!("{expected}\n"));
}

#[test]
fn state_id_decode_reports_malformed_ids() {
    let mut cmd = cargo_bin_cmd!("driftless");
    cmd.args(["state-id", "decode", "no-separator"]);

    cmd.assert()
        .failure()
        .code(1)
        .stderr(contains("malformed state id segment 'no'"));
}

#[test]
fn state_id_encode_rejects_bare_words() {
    let mut cmd = cargo_bin_cmd!("driftless");
    cmd.args(["state-id", "encode", "project_id"]);

    cmd.assert()
        .failure()
        .code(1)
        .stderr(contains("expected KEY=VALUE, got 'project_id'"));
}

#[test]
fn state_id_decode_lists_fields() {
    let id = encode_state_id([("project_id", "p1"), ("cluster_name", "c-1")]);
    let mut cmd = cargo_bin_cmd!("driftless");
    cmd.args(["state-id", "decode", &id]);

    cmd.assert()
        .success()
        .stdout("cluster_name=c-1\nproject_id=p1\n");
}
