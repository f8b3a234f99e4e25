//! Binary-level smoke tests for `cfn-plus process`, in the teacher's
//! `assert_cmd`-driven CLI test style.

use assert_cmd::Command;
use predicates::prelude::*;
use std::path::PathBuf;

fn write_template(dir: &tempfile::TempDir, name: &str, body: &str) -> PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, body).unwrap();
    path
}

#[test]
fn process_prints_rewritten_document_and_no_op_plan() {
    let dir = tempfile::tempdir().unwrap();
    let template = write_template(
        &dir,
        "template.yaml",
        "Resources:\n  Topic:\n    Type: AWS::SNS::Topic\n",
    );

    Command::cargo_bin("cfn-plus")
        .unwrap()
        .arg("process")
        .arg(&template)
        .assert()
        .success()
        .stdout(predicate::str::contains("Topic"));
}

#[test]
fn process_rejects_stack_policy_without_stack_name() {
    let dir = tempfile::tempdir().unwrap();
    let template = write_template(
        &dir,
        "template.yaml",
        "Metadata:\n  Aruba::StackPolicy:\n    Statement: []\n",
    );

    Command::cargo_bin("cfn-plus")
        .unwrap()
        .arg("process")
        .arg(&template)
        .assert()
        .failure()
        .stderr(predicate::str::contains("stack name is unknown"));
}

#[test]
fn process_rejects_malformed_param_flag() {
    let dir = tempfile::tempdir().unwrap();
    let template = write_template(&dir, "template.yaml", "Resources: {}\n");

    Command::cargo_bin("cfn-plus")
        .unwrap()
        .arg("process")
        .arg(&template)
        .arg("--param")
        .arg("not-a-kv-pair")
        .assert()
        .failure();
}
