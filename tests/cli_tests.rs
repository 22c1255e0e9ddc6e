//! CLI integration tests.

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;

const PLAN: &str = r#"{
    "resource_changes": [
        {
            "address": "aws_vpc.main",
            "mode": "managed",
            "type": "aws_vpc",
            "change": {"after": {"cidr_block": "10.0.0.0/16"}, "after_unknown": {}, "after_sensitive": {}}
        },
        {
            "address": "aws_subnet.a",
            "mode": "managed",
            "type": "aws_subnet",
            "change": {"after": {"cidr_block": "10.0.1.0/24", "availability_zone": "us-east-1a"}, "after_unknown": {}, "after_sensitive": {}}
        }
    ]
}"#;

const GRAPH: &str = r#"{"objects": [], "edges": []}"#;

fn write_inputs(dir: &std::path::Path) -> (std::path::PathBuf, std::path::PathBuf) {
    let plan = dir.join("tfplan.json");
    let graph = dir.join("tfgraph.json");
    fs::write(&plan, PLAN).unwrap();
    fs::write(&graph, GRAPH).unwrap();
    (plan, graph)
}

#[test]
fn graph_command_emits_json_document() {
    let dir = tempfile::tempdir().unwrap();
    let (plan, graph) = write_inputs(dir.path());

    Command::cargo_bin("terracarta")
        .unwrap()
        .args(["graph", "--plan"])
        .arg(&plan)
        .arg("--graph-file")
        .arg(&graph)
        .assert()
        .success()
        .stdout(predicate::str::contains("\"graphdict\""))
        .stdout(predicate::str::contains("aws_vpc.main"));
}

#[test]
fn graph_command_writes_output_file_and_validate_accepts_it() {
    let dir = tempfile::tempdir().unwrap();
    let (plan, graph) = write_inputs(dir.path());
    let out = dir.path().join("tfdata.json");

    Command::cargo_bin("terracarta")
        .unwrap()
        .args(["graph", "--plan"])
        .arg(&plan)
        .arg("--graph-file")
        .arg(&graph)
        .arg("-o")
        .arg(&out)
        .assert()
        .success();

    Command::cargo_bin("terracarta")
        .unwrap()
        .arg("validate")
        .arg(&out)
        .assert()
        .success()
        .stdout(predicate::str::contains("OK"));
}

#[test]
fn missing_plan_exits_with_input_error() {
    Command::cargo_bin("terracarta")
        .unwrap()
        .args([
            "graph",
            "--plan",
            "does-not-exist.json",
            "--graph-file",
            "also-missing.json",
        ])
        .assert()
        .failure()
        .code(2);
}

#[test]
fn dot_format_renders_digraph() {
    let dir = tempfile::tempdir().unwrap();
    let (plan, graph) = write_inputs(dir.path());

    Command::cargo_bin("terracarta")
        .unwrap()
        .args(["graph", "--format", "dot", "--plan"])
        .arg(&plan)
        .arg("--graph-file")
        .arg(&graph)
        .assert()
        .success()
        .stdout(predicate::str::contains("digraph"));
}

#[test]
fn init_writes_example_config() {
    let dir = tempfile::tempdir().unwrap();

    Command::cargo_bin("terracarta")
        .unwrap()
        .current_dir(dir.path())
        .arg("init")
        .assert()
        .success();

    let written = fs::read_to_string(dir.path().join("terracarta.yaml")).unwrap();
    assert!(written.contains("scan:"));
}
