//! End-to-end tests against the `otto-bgp` binary: argument parsing, exit codes, and the file
//! artifacts the `adapt` subcommand writes.

use assert_cmd::Command;
use assert_fs::prelude::*;
use predicates::prelude::*;

fn otto_bgp() -> Command {
    Command::cargo_bin("otto-bgp").unwrap()
}

#[test]
fn missing_subcommand_prints_usage_and_fails() {
    otto_bgp().assert().failure();
}

#[test]
fn generate_requires_at_least_one_as_number() {
    otto_bgp()
        .args(["generate", "--as-numbers"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("error"));
}

#[test]
fn collect_with_missing_inventory_file_fails_with_a_generic_error() {
    let dir = assert_fs::TempDir::new().unwrap();
    let inventory = dir.child("nope.csv");

    otto_bgp()
        .current_dir(&dir)
        .args(["collect", "--inventory", inventory.path().to_str().unwrap()])
        .assert()
        .failure()
        .code(1);
}

#[test]
fn validate_rejects_a_malformed_prefix() {
    otto_bgp()
        .args(["validate", "--prefix", "not-a-prefix", "--as-number", "65001"])
        .assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("invalid prefix"));
}

#[test]
fn adapt_merges_fragments_into_a_router_scoped_config_file() {
    let dir = assert_fs::TempDir::new().unwrap();

    let as1 = dir.child("AS65001_policy.txt");
    as1.write_str("policy-options {\n    prefix-list AS65001 {\n        route-filter 203.0.113.0/24 exact;\n    }\n}\n").unwrap();
    let as2 = dir.child("AS65002_policy.txt");
    as2.write_str("policy-options {\n    prefix-list AS65002 {\n        route-filter 198.51.100.0/24 exact;\n    }\n}\n").unwrap();

    otto_bgp()
        .current_dir(&dir)
        .args([
            "adapt",
            "--router",
            "edge-r1",
            "--inputs",
            as1.path().to_str().unwrap(),
            as2.path().to_str().unwrap(),
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("edge-r1"));

    dir.child("routers/edge-r1_adapted.conf")
        .assert(predicate::path::exists());
    dir.child("routers/edge-r1_adapted.conf")
        .assert(predicate::str::contains("prefix-list AS65001"));
    dir.child("routers/edge-r1_adapted.conf")
        .assert(predicate::str::contains("prefix-list AS65002"));
}

#[test]
fn adapt_with_unreadable_input_file_fails() {
    let dir = assert_fs::TempDir::new().unwrap();
    otto_bgp()
        .current_dir(&dir)
        .args(["adapt", "--router", "edge-r1", "--inputs", "AS65001_policy.txt"])
        .assert()
        .failure();
}

#[test]
fn build_with_no_discovered_routers_warns_and_succeeds() {
    let dir = assert_fs::TempDir::new().unwrap();
    otto_bgp()
        .current_dir(&dir)
        .args(["build"])
        .assert()
        .success()
        .stdout(predicate::str::contains("no routers discovered"));
}

#[test]
fn report_with_no_discovered_routers_still_writes_three_files() {
    let dir = assert_fs::TempDir::new().unwrap();
    otto_bgp()
        .current_dir(&dir)
        .args(["report", "--output-dir", "reports"])
        .assert()
        .success()
        .stdout(predicate::str::contains("wrote discovery reports for 0 router"));

    dir.child("reports/discovery.csv").assert(predicate::path::exists());
    dir.child("reports/discovery.json").assert(predicate::path::exists());
    dir.child("reports/discovery_summary.txt").assert(predicate::path::exists());
}

#[test]
fn rollout_status_on_unknown_run_fails() {
    let dir = assert_fs::TempDir::new().unwrap();
    otto_bgp()
        .current_dir(&dir)
        .args(["status", "--run-id", "does-not-exist"])
        .assert()
        .failure();
}
