use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use assert_cmd::prelude::*;
use predicates::prelude::*;
use predicates::str::contains;

use tempfile::TempDir;

fn hubward_cmd() -> Command {
    Command::new(assert_cmd::cargo::cargo_bin!("hubward"))
}

fn write(path: &Path, content: &str) -> PathBuf {
    fs::write(path, content).expect("write fixture");
    path.to_path_buf()
}

fn empty_hub(dir: &TempDir) -> PathBuf {
    write(&dir.path().join("hub.yaml"), "{}\n")
}

#[test]
fn expand_prints_expanded_documents() {
    let dir = TempDir::new().expect("tempdir");
    let data = write(
        &dir.path().join("data.yaml"),
        concat!(
            "type: template\n",
            "name: pair\n",
            "template: |\n",
            "  type: tag\n",
            "  name: {{ name }}-build\n",
            "  ---\n",
            "  type: tag\n",
            "  name: {{ name }}-candidate\n",
            "---\n",
            "type: pair\n",
            "name: f42\n",
        ),
    );

    hubward_cmd()
        .arg("expand")
        .arg(&data)
        .assert()
        .success()
        .stdout(contains("name: f42-build"))
        .stdout(contains("name: f42-candidate"));
}

#[test]
fn expand_select_filters_kinds() {
    let dir = TempDir::new().expect("tempdir");
    let data = write(
        &dir.path().join("data.yaml"),
        "type: tag\nname: t\n---\ntype: permission\nname: admin\n",
    );

    hubward_cmd()
        .args(["expand", "--select", "permission"])
        .arg(&data)
        .assert()
        .success()
        .stdout(contains("admin"))
        .stdout(contains("type: tag").not());
}

#[test]
fn apply_creates_objects_and_persists_hub_state() {
    let dir = TempDir::new().expect("tempdir");
    let hub = empty_hub(&dir);
    let data = write(
        &dir.path().join("data.yaml"),
        "type: tag\nname: a\n---\ntype: tag\nname: b\ninheritance: [a]\n",
    );

    hubward_cmd()
        .arg("apply")
        .arg(&data)
        .arg("--hub")
        .arg(&hub)
        .assert()
        .success()
        .stdout(contains("Create tag a"))
        .stdout(contains("Create tag b"));

    let state = fs::read_to_string(&hub).expect("hub state");
    assert!(state.contains("a:"), "hub state should contain tag a: {state}");

    // a second apply is a no-op
    hubward_cmd()
        .arg("apply")
        .arg(&data)
        .arg("--hub")
        .arg(&hub)
        .assert()
        .success()
        .stdout(contains("Create tag").not());
}

#[test]
fn apply_refuses_phantoms_and_exits_nonzero() {
    let dir = TempDir::new().expect("tempdir");
    let hub = empty_hub(&dir);
    let data = write(
        &dir.path().join("data.yaml"),
        "type: tag\nname: b\ninheritance: [missing]\n",
    );

    hubward_cmd()
        .arg("apply")
        .arg(&data)
        .arg("--hub")
        .arg(&hub)
        .assert()
        .failure()
        .stderr(contains("phantom: tag:missing"));

    let state = fs::read_to_string(&hub).expect("hub state");
    assert!(!state.contains("b:"), "no write may reach the hub: {state}");
}

#[test]
fn apply_skip_phantoms_drops_and_succeeds() {
    let dir = TempDir::new().expect("tempdir");
    let hub = empty_hub(&dir);
    let data = write(
        &dir.path().join("data.yaml"),
        "type: tag\nname: ok\n---\ntype: tag\nname: b\ninheritance: [missing]\n",
    );

    hubward_cmd()
        .arg("apply")
        .arg(&data)
        .arg("--hub")
        .arg(&hub)
        .arg("--skip-phantoms")
        .assert()
        .success()
        .stdout(contains("dropped: tag:b"));
}

#[test]
fn compare_reports_without_mutating() {
    let dir = TempDir::new().expect("tempdir");
    let hub = write(
        &dir.path().join("hub.yaml"),
        "tag:\n  existing:\n    locked: true\n",
    );
    let before = fs::read_to_string(&hub).expect("hub state");
    let data = write(&dir.path().join("data.yaml"), "type: tag\nname: existing\n");

    hubward_cmd()
        .arg("compare")
        .arg(&data)
        .arg("--hub")
        .arg(&hub)
        .assert()
        .success()
        .stdout(contains("would apply"));

    assert_eq!(
        fs::read_to_string(&hub).expect("hub state"),
        before,
        "compare must leave the hub snapshot untouched"
    );
}

#[test]
fn compare_json_emits_reports() {
    let dir = TempDir::new().expect("tempdir");
    let hub = empty_hub(&dir);
    let data = write(&dir.path().join("data.yaml"), "type: tag\nname: fresh\n");

    let output = hubward_cmd()
        .arg("compare")
        .arg(&data)
        .arg("--hub")
        .arg(&hub)
        .arg("--json")
        .output()
        .expect("run");
    assert!(output.status.success());

    let reports: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("valid JSON report");
    assert_eq!(reports[0]["key"]["kind"], "tag");
    assert_eq!(reports[0]["key"]["name"], "fresh");
}

#[test]
fn invalid_document_exits_nonzero() {
    let dir = TempDir::new().expect("tempdir");
    let hub = empty_hub(&dir);
    let data = write(
        &dir.path().join("data.yaml"),
        "type: external-repo\nname: r\nurl: 'ftp://nope'\n",
    );

    hubward_cmd()
        .arg("apply")
        .arg(&data)
        .arg("--hub")
        .arg(&hub)
        .assert()
        .failure()
        .stderr(contains("url must start with http"));
}

#[test]
fn dump_renders_matching_objects() {
    let dir = TempDir::new().expect("tempdir");
    let hub = write(
        &dir.path().join("hub.yaml"),
        concat!(
            "tag:\n",
            "  f42-build:\n",
            "    locked: true\n",
            "    arches: [x86_64]\n",
            "  f41-build: {}\n",
            "user:\n",
            "  walter: {enabled: true}\n",
        ),
    );

    hubward_cmd()
        .args(["dump", "tag:f42-*"])
        .arg("--hub")
        .arg(&hub)
        .assert()
        .success()
        .stdout(contains("name: f42-build"))
        .stdout(contains("locked: true"))
        .stdout(contains("f41-build").not());
}

#[test]
fn dump_default_kind_flags() {
    let dir = TempDir::new().expect("tempdir");
    let hub = write(
        &dir.path().join("hub.yaml"),
        "tag:\n  alpha: {}\nuser:\n  alpha: {enabled: true}\n",
    );

    hubward_cmd()
        .args(["dump", "alpha", "--users"])
        .arg("--hub")
        .arg(&hub)
        .assert()
        .success()
        .stdout(contains("type: user"))
        .stdout(contains("type: tag").not());
}
