//! Tests for the `testbridge` command line.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use serde_json::Value;
use tempfile::TempDir;

fn worker_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_testbridge-worker"))
        .parent()
        .unwrap()
        .to_path_buf()
}

/// Run the CLI in `project` and parse its stdout.
fn testbridge(project: &Path, args: &[&str]) -> (i32, Value) {
    let output = Command::new(env!("CARGO_BIN_EXE_testbridge"))
        .arg("--project")
        .arg(project)
        .arg("--worker-dir")
        .arg(worker_dir())
        .args(args)
        .env_remove("RUST_LOG")
        .env_remove("TESTBRIDGE_RUNNER_BITNESS")
        .output()
        .unwrap();
    let json = serde_json::from_slice(&output.stdout).unwrap_or_else(|e| {
        panic!(
            "invalid JSON ({}): {}",
            e,
            String::from_utf8_lossy(&output.stdout)
        )
    });
    (output.status.code().unwrap_or(-1), json)
}

fn project() -> (TempDir, String) {
    let dir = TempDir::new().unwrap();
    let manifest = dir.path().join("cases.json");
    fs::write(
        &manifest,
        r#"{"cases": [
            {"id": "1", "type": "A.B", "method": "Test1"},
            {"id": "2", "type": "A.B", "method": "Test2"},
            {"id": "3", "type": "A.C", "method": "Test3", "skip": "later"}
        ]}"#,
    )
    .unwrap();
    fs::create_dir_all(dir.path().join("src")).unwrap();
    fs::write(
        dir.path().join("src/b.rs"),
        "mod tests {\n    fn Test1() {}\n}\n",
    )
    .unwrap();
    let manifest = manifest.to_string_lossy().into_owned();
    (dir, manifest)
}

#[test]
fn discover_prints_tree_and_writes_cache() {
    let (dir, manifest) = project();
    let (code, json) = testbridge(dir.path(), &["discover", &manifest]);
    assert_eq!(code, 0, "{}", json);
    assert_eq!(json["status"], "ok");
    assert_eq!(json["test_count"], 3);
    assert_eq!(json["root"]["node"], "group");

    let results = dir.path().join(".testbridge/test-results");
    let cached = fs::read_dir(&results)
        .unwrap()
        .filter_map(Result::ok)
        .filter(|e| e.file_name().to_string_lossy().ends_with(".test-cache.json"))
        .count();
    assert_eq!(cached, 1);

    let (code, json) = testbridge(dir.path(), &["cache", "clear"]);
    assert_eq!(code, 0);
    assert_eq!(json["removed"], 1);
}

#[test]
fn run_without_filter_runs_everything() {
    let (dir, manifest) = project();
    let (code, json) = testbridge(dir.path(), &["run", &manifest]);
    assert_eq!(code, 0, "{}", json);
    let result = &json["result"];
    assert_eq!(result["passed"], 2);
    assert_eq!(result["skipped"], 1);
    assert_eq!(result["worker_crashed"], false);
}

#[test]
fn run_with_filter() {
    let (dir, manifest) = project();
    let (code, json) = testbridge(dir.path(), &["run", &manifest, "--filter", "2"]);
    assert_eq!(code, 0);
    let cases = json["result"]["cases"].as_array().unwrap();
    assert_eq!(cases.len(), 1);
    assert_eq!(cases[0]["id"], "2");
    assert_eq!(cases[0]["outcome"], "passed");
}

#[test]
fn locate_finds_source_line() {
    let (dir, manifest) = project();
    let (code, json) = testbridge(dir.path(), &["locate", &manifest, "1"]);
    assert_eq!(code, 0, "{}", json);
    assert_eq!(json["location"]["line"], 2);
    assert!(json["location"]["file"]
        .as_str()
        .unwrap()
        .ends_with("b.rs"));

    let (code, json) = testbridge(dir.path(), &["locate", &manifest, "nope"]);
    assert_eq!(code, 2);
    assert_eq!(json["error"]["category"], "invalid_arguments");
}

#[test]
fn missing_assembly_exits_with_code_3() {
    let dir = TempDir::new().unwrap();
    let missing = dir.path().join("absent.json");
    let (code, json) = testbridge(dir.path(), &["discover", &missing.to_string_lossy()]);
    assert_eq!(code, 3);
    assert_eq!(json["status"], "error");
    assert_eq!(json["error"]["code"], 3);
}

#[test]
fn missing_worker_is_a_spawn_error() {
    let (dir, manifest) = project();
    let output = Command::new(env!("CARGO_BIN_EXE_testbridge"))
        .arg("--project")
        .arg(dir.path())
        .arg("--worker-dir")
        .arg(dir.path())
        .args(["run", &manifest])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(4));
    let json: Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(json["error"]["category"], "process_spawn_failed");
}
