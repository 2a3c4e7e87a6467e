//! Integration tests for the conveyor CLI.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tempfile::TempDir;

fn conveyor_bin() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_conveyor"))
}

/// Run the CLI with a config path that never exists, so user config is ignored.
fn conveyor(dir: &Path, args: &[&str]) -> Output {
    Command::new(conveyor_bin())
        .arg("--config")
        .arg(dir.join("no-config.toml"))
        .args(args)
        .env_remove("RUST_LOG")
        .output()
        .expect("Failed to execute command")
}

fn write_job(dir: &TempDir, name: &str, contents: &str) -> String {
    let path = dir.path().join(name);
    fs::write(&path, contents).expect("Failed to write job file");
    path.to_str().unwrap().to_string()
}

const TWO_GROUPS: &str = r#"
poll_interval_ms: 10
task_groups:
  - id: 0
    channel: { capacity: 10 }
    tasks:
      - id: 0
        reader: { name: stream, parameters: { count: 100 } }
        writer: { name: stream }
      - id: 1
        reader: { name: stream, parameters: { count: 100 } }
        writer: { name: stream }
  - id: 1
    tasks:
      - id: 0
        reader:
          name: stream
          parameters:
            count: 100
            columns:
              - { type: string, value: "abc" }
              - { type: long, value: 7 }
        writer: { name: stream }
"#;

#[test]
fn test_help() {
    let dir = TempDir::new().unwrap();
    let output = conveyor(dir.path(), &["--help"]);

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Reader-to-writer data synchronization"));
}

#[test]
fn test_plugins() {
    let dir = TempDir::new().unwrap();
    let output = conveyor(dir.path(), &["plugins"]);

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Readers:"));
    assert!(stdout.contains("Writers:"));
    assert!(stdout.contains("stream"));
}

#[test]
fn test_run_succeeds() {
    let dir = TempDir::new().unwrap();
    let job = write_job(&dir, "job.yaml", TWO_GROUPS);

    let output = conveyor(dir.path(), &["run", &job]);

    assert!(
        output.status.success(),
        "Command failed: {:?}",
        String::from_utf8_lossy(&output.stderr)
    );
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("SUCCEEDED"));
    assert!(stderr.contains("300 records"));
}

#[test]
fn test_run_prints_records() {
    let dir = TempDir::new().unwrap();
    let job = write_job(
        &dir,
        "job.json",
        r#"{
            "task_groups": [{
                "id": 3,
                "tasks": [{
                    "id": 0,
                    "reader": { "name": "stream", "parameters": { "count": 3 } },
                    "writer": { "name": "stream", "parameters": { "print": true } }
                }]
            }]
        }"#,
    );

    let output = conveyor(dir.path(), &["-q", "run", &job]);

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    let lines: Vec<_> = stdout.lines().collect();
    assert_eq!(lines.len(), 3);
    assert!(lines[0].contains("\"size\":1"));
    assert!(lines[2].contains("\"value\":2"));
}

#[test]
fn test_run_plugin_failure_exits_1() {
    let dir = TempDir::new().unwrap();
    let job = write_job(
        &dir,
        "bad.toml",
        r#"
[[task_groups]]
id = 0

[[task_groups.tasks]]
id = 0
reader = { name = "stream", parameters = { columns = [{ type = "long", value = "x" }] } }
writer = { name = "stream" }
"#,
    );

    let output = conveyor(dir.path(), &["run", &job]);

    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Conveyor-13"), "stderr: {stderr}");
    assert!(stderr.contains("columns[0]"));
}

#[test]
fn test_validate() {
    let dir = TempDir::new().unwrap();
    let job = write_job(&dir, "job.yaml", TWO_GROUPS);

    let output = conveyor(dir.path(), &["validate", &job]);

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Valid: 2 task groups, 3 tasks"));
    assert!(stdout.contains("stream -> stream"));
}

#[test]
fn test_validate_unknown_plugin() {
    let dir = TempDir::new().unwrap();
    let job = write_job(
        &dir,
        "job.yaml",
        r#"
task_groups:
  - id: 0
    tasks:
      - id: 0
        reader: { name: mysql }
        writer: { name: stream }
"#,
    );

    let output = conveyor(dir.path(), &["validate", &job]);

    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("unknown reader plugin 'mysql'"));
    assert!(stderr.contains("Conveyor-03"));
}

#[test]
fn test_duplicate_group_rejected() {
    let dir = TempDir::new().unwrap();
    let job = write_job(
        &dir,
        "job.yaml",
        r#"
task_groups:
  - id: 5
    tasks: []
  - id: 5
    tasks: []
"#,
    );

    let output = conveyor(dir.path(), &["run", &job]);

    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("duplicate task group id 5"));
}

#[test]
fn test_missing_job_file() {
    let dir = TempDir::new().unwrap();
    let missing = dir.path().join("nope.yaml");

    let output = conveyor(dir.path(), &["run", missing.to_str().unwrap()]);

    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Failed to read job file"));
}
