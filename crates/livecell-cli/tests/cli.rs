//! End-to-end tests for the livecell CLI.

#![allow(deprecated)] // cargo_bin is deprecated in assert_cmd 2.1

use std::fs;
use std::path::Path;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

// ===== Test Helpers =====

fn livecell() -> Command {
    Command::cargo_bin("livecell").unwrap()
}

fn write_cell(dir: &Path, name: &str, source: &str) {
    fs::write(dir.join(name), source).unwrap();
}

fn json_lines(stdout: &[u8]) -> Vec<serde_json::Value> {
    String::from_utf8_lossy(stdout)
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| serde_json::from_str(line).unwrap())
        .collect()
}

fn line_for<'a>(lines: &'a [serde_json::Value], model: &str) -> &'a serde_json::Value {
    lines
        .iter()
        .find(|line| line["model"] == model)
        .unwrap_or_else(|| panic!("no output for {model}"))
}

// ===== Run =====

#[test]
fn test_run_dependent_cells_json() {
    let temp = TempDir::new().unwrap();
    write_cell(temp.path(), "sum.cell", "export const sum = 4 + 6;");
    write_cell(temp.path(), "half.cell", "exports.default = $.sum / 2;");

    let output = livecell()
        .args(["run", "--json"])
        .arg(temp.path())
        .output()
        .unwrap();
    assert!(output.status.success());

    let lines = json_lines(&output.stdout);
    assert_eq!(lines.len(), 2);
    assert_eq!(line_for(&lines, "sum.cell")["output"]["sum"], 10.0);
    assert_eq!(line_for(&lines, "half.cell")["output"]["default"], 5.0);
}

#[test]
fn test_run_human_output() {
    let temp = TempDir::new().unwrap();
    write_cell(temp.path(), "greeting.cell", "exports.default = 'hello';");

    livecell()
        .arg("run")
        .arg(temp.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("greeting.cell"))
        .stdout(predicate::str::contains("hello"))
        .stdout(predicate::str::contains("1 cells evaluated"));
}

#[test]
fn test_run_ignores_other_files() {
    let temp = TempDir::new().unwrap();
    write_cell(temp.path(), "a.cell", "exports.a = 1;");
    write_cell(temp.path(), "README.md", "not a cell");

    let output = livecell()
        .args(["run", "--json"])
        .arg(temp.path())
        .output()
        .unwrap();
    assert!(output.status.success());

    let lines = json_lines(&output.stdout);
    assert_eq!(lines.len(), 1);
    assert_eq!(lines[0]["model"], "a.cell");
}

#[test]
fn test_run_reports_failing_cell() {
    let temp = TempDir::new().unwrap();
    write_cell(temp.path(), "ok.cell", "exports.ok = true;");
    write_cell(temp.path(), "broken.cell", "exports.x = ;");

    let output = livecell()
        .args(["run", "--json"])
        .arg(temp.path())
        .output()
        .unwrap();
    assert!(!output.status.success());

    let lines = json_lines(&output.stdout);
    assert_eq!(line_for(&lines, "ok.cell")["output"]["ok"], true);
    assert!(line_for(&lines, "broken.cell")["error"].is_string());
    assert!(String::from_utf8_lossy(&output.stderr).contains("1 cell(s) failed"));
}

#[test]
fn test_run_stops_dependency_cycle() {
    let temp = TempDir::new().unwrap();
    write_cell(temp.path(), "a.cell", "exports.a = ($.b ?? 0) + 1;");
    write_cell(temp.path(), "b.cell", "exports.b = ($.a ?? 0) + 1;");

    let output = livecell()
        .args(["run", "--json"])
        .arg(temp.path())
        .timeout(std::time::Duration::from_secs(30))
        .output()
        .unwrap();
    assert!(!output.status.success());

    let lines = json_lines(&output.stdout);
    assert_eq!(lines.len(), 2);
    assert!(
        lines
            .iter()
            .any(|line| line["error"].as_str().is_some_and(|e| e.contains("cycle")))
    );
}

#[test]
fn test_run_empty_directory() {
    let temp = TempDir::new().unwrap();

    livecell()
        .arg("run")
        .arg(temp.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("No cells found"));
}

#[test]
fn test_run_missing_directory() {
    let temp = TempDir::new().unwrap();

    livecell()
        .arg("run")
        .arg(temp.path().join("missing"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("not found"));
}

#[test]
fn test_run_with_config_file() {
    let temp = TempDir::new().unwrap();
    let cells = temp.path().join("cells");
    fs::create_dir(&cells).unwrap();
    write_cell(&cells, "spin.cell", "let i = 0; while (true) { i = i + 1; }");
    let config = temp.path().join("livecell.json");
    fs::write(&config, r#"{ "max_loop_iterations": 100 }"#).unwrap();

    let output = livecell()
        .args(["run", "--json", "--config"])
        .arg(&config)
        .arg(&cells)
        .output()
        .unwrap();
    assert!(!output.status.success());

    let lines = json_lines(&output.stdout);
    let error = line_for(&lines, "spin.cell")["error"].as_str().unwrap();
    assert!(error.contains("loop"), "unexpected error: {error}");
}

#[test]
fn test_run_invalid_config_file() {
    let temp = TempDir::new().unwrap();
    let config = temp.path().join("livecell.json");
    fs::write(&config, "{ not json").unwrap();

    livecell()
        .args(["run", "--config"])
        .arg(&config)
        .arg(temp.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid config"));
}

// ===== Help =====

#[test]
fn test_help_lists_commands() {
    livecell()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("run"))
        .stdout(predicate::str::contains("watch"));
}
