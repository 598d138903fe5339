//! CLI test cases.
//!
//! None of these reach `pdftocairo`, `tesseract` or a completion server. Each
//! test runs in its own temporary directory so that a developer's `.env` is
//! never picked up.

use std::{fs, path::Path, process::Command};

use assert_cmd::prelude::*;
use predicates::prelude::*;
use tempfile::TempDir;

/// Create a new `Command` with our binary, pointed at `dir`.
fn cmd(dir: &Path) -> Command {
    let mut cmd = Command::cargo_bin("invoice-ocr").unwrap();
    cmd.current_dir(dir)
        .env("INPUT_DIR", dir.join("input"))
        .env("OUTPUT_DIR", dir.join("output"))
        .env("ANALYTICS_FILE", dir.join("analytics.json"))
        .env("BASE_URL", "http://127.0.0.1:9")
        .env_remove("TESSERACT_LANGUAGE")
        .env_remove("RUST_LOG");
    cmd
}

/// A workspace with an empty input directory and an empty history.
fn workspace() -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    fs::create_dir(dir.path().join("input")).unwrap();
    fs::write(dir.path().join("analytics.json"), r#"{"records": []}"#).unwrap();
    dir
}

#[test]
fn test_help() {
    let dir = workspace();
    cmd(dir.path())
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--filename"))
        .stdout(predicate::str::contains("--all"))
        .stdout(predicate::str::contains("TESSERACT_LANGUAGE"));
}

#[test]
fn test_version() {
    let dir = workspace();
    cmd(dir.path()).arg("--version").assert().success();
}

#[test]
fn test_no_mode_exits_with_usage_error() {
    let dir = workspace();
    cmd(dir.path())
        .assert()
        .code(1)
        .stderr(predicate::str::contains("No statement set"))
        .stderr(predicate::str::contains("--filename <filename>"));
    assert!(!dir.path().join("output").exists());
    assert_eq!(
        fs::read_to_string(dir.path().join("analytics.json")).unwrap(),
        r#"{"records": []}"#
    );
}

#[test]
fn test_empty_filename_exits_with_usage_error() {
    let dir = workspace();
    cmd(dir.path())
        .args(["--filename", ""])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("No statement set"));
    assert!(!dir.path().join("output").exists());
}

#[test]
fn test_filename_and_all_conflict() {
    let dir = workspace();
    cmd(dir.path())
        .args(["--filename", "invoice1", "--all"])
        .assert()
        .code(2);
}

#[test]
fn test_bad_format_is_rejected() {
    let dir = workspace();
    cmd(dir.path())
        .args(["--all", "--format", "gif"])
        .assert()
        .code(2);
}

#[test]
fn test_missing_pdf_fails_without_output() {
    let dir = workspace();
    cmd(dir.path())
        .args(["--filename", "ghost.pdf"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("ghost.pdf"));
    assert!(!dir.path().join("output").exists());
}

#[test]
fn test_all_with_no_pdfs_keeps_history_intact() {
    let dir = workspace();
    fs::write(dir.path().join("input/readme.txt"), "not an invoice").unwrap();
    cmd(dir.path()).arg("--all").assert().success();

    let history: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(dir.path().join("analytics.json")).unwrap())
            .unwrap();
    assert_eq!(history["records"], serde_json::json!([]));
}

#[test]
fn test_missing_history_is_fatal() {
    let dir = workspace();
    fs::remove_file(dir.path().join("analytics.json")).unwrap();
    cmd(dir.path())
        .arg("--all")
        .assert()
        .failure()
        .stderr(predicate::str::contains("analytics.json"));
}
