//! End-to-end CLI tests for the newsarchive binaries.

use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::json;
use tempfile::TempDir;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, ResponseTemplate};

mod support;
use support::socket_guard::start_mock_server_or_skip;
use support::{COLLECTION_PATH, IDENTIFIER, collection_page};

/// A `newsarchive` command isolated from the user's config and logs.
fn newsarchive(config_home: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("newsarchive").unwrap();
    cmd.env("XDG_CONFIG_HOME", config_home.path())
        .env_remove("RUST_LOG")
        .env_remove("NEWSARCHIVE_BASE_URL");
    cmd
}

#[test]
fn test_binary_help_displays_usage() {
    let home = TempDir::new().unwrap();
    newsarchive(&home)
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Archive a historical newspaper"))
        .stdout(predicate::str::contains("download"));
}

#[test]
fn test_binary_version_displays_version() {
    let home = TempDir::new().unwrap();
    newsarchive(&home)
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("newsarchive"));
}

#[test]
fn test_binary_rejects_malformed_identifier() {
    let home = TempDir::new().unwrap();
    newsarchive(&home)
        .args(["download", "Not-An-Id"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid identifier"));
}

#[test]
fn test_binary_rejects_unknown_config_key() {
    let home = TempDir::new().unwrap();
    let config = home.path().join("bad.toml");
    std::fs::write(&config, "concurrency = 9\n").unwrap();
    newsarchive(&home)
        .args(["--config", config.to_str().unwrap(), "search", "star"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Unknown configuration key"));
}

#[test]
fn test_ocr_without_download_metadata_fails() {
    let home = TempDir::new().unwrap();
    let output = TempDir::new().unwrap();
    newsarchive(&home)
        .args(["ocr", IDENTIFIER, "--output", output.path().to_str().unwrap()])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("No download metadata found"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_search_json_against_mock_archive() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    Mock::given(method("GET"))
        .and(path(COLLECTION_PATH))
        .and(query_param("q", "evening star"))
        .and(query_param("fa", "original_format:newspaper"))
        .respond_with(ResponseTemplate::new(200).set_body_json(collection_page(
            vec![json!({"date": "1854-1972", "title": "Evening star.", "number_lccn": [IDENTIFIER]})],
            None,
        )))
        .expect(1)
        .mount(&server)
        .await;

    let base = server.uri();
    let assert = tokio::task::spawn_blocking(move || {
        let home = TempDir::new().unwrap();
        newsarchive(&home)
            .env("NEWSARCHIVE_BASE_URL", base)
            .args(["-q", "search", "evening star", "--json"])
            .assert()
    })
    .await
    .unwrap();

    let assert = assert.success();
    let stdout = String::from_utf8(assert.get_output().stdout.clone()).unwrap();
    let results: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(results[0]["identifier"], IDENTIFIER);
    assert_eq!(results[0]["title"], "Evening star");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_info_for_unknown_identifier_exits_one() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    Mock::given(method("GET"))
        .and(path(COLLECTION_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(collection_page(Vec::new(), None)))
        .mount(&server)
        .await;

    let base = server.uri();
    let assert = tokio::task::spawn_blocking(move || {
        let home = TempDir::new().unwrap();
        newsarchive(&home)
            .env("NEWSARCHIVE_BASE_URL", base)
            .args(["info", IDENTIFIER])
            .assert()
    })
    .await
    .unwrap();

    assert
        .code(1)
        .stdout(predicate::str::contains("No newspaper found with identifier"));
}

#[test]
fn test_harness_help_and_kill_without_marker() {
    let dir = TempDir::new().unwrap();
    Command::cargo_bin("newsarchive-harness")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--mem-mb"));

    Command::cargo_bin("newsarchive-harness")
        .unwrap()
        .env("HARNESS_PID_FILE", dir.path().join("none.pid"))
        .arg("--kill")
        .assert()
        .success()
        .stdout(predicate::str::contains("nothing to kill"));
}

#[cfg(unix)]
#[test]
fn test_harness_runs_a_program_and_reports_outcome() {
    let dir = TempDir::new().unwrap();
    Command::cargo_bin("newsarchive-harness")
        .unwrap()
        .env("HARNESS_PID_FILE", dir.path().join("run.pid"))
        .args(["--program", "sh", "--", "-c", "exit 4"])
        .assert()
        .code(1)
        .stdout(predicate::str::contains("exited with code 4"));
}
