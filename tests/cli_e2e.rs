//! End-to-end CLI tests for the video-downloader binary.

#![allow(deprecated)]

use std::path::Path;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Command isolated from the user's config and state.
fn command(dir: &Path) -> Command {
    let mut cmd = Command::cargo_bin("video-downloader").unwrap();
    cmd.env("XDG_CONFIG_HOME", dir.join("xdg-config"))
        .env_remove("RUST_LOG")
        .arg("--state-file")
        .arg(dir.join("state.json"))
        .arg("--output-dir")
        .arg(dir.join("out"));
    cmd
}

#[test]
fn test_binary_help_displays_usage() {
    let mut cmd = Command::cargo_bin("video-downloader").unwrap();
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Detect, acquire and track downloads"));
}

#[test]
fn test_binary_version_displays_version() {
    let mut cmd = Command::cargo_bin("video-downloader").unwrap();
    cmd.arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("video-downloader"));
}

#[test]
fn test_binary_requires_subcommand() {
    let mut cmd = Command::cargo_bin("video-downloader").unwrap();
    cmd.assert().failure().stderr(predicate::str::contains("Usage"));
}

#[test]
fn test_classify_prints_json_report() {
    let dir = TempDir::new().unwrap();
    command(dir.path())
        .args(["classify", "https://cdn.example.com/a.mp4", "blob:https://site.example/1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"downloadable\": true"))
        .stdout(predicate::str::contains("\"blob\""))
        .stdout(predicate::str::contains("Blob/Stream"));
}

#[test]
fn test_status_on_fresh_state_is_empty() {
    let dir = TempDir::new().unwrap();
    command(dir.path())
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("No downloads"));
}

#[test]
fn test_status_survives_garbage_state_file() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("state.json"), "{ not json").unwrap();

    command(dir.path())
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("No downloads"));

    assert_eq!(
        std::fs::read_to_string(dir.path().join("state.json.corrupt")).unwrap(),
        "{ not json"
    );
}

#[test]
fn test_failed_blob_download_offers_manual_copy() {
    let dir = TempDir::new().unwrap();
    let url = "blob:https://site.example/5f1e";

    command(dir.path())
        .args(["-q", "download", url])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Copy the URL to download it manually"))
        .stderr(predicate::str::contains(url));

    command(dir.path())
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("[error]"));

    command(dir.path())
        .arg("clear")
        .assert()
        .success()
        .stdout(predicate::str::contains("Removed 1 download(s)"));
}

#[tokio::test]
async fn test_download_writes_file_and_records_completion() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/media/talk.mp4"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(b"mp4-bytes".to_vec(), "video/mp4"))
        .mount(&server)
        .await;
    let dir = TempDir::new().unwrap();

    command(dir.path())
        .args(["-q", "--poll-interval-ms", "100", "download"])
        .arg(format!("{}/media/talk.mp4", server.uri()))
        .assert()
        .success()
        .stdout(predicate::str::contains("[completed]"));

    let saved: Vec<_> = std::fs::read_dir(dir.path().join("out"))
        .unwrap()
        .map(|entry| entry.unwrap().path())
        .collect();
    assert_eq!(saved.len(), 1);
    assert_eq!(std::fs::read(&saved[0]).unwrap(), b"mp4-bytes");

    command(dir.path())
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("[completed]"));
}

#[test]
fn test_invalid_poll_interval_is_rejected() {
    let dir = TempDir::new().unwrap();
    command(dir.path())
        .args(["status", "--poll-interval-ms", "5"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("poll-interval-ms"));
}
