//! End-to-end CLI tests for groupvault.
//!
//! These tests run the actual groupvault binary and verify:
//! - Command-line interface behavior
//! - Output format and content
//! - Error handling and messages
//!
//! # Test Organization
//!
//! Tests are organized by command:
//! - `test_ingest_*` - Ingest command tests (no network access)
//! - `test_search_*`, `test_show_*`, `test_page_*` - Query command tests
//! - `test_stats_*`, `test_verify_*` - Maintenance command tests
//! - `test_cli_*` - General CLI tests (flags, help, version)
//!
//! Every command runs in its own temp directory with an empty config file so
//! the user's own configuration and `.env` never leak in.

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use groupvault::{Attachment, Message, Storage};
use predicates::prelude::*;
use std::fs;
use std::path::PathBuf;
use std::time::Instant;
use tempfile::TempDir;

// =============================================================================
// Test Utilities
// =============================================================================

/// Log a test event with timestamp
macro_rules! test_log {
    ($($arg:tt)*) => {
        let timestamp = chrono::Utc::now().format("%H:%M:%S%.3f");
        eprintln!("[TEST {}] {}", timestamp, format!($($arg)*));
    };
}

/// An isolated working directory with an empty config file.
struct Sandbox {
    dir: TempDir,
    config: PathBuf,
    db: PathBuf,
}

impl Sandbox {
    fn new() -> Self {
        let dir = TempDir::new().expect("Failed to create temp directory");
        let config = dir.path().join("config.toml");
        fs::write(&config, "").expect("Failed to write config");
        let db = dir.path().join("vault.db");
        Self { dir, config, db }
    }

    fn with_config(contents: &str) -> Self {
        let sandbox = Self::new();
        fs::write(&sandbox.config, contents).expect("Failed to write config");
        sandbox
    }

    /// A sandbox whose database holds the three-message fixture.
    fn seeded() -> Self {
        let sandbox = Self::new();
        let storage = Storage::open(&sandbox.db).expect("Failed to open storage");
        for message in fixture_messages() {
            storage.upsert_message(&message).expect("Failed to store message");
        }
        sandbox
    }

    /// The groupvault command, isolated from the user's environment.
    fn cmd(&self) -> Command {
        let mut cmd = cargo_bin_cmd!("groupvault");
        cmd.current_dir(self.dir.path())
            .env_remove("GROUPME_TOKEN")
            .env_remove("GROUPME_GROUP_ID")
            .env_remove("GROUPVAULT_DB")
            .env_remove("RUST_LOG")
            .arg("--config")
            .arg(&self.config)
            .arg("--db")
            .arg(&self.db);
        cmd
    }
}

fn message(id: &str, created_at: i64, text: &str) -> Message {
    Message {
        id: id.to_string(),
        source_guid: format!("guid-{id}"),
        created_at,
        user_id: "1001".to_string(),
        group_id: "55".to_string(),
        name: "Ada Lovelace".to_string(),
        avatar_url: None,
        text: Some(text.to_string()),
        system: false,
        favorited_by: vec![],
        attachments: vec![],
    }
}

/// Ids 3, 2, 1 as a feed page would deliver them, oldest last.
fn fixture_messages() -> Vec<Message> {
    let mut second = message("2", 1_700_000_200, "the zeppelin has landed");
    second.favorited_by = vec!["1002".to_string(), "1003".to_string()];
    second.attachments = vec![Attachment::image("https://i.example.com/zeppelin.png")];
    vec![
        message("3", 1_700_000_300, "see everyone at dinner"),
        second,
        message("1", 1_700_000_100, "good morning all"),
    ]
}

fn stdout_json(output: &std::process::Output) -> serde_json::Value {
    let stdout = String::from_utf8_lossy(&output.stdout);
    serde_json::from_str(&stdout).unwrap_or_else(|e| panic!("invalid JSON ({e}): {stdout}"))
}

fn ids(value: &serde_json::Value) -> Vec<String> {
    value
        .as_array()
        .expect("expected a JSON array")
        .iter()
        .map(|m| m["id"].as_str().expect("id").to_string())
        .collect()
}

// =============================================================================
// Help and Version Tests
// =============================================================================

#[test]
fn test_cli_help() {
    test_log!("Starting test_cli_help");
    let start = Instant::now();

    Sandbox::new()
        .cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("groupvault"))
        .stdout(predicate::str::contains("Usage"));

    test_log!("test_cli_help completed in {:?}", start.elapsed());
}

#[test]
fn test_cli_version() {
    Sandbox::new()
        .cmd()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("groupvault"));
}

#[test]
fn test_cli_invalid_command() {
    Sandbox::new()
        .cmd()
        .arg("frobnicate")
        .assert()
        .failure()
        .stderr(predicate::str::contains("unrecognized subcommand"));
}

#[test]
fn test_cli_completions() {
    Sandbox::new()
        .cmd()
        .args(["completions", "bash"])
        .assert()
        .success()
        .stdout(predicate::str::contains("groupvault"));
}

// =============================================================================
// Ingest Command Tests
// =============================================================================

#[test]
fn test_ingest_without_token_fails() {
    test_log!("Starting test_ingest_without_token_fails");
    let start = Instant::now();

    let sandbox = Sandbox::new();
    sandbox
        .cmd()
        .args(["ingest", "--group", "55"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("GROUPME_TOKEN"));

    assert!(!sandbox.db.exists(), "no database should be created");
    test_log!(
        "test_ingest_without_token_fails completed in {:?}",
        start.elapsed()
    );
}

#[test]
fn test_ingest_unreachable_feed_fails() {
    // Port 9 (discard) on loopback refuses connections.
    let sandbox = Sandbox::with_config("[feed]\nbase_url = \"http://127.0.0.1:9\"\ntimeout_secs = 5\n");
    sandbox
        .cmd()
        .args(["ingest", "--token", "t0k3n", "--group", "55", "--delay-ms", "0"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Feed request failed"))
        .stderr(predicate::str::contains("t0k3n").not());
}

// =============================================================================
// Query Command Tests
// =============================================================================

#[test]
fn test_search_json_output() {
    test_log!("Starting test_search_json_output");
    let start = Instant::now();

    let sandbox = Sandbox::seeded();
    let output = sandbox
        .cmd()
        .args(["search", "zeppelin", "--format", "json"])
        .output()
        .expect("Failed to run command");

    assert!(output.status.success());
    let results = stdout_json(&output);
    assert_eq!(ids(&results), vec!["2"]);
    assert_eq!(results[0]["favorite_count"], 2);
    assert_eq!(results[0]["attachments"][0]["type"], "image");

    test_log!("test_search_json_output completed in {:?}", start.elapsed());
}

#[test]
fn test_search_text_output() {
    Sandbox::seeded()
        .cmd()
        .args(["search", "morning"])
        .assert()
        .success()
        .stdout(predicate::str::contains("good morning all"))
        .stdout(predicate::str::contains("Ada Lovelace"));
}

#[test]
fn test_search_no_results() {
    Sandbox::seeded()
        .cmd()
        .args(["search", "xylophone"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No results found"));
}

#[test]
fn test_search_invalid_query_fails() {
    Sandbox::seeded()
        .cmd()
        .args(["search", "\"unbalanced"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid search query"));
}

#[test]
fn test_search_missing_db_fails() {
    Sandbox::new()
        .cmd()
        .args(["search", "anything"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("groupvault ingest"));
}

#[test]
fn test_show_json_detail() {
    let sandbox = Sandbox::seeded();
    let output = sandbox
        .cmd()
        .args(["show", "2", "-f", "json"])
        .output()
        .expect("Failed to run command");

    assert!(output.status.success());
    let detail = stdout_json(&output);
    assert_eq!(detail["message"]["id"], "2");
    assert_eq!(ids(&detail["before_messages"]), vec!["1"]);
    assert_eq!(ids(&detail["after_messages"]), vec!["3"]);
}

#[test]
fn test_show_missing_message_fails() {
    Sandbox::seeded()
        .cmd()
        .args(["show", "404"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not found"));
}

#[test]
fn test_page_before_and_after() {
    let sandbox = Sandbox::seeded();

    let before = sandbox
        .cmd()
        .args(["before", "2", "-n", "2", "-f", "json"])
        .output()
        .expect("Failed to run command");
    assert!(before.status.success());
    assert_eq!(ids(&stdout_json(&before)), vec!["1"]);

    let after = sandbox
        .cmd()
        .args(["after", "2", "-f", "json"])
        .output()
        .expect("Failed to run command");
    assert!(after.status.success());
    assert_eq!(ids(&stdout_json(&after)), vec!["3"]);
}

#[test]
fn test_page_at_start_of_history_is_empty() {
    let sandbox = Sandbox::seeded();
    let output = sandbox
        .cmd()
        .args(["before", "1", "-f", "json"])
        .output()
        .expect("Failed to run command");
    assert!(output.status.success());
    assert!(ids(&stdout_json(&output)).is_empty());
}

#[test]
fn test_page_compact_output() {
    Sandbox::seeded()
        .cmd()
        .args(["after", "1", "-f", "compact"])
        .assert()
        .success()
        .stdout(predicate::str::contains("2 | "))
        .stdout(predicate::str::contains("3 | "));
}

// =============================================================================
// Maintenance Command Tests
// =============================================================================

#[test]
fn test_stats_json() {
    let sandbox = Sandbox::seeded();
    let output = sandbox
        .cmd()
        .args(["stats", "-f", "json"])
        .output()
        .expect("Failed to run command");

    assert!(output.status.success());
    let stats = stdout_json(&output);
    assert_eq!(stats["messages_count"], 3);
    assert_eq!(stats["attachments_count"], 1);
    assert_eq!(stats["favorites_count"], 2);
    assert_eq!(stats["fts_count"], 3);
}

#[test]
fn test_stats_nonexistent_db() {
    Sandbox::new().cmd().arg("stats").assert().failure();
}

#[test]
fn test_verify_consistent_archive() {
    Sandbox::seeded()
        .cmd()
        .arg("verify")
        .assert()
        .success()
        .stdout(predicate::str::contains("0 messages missing"));
}

#[test]
fn test_verify_fix_repairs_index() {
    let sandbox = Sandbox::seeded();
    {
        let storage = Storage::open(&sandbox.db).expect("Failed to open storage");
        storage
            .with_conn(|conn| {
                conn.execute(
                    "DELETE FROM messages_fts WHERE rowid = (SELECT rowid FROM messages WHERE id = '2')",
                    [],
                )?;
                Ok(())
            })
            .expect("Failed to corrupt index");
    }

    sandbox.cmd().arg("verify").assert().failure();

    let output = sandbox
        .cmd()
        .args(["verify", "--fix", "-f", "json"])
        .output()
        .expect("Failed to run command");
    assert!(output.status.success());
    let report = stdout_json(&output);
    assert_eq!(report["missing"], 1);
    assert_eq!(report["rebuilt"], 3);
    assert_eq!(report["consistent"], true);

    let search = sandbox
        .cmd()
        .args(["search", "zeppelin", "-f", "json"])
        .output()
        .expect("Failed to run command");
    assert_eq!(ids(&stdout_json(&search)), vec!["2"]);
}

#[test]
fn test_config_init_and_show() {
    let sandbox = Sandbox::new();
    fs::remove_file(&sandbox.config).expect("Failed to remove config");

    sandbox
        .cmd()
        .args(["config", "--init"])
        .assert()
        .success();
    let written = fs::read_to_string(&sandbox.config).expect("config written");
    assert!(written.contains("[feed]"));

    // A second init refuses to overwrite.
    sandbox.cmd().args(["config", "--init"]).assert().failure();

    sandbox
        .cmd()
        .env("GROUPME_TOKEN", "very-secret")
        .args(["config", "--show", "-f", "json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("very-secret").not())
        .stdout(predicate::str::contains("api.groupme.com"));
}

#[test]
fn test_quiet_mode() {
    Sandbox::seeded()
        .cmd()
        .args(["-q", "stats"])
        .assert()
        .success()
        .stderr(predicate::str::is_empty());
}
