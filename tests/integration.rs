use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn cforge_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_cforge"))
}

const TRANSCRIPT: &str = "# Pattern Matching\n\nA match arm binds parts of the value.\n\n```rust\nmatch point {\n    (0, y) => println!(\"on the y axis at {}\", y),\n    _ => {}\n}\n```\n\n# Guards\nA guard adds a condition to an arm.\n";

fn setup_test_env(collaborator: Option<&str>) -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();
    fs::write(root.join("chat.md"), TRANSCRIPT).unwrap();

    let mut config_content = format!(
        r#"[db]
path = "{}/data/cforge.sqlite"

[retry]
max_retries = 0
base_delay_ms = 10
max_delay_ms = 10
"#,
        root.display()
    );
    if let Some(url) = collaborator {
        config_content.push_str(&format!("\n[collaborator]\nbase_url = \"{}\"\ntimeout_secs = 2\n", url));
    }

    let config_path = config_dir.join("cforge.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_cforge(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = cforge_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .arg("--progress")
        .arg("off")
        .args(args)
        .env("RUST_LOG", "warn")
        .output()
        .unwrap_or_else(|e| panic!("Failed to run cforge binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

/// An address nothing listens on.
fn closed_port_url() -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{}", addr)
}

// ─── init ───

#[test]
fn test_init_creates_database() {
    let (tmp, config_path) = setup_test_env(None);

    let (stdout, stderr, success) = run_cforge(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("initialized"));
    assert!(tmp.path().join("data/cforge.sqlite").exists());
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config_path) = setup_test_env(None);

    let (_, _, success1) = run_cforge(&config_path, &["init"]);
    assert!(success1, "First init failed");

    let (_, _, success2) = run_cforge(&config_path, &["init"]);
    assert!(success2, "Second init failed (not idempotent)");
}

#[test]
fn test_missing_config_fails() {
    let tmp = TempDir::new().unwrap();
    let (_, stderr, success) = run_cforge(&tmp.path().join("nope.toml"), &["status"]);
    assert!(!success);
    assert!(stderr.contains("Failed to read config file"), "{}", stderr);
}

// ─── build ───

#[test]
fn test_build_dry_run_prints_plan() {
    let (tmp, config_path) = setup_test_env(None);
    run_cforge(&config_path, &["init"]);

    let file = tmp.path().join("chat.md");
    let (stdout, stderr, success) = run_cforge(
        &config_path,
        &["build", file.to_str().unwrap(), "--name", "Matching", "--dry-run"],
    );
    assert!(success, "dry run failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("Dry run"));
    assert!(stdout.contains("Items:      3 (1 code, 2 topics)"), "{}", stdout);
    assert!(stdout.contains("Strategy:   single_pass"), "{}", stdout);
    assert!(stdout.contains("Chunks: 1"), "{}", stdout);

    // Nothing was persisted.
    let (stdout, _, _) = run_cforge(&config_path, &["status"]);
    assert!(stdout.contains("No sessions."));
}

#[test]
fn test_build_without_collaborator_section_fails() {
    let (tmp, config_path) = setup_test_env(None);
    let file = tmp.path().join("chat.md");
    let (_, stderr, success) = run_cforge(&config_path, &["build", file.to_str().unwrap(), "--name", "X"]);
    assert!(!success);
    assert!(stderr.contains("[collaborator]"), "{}", stderr);
}

#[test]
fn test_build_against_unreachable_backend_fails_and_is_listed() {
    let url = closed_port_url();
    let (tmp, config_path) = setup_test_env(Some(&url));
    run_cforge(&config_path, &["init"]);

    let file = tmp.path().join("chat.md");
    let (stdout, stderr, success) = run_cforge(&config_path, &["build", file.to_str().unwrap(), "--name", "Matching"]);
    assert!(!success, "build should fail: stdout={}", stdout);
    assert!(stdout.contains("State:    failed"), "{}", stdout);
    assert!(stderr.contains("retries_exhausted"), "{}", stderr);

    let (stdout, _, success) = run_cforge(&config_path, &["status"]);
    assert!(success);
    assert!(stdout.contains("failed (retries_exhausted)"), "{}", stdout);
    assert!(stdout.contains("Matching"));

    // A previous failure for this transcript steers the next plan.
    let (stdout, _, _) = run_cforge(
        &config_path,
        &["build", file.to_str().unwrap(), "--name", "Matching", "--dry-run"],
    );
    assert!(stdout.contains("prior failures 1"), "{}", stdout);
    assert!(stdout.contains("Strategy:   adaptive_retry"), "{}", stdout);

    // Transient failures shrink nothing but are remembered in the streak.
    let (stdout, _, success) = run_cforge(&config_path, &["limits"]);
    assert!(success);
    assert!(stdout.contains("Adaptive limits (learned)"), "{}", stdout);
    assert!(stdout.contains("failure_streak:      1"), "{}", stdout);
}

// ─── status / cancel / purge / limits ───

#[test]
fn test_status_unknown_session_fails() {
    let (_tmp, config_path) = setup_test_env(None);
    let (_, stderr, success) = run_cforge(&config_path, &["status", "does-not-exist"]);
    assert!(!success);
    assert!(stderr.contains("not found"), "{}", stderr);
}

#[test]
fn test_cancel_unknown_session_fails() {
    let (_tmp, config_path) = setup_test_env(None);
    let (_, _, success) = run_cforge(&config_path, &["cancel", "does-not-exist"]);
    assert!(!success);
}

#[test]
fn test_limits_show_and_reset() {
    let (_tmp, config_path) = setup_test_env(None);

    let (stdout, stderr, success) = run_cforge(&config_path, &["limits"]);
    assert!(success, "limits failed: {}", stderr);
    assert!(stdout.contains("Adaptive limits (initial)"));
    assert!(stdout.contains("max_chunk_chars:     8000"));

    let (stdout, _, success) = run_cforge(&config_path, &["limits", "--reset"]);
    assert!(success);
    assert!(stdout.contains("reset"));
}

#[test]
fn test_purge_with_no_sessions() {
    let (_tmp, config_path) = setup_test_env(None);
    let (stdout, stderr, success) = run_cforge(&config_path, &["purge"]);
    assert!(success, "purge failed: {}", stderr);
    assert!(stdout.contains("Purged 0 terminal session(s) older than 30 days."));
}

#[test]
fn test_unknown_progress_mode_rejected() {
    let (_tmp, config_path) = setup_test_env(None);
    let output = Command::new(cforge_binary())
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .arg("--progress")
        .arg("loud")
        .arg("status")
        .output()
        .unwrap();
    assert!(!output.status.success());
}
