use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

const CREDENTIAL_VARS: [&str; 5] = [
    "OPENAI_API_KEY",
    "OPENAI_KEY",
    "SUPABASE_URL",
    "NEXT_PUBLIC_SUPABASE_URL",
    "SUPABASE_SERVICE_ROLE_KEY",
];

fn songsearch_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("songsearch");
    path
}

fn setup_test_env(provider: &str) -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let config_content = format!(
        r#"[store]
provider = "{}"
path = "{}/data/songs.sqlite"

[server]
bind = "127.0.0.1:7341"

[openai]
base_url = "http://127.0.0.1:9"
timeout_secs = 2
"#,
        provider,
        root.display()
    );

    let config_path = config_dir.join("songsearch.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

/// Runs the binary with no credentials in its environment.
fn run_songsearch(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = songsearch_binary();
    let mut command = Command::new(&binary);
    for var in CREDENTIAL_VARS {
        command.env_remove(var);
    }
    let output = command
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run songsearch binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

#[test]
fn test_init_creates_database() {
    let (tmp, config_path) = setup_test_env("sqlite");

    let (stdout, stderr, success) = run_songsearch(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("initialized"));
    assert!(tmp.path().join("data/songs.sqlite").exists());
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config_path) = setup_test_env("sqlite");

    let (_, _, success1) = run_songsearch(&config_path, &["init"]);
    assert!(success1, "First init failed");

    let (_, _, success2) = run_songsearch(&config_path, &["init"]);
    assert!(success2, "Second init failed (not idempotent)");
}

#[test]
fn test_init_refuses_remote_store() {
    let (_tmp, config_path) = setup_test_env("supabase");

    let (_, stderr, success) = run_songsearch(&config_path, &["init"]);
    assert!(!success);
    assert!(stderr.contains("sqlite"));
}

#[test]
fn test_invalid_provider_is_rejected() {
    let (_tmp, config_path) = setup_test_env("pinecone");

    let (_, stderr, success) = run_songsearch(&config_path, &["init"]);
    assert!(!success);
    assert!(stderr.contains("Unknown store provider"));
}

#[test]
fn test_ask_without_credentials_fails_fast() {
    let (_tmp, config_path) = setup_test_env("sqlite");

    let (stdout, stderr, success) = run_songsearch(&config_path, &["ask", "iubire"]);
    assert!(!success);
    assert!(stdout.is_empty());
    assert!(stderr.contains("OPENAI_API_KEY"), "stderr={}", stderr);
}

#[test]
fn test_embed_pending_without_credentials_fails_fast() {
    let (_tmp, config_path) = setup_test_env("supabase");

    let (_, stderr, success) = run_songsearch(&config_path, &["embed", "pending"]);
    assert!(!success);
    assert!(stderr.contains("Missing environment variable"), "stderr={}", stderr);
}

#[test]
fn test_embed_pending_dry_run_on_empty_store() {
    let (_tmp, config_path) = setup_test_env("sqlite");
    run_songsearch(&config_path, &["init"]);

    let binary = songsearch_binary();
    let output = Command::new(&binary)
        .env_remove("OPENAI_KEY")
        .env("OPENAI_API_KEY", "sk-test")
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(["embed", "pending", "--dry-run"])
        .output()
        .unwrap();

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(output.status.success(), "stderr={}", String::from_utf8_lossy(&output.stderr));
    assert!(stdout.contains("songs needing embeddings: 0"));
}
