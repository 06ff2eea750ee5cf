use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tempfile::TempDir;

fn pdfnotes_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_pdfnotes"))
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let config_content = format!(
        r#"[db]
path = "{}/data/notes.sqlite"

[viewer]
app_name = "Preview"
poll_interval_ms = 1500

[notes]
enabled = false

[logging]
level = "warn"
"#,
        root.display()
    );

    let config_path = config_dir.join("pdfnotes.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_pdfnotes(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = pdfnotes_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path)
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run pdfnotes binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

#[test]
fn test_init_creates_database() {
    let (tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_pdfnotes(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("initialized"));
    assert!(tmp.path().join("data/notes.sqlite").exists());
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config_path) = setup_test_env();

    let (_, _, success1) = run_pdfnotes(&config_path, &["init"]);
    assert!(success1, "First init failed");

    let (_, _, success2) = run_pdfnotes(&config_path, &["init"]);
    assert!(success2, "Second init failed (not idempotent)");

    // The default directive is seeded once
    let (stdout, _, _) = run_pdfnotes(&config_path, &["directive", "list"]);
    assert_eq!(stdout.lines().count(), 1);
    assert!(stdout.contains("* summarize"));
}

#[test]
fn test_stats_on_empty_store() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_pdfnotes(&config_path, &["stats"]);
    assert!(success, "stats failed: {}", stderr);
    assert!(stdout.contains("Documents:   0"));
    assert!(stdout.contains("Pages:       0"));
    assert!(stdout.contains("Page views:  0"));
    assert!(stdout.contains("Notes:       0"));
    assert!(stdout.contains("Concepts:    0"));
}

#[test]
fn test_documents_empty() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, _, success) = run_pdfnotes(&config_path, &["documents"]);
    assert!(success);
    assert!(stdout.contains("No documents tracked yet."));
}

#[test]
fn test_directive_add_and_default() {
    let (_tmp, config_path) = setup_test_env();

    let (_, stderr, success) = run_pdfnotes(
        &config_path,
        &["directive", "add", "flashcards", "--template", "Write Q/A flashcards"],
    );
    assert!(success, "add failed: {}", stderr);

    let (_, _, success) = run_pdfnotes(&config_path, &["directive", "default", "flashcards"]);
    assert!(success);

    let (stdout, _, _) = run_pdfnotes(&config_path, &["directive", "list"]);
    assert!(stdout.contains("* flashcards"));
    assert!(stdout.contains("  summarize"));
    assert_eq!(stdout.matches('*').count(), 1);
}

#[test]
fn test_directive_default_unknown_fails() {
    let (_tmp, config_path) = setup_test_env();

    let (_, stderr, success) = run_pdfnotes(&config_path, &["directive", "default", "nope"]);
    assert!(!success);
    assert!(stderr.contains("directive not found"));
}

#[test]
fn test_notes_for_untracked_document_fails() {
    let (_tmp, config_path) = setup_test_env();

    let (_, stderr, success) = run_pdfnotes(&config_path, &["notes", "/papers/missing.pdf", "1"]);
    assert!(!success);
    assert!(stderr.contains("document not tracked"));
}

#[test]
fn test_sanitize_stdin() {
    let mut child = Command::new(pdfnotes_binary())
        .arg("sanitize")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .spawn()
        .unwrap();
    child
        .stdin
        .take()
        .unwrap()
        .write_all(b"  Lemma\x07 2.\r\n\r\n\r\n\r\n\\int_0^1   f(x)\\,dx  ")
        .unwrap();
    let output = child.wait_with_output().unwrap();

    assert!(output.status.success());
    assert_eq!(
        String::from_utf8_lossy(&output.stdout),
        "Lemma 2.\n\n\\int_0^1 f(x)\\,dx\n"
    );
}

#[test]
fn test_sanitize_file() {
    let tmp = TempDir::new().unwrap();
    let input = tmp.path().join("page.txt");
    fs::write(&input, "a\x00b\tc").unwrap();

    let output = Command::new(pdfnotes_binary())
        .arg("sanitize")
        .arg(&input)
        .output()
        .unwrap();
    assert!(output.status.success());
    assert_eq!(String::from_utf8_lossy(&output.stdout), "ab\tc\n");
}

#[test]
fn test_invalid_config_rejected() {
    let (tmp, _) = setup_test_env();
    let bad = tmp.path().join("bad.toml");
    fs::write(&bad, "[viewer]\npoll_interval_ms = 0\n").unwrap();

    let (_, stderr, success) = run_pdfnotes(&bad, &["stats"]);
    assert!(!success);
    assert!(stderr.contains("poll_interval_ms"));
}

#[test]
fn test_completions() {
    let output = Command::new(pdfnotes_binary())
        .args(["completions", "bash"])
        .output()
        .unwrap();
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("pdfnotes"));
}
