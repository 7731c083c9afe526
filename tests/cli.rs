//! Runs the `rtable` binary against temporary documents and configs.
//! Nothing here needs a model endpoint: discussion commands are pointed at
//! an unreachable Ollama URL and must fail cleanly.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tempfile::TempDir;

const REPORT: &str = "Quarterly Report\n\n\
1. Budget\n\n\
The quarterly budget allocates 40% of spending to operations and 25% to hiring.\n\n\
2. Risks\n\n\
Supplier delays remain the key risk for the budget in the next quarter.";

fn rtable_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_rtable"))
}

fn setup_test_env() -> (TempDir, PathBuf, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let doc = root.join("report.txt");
    fs::write(&doc, REPORT).unwrap();

    let config = root.join("rtable.toml");
    fs::write(
        &config,
        r#"[chunking]
max_tokens = 40
overlap_tokens = 0

[embedding]
provider = "keyword"

[generation]
provider = "ollama"
model = "llama3"
url = "http://127.0.0.1:9"
timeout_secs = 1
max_retries = 0
"#,
    )
    .unwrap();

    (tmp, config, doc)
}

fn run_rtable(config: &Path, args: &[&str]) -> Output {
    Command::new(rtable_binary())
        .arg("--config")
        .arg(config)
        .args(args)
        .env_remove("OPENAI_API_KEY")
        .env("RUST_LOG", "warn")
        .output()
        .expect("failed to run rtable")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).to_string()
}

#[test]
fn test_chunk_lists_chunks() {
    let (_tmp, config, doc) = setup_test_env();
    let output = run_rtable(&config, &["chunk", doc.to_str().unwrap()]);
    assert!(output.status.success(), "chunk failed: {:?}", output);
    let out = stdout(&output);
    assert!(out.contains("chunks (max 40 tokens, overlap 0)"));
    assert!(out.contains("#0"));
}

#[test]
fn test_analyze_json() {
    let (_tmp, config, doc) = setup_test_env();
    let output = run_rtable(&config, &["analyze", doc.to_str().unwrap(), "--format", "json"]);
    assert!(output.status.success(), "analyze failed: {:?}", output);
    let json: serde_json::Value = serde_json::from_str(&stdout(&output)).unwrap();
    assert_eq!(json["paragraph_count"], 5);
    assert_eq!(json["estimated_title"], "Quarterly Report");
}

#[test]
fn test_deep_analyze_summarizes_from_structure_when_model_unreachable() {
    let (_tmp, config, doc) = setup_test_env();
    let output = run_rtable(
        &config,
        &["analyze", doc.to_str().unwrap(), "--deep", "--format", "json"],
    );
    assert!(output.status.success(), "deep analyze failed: {:?}", output);
    let json: serde_json::Value = serde_json::from_str(&stdout(&output)).unwrap();
    assert_eq!(
        json["summary"],
        "Document \"Quarterly Report\" (report) has 5 paragraphs in 2 sections."
    );
    assert!(json["content"].is_null());
    assert_eq!(json["structure"]["document_type"], "report");
    assert_eq!(json["key_information"]["key_passages"][0]["source"], "1. Budget");
}

#[test]
fn test_context_cites_sources() {
    let (_tmp, config, doc) = setup_test_env();
    let output = run_rtable(&config, &["context", doc.to_str().unwrap(), "budget risks"]);
    assert!(output.status.success(), "context failed: {:?}", output);
    let out = stdout(&output);
    assert!(out.contains("[Source 1]"));
    assert!(out.contains("budget"));
}

#[test]
fn test_start_writes_session_and_step_fails_when_model_unreachable() {
    let (tmp, config, doc) = setup_test_env();
    let state = tmp.path().join("session.json");
    let output = run_rtable(
        &config,
        &[
            "start",
            doc.to_str().unwrap(),
            "--topic",
            "quarterly budget",
            "--role",
            "CFO",
            "--role",
            "COO",
            "--turns",
            "2",
            "--state",
            state.to_str().unwrap(),
        ],
    );
    assert!(output.status.success(), "start failed: {:?}", output);
    // two preparation notes plus four turns
    assert!(stdout(&output).contains("6 messages to generate"));

    let before = fs::read_to_string(&state).unwrap();
    let session: serde_json::Value = serde_json::from_str(&before).unwrap();
    assert_eq!(session["version"], 1);
    assert_eq!(session["state"]["roles"], serde_json::json!(["CFO", "COO"]));

    let output = run_rtable(&config, &["step", "--state", state.to_str().unwrap()]);
    assert!(!output.status.success());
    assert_eq!(fs::read_to_string(&state).unwrap(), before);
}

#[test]
fn test_start_rejects_reserved_role() {
    let (tmp, config, _doc) = setup_test_env();
    let state = tmp.path().join("session.json");
    let output = run_rtable(
        &config,
        &[
            "start",
            "--topic",
            "budget",
            "--role",
            "system",
            "--state",
            state.to_str().unwrap(),
        ],
    );
    assert!(!output.status.success());
    assert!(!state.exists());
}

#[test]
fn test_invalid_config_is_rejected() {
    let (tmp, _config, doc) = setup_test_env();
    let config = tmp.path().join("bad.toml");
    fs::write(&config, "[chunking]\nmax_tokens = 10\noverlap_tokens = 10\n").unwrap();
    let output = run_rtable(&config, &["chunk", doc.to_str().unwrap()]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("overlap_tokens"));
}

#[test]
fn test_continue_requires_readable_transcript() {
    let (tmp, config, _doc) = setup_test_env();
    let missing = tmp.path().join("missing.json");
    let output = run_rtable(&config, &["continue", missing.to_str().unwrap(), "--turns", "1"]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("Failed to read transcript"));
}
