use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn mrag_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_mrag"))
}

/// Temp workspace with a config that needs no network: hash embeddings,
/// generation and vision disabled so every summary takes its fallback.
fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    fs::write(root.join("paper.pdf"), b"%PDF-1.7 fake document bytes").unwrap();
    fs::write(
        root.join("elements.json"),
        r#"[
  {"element_id": "text_0", "page": 3, "type": "text", "text": "The model uses self-attention."},
  {"element_id": "table_0", "page": 5, "type": "table", "text": "Table 2 reports BLEU scores."}
]"#,
    )
    .unwrap();

    let config_content = format!(
        r#"[cache]
dir = "{root}/data/cache"

[index]
path = "{root}/data/index.sqlite"
name = "multimodal_rag"

[embedding]
provider = "hash"

[generation]
provider = "disabled"

[vision]
provider = "disabled"

[retrieval]
k = 2
"#,
        root = root.display()
    );

    let config_path = config_dir.join("mrag.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_mrag(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = mrag_binary();
    let output = Command::new(&binary)
        .current_dir(config_path.parent().unwrap())
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run mrag binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

fn ingest(tmp: &TempDir, config_path: &Path) -> (String, String, bool) {
    let doc = tmp.path().join("paper.pdf");
    let elements = tmp.path().join("elements.json");
    run_mrag(
        config_path,
        &[
            "ingest",
            doc.to_str().unwrap(),
            "--elements",
            elements.to_str().unwrap(),
            "--progress",
            "off",
        ],
    )
}

#[test]
fn test_stats_on_empty_index() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_mrag(&config_path, &["stats"]);
    assert!(success, "stats failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("Index: multimodal_rag"));
    assert!(stdout.contains("Documents: 0"));
}

#[test]
fn test_ingest_then_reuse_cache() {
    let (tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = ingest(&tmp, &config_path);
    assert!(success, "ingest failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("Elements: 1 text, 1 tables, 0 images"));
    assert!(stdout.contains("Summaries: generated"));
    assert!(stdout.contains("Indexed: 2 new documents"));
    assert!(tmp
        .path()
        .join("data/cache/summaries_cache.json")
        .exists());

    let (stdout, _, success) = ingest(&tmp, &config_path);
    assert!(success);
    assert!(stdout.contains("Summaries: reused from cache"));
    assert!(stdout.contains("Indexed: 0 new documents"));
    assert!(stdout.contains("Total documents: 2"));
}

#[test]
fn test_changed_document_regenerates() {
    let (tmp, config_path) = setup_test_env();
    ingest(&tmp, &config_path);

    fs::write(tmp.path().join("paper.pdf"), b"%PDF-1.7 edited").unwrap();
    let (stdout, _, success) = ingest(&tmp, &config_path);
    assert!(success);
    assert!(stdout.contains("Summaries: generated"));
}

#[test]
fn test_ask_with_generation_disabled_keeps_sources() {
    let (tmp, config_path) = setup_test_env();
    ingest(&tmp, &config_path);

    let (stdout, stderr, success) =
        run_mrag(&config_path, &["ask", "What mechanism does the model use?"]);
    assert!(success, "ask failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("Error generating response"));
    assert!(stdout.contains("CONFIDENCE: LOW"));
    assert!(stdout.contains("SOURCES (2):"));
    assert!(stdout.contains("[1] TEXT (Page 3)"));
}

#[test]
fn test_ask_json() {
    let (tmp, config_path) = setup_test_env();
    ingest(&tmp, &config_path);

    let (stdout, _, success) = run_mrag(
        &config_path,
        &["ask", "What mechanism does the model use?", "--json", "--k", "1"],
    );
    assert!(success);
    let json: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(json["confidence"], "low");
    assert_eq!(json["sources"].as_array().unwrap().len(), 1);
    assert_eq!(json["sources"][0]["element_id"], "text_0");
    assert_eq!(json["sources"][0]["page"], 3);
}

#[test]
fn test_ask_empty_index_short_circuits() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, _, success) = run_mrag(&config_path, &["ask", "Anything?"]);
    assert!(success);
    assert!(stdout.contains("I couldn't find relevant information"));
    assert!(stdout.contains("SOURCES (0):"));
}

#[test]
fn test_ask_empty_question_fails() {
    let (_tmp, config_path) = setup_test_env();

    let (_, stderr, success) = run_mrag(&config_path, &["ask", "  "]);
    assert!(!success);
    assert!(stderr.contains("question is empty"));
}

#[test]
fn test_batch_one_response_per_question() {
    let (tmp, config_path) = setup_test_env();
    ingest(&tmp, &config_path);

    let questions = tmp.path().join("questions.txt");
    fs::write(
        &questions,
        "What mechanism does the model use?\n\nWhat does Table 2 report?\n",
    )
    .unwrap();

    let (stdout, _, success) = run_mrag(
        &config_path,
        &["batch", questions.to_str().unwrap(), "--json"],
    );
    assert!(success);
    let json: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(json.as_array().unwrap().len(), 2);
}

#[test]
fn test_search_with_type_filter() {
    let (tmp, config_path) = setup_test_env();
    ingest(&tmp, &config_path);

    let (stdout, _, success) = run_mrag(&config_path, &["search", "BLEU", "--type", "table"]);
    assert!(success);
    assert!(stdout.contains("table_0"));
    assert!(!stdout.contains("text_0"));

    let (_, _, success) = run_mrag(&config_path, &["search", "BLEU", "--type", "video"]);
    assert!(!success);
}

#[test]
fn test_cache_clear_forces_regeneration() {
    let (tmp, config_path) = setup_test_env();
    ingest(&tmp, &config_path);

    let (stdout, _, success) = run_mrag(&config_path, &["cache", "clear"]);
    assert!(success);
    assert!(stdout.contains("Cache cleared"));
    assert!(!tmp
        .path()
        .join("data/cache/summaries_cache.json")
        .exists());

    // clearing twice is fine
    let (_, _, success) = run_mrag(&config_path, &["cache", "clear"]);
    assert!(success);

    let (stdout, _, _) = ingest(&tmp, &config_path);
    assert!(stdout.contains("Summaries: generated"));
}

#[test]
fn test_index_reset_and_embedding_change() {
    let (tmp, config_path) = setup_test_env();
    ingest(&tmp, &config_path);

    // switch to a different hash dimension: the stored index no longer matches
    let mut content = fs::read_to_string(&config_path).unwrap();
    content = content.replace("provider = \"hash\"", "provider = \"hash\"\ndims = 128");
    fs::write(&config_path, content).unwrap();

    let (_, stderr, success) = run_mrag(&config_path, &["stats"]);
    assert!(!success);
    assert!(stderr.contains("mrag index reset"));

    let (stdout, _, success) = run_mrag(&config_path, &["index", "reset"]);
    assert!(success);
    assert!(stdout.contains("2 documents removed"));

    let (stdout, _, success) = run_mrag(&config_path, &["stats"]);
    assert!(success);
    assert!(stdout.contains("Documents: 0"));
}

#[test]
fn test_invalid_config_rejected() {
    let (_tmp, config_path) = setup_test_env();
    fs::write(&config_path, "[retrieval]\nk = 0\n").unwrap();

    let (_, stderr, success) = run_mrag(&config_path, &["stats"]);
    assert!(!success);
    assert!(stderr.contains("retrieval.k"));
}

#[test]
fn test_completions() {
    let (_tmp, config_path) = setup_test_env();
    let (stdout, _, success) = run_mrag(&config_path, &["completions", "bash"]);
    assert!(success);
    assert!(stdout.contains("mrag"));
}
