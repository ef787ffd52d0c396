use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn cli_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("blog-search");
    path
}

fn section(slug: &str, title: &str, heading: &str, axis: usize) -> serde_json::Value {
    let mut embedding = vec![0.0f32; 512];
    embedding[axis] = 1.0;
    serde_json::json!({
        "slug": slug,
        "title": title,
        "section": "body",
        "heading": heading,
        "embedding": embedding,
    })
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let index = serde_json::json!({
        "dims": 512,
        "documents": [
            section("async-rust", "Async Rust", "Executors", 0),
            section("async-rust", "Async Rust", "Pinning", 1),
            section("css-grid", "CSS Grid", "Template areas", 2),
        ]
    });
    fs::write(root.join("search-index.json"), index.to_string()).unwrap();

    let config_content = format!(
        r#"[index]
path = "{}/search-index.json"

[embedding]
provider = "openai"
api_key_env = "BLOG_SEARCH_TEST_KEY_THAT_IS_NEVER_SET"

[server]
bind = "127.0.0.1:0"
"#,
        root.display()
    );

    let config_path = config_dir.join("search.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_cli(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = cli_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run blog-search binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

#[test]
fn test_stats_reports_documents_and_posts() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_cli(&config_path, &["stats"]);
    assert!(success, "stats failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("Documents:   3"));
    assert!(stdout.contains("Posts:       2"));
    assert!(stdout.contains("Dimensions:  512"));
    assert!(stdout.contains("async-rust"));
}

#[test]
fn test_stats_missing_index_fails() {
    let (tmp, config_path) = setup_test_env();
    fs::remove_file(tmp.path().join("search-index.json")).unwrap();

    let (_, stderr, success) = run_cli(&config_path, &["stats"]);
    assert!(!success);
    assert!(stderr.contains("Failed to read index file"));
}

#[test]
fn test_stats_rejects_wrong_dimensions() {
    let (tmp, config_path) = setup_test_env();
    fs::write(
        tmp.path().join("search-index.json"),
        r#"[{"slug":"tiny","title":"Tiny","embedding":[1.0,2.0]}]"#,
    )
    .unwrap();

    let (_, stderr, success) = run_cli(&config_path, &["stats"]);
    assert!(!success);
    assert!(stderr.contains("tiny"));
}

#[test]
fn test_search_empty_query() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, _, success) = run_cli(&config_path, &["search", "  "]);
    assert!(success);
    assert!(stdout.contains("No results."));
}

#[test]
fn test_search_without_api_key_errors() {
    let (_tmp, config_path) = setup_test_env();

    let (_, stderr, success) = run_cli(&config_path, &["search", "react"]);
    assert!(!success, "search should fail without credentials");
    assert!(stderr.contains("Missing API key"));
}

#[test]
fn test_invalid_config_errors() {
    let (tmp, _) = setup_test_env();
    let bad = tmp.path().join("config").join("bad.toml");
    fs::write(
        &bad,
        format!(
            "[index]\npath = \"{}/search-index.json\"\n[retrieval]\nhybrid_alpha = 2.0\n",
            tmp.path().display()
        ),
    )
    .unwrap();

    let (_, stderr, success) = run_cli(&bad, &["stats"]);
    assert!(!success);
    assert!(stderr.contains("hybrid_alpha"));
}

#[test]
fn test_missing_config_errors() {
    let tmp = TempDir::new().unwrap();
    let (_, stderr, success) = run_cli(&tmp.path().join("nope.toml"), &["stats"]);
    assert!(!success);
    assert!(stderr.contains("Failed to read config file"));
}
