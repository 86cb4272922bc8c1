use axum::{extract::Path as UrlPath, routing::post, Json, Router};
use serde_json::{json, Value};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tempfile::TempDir;

fn herb_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("herb");
    path
}

const HERBS: &str = r#"[
  {"id": "ginger", "values": [1.0, 0.0], "metadata": {"name": "Ginger", "category": "warming", "efficacy": "Warms the stomach", "caution": "Avoid with high fever"}},
  {"id": "mint", "values": [0.0, 1.0], "metadata": {"name": "Peppermint", "efficacy": "Relieves bloating"}}
]"#;

/// Writes a config with an in-memory herb index and SQLite records.
/// `gemini_url` enables the Gemini providers against a mock server.
fn setup_test_env(gemini_url: Option<&str>) -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();
    fs::create_dir_all(root.join("data")).unwrap();
    fs::write(root.join("data/herbs.json"), HERBS).unwrap();
    fs::write(
        root.join("secrets.toml"),
        "GOOGLE_API_KEY = \"test-key\"\n",
    )
    .unwrap();

    let providers = match gemini_url {
        Some(url) => format!(
            "[embedding]\nprovider = \"gemini\"\nbase_url = \"{url}\"\nmax_retries = 0\n\n\
             [generation]\nprovider = \"gemini\"\nbase_url = \"{url}\"\nmax_retries = 0\n"
        ),
        None => "[embedding]\nprovider = \"disabled\"\n\n[generation]\nprovider = \"disabled\"\n"
            .to_string(),
    };

    let config_content = format!(
        r#"{providers}
[index]
provider = "memory"
path = "{root}/data/herbs.json"

[records]
backend = "sqlite"
db_path = "{root}/data/herb.sqlite"

[chat]
top_k = 1

[secrets]
path = "{root}/secrets.toml"
dotenv = false
"#,
        providers = providers,
        root = root.display(),
    );

    let config_path = config_dir.join("herb.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_herb(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    run_herb_with_input(config_path, args, "")
}

fn run_herb_with_input(config_path: &Path, args: &[&str], input: &str) -> (String, String, bool) {
    let binary = herb_binary();
    let mut child = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .env_remove("GOOGLE_API_KEY")
        .env_remove("PINECONE_API_KEY")
        .env_remove("RUST_LOG")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .unwrap_or_else(|e| panic!("Failed to run herb binary at {:?}: {}", binary, e));

    child
        .stdin
        .take()
        .unwrap()
        .write_all(input.as_bytes())
        .unwrap();
    let output = child.wait_with_output().unwrap();

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

/// Gemini stand-in: "cold" symptoms embed near ginger, everything else
/// near peppermint; generation names the first herb in the prompt.
async fn mock_gemini() -> String {
    async fn handle(UrlPath(action): UrlPath<String>, Json(body): Json<Value>) -> Json<Value> {
        if action.ends_with(":embedContent") {
            let text = body["content"]["parts"][0]["text"].as_str().unwrap_or_default();
            let values = if text.contains("cold") { [1.0, 0.0] } else { [0.0, 1.0] };
            Json(json!({ "embedding": { "values": values } }))
        } else {
            let system = body["system_instruction"]["parts"][0]["text"]
                .as_str()
                .unwrap_or_default();
            let herb = if system.contains("Ginger") { "ginger" } else { "peppermint" };
            Json(json!({
                "candidates": [{ "content": { "parts": [{ "text": format!("Brew {} tea.", herb) }] } }]
            }))
        }
    }

    let app = Router::new().route("/v1beta/models/{action}", post(handle));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

#[test]
fn test_init_creates_database() {
    let (tmp, config_path) = setup_test_env(None);

    let (stdout, stderr, success) = run_herb(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("initialized"));
    assert!(tmp.path().join("data/herb.sqlite").exists());
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config_path) = setup_test_env(None);

    let (_, _, success1) = run_herb(&config_path, &["init"]);
    assert!(success1, "First init failed");

    let (_, _, success2) = run_herb(&config_path, &["init"]);
    assert!(success2, "Second init failed (not idempotent)");
}

#[test]
fn test_register_keeps_first_constitution() {
    let (_tmp, config_path) = setup_test_env(None);

    let (stdout, stderr, success) =
        run_herb(&config_path, &["register", "--user", "kim", "--constitution", "soeumin"]);
    assert!(success, "register failed: {}", stderr);
    assert!(stdout.contains("Registered kim as 소음인"));

    let (stdout, _, success) =
        run_herb(&config_path, &["register", "--user", "kim", "--constitution", "4"]);
    assert!(success);
    assert!(stdout.contains("already registered (소음인)"));
}

#[test]
fn test_register_rejects_unknown_constitution() {
    let (_tmp, config_path) = setup_test_env(None);

    let (_, stderr, success) =
        run_herb(&config_path, &["register", "--user", "kim", "--constitution", "pitta"]);
    assert!(!success);
    assert!(stderr.contains("unknown constitution"));
}

#[test]
fn test_history_empty() {
    let (_tmp, config_path) = setup_test_env(None);

    let (stdout, stderr, success) = run_herb(&config_path, &["history", "--user", "nobody"]);
    assert!(success, "history failed: {}", stderr);
    assert!(stdout.contains("No previous consultations."));
}

#[test]
fn test_ask_with_disabled_providers_falls_back() {
    let (_tmp, config_path) = setup_test_env(None);

    let (stdout, stderr, success) =
        run_herb(&config_path, &["ask", "--user", "lee", "dizziness"]);
    assert!(success, "ask failed: {}", stderr);
    assert!(stdout.contains("Sorry, something went wrong"));
    assert!(stderr.contains("embedding unavailable"));
    assert!(stderr.contains("generation unavailable"));

    // The fallback turn is still logged.
    let (stdout, _, _) = run_herb(&config_path, &["history", "--user", "lee"]);
    assert!(stdout.contains("dizziness"));
}

#[test]
fn test_invalid_config_rejected() {
    let tmp = TempDir::new().unwrap();
    let config_path = tmp.path().join("herb.toml");
    fs::write(&config_path, "[chat]\ntop_k = 0\n").unwrap();

    let (_, stderr, success) = run_herb(&config_path, &["history", "--user", "kim"]);
    assert!(!success);
    assert!(stderr.contains("top_k"));
}

#[test]
fn test_missing_api_key_reported() {
    let (tmp, config_path) = setup_test_env(Some("http://127.0.0.1:9"));
    fs::write(tmp.path().join("secrets.toml"), "").unwrap();

    let (_, stderr, success) = run_herb(&config_path, &["search", "cold"]);
    assert!(!success);
    assert!(stderr.contains("GOOGLE_API_KEY"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_search_and_ask_against_mock_gemini() {
    let url = mock_gemini().await;
    let (_tmp, config_path) = setup_test_env(Some(&url));

    let cfg = config_path.clone();
    let (stdout, stderr, success) = tokio::task::spawn_blocking(move || {
        run_herb(&cfg, &["search", "cold hands"])
    })
    .await
    .unwrap();
    assert!(success, "search failed: {}", stderr);
    assert!(stdout.contains("ginger"));
    assert!(stdout.contains("Caution: Avoid with high fever"));
    assert!(!stdout.contains("Peppermint"));

    let cfg = config_path.clone();
    let (stdout, stderr, success) = tokio::task::spawn_blocking(move || {
        run_herb(
            &cfg,
            &["ask", "--user", "kim", "--constitution", "1", "cold hands"],
        )
    })
    .await
    .unwrap();
    assert!(success, "ask failed: {}", stderr);
    assert!(stdout.contains("Brew ginger tea."));

    let cfg = config_path.clone();
    let (stdout, _, _) = tokio::task::spawn_blocking(move || {
        run_herb(&cfg, &["history", "--user", "kim"])
    })
    .await
    .unwrap();
    assert!(stdout.contains("cold hands -> Brew ginger tea."));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_chat_session_over_stdin() {
    let url = mock_gemini().await;
    let (_tmp, config_path) = setup_test_env(Some(&url));

    let cfg = config_path.clone();
    let (stdout, stderr, success) = tokio::task::spawn_blocking(move || {
        run_herb_with_input(
            &cfg,
            &["chat"],
            "yoon\n2\nbloating after meals\n/quit\n",
        )
    })
    .await
    .unwrap();
    assert!(success, "chat failed: {}", stderr);
    assert!(stdout.contains("first visit"));
    assert!(stdout.contains("Saved: 소양인"));
    assert!(stdout.contains("Brew peppermint tea."));

    let cfg = config_path.clone();
    let (stdout, _, success) = tokio::task::spawn_blocking(move || {
        run_herb_with_input(&cfg, &["chat", "--user", "yoon"], "/quit\n")
    })
    .await
    .unwrap();
    assert!(success);
    assert!(stdout.contains("Welcome back, yoon (소양인)"));
    assert!(stdout.contains("bloating after meals"));
}
