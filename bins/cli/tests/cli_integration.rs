//! CLI integration tests.

use serde_json::{Value, json};
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

type TestResult = Result<(), Box<dyn std::error::Error>>;

fn run_cli_clean_env(args: &[&str]) -> std::io::Result<Output> {
    let mut command = Command::new(env!("CARGO_BIN_EXE_blob-sync"));
    command.args(args);
    scrub_scoped_env(&mut command);
    command.output()
}

fn scrub_scoped_env(command: &mut Command) {
    for (key, _) in std::env::vars() {
        if key.starts_with("BLOB_SYNC_") {
            command.env_remove(key);
        }
    }
}

fn fixture(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("../../crates/testkit/fixtures/config")
        .join(name)
}

fn scratch_dir(name: &str) -> std::io::Result<PathBuf> {
    let dir = std::env::temp_dir().join(format!("blob-sync-cli-{name}-{}", std::process::id()));
    if dir.exists() {
        std::fs::remove_dir_all(&dir)?;
    }
    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}

fn path_arg(path: &Path) -> Result<&str, Box<dyn std::error::Error>> {
    path.to_str().ok_or_else(|| "non-utf8 path".into())
}

/// Accepts every blob in a batch-upload request.
struct EchoUploads;

impl Respond for EchoUploads {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let names: Vec<Value> = serde_json::from_slice::<Value>(&request.body)
            .ok()
            .and_then(|body| body.get("blobs").and_then(Value::as_array).cloned())
            .unwrap_or_default()
            .iter()
            .filter_map(|blob| blob.get("blob_name").cloned())
            .collect();
        ResponseTemplate::new(200).set_body_json(json!({ "blob_names": names }))
    }
}

/// Reports every probed blob as unknown on the first call, indexed afterwards.
#[derive(Default)]
struct UnknownOnce {
    calls: std::sync::atomic::AtomicUsize,
}

impl Respond for UnknownOnce {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let first = self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst) == 0;
        let unknown = if first {
            serde_json::from_slice::<Value>(&request.body)
                .ok()
                .and_then(|body| body.get("mem_object_names").cloned())
                .unwrap_or_else(|| json!([]))
        } else {
            json!([])
        };
        ResponseTemplate::new(200).set_body_json(json!({
            "unknown_memory_names": unknown,
            "nonindexed_blob_names": []
        }))
    }
}

#[test]
fn version_prints_binary_name() -> TestResult {
    let output = run_cli_clean_env(&["--version"])?;
    assert!(output.status.success());
    assert!(String::from_utf8(output.stdout)?.starts_with("blob-sync "));
    Ok(())
}

#[test]
fn config_show_merges_file_over_defaults() -> TestResult {
    let config = fixture("sync-config.valid.json");
    let output = run_cli_clean_env(&["config", "show", "--config", path_arg(&config)?])?;

    assert_eq!(output.status.code(), Some(0));
    let value: Value = serde_json::from_slice(&output.stdout)?;
    assert_eq!(value["version"], 1);
    assert_eq!(value["probe"]["batchSize"], 250);
    assert_eq!(value["upload"]["maxBlobSizeBytes"], 524_288);
    Ok(())
}

#[test]
fn config_show_redacts_token_from_env() -> TestResult {
    let mut command = Command::new(env!("CARGO_BIN_EXE_blob-sync"));
    command.args(["config", "show"]);
    scrub_scoped_env(&mut command);
    command.env("BLOB_SYNC_API_TOKEN", "super-secret-token");
    let output = command.output()?;

    assert_eq!(output.status.code(), Some(0));
    let stdout = String::from_utf8(output.stdout)?;
    assert!(!stdout.contains("super-secret-token"));
    Ok(())
}

#[test]
fn config_show_rejects_unsupported_version() -> TestResult {
    let config = fixture("sync-config.invalid-version.json");
    let output = run_cli_clean_env(&["config", "show", "--config", path_arg(&config)?])?;

    assert_eq!(output.status.code(), Some(2));
    assert!(String::from_utf8(output.stderr)?.starts_with("error:"));
    Ok(())
}

#[test]
fn sync_without_base_url_is_invalid_input() -> TestResult {
    let root = scratch_dir("no-url")?;
    std::fs::write(root.join("a.txt"), "hello")?;
    let output = run_cli_clean_env(&["sync", "--root", path_arg(&root)?, "a.txt"])?;

    assert_eq!(output.status.code(), Some(2));
    std::fs::remove_dir_all(root)?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn sync_uploads_files_and_waits_for_index() -> TestResult {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/batch-upload"))
        .respond_with(EchoUploads)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/find-missing"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "unknown_memory_names": [],
            "nonindexed_blob_names": []
        })))
        .mount(&server)
        .await;

    let root = scratch_dir("sync")?;
    std::fs::create_dir_all(root.join("src"))?;
    std::fs::write(root.join("src/lib.rs"), "pub fn answer() -> u32 { 42 }")?;
    let root_arg = path_arg(&root)?.to_owned();
    let base_url = server.uri();

    let output = tokio::task::spawn_blocking(move || {
        let mut command = Command::new(env!("CARGO_BIN_EXE_blob-sync"));
        scrub_scoped_env(&mut command);
        command
            .env("BLOB_SYNC_API_BASE_URL", base_url)
            .args([
                "--output",
                "json",
                "sync",
                "--root",
                &root_arg,
                "--wait-ms",
                "10000",
                "src/lib.rs",
                "missing.rs",
            ])
            .output()
    })
    .await??;

    let summary: Value = serde_json::from_slice(&output.stdout)?;
    assert_eq!(output.status.code(), Some(0), "summary: {summary}");
    assert_eq!(summary["status"], "ok");
    assert_eq!(summary["indexed"], json!(["src/lib.rs"]));
    assert!(summary["skipped"].get("missing.rs").is_some());
    std::fs::remove_dir_all(root)?;
    Ok(())
}

async fn run_sync_against(base_url: String, args: Vec<String>) -> std::io::Result<Output> {
    tokio::task::spawn_blocking(move || {
        let mut command = Command::new(env!("CARGO_BIN_EXE_blob-sync"));
        scrub_scoped_env(&mut command);
        command
            .env("BLOB_SYNC_API_BASE_URL", base_url)
            .args(args)
            .output()
    })
    .await
    .map_err(std::io::Error::other)?
}

async fn requests_to(server: &MockServer, endpoint: &str) -> usize {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .filter(|request| request.url.path() == endpoint)
        .count()
}

#[tokio::test(flavor = "multi_thread")]
async fn sync_rediscovers_a_rejected_upload_through_find_missing() -> TestResult {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/batch-upload"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({ "message": "busy" })))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/batch-upload"))
        .respond_with(EchoUploads)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/find-missing"))
        .respond_with(UnknownOnce::default())
        .mount(&server)
        .await;

    let root = scratch_dir("rejected")?;
    std::fs::write(root.join("a.rs"), "fn a() {}")?;
    let config = root.join("blob-sync.json");
    std::fs::write(&config, r#"{"version":1,"probe":{"retryWaitMs":100}}"#)?;
    let args = vec![
        "--output".to_owned(),
        "json".to_owned(),
        "sync".to_owned(),
        "--root".to_owned(),
        path_arg(&root)?.to_owned(),
        "--config".to_owned(),
        path_arg(&config)?.to_owned(),
        "--wait-ms".to_owned(),
        "10000".to_owned(),
        "a.rs".to_owned(),
    ];

    let output = run_sync_against(server.uri(), args).await?;
    let summary: Value = serde_json::from_slice(&output.stdout)?;
    assert_eq!(output.status.code(), Some(0), "summary: {summary}");
    assert_eq!(summary["indexed"], json!(["a.rs"]));
    assert!(requests_to(&server, "/find-missing").await >= 1);
    assert!(requests_to(&server, "/batch-upload").await >= 2);
    std::fs::remove_dir_all(root)?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn sync_indexes_more_files_than_the_event_buffer_holds() -> TestResult {
    const FILES: usize = 300;
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/batch-upload"))
        .respond_with(EchoUploads)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/find-missing"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "unknown_memory_names": [],
            "nonindexed_blob_names": []
        })))
        .mount(&server)
        .await;

    let root = scratch_dir("many")?;
    let mut args = vec![
        "--output".to_owned(),
        "json".to_owned(),
        "sync".to_owned(),
        "--root".to_owned(),
        path_arg(&root)?.to_owned(),
        "--wait-ms".to_owned(),
        "20000".to_owned(),
    ];
    for index in 0..FILES {
        let file = format!("f{index}.txt");
        std::fs::write(root.join(&file), format!("file {index}"))?;
        args.push(file);
    }

    let output = run_sync_against(server.uri(), args).await?;
    let summary: Value = serde_json::from_slice(&output.stdout)?;
    assert_eq!(output.status.code(), Some(0), "pending: {}", summary["pending"]);
    assert_eq!(summary["indexed"].as_array().map(Vec::len), Some(FILES));
    std::fs::remove_dir_all(root)?;
    Ok(())
}
