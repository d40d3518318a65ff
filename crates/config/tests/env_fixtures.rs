//! Integration tests for env parsing and env-to-config merging.

use blob_sync_config::{EnvParseError, SyncConfig, SyncEnv, apply_env_overrides};
use blob_sync_shared::{ErrorCode, ErrorEnvelope};
use std::collections::BTreeMap;
use std::error::Error;
use std::fs;
use std::path::{Path, PathBuf};

fn read_env_map(relative: &str) -> Result<BTreeMap<String, String>, Box<dyn Error>> {
    let manifest_dir = Path::new(env!("CARGO_MANIFEST_DIR"));
    let workspace_root: PathBuf = manifest_dir
        .parent()
        .and_then(Path::parent)
        .map(Path::to_path_buf)
        .unwrap_or_else(|| manifest_dir.to_path_buf());
    let path = workspace_root
        .join("crates")
        .join("testkit")
        .join("fixtures")
        .join(relative);
    let contents = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&contents)?)
}

#[test]
fn env_fixture_merges_into_effective_config() -> Result<(), Box<dyn Error>> {
    let env = SyncEnv::from_map(&read_env_map("env/sync-env.valid.json")?)?;
    let config = apply_env_overrides(SyncConfig::default(), &env)?;

    assert_eq!(config.probe.batch_size, 50);
    assert_eq!(config.probe.retry_wait_ms, 750);
    assert_eq!(config.upload.max_blob_size_bytes, 4_096);
    assert_eq!(config.api.base_url.as_deref(), Some("https://env.example.test"));
    assert_eq!(config.api.api_token.as_deref(), Some("env-token"));
    assert_eq!(config.api.timeout_ms, 5_000);
    Ok(())
}

#[test]
fn invalid_int_fixture_is_rejected() -> Result<(), Box<dyn Error>> {
    let error = SyncEnv::from_map(&read_env_map("env/sync-env.invalid-int.json")?)
        .err()
        .ok_or("expected parse error")?;
    assert!(matches!(error, EnvParseError::InvalidInt { .. }));

    let envelope = ErrorEnvelope::from(error);
    assert_eq!(envelope.code, ErrorCode::new("config", "invalid_env_int"));
    assert_eq!(
        envelope.metadata.get("env_var").map(String::as_str),
        Some("BLOB_SYNC_PROBE_PATIENCE_MS")
    );
    Ok(())
}
