//! Config loading helpers (env + file + overrides).
//!
//! The loader is responsible for deterministic merge order and surfacing
//! user-facing errors as typed `ErrorEnvelope`s.

use crate::{SyncConfig, SyncEnv, ValidatedSyncConfig, apply_env_overrides};
use blob_sync_shared::{ErrorClass, ErrorCode, ErrorEnvelope, REDACTED_VALUE};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConfigFormat {
    Json,
    Toml,
}

/// Load the sync config from sources using a deterministic precedence order.
///
/// Precedence (highest wins):
/// - env overrides (`SyncEnv`)
/// - overrides JSON (partial config)
/// - config JSON (file content)
/// - defaults (`SyncConfig::default()`)
pub fn load_sync_config_from_sources(
    config_json: Option<&str>,
    overrides_json: Option<&str>,
    env: &SyncEnv,
) -> Result<ValidatedSyncConfig, ErrorEnvelope> {
    let mut config = match config_json {
        None => SyncConfig::default(),
        Some(input) => parse_config_unvalidated(input, ConfigFormat::Json)?,
    };

    if let Some(input) = overrides_json {
        let overrides = parse_overrides_json(input)?;
        apply_overrides(&mut config, &overrides);
    }

    // env is applied last and also validates/normalizes the resulting config.
    apply_env_overrides(config, env)
}

/// Load the sync config from an optional file path (`.json` or `.toml`).
pub fn load_sync_config_from_path(
    config_path: Option<&Path>,
    overrides_json: Option<&str>,
    env: &SyncEnv,
) -> Result<ValidatedSyncConfig, ErrorEnvelope> {
    let mut config = match config_path {
        None => SyncConfig::default(),
        Some(path) => {
            let config_text = read_config_file(path)?;
            let format = detect_config_format(path)?;
            parse_config_unvalidated(&config_text, format)?
        },
    };

    if let Some(input) = overrides_json {
        let overrides = parse_overrides_json(input)?;
        apply_overrides(&mut config, &overrides);
    }

    apply_env_overrides(config, env)
}

/// Load the sync config from std env and an optional file path.
pub fn load_sync_config_std_env(
    config_path: Option<&Path>,
    overrides_json: Option<&str>,
) -> Result<ValidatedSyncConfig, ErrorEnvelope> {
    let env = SyncEnv::from_std_env().map_err(ErrorEnvelope::from)?;
    load_sync_config_from_path(config_path, overrides_json, &env)
}

/// Copy of the config with secrets replaced, for display.
#[must_use]
pub fn redacted_for_display(config: &SyncConfig) -> SyncConfig {
    let mut redacted = config.clone();
    if redacted.api.api_token.is_some() {
        redacted.api.api_token = Some(REDACTED_VALUE.to_string());
    }
    redacted
}

/// Serialize the config as deterministic pretty JSON (with trailing newline).
pub fn to_pretty_json(config: &SyncConfig) -> Result<String, ErrorEnvelope> {
    let mut output = serde_json::to_string_pretty(config).map_err(|error| {
        ErrorEnvelope::unexpected(
            ErrorCode::internal(),
            format!("failed to serialize config: {error}"),
            ErrorClass::NonRetriable,
        )
    })?;
    output.push('\n');
    Ok(output)
}

/// Serialize the config as deterministic pretty TOML (with trailing newline).
pub fn to_pretty_toml(config: &SyncConfig) -> Result<String, ErrorEnvelope> {
    let mut output = toml::to_string_pretty(config).map_err(|error| {
        ErrorEnvelope::unexpected(
            ErrorCode::new("config", "serialize_toml"),
            format!("failed to serialize config TOML: {error}"),
            ErrorClass::NonRetriable,
        )
    })?;
    output.push('\n');
    Ok(output)
}

fn parse_config_unvalidated(input: &str, format: ConfigFormat) -> Result<SyncConfig, ErrorEnvelope> {
    match format {
        ConfigFormat::Json => serde_json::from_str(input).map_err(|error| {
            ErrorEnvelope::expected(
                ErrorCode::new("config", "invalid_json"),
                format!("invalid config JSON: {error}"),
            )
            .with_metadata("source", "config")
        }),
        ConfigFormat::Toml => toml::from_str(input).map_err(|error| {
            ErrorEnvelope::expected(
                ErrorCode::new("config", "invalid_toml"),
                format!("invalid config TOML: {error}"),
            )
            .with_metadata("source", "config")
        }),
    }
}

fn parse_overrides_json(input: &str) -> Result<SyncConfigOverrides, ErrorEnvelope> {
    serde_json::from_str(input).map_err(|error| {
        ErrorEnvelope::expected(
            ErrorCode::new("config", "invalid_json"),
            format!("invalid overrides JSON: {error}"),
        )
        .with_metadata("source", "overrides")
    })
}

fn read_config_file(path: &Path) -> Result<String, ErrorEnvelope> {
    std::fs::read_to_string(path).map_err(|error| {
        let code = match error.kind() {
            std::io::ErrorKind::NotFound => ErrorCode::new("config", "config_file_not_found"),
            std::io::ErrorKind::PermissionDenied => {
                ErrorCode::new("config", "config_file_permission_denied")
            },
            _ => ErrorCode::new("config", "config_file_io"),
        };

        ErrorEnvelope::expected(code, format!("failed to read config file: {error}"))
            .with_metadata("path", path.to_string_lossy().to_string())
    })
}

fn detect_config_format(path: &Path) -> Result<ConfigFormat, ErrorEnvelope> {
    let ext = path
        .extension()
        .and_then(|value| value.to_str())
        .map(str::to_ascii_lowercase);
    match ext.as_deref() {
        None | Some("json") => Ok(ConfigFormat::Json),
        Some("toml") => Ok(ConfigFormat::Toml),
        Some(other) => Err(ErrorEnvelope::expected(
            ErrorCode::new("config", "unsupported_format"),
            "unsupported config format; use .json or .toml",
        )
        .with_metadata("extension", other.to_string())),
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields, default)]
struct SyncConfigOverrides {
    version: Option<u32>,
    probe: ProbeConfigOverrides,
    upload: UploadConfigOverrides,
    api: ApiConfigOverrides,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields, default)]
struct ProbeConfigOverrides {
    batch_size: Option<u32>,
    retry_wait_ms: Option<u64>,
    patience_ms: Option<u64>,
    long_retry_wait_ms: Option<u64>,
    retry: RetryConfigOverrides,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields, default)]
struct UploadConfigOverrides {
    max_blob_size_bytes: Option<u64>,
    retry: RetryConfigOverrides,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields, default)]
struct ApiConfigOverrides {
    base_url: Option<String>,
    api_token: Option<String>,
    timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields, default)]
struct RetryConfigOverrides {
    max_attempts: Option<u32>,
    base_delay_ms: Option<u64>,
    max_delay_ms: Option<u64>,
    jitter_ratio_pct: Option<u32>,
}

fn apply_overrides(config: &mut SyncConfig, overrides: &SyncConfigOverrides) {
    set(&mut config.version, overrides.version);

    let probe = &overrides.probe;
    set(&mut config.probe.batch_size, probe.batch_size);
    set(&mut config.probe.retry_wait_ms, probe.retry_wait_ms);
    set(&mut config.probe.patience_ms, probe.patience_ms);
    set(&mut config.probe.long_retry_wait_ms, probe.long_retry_wait_ms);
    apply_retry_overrides(&mut config.probe.retry, &probe.retry);

    let upload = &overrides.upload;
    set(&mut config.upload.max_blob_size_bytes, upload.max_blob_size_bytes);
    apply_retry_overrides(&mut config.upload.retry, &upload.retry);

    let api = &overrides.api;
    set(&mut config.api.timeout_ms, api.timeout_ms);
    if let Some(base_url) = api.base_url.as_ref() {
        config.api.base_url = Some(base_url.clone());
    }
    if let Some(token) = api.api_token.as_ref() {
        config.api.api_token = Some(token.clone());
    }
}

fn apply_retry_overrides(retry: &mut crate::RetryConfig, overrides: &RetryConfigOverrides) {
    set(&mut retry.max_attempts, overrides.max_attempts);
    set(&mut retry.base_delay_ms, overrides.base_delay_ms);
    set(&mut retry.max_delay_ms, overrides.max_delay_ms);
    set(&mut retry.jitter_ratio_pct, overrides.jitter_ratio_pct);
}

fn set<T: Copy>(target: &mut T, value: Option<T>) {
    if let Some(value) = value {
        *target = value;
    }
}
