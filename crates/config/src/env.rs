//! Environment variable parsing and env-to-config merging.
//!
//! Env parsing is strict: a variable that is present but empty or malformed
//! fails fast instead of silently falling back to the file value. Secret
//! values never appear in error metadata.

use crate::schema::{SyncConfig, ValidatedSyncConfig};
use blob_sync_shared::{ErrorCode, ErrorEnvelope, REDACTED_VALUE, SecretString, is_secret_key};
use std::collections::BTreeMap;
use std::fmt;
use url::Url;

/// Env var: blob names per find-missing call.
pub const ENV_PROBE_BATCH_SIZE: &str = "BLOB_SYNC_PROBE_BATCH_SIZE";
/// Env var: short retry interval in ms.
pub const ENV_PROBE_RETRY_WAIT_MS: &str = "BLOB_SYNC_PROBE_RETRY_WAIT_MS";
/// Env var: patience before long retry in ms.
pub const ENV_PROBE_PATIENCE_MS: &str = "BLOB_SYNC_PROBE_PATIENCE_MS";
/// Env var: long retry interval in ms.
pub const ENV_LONG_RETRY_WAIT_MS: &str = "BLOB_SYNC_LONG_RETRY_WAIT_MS";
/// Env var: find-missing retry attempts.
pub const ENV_PROBE_RETRY_MAX_ATTEMPTS: &str = "BLOB_SYNC_PROBE_RETRY_MAX_ATTEMPTS";
/// Env var: largest uploadable content in bytes.
pub const ENV_UPLOAD_MAX_BLOB_SIZE_BYTES: &str = "BLOB_SYNC_UPLOAD_MAX_BLOB_SIZE_BYTES";
/// Env var: upload retry attempts.
pub const ENV_UPLOAD_RETRY_MAX_ATTEMPTS: &str = "BLOB_SYNC_UPLOAD_RETRY_MAX_ATTEMPTS";
/// Env var: blob service base URL.
pub const ENV_API_BASE_URL: &str = "BLOB_SYNC_API_BASE_URL";
/// Env var: blob service bearer token (secret).
pub const ENV_API_TOKEN: &str = "BLOB_SYNC_API_TOKEN";
/// Env var: blob service request timeout in ms.
pub const ENV_API_TIMEOUT_MS: &str = "BLOB_SYNC_API_TIMEOUT_MS";

const ALL_ENV_VARS: [&str; 10] = [
    ENV_PROBE_BATCH_SIZE,
    ENV_PROBE_RETRY_WAIT_MS,
    ENV_PROBE_PATIENCE_MS,
    ENV_LONG_RETRY_WAIT_MS,
    ENV_PROBE_RETRY_MAX_ATTEMPTS,
    ENV_UPLOAD_MAX_BLOB_SIZE_BYTES,
    ENV_UPLOAD_RETRY_MAX_ATTEMPTS,
    ENV_API_BASE_URL,
    ENV_API_TOKEN,
    ENV_API_TIMEOUT_MS,
];

/// Typed env-derived overrides for `SyncConfig`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncEnv {
    /// Override for `probe.batchSize`.
    pub probe_batch_size: Option<u32>,
    /// Override for `probe.retryWaitMs`.
    pub probe_retry_wait_ms: Option<u64>,
    /// Override for `probe.patienceMs`.
    pub probe_patience_ms: Option<u64>,
    /// Override for `probe.longRetryWaitMs`.
    pub long_retry_wait_ms: Option<u64>,
    /// Override for `probe.retry.maxAttempts`.
    pub probe_retry_max_attempts: Option<u32>,
    /// Override for `upload.maxBlobSizeBytes`.
    pub upload_max_blob_size_bytes: Option<u64>,
    /// Override for `upload.retry.maxAttempts`.
    pub upload_retry_max_attempts: Option<u32>,
    /// Override for `api.baseUrl`.
    pub api_base_url: Option<Box<str>>,
    /// Override for `api.apiToken`.
    pub api_token: Option<SecretString>,
    /// Override for `api.timeoutMs`.
    pub api_timeout_ms: Option<u64>,
}

impl SyncEnv {
    /// Parse env overrides from a key/value map (useful for tests and fixtures).
    pub fn from_map(map: &BTreeMap<String, String>) -> Result<Self, EnvParseError> {
        Ok(Self {
            probe_batch_size: parse_optional_u32(map, ENV_PROBE_BATCH_SIZE)?,
            probe_retry_wait_ms: parse_optional_u64(map, ENV_PROBE_RETRY_WAIT_MS)?,
            probe_patience_ms: parse_optional_u64(map, ENV_PROBE_PATIENCE_MS)?,
            long_retry_wait_ms: parse_optional_u64(map, ENV_LONG_RETRY_WAIT_MS)?,
            probe_retry_max_attempts: parse_optional_u32(map, ENV_PROBE_RETRY_MAX_ATTEMPTS)?,
            upload_max_blob_size_bytes: parse_optional_u64(map, ENV_UPLOAD_MAX_BLOB_SIZE_BYTES)?,
            upload_retry_max_attempts: parse_optional_u32(map, ENV_UPLOAD_RETRY_MAX_ATTEMPTS)?,
            api_base_url: parse_optional_url_string(map, ENV_API_BASE_URL)?,
            api_token: parse_optional_secret(map, ENV_API_TOKEN)?,
            api_timeout_ms: parse_optional_u64(map, ENV_API_TIMEOUT_MS)?,
        })
    }

    /// Parse env overrides from the current process environment.
    pub fn from_std_env() -> Result<Self, EnvParseError> {
        let mut map = BTreeMap::new();
        for name in ALL_ENV_VARS {
            if let Ok(value) = std::env::var(name) {
                map.insert(name.to_string(), value);
            }
        }

        Self::from_map(&map)
    }

    /// Returns true when no override is set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Apply env overrides to a base config (env wins over file/default values).
pub fn apply_env_overrides(
    base: SyncConfig,
    env: &SyncEnv,
) -> Result<ValidatedSyncConfig, ErrorEnvelope> {
    let mut config = base;
    set(&mut config.probe.batch_size, env.probe_batch_size);
    set(&mut config.probe.retry_wait_ms, env.probe_retry_wait_ms);
    set(&mut config.probe.patience_ms, env.probe_patience_ms);
    set(&mut config.probe.long_retry_wait_ms, env.long_retry_wait_ms);
    set(
        &mut config.probe.retry.max_attempts,
        env.probe_retry_max_attempts,
    );
    set(
        &mut config.upload.max_blob_size_bytes,
        env.upload_max_blob_size_bytes,
    );
    set(
        &mut config.upload.retry.max_attempts,
        env.upload_retry_max_attempts,
    );
    set(&mut config.api.timeout_ms, env.api_timeout_ms);
    if let Some(base_url) = env.api_base_url.as_deref() {
        config.api.base_url = Some(base_url.to_owned());
    }
    if let Some(token) = env.api_token.as_ref() {
        config.api.api_token = Some(token.expose().to_owned());
    }

    config.validate_and_normalize().map_err(Into::into)
}

fn set<T: Copy>(target: &mut T, value: Option<T>) {
    if let Some(value) = value {
        *target = value;
    }
}

/// Validation failures when parsing env variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnvParseError {
    /// An env var was present but empty after trimming.
    EmptyValue {
        /// Env var name.
        var: &'static str,
    },
    /// A secret env var was present but empty after trimming.
    EmptySecret {
        /// Env var name.
        var: &'static str,
    },
    /// Integer env var had an invalid value.
    InvalidInt {
        /// Env var name.
        var: &'static str,
        /// Raw input value.
        value: String,
    },
    /// URL env var had an invalid value.
    InvalidUrl {
        /// Env var name.
        var: &'static str,
        /// Raw input value.
        value: String,
    },
}

impl EnvParseError {
    fn error_code(&self) -> ErrorCode {
        match self {
            Self::EmptyValue { .. } | Self::EmptySecret { .. } => {
                ErrorCode::new("config", "empty_env_var")
            },
            Self::InvalidInt { .. } => ErrorCode::new("config", "invalid_env_int"),
            Self::InvalidUrl { .. } => ErrorCode::new("config", "invalid_env_url"),
        }
    }
}

impl fmt::Display for EnvParseError {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyValue { var } | Self::EmptySecret { var } => {
                write!(formatter, "{var} must be non-empty")
            },
            Self::InvalidInt { var, .. } => write!(formatter, "{var} must be an integer"),
            Self::InvalidUrl { var, .. } => write!(formatter, "{var} must be an http(s) URL"),
        }
    }
}

impl std::error::Error for EnvParseError {}

impl From<EnvParseError> for ErrorEnvelope {
    fn from(error: EnvParseError) -> Self {
        let code = error.error_code();
        let message = error.to_string();
        let envelope = Self::expected(code, message);

        match error {
            EnvParseError::EmptyValue { var } | EnvParseError::EmptySecret { var } => {
                envelope.with_metadata("env_var", var)
            },
            EnvParseError::InvalidInt { var, value } | EnvParseError::InvalidUrl { var, value } => {
                envelope
                    .with_metadata("env_var", var)
                    .with_metadata("value", redact_value(var, &value))
            },
        }
    }
}

fn parse_optional_secret(
    map: &BTreeMap<String, String>,
    var: &'static str,
) -> Result<Option<SecretString>, EnvParseError> {
    let Some(raw) = map.get(var) else {
        return Ok(None);
    };

    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(EnvParseError::EmptySecret { var });
    }

    Ok(Some(SecretString::new(trimmed.to_owned())))
}

fn parse_optional_u64(
    map: &BTreeMap<String, String>,
    var: &'static str,
) -> Result<Option<u64>, EnvParseError> {
    let Some(raw) = map.get(var) else {
        return Ok(None);
    };
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(EnvParseError::EmptyValue { var });
    }

    trimmed
        .parse::<u64>()
        .map(Some)
        .map_err(|_| EnvParseError::InvalidInt {
            var,
            value: raw.clone(),
        })
}

fn parse_optional_u32(
    map: &BTreeMap<String, String>,
    var: &'static str,
) -> Result<Option<u32>, EnvParseError> {
    let Some(raw) = map.get(var) else {
        return Ok(None);
    };
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(EnvParseError::EmptyValue { var });
    }

    trimmed
        .parse::<u32>()
        .map(Some)
        .map_err(|_| EnvParseError::InvalidInt {
            var,
            value: raw.clone(),
        })
}

fn parse_optional_url_string(
    map: &BTreeMap<String, String>,
    var: &'static str,
) -> Result<Option<Box<str>>, EnvParseError> {
    let Some(raw) = map.get(var) else {
        return Ok(None);
    };
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(EnvParseError::EmptyValue { var });
    }

    let parsed = Url::parse(trimmed).map_err(|_| EnvParseError::InvalidUrl {
        var,
        value: raw.clone(),
    })?;
    if parsed.scheme() != "http" && parsed.scheme() != "https" {
        return Err(EnvParseError::InvalidUrl {
            var,
            value: raw.clone(),
        });
    }

    Ok(Some(trimmed.to_owned().into_boxed_str()))
}

fn redact_value(var: &str, value: &str) -> String {
    if is_secret_key(var) {
        REDACTED_VALUE.to_string()
    } else {
        value.to_string()
    }
}
