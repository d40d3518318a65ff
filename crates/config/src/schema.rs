//! Sync configuration schema, defaults, validation, and normalization.
//!
//! - Deserialization uses `serde` (JSON or TOML).
//! - Validation is manual and returns typed errors mapped to `ErrorEnvelope`.
//! - Numeric limits are carried downstream as bounded integers.

use blob_sync_shared::{BoundedU32, BoundedU64, ErrorCode, ErrorEnvelope, RetryPolicy};
use serde::{Deserialize, Serialize};
use std::fmt;
use url::Url;

/// Sanitizes a URL for error messages by stripping credentials.
fn sanitize_url_for_error(url: &str) -> String {
    match Url::parse(url) {
        Ok(mut parsed) => {
            if parsed.password().is_some() || !parsed.username().is_empty() {
                if parsed.set_username("").is_err() {
                    return "[invalid url: invalid username]".to_string();
                }
                if parsed.set_password(None).is_err() {
                    return "[invalid url: invalid password]".to_string();
                }
            }
            parsed.to_string()
        },
        Err(error) => format!("[invalid url: {error}]"),
    }
}

/// Current supported configuration schema version.
pub const CURRENT_CONFIG_VERSION: u32 = 1;

/// Default number of blob names per find-missing call.
pub const DEFAULT_PROBE_BATCH_SIZE: u32 = 1_000;
/// Default interval of the short retry queue (ms).
pub const DEFAULT_PROBE_RETRY_WAIT_MS: u64 = 5_000;
/// Default time a blob may wait before moving to the long retry queue (ms).
pub const DEFAULT_PROBE_PATIENCE_MS: u64 = 120_000;
/// Default interval of the long retry queue (ms).
pub const DEFAULT_LONG_RETRY_WAIT_MS: u64 = 60_000;
/// Default largest file content that is uploaded (bytes).
pub const DEFAULT_MAX_BLOB_SIZE_BYTES: u64 = 1_048_576;

const PROBE_BATCH_SIZE_MIN: u32 = 1;
const PROBE_BATCH_SIZE_MAX: u32 = 10_000;
const PROBE_RETRY_WAIT_MIN_MS: u64 = 10;
const PROBE_RETRY_WAIT_MAX_MS: u64 = 600_000;
const PROBE_PATIENCE_MIN_MS: u64 = 0;
const PROBE_PATIENCE_MAX_MS: u64 = 86_400_000;
const LONG_RETRY_WAIT_MIN_MS: u64 = 10;
const LONG_RETRY_WAIT_MAX_MS: u64 = 3_600_000;

const MAX_BLOB_SIZE_MIN_BYTES: u64 = 1;
const MAX_BLOB_SIZE_MAX_BYTES: u64 = 100_000_000;

const API_TIMEOUT_MIN_MS: u64 = 100;
const API_TIMEOUT_MAX_MS: u64 = 600_000;

const RETRY_MAX_ATTEMPTS_MIN: u32 = 1;
const RETRY_MAX_ATTEMPTS_MAX: u32 = 10;
const RETRY_BASE_DELAY_MIN_MS: u64 = 1;
const RETRY_BASE_DELAY_MAX_MS: u64 = 60_000;
const RETRY_MAX_DELAY_MIN_MS: u64 = 1;
const RETRY_MAX_DELAY_MAX_MS: u64 = 600_000;
const RETRY_JITTER_RATIO_PCT_MIN: u32 = 0;
const RETRY_JITTER_RATIO_PCT_MAX: u32 = 100;

/// Top-level sync configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields, default)]
pub struct SyncConfig {
    /// Schema version for forward-compatible migrations.
    pub version: u32,
    /// Find-missing probe and retry cadence.
    pub probe: ProbeConfig,
    /// Background upload settings.
    pub upload: UploadConfig,
    /// Remote blob service settings.
    pub api: ApiConfig,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            version: CURRENT_CONFIG_VERSION,
            probe: ProbeConfig::default(),
            upload: UploadConfig::default(),
            api: ApiConfig::default(),
        }
    }
}

impl SyncConfig {
    /// Validate and normalize the config.
    pub fn validate_and_normalize(mut self) -> Result<ValidatedSyncConfig, ConfigSchemaError> {
        self.validate_version()?;

        self.probe.retry.validate("probe.retry")?;
        self.upload.retry.validate("upload.retry")?;
        self.api.normalize();
        self.api.validate()?;

        let limits = ConfigLimits::new(&self)?;
        Ok(ValidatedSyncConfig { raw: self, limits })
    }

    const fn validate_version(&self) -> Result<(), ConfigSchemaError> {
        if self.version != CURRENT_CONFIG_VERSION {
            return Err(ConfigSchemaError::UnsupportedVersion {
                found: self.version,
                supported: CURRENT_CONFIG_VERSION,
            });
        }
        Ok(())
    }
}

/// Validated config wrapper carrying bounded numeric values.
#[derive(Debug, Clone)]
pub struct ValidatedSyncConfig {
    raw: SyncConfig,
    limits: ConfigLimits,
}

impl ValidatedSyncConfig {
    /// Access validated numeric bounds.
    #[must_use]
    pub const fn limits(&self) -> &ConfigLimits {
        &self.limits
    }

    /// Borrow the raw config.
    #[must_use]
    pub const fn as_ref(&self) -> &SyncConfig {
        &self.raw
    }

    /// Consume the wrapper and return the raw config.
    #[must_use]
    pub fn into_inner(self) -> SyncConfig {
        self.raw
    }
}

impl AsRef<SyncConfig> for ValidatedSyncConfig {
    fn as_ref(&self) -> &SyncConfig {
        &self.raw
    }
}

impl std::ops::Deref for ValidatedSyncConfig {
    type Target = SyncConfig;

    fn deref(&self) -> &Self::Target {
        &self.raw
    }
}

/// Validated numeric limits derived from the config.
#[derive(Debug, Clone, Copy)]
pub struct ConfigLimits {
    /// Blob names per find-missing call.
    pub probe_batch_size: BoundedU32<PROBE_BATCH_SIZE_MIN, PROBE_BATCH_SIZE_MAX>,
    /// Short retry interval (ms).
    pub probe_retry_wait_ms: BoundedU64<PROBE_RETRY_WAIT_MIN_MS, PROBE_RETRY_WAIT_MAX_MS>,
    /// Patience before escalating to the long retry queue (ms).
    pub probe_patience_ms: BoundedU64<PROBE_PATIENCE_MIN_MS, PROBE_PATIENCE_MAX_MS>,
    /// Long retry interval (ms).
    pub long_retry_wait_ms: BoundedU64<LONG_RETRY_WAIT_MIN_MS, LONG_RETRY_WAIT_MAX_MS>,
    /// Largest uploadable content (bytes).
    pub max_blob_size_bytes: BoundedU64<MAX_BLOB_SIZE_MIN_BYTES, MAX_BLOB_SIZE_MAX_BYTES>,
    /// HTTP request timeout (ms).
    pub api_timeout_ms: BoundedU64<API_TIMEOUT_MIN_MS, API_TIMEOUT_MAX_MS>,
}

impl ConfigLimits {
    fn new(config: &SyncConfig) -> Result<Self, ConfigSchemaError> {
        Ok(Self {
            probe_batch_size: bounded_u32(
                "probe",
                "batchSize",
                config.probe.batch_size,
                PROBE_BATCH_SIZE_MIN,
                PROBE_BATCH_SIZE_MAX,
            )?,
            probe_retry_wait_ms: bounded_u64(
                "probe",
                "retryWaitMs",
                config.probe.retry_wait_ms,
                PROBE_RETRY_WAIT_MIN_MS,
                PROBE_RETRY_WAIT_MAX_MS,
            )?,
            probe_patience_ms: bounded_u64(
                "probe",
                "patienceMs",
                config.probe.patience_ms,
                PROBE_PATIENCE_MIN_MS,
                PROBE_PATIENCE_MAX_MS,
            )?,
            long_retry_wait_ms: bounded_u64(
                "probe",
                "longRetryWaitMs",
                config.probe.long_retry_wait_ms,
                LONG_RETRY_WAIT_MIN_MS,
                LONG_RETRY_WAIT_MAX_MS,
            )?,
            max_blob_size_bytes: bounded_u64(
                "upload",
                "maxBlobSizeBytes",
                config.upload.max_blob_size_bytes,
                MAX_BLOB_SIZE_MIN_BYTES,
                MAX_BLOB_SIZE_MAX_BYTES,
            )?,
            api_timeout_ms: bounded_u64(
                "api",
                "timeoutMs",
                config.api.timeout_ms,
                API_TIMEOUT_MIN_MS,
                API_TIMEOUT_MAX_MS,
            )?,
        })
    }
}

/// Parse a sync config from a JSON string, applying validation and normalization.
pub fn parse_sync_config_json(input: &str) -> Result<ValidatedSyncConfig, ErrorEnvelope> {
    let config: SyncConfig = serde_json::from_str(input).map_err(|error| {
        ErrorEnvelope::expected(
            ErrorCode::new("config", "invalid_json"),
            format!("invalid config JSON: {error}"),
        )
    })?;

    config.validate_and_normalize().map_err(Into::into)
}

/// Parse a sync config from a TOML string, applying validation and normalization.
pub fn parse_sync_config_toml(input: &str) -> Result<ValidatedSyncConfig, ErrorEnvelope> {
    let config: SyncConfig = toml::from_str(input).map_err(|error| {
        ErrorEnvelope::expected(
            ErrorCode::new("config", "invalid_toml"),
            format!("invalid config TOML: {error}"),
        )
    })?;

    config.validate_and_normalize().map_err(Into::into)
}

/// Probe cadence for unknown/nonindexed blobs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields, default)]
pub struct ProbeConfig {
    /// Blob names per find-missing call.
    pub batch_size: u32,
    /// Short retry interval (ms).
    pub retry_wait_ms: u64,
    /// How long a blob stays on the short retry queue (ms).
    pub patience_ms: u64,
    /// Long retry interval (ms).
    pub long_retry_wait_ms: u64,
    /// Backoff for a single find-missing call.
    pub retry: RetryConfig,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_PROBE_BATCH_SIZE,
            retry_wait_ms: DEFAULT_PROBE_RETRY_WAIT_MS,
            patience_ms: DEFAULT_PROBE_PATIENCE_MS,
            long_retry_wait_ms: DEFAULT_LONG_RETRY_WAIT_MS,
            retry: RetryConfig::default(),
        }
    }
}

/// Background upload settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields, default)]
pub struct UploadConfig {
    /// Content larger than this is never uploaded (bytes).
    pub max_blob_size_bytes: u64,
    /// Backoff for a single upload call.
    pub retry: RetryConfig,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_blob_size_bytes: DEFAULT_MAX_BLOB_SIZE_BYTES,
            retry: RetryConfig::default(),
        }
    }
}

/// Remote blob service settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields, default)]
pub struct ApiConfig {
    /// Service base URL (`http` or `https`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    /// Bearer token sent with every request.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_token: Option<String>,
    /// Per-request timeout (ms).
    pub timeout_ms: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            api_token: None,
            timeout_ms: 30_000,
        }
    }
}

impl ApiConfig {
    fn normalize(&mut self) {
        self.base_url = self
            .base_url
            .take()
            .map(|url| url.trim().trim_end_matches('/').to_owned())
            .filter(|url| !url.is_empty());
        self.api_token = self
            .api_token
            .take()
            .map(|token| token.trim().to_owned())
            .filter(|token| !token.is_empty());
    }

    fn validate(&self) -> Result<(), ConfigSchemaError> {
        if let Some(base_url) = self.base_url.as_deref() {
            validate_http_url("api", "baseUrl", base_url)?;
        }
        Ok(())
    }
}

/// Retry policy configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields, default)]
pub struct RetryConfig {
    /// Maximum attempts (including the first attempt).
    pub max_attempts: u32,
    /// Base delay for exponential backoff (ms).
    pub base_delay_ms: u64,
    /// Maximum delay cap for backoff (ms).
    pub max_delay_ms: u64,
    /// Jitter ratio as a percentage (0..=100).
    pub jitter_ratio_pct: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 250,
            max_delay_ms: 5_000,
            jitter_ratio_pct: 20,
        }
    }
}

impl RetryConfig {
    /// Convert into the runtime retry policy.
    #[must_use]
    pub const fn to_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay_ms: self.base_delay_ms,
            max_delay_ms: self.max_delay_ms,
            jitter_ratio_pct: self.jitter_ratio_pct,
        }
    }

    fn validate(&self, section: &'static str) -> Result<(), ConfigSchemaError> {
        validate_limit_u32(
            section,
            "maxAttempts",
            self.max_attempts,
            RETRY_MAX_ATTEMPTS_MIN,
            RETRY_MAX_ATTEMPTS_MAX,
        )?;
        validate_timeout_ms(
            section,
            "baseDelayMs",
            self.base_delay_ms,
            RETRY_BASE_DELAY_MIN_MS,
            RETRY_BASE_DELAY_MAX_MS,
        )?;
        validate_timeout_ms(
            section,
            "maxDelayMs",
            self.max_delay_ms,
            RETRY_MAX_DELAY_MIN_MS,
            RETRY_MAX_DELAY_MAX_MS,
        )?;
        if self.max_delay_ms < self.base_delay_ms {
            return Err(ConfigSchemaError::LimitOutOfRange {
                section,
                field: "maxDelayMs",
                value: self.max_delay_ms,
                min: self.base_delay_ms,
                max: RETRY_MAX_DELAY_MAX_MS,
            });
        }
        validate_limit_u32(
            section,
            "jitterRatioPct",
            self.jitter_ratio_pct,
            RETRY_JITTER_RATIO_PCT_MIN,
            RETRY_JITTER_RATIO_PCT_MAX,
        )?;
        Ok(())
    }
}

/// Typed validation errors for the configuration schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSchemaError {
    /// The config version is not supported by this binary.
    UnsupportedVersion {
        /// Version found in the config.
        found: u32,
        /// Version supported by this crate.
        supported: u32,
    },
    /// A timeout or delay value is out of bounds.
    TimeoutOutOfRange {
        /// Schema section (e.g. `probe.retry`).
        section: &'static str,
        /// Field name in the config file (e.g. `baseDelayMs`).
        field: &'static str,
        /// Value provided (ms).
        value_ms: u64,
        /// Minimum allowed value (ms).
        min_ms: u64,
        /// Maximum allowed value (ms).
        max_ms: u64,
    },
    /// A numeric limit is out of bounds.
    LimitOutOfRange {
        /// Schema section (e.g. `probe`).
        section: &'static str,
        /// Field name in the config file (e.g. `batchSize`).
        field: &'static str,
        /// Value provided.
        value: u64,
        /// Minimum allowed value.
        min: u64,
        /// Maximum allowed value.
        max: u64,
    },
    /// A URL entry is invalid.
    InvalidUrl {
        /// Schema section (e.g. `api`).
        section: &'static str,
        /// Field name in the config file (e.g. `baseUrl`).
        field: &'static str,
        /// Invalid URL value.
        url: String,
    },
}

impl ConfigSchemaError {
    fn error_code(&self) -> ErrorCode {
        match self {
            Self::UnsupportedVersion { .. } => ErrorCode::new("config", "unsupported_version"),
            Self::TimeoutOutOfRange { .. } => ErrorCode::new("config", "invalid_timeout"),
            Self::LimitOutOfRange { .. } => ErrorCode::new("config", "invalid_limit"),
            Self::InvalidUrl { .. } => ErrorCode::new("config", "invalid_url"),
        }
    }
}

impl fmt::Display for ConfigSchemaError {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnsupportedVersion { found, supported } => {
                write!(
                    formatter,
                    "unsupported config version: {found} (supported: {supported})"
                )
            },
            Self::TimeoutOutOfRange {
                section,
                field,
                value_ms,
                min_ms,
                max_ms,
            } => write!(
                formatter,
                "{section}.{field} must be within [{min_ms}, {max_ms}] ms (got {value_ms})"
            ),
            Self::LimitOutOfRange {
                section,
                field,
                value,
                min,
                max,
            } => write!(
                formatter,
                "{section}.{field} must be within [{min}, {max}] (got {value})"
            ),
            Self::InvalidUrl { section, field, .. } => {
                write!(formatter, "{section}.{field} must be an http(s) URL")
            },
        }
    }
}

impl std::error::Error for ConfigSchemaError {}

impl From<ConfigSchemaError> for ErrorEnvelope {
    fn from(error: ConfigSchemaError) -> Self {
        let code = error.error_code();
        let message = error.to_string();
        let envelope = Self::expected(code, message);

        match error {
            ConfigSchemaError::UnsupportedVersion { found, supported } => envelope
                .with_metadata("found", found.to_string())
                .with_metadata("supported", supported.to_string()),
            ConfigSchemaError::TimeoutOutOfRange {
                section,
                field,
                value_ms,
                min_ms,
                max_ms,
            } => envelope
                .with_metadata("section", section)
                .with_metadata("field", field)
                .with_metadata("value_ms", value_ms.to_string())
                .with_metadata("min_ms", min_ms.to_string())
                .with_metadata("max_ms", max_ms.to_string()),
            ConfigSchemaError::LimitOutOfRange {
                section,
                field,
                value,
                min,
                max,
            } => envelope
                .with_metadata("section", section)
                .with_metadata("field", field)
                .with_metadata("value", value.to_string())
                .with_metadata("min", min.to_string())
                .with_metadata("max", max.to_string()),
            ConfigSchemaError::InvalidUrl {
                section,
                field,
                url,
            } => envelope
                .with_metadata("section", section)
                .with_metadata("field", field)
                .with_metadata("url", sanitize_url_for_error(&url)),
        }
    }
}

fn validate_timeout_ms(
    section: &'static str,
    field: &'static str,
    value_ms: u64,
    min_ms: u64,
    max_ms: u64,
) -> Result<(), ConfigSchemaError> {
    if value_ms < min_ms || value_ms > max_ms {
        return Err(ConfigSchemaError::TimeoutOutOfRange {
            section,
            field,
            value_ms,
            min_ms,
            max_ms,
        });
    }
    Ok(())
}

fn validate_limit_u32(
    section: &'static str,
    field: &'static str,
    value: u32,
    min: u32,
    max: u32,
) -> Result<(), ConfigSchemaError> {
    if value < min || value > max {
        return Err(ConfigSchemaError::LimitOutOfRange {
            section,
            field,
            value: u64::from(value),
            min: u64::from(min),
            max: u64::from(max),
        });
    }
    Ok(())
}

fn bounded_u32<const MIN: u32, const MAX: u32>(
    section: &'static str,
    field: &'static str,
    value: u32,
    min: u32,
    max: u32,
) -> Result<BoundedU32<MIN, MAX>, ConfigSchemaError> {
    BoundedU32::try_new(value).map_err(|_| ConfigSchemaError::LimitOutOfRange {
        section,
        field,
        value: u64::from(value),
        min: u64::from(min),
        max: u64::from(max),
    })
}

fn bounded_u64<const MIN: u64, const MAX: u64>(
    section: &'static str,
    field: &'static str,
    value: u64,
    min: u64,
    max: u64,
) -> Result<BoundedU64<MIN, MAX>, ConfigSchemaError> {
    BoundedU64::try_new(value).map_err(|_| ConfigSchemaError::LimitOutOfRange {
        section,
        field,
        value,
        min,
        max,
    })
}

fn validate_http_url(
    section: &'static str,
    field: &'static str,
    value: &str,
) -> Result<(), ConfigSchemaError> {
    let parsed = Url::parse(value).map_err(|_| ConfigSchemaError::InvalidUrl {
        section,
        field,
        url: value.to_owned(),
    })?;

    if parsed.scheme() != "http" && parsed.scheme() != "https" {
        return Err(ConfigSchemaError::InvalidUrl {
            section,
            field,
            url: value.to_owned(),
        });
    }

    Ok(())
}
