//! # blob-sync-config
//!
//! Configuration schema, validation, and normalization logic for the sync
//! pipeline and the CLI. This crate depends on `domain` and `shared` only.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

/// Environment variable parsing and merging.
pub mod env;
/// Config loading helpers (env + file + overrides).
pub mod load;
/// Configuration schema types and helpers.
pub mod schema;

pub use schema::{
    ApiConfig, CURRENT_CONFIG_VERSION, ConfigLimits, ConfigSchemaError, ProbeConfig, RetryConfig,
    SyncConfig, UploadConfig, ValidatedSyncConfig, parse_sync_config_json, parse_sync_config_toml,
};

pub use env::{EnvParseError, SyncEnv, apply_env_overrides};
pub use load::{
    load_sync_config_from_path, load_sync_config_from_sources, load_sync_config_std_env,
    redacted_for_display, to_pretty_json, to_pretty_toml,
};

/// Returns the config crate version.
#[must_use]
pub const fn config_crate_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
