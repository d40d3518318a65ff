//! `config show` handler.

use crate::CliOutput;
use crate::error::{CliError, ExitCode};
use crate::format::ConfigFormat;
use blob_sync_config::{SyncEnv, load_sync_config_from_path, redacted_for_display, to_pretty_json, to_pretty_toml};
use blob_sync_shared::ErrorEnvelope;
use std::path::Path;

/// Print the effective config (defaults < file < env) with secrets redacted.
pub fn run_config_show(
    config_path: Option<&Path>,
    format: ConfigFormat,
    env: &SyncEnv,
) -> Result<CliOutput, CliError> {
    let config = load_sync_config_from_path(config_path, None, env)?;
    tracing::debug!(version = config.version, "effective config loaded");
    let display = redacted_for_display(&config);
    let stdout = match format {
        ConfigFormat::Json => to_pretty_json(&display)?,
        ConfigFormat::Toml => to_pretty_toml(&display)?,
    };
    Ok(CliOutput {
        stdout,
        stderr: String::new(),
        exit_code: ExitCode::Ok,
    })
}

/// Read `BLOB_SYNC_*` variables from the process environment.
pub fn std_env() -> Result<SyncEnv, CliError> {
    SyncEnv::from_std_env()
        .map_err(ErrorEnvelope::from)
        .map_err(CliError::from)
}
