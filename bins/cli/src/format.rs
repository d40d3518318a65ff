//! Output format helpers for CLI commands.

use clap::ValueEnum;

/// Output format for command summaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    /// Human-friendly text output.
    #[default]
    Text,
    /// Machine-friendly JSON output.
    Json,
}

/// Serialization used by `config show`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum ConfigFormat {
    /// Pretty JSON.
    #[default]
    Json,
    /// Pretty TOML.
    Toml,
}

/// Render a JSON value with a trailing newline.
pub fn json_line(value: &serde_json::Value, pretty: bool) -> Result<String, serde_json::Error> {
    let mut output = if pretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    };
    output.push('\n');
    Ok(output)
}
