//! CLI binary entrypoint.

mod commands;
mod error;
mod format;

use blob_sync_adapters::parse_log_level;
use clap::{Parser, Subcommand};
use commands::config::std_env;
use commands::sync::resolve_root;
use commands::{SyncCommandInput, run_config_show, run_sync};
use error::{CliError, ExitCode};
use format::{ConfigFormat, OutputFormat};
use std::io::{self, Write};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(
    name = "blob-sync",
    version,
    about = "Upload workspace files to a blob service and wait for indexing",
    long_about = None
)]
struct Cli {
    /// Output format for command summaries.
    #[arg(long, global = true, value_enum, default_value_t = OutputFormat::Text)]
    output: OutputFormat,

    /// Minimum level for engine logs on stderr (`debug`, `info`, `warn`, `error`).
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Config-related commands.
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
    /// Upload files and wait until the service has indexed them.
    Sync {
        /// Workspace root (defaults to current directory).
        #[arg(long)]
        root: Option<PathBuf>,
        /// Optional config file path (JSON/TOML).
        #[arg(long)]
        config: Option<PathBuf>,
        /// Milliseconds to wait for indexing after uploading.
        #[arg(long, default_value_t = 30_000)]
        wait_ms: u64,
        /// Emit counters as JSON lines on stderr.
        #[arg(long)]
        metrics: bool,
        /// Files relative to the root.
        #[arg(required = true)]
        files: Vec<String>,
    },
}

#[derive(Debug, Subcommand)]
enum ConfigCommands {
    /// Print the effective config with secrets redacted.
    Show {
        /// Optional config file path (JSON/TOML).
        #[arg(long)]
        config: Option<PathBuf>,
        /// Serialization format.
        #[arg(long, value_enum, default_value_t = ConfigFormat::Json)]
        format: ConfigFormat,
    },
}

pub(crate) struct CliOutput {
    stdout: String,
    stderr: String,
    exit_code: ExitCode,
}

fn main() -> std::process::ExitCode {
    let cli = Cli::parse();
    init_tracing();

    match run(&cli) {
        Ok(output) => match write_output(&output) {
            Ok(()) => std::process::ExitCode::from(output.exit_code.as_u8()),
            Err(error) => exit_with_error(&error),
        },
        Err(error) => exit_with_error(&error),
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("BLOB_SYNC_TRACE")
        .unwrap_or_else(|_| EnvFilter::new("blob_sync_cli=warn"));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .finish();

    let _ = tracing::subscriber::set_global_default(subscriber);
}

fn exit_with_error(error: &CliError) -> std::process::ExitCode {
    let _ = writeln!(io::stderr(), "error: {error}");
    std::process::ExitCode::from(error.exit_code().as_u8())
}

fn run(cli: &Cli) -> Result<CliOutput, CliError> {
    let env = std_env()?;
    match &cli.command {
        Commands::Config {
            command: ConfigCommands::Show { config, format },
        } => run_config_show(config.as_deref(), *format, &env),
        Commands::Sync {
            root,
            config,
            wait_ms,
            metrics,
            files,
        } => {
            let input = SyncCommandInput {
                root: resolve_root(root.as_deref())?,
                config: config.clone(),
                wait: Duration::from_millis(*wait_ms),
                files: files.clone(),
                log_level: parse_log_level(&cli.log_level)?,
                metrics: *metrics,
            };
            tracing::info!(root = %input.root.display(), files = input.files.len(), "sync started");
            run_sync(&input, &env, cli.output)
        },
    }
}

fn write_output(output: &CliOutput) -> Result<(), CliError> {
    let mut stdout = io::stdout();
    stdout.write_all(output.stdout.as_bytes())?;

    if !output.stderr.is_empty() {
        let mut stderr = io::stderr();
        stderr.write_all(output.stderr.as_bytes())?;
        stderr.flush()?;
    }

    Ok(())
}
