//! `sync` handler: upload files under a root and wait for the service to index them.

use crate::CliOutput;
use crate::error::{CliError, ExitCode};
use crate::format::{OutputFormat, json_line};
use blob_sync_adapters::{
    HttpBlobApi, HttpBlobApiConfig, JsonLogger, JsonTelemetry, LocalContentSource, LogSink,
    Sha256BlobNameCalculator, StderrLogSink, SystemClock,
};
use blob_sync_app::{
    BlobStatusStore, FileUploader, FileUploaderDeps, ProbeSettings, UnknownBlobHandler,
    UnknownBlobHandlerDeps, UploadOutcome, WorkspaceTracker, WorkspaceTrackerDeps,
};
use blob_sync_config::{SyncEnv, ValidatedSyncConfig, load_sync_config_from_path};
use blob_sync_ports::{
    BlobApiPort, ClockPort, ContentSourcePort, LogLevel, LoggerPort, QualifiedPath, TelemetryPort,
    WorkspacePort, log_fields,
};
use blob_sync_shared::ErrorEnvelope;
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::time::{Instant, MissedTickBehavior};

const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Parsed `sync` arguments.
#[derive(Debug, Clone)]
pub struct SyncCommandInput {
    /// Workspace root the files are relative to.
    pub root: PathBuf,
    /// Optional config file (JSON/TOML).
    pub config: Option<PathBuf>,
    /// How long to wait for indexing after the uploads.
    pub wait: Duration,
    /// Files relative to `root`.
    pub files: Vec<String>,
    /// Minimum level for the JSON engine log on stderr.
    pub log_level: LogLevel,
    /// Emit counters as JSON lines on stderr.
    pub metrics: bool,
}

/// Outcome of one `sync` run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SyncSummary {
    /// Files whose content was uploaded.
    pub tracked: Vec<String>,
    /// Files that are gone, embargoed or could not be named.
    pub skipped: BTreeMap<String, String>,
    /// Tracked files the service reports as indexed.
    pub indexed: Vec<String>,
    /// Tracked files still waiting for the index.
    pub pending: Vec<String>,
}

/// Run the sync command on a fresh multi-thread runtime.
pub fn run_sync(
    input: &SyncCommandInput,
    env: &SyncEnv,
    format: OutputFormat,
) -> Result<CliOutput, CliError> {
    if input.files.is_empty() {
        return Err(CliError::InvalidInput("no files given".to_owned()));
    }
    let config = load_sync_config_from_path(input.config.as_deref(), None, env)?;
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    let summary = runtime.block_on(sync_files(input, &config))?;

    let exit_code = if summary.pending.is_empty() {
        ExitCode::Ok
    } else {
        ExitCode::Pending
    };
    let stdout = match format {
        OutputFormat::Text => format_text(&summary),
        OutputFormat::Json => format_json(&summary)?,
    };
    Ok(CliOutput {
        stdout,
        stderr: String::new(),
        exit_code,
    })
}

/// Map the validated config onto the probe handler settings.
pub fn probe_settings(config: &ValidatedSyncConfig) -> ProbeSettings {
    let limits = config.limits();
    ProbeSettings {
        batch_size: usize::try_from(limits.probe_batch_size.get()).unwrap_or(usize::MAX),
        retry_wait: Duration::from_millis(limits.probe_retry_wait_ms.get()),
        patience_ms: limits.probe_patience_ms.get(),
        long_retry_wait: Duration::from_millis(limits.long_retry_wait_ms.get()),
        retry: config.probe.retry.to_policy(),
    }
}

struct Engine {
    store: Arc<BlobStatusStore>,
    uploader: Arc<FileUploader>,
    tracker: Arc<WorkspaceTracker>,
    handler: UnknownBlobHandler,
    reprobe_every: Duration,
}

impl Engine {
    fn build(input: &SyncCommandInput, config: &ValidatedSyncConfig) -> Result<Self, CliError> {
        let api: Arc<dyn BlobApiPort> = Arc::new(HttpBlobApi::new(
            &HttpBlobApiConfig::from_api_config(&config.api)?,
        )?);
        let clock: Arc<dyn ClockPort> = Arc::new(SystemClock);
        let sink: Arc<dyn LogSink> = Arc::new(StderrLogSink);
        let logger: Arc<dyn LoggerPort> = Arc::from(
            JsonLogger::new(Arc::clone(&sink), Arc::clone(&clock))
                .with_min_level(input.log_level)
                .child(log_fields([(
                    "root",
                    Value::from(input.root.to_string_lossy().as_ref()),
                )])),
        );
        let telemetry = input.metrics.then(|| {
            Arc::new(JsonTelemetry::new(Arc::clone(&sink), Arc::clone(&clock)))
                as Arc<dyn TelemetryPort>
        });

        let store = Arc::new(BlobStatusStore::new(
            Arc::clone(&clock),
            Some(Arc::clone(&logger)),
        ));
        let uploader = Arc::new(FileUploader::new(
            FileUploaderDeps {
                api: Arc::clone(&api),
                calculator: Arc::new(Sha256BlobNameCalculator::new(
                    config.limits().max_blob_size_bytes.get(),
                )),
                logger: Some(Arc::clone(&logger)),
                telemetry: telemetry.clone(),
            },
            config.upload.retry.to_policy(),
        ));
        let tracker = Arc::new(WorkspaceTracker::new(WorkspaceTrackerDeps {
            store: Arc::clone(&store),
            uploader: Arc::clone(&uploader),
            content: Arc::new(LocalContentSource) as Arc<dyn ContentSourcePort>,
            logger: Some(Arc::clone(&logger)),
        }));
        let handler = UnknownBlobHandler::new(
            UnknownBlobHandlerDeps {
                api,
                workspace: Arc::clone(&tracker) as Arc<dyn WorkspacePort>,
                clock,
                logger: Some(logger),
                telemetry,
            },
            probe_settings(config),
        );
        Ok(Self {
            store,
            uploader,
            tracker,
            handler,
            reprobe_every: Duration::from_millis(config.limits().probe_retry_wait_ms.get()),
        })
    }

    /// Hand every uploaded-but-unindexed blob to the probe cycle.
    ///
    /// Covers uploads that failed or whose events were missed; a blob the
    /// service does not know is re-uploaded through `notify_blob_missing`.
    async fn probe_unindexed(&self) {
        let unindexed = self.store.get_unindexed_blobs();
        if !unindexed.is_empty() {
            tracing::debug!(count = unindexed.len(), "probing unindexed blobs");
            self.handler.enqueue(unindexed).await;
        }
    }

    fn dispose(&self) {
        self.handler.dispose();
        self.uploader.dispose();
        self.tracker.dispose();
    }
}

async fn sync_files(
    input: &SyncCommandInput,
    config: &ValidatedSyncConfig,
) -> Result<SyncSummary, CliError> {
    let engine = Engine::build(input, config)?;
    let mut events = engine.uploader.subscribe();
    let root = input.root.to_string_lossy();

    let mut summary = SyncSummary::default();
    let mut paths = Vec::new();
    for file in &input.files {
        let path = QualifiedPath::new(&*root, file).map_err(ErrorEnvelope::from)?;
        match engine.tracker.track_path(path.clone()).await {
            Ok(Some(_)) => {
                summary.tracked.push(path.rel_path().to_owned());
                paths.push(path);
            },
            Ok(None) => {
                summary
                    .skipped
                    .insert(path.rel_path().to_owned(), "missing or embargoed".to_owned());
            },
            Err(error) => {
                summary
                    .skipped
                    .insert(path.rel_path().to_owned(), error.message.clone());
            },
        }
    }
    tracing::info!(tracked = summary.tracked.len(), skipped = summary.skipped.len(), "uploads queued");

    let deadline = Instant::now() + input.wait;
    let mut reprobe = tokio::time::interval_at(
        Instant::now() + engine.reprobe_every,
        engine.reprobe_every,
    );
    reprobe.set_missed_tick_behavior(MissedTickBehavior::Skip);
    while !engine.store.get_unindexed_blobs().is_empty() && Instant::now() < deadline {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) if event.outcome == UploadOutcome::Uploaded => {
                    tracing::debug!(path = %event.path, "upload accepted, probing");
                    engine.handler.enqueue([(event.blob_name, event.path)]).await;
                },
                Ok(_) => {},
                Err(RecvError::Lagged(missed)) => {
                    tracing::debug!(missed, "upload events lagged");
                    engine.probe_unindexed().await;
                },
                Err(RecvError::Closed) => break,
            },
            _ = reprobe.tick() => engine.probe_unindexed().await,
            () = tokio::time::sleep(POLL_INTERVAL) => {},
        }
    }

    for path in paths {
        let rel = path.rel_path().to_owned();
        if engine.store.get_indexed_blob_name(&path).is_some() {
            summary.indexed.push(rel);
        } else {
            summary.pending.push(rel);
        }
    }
    tracing::info!(indexed = summary.indexed.len(), pending = summary.pending.len(), "sync finished");
    engine.dispose();
    Ok(summary)
}

fn format_text(summary: &SyncSummary) -> String {
    let status = if summary.pending.is_empty() {
        "ok"
    } else {
        "pending"
    };
    let mut output = format!(
        "status: {status}\ntracked: {}\nindexed: {}\npending: {}\nskipped: {}\n",
        summary.tracked.len(),
        summary.indexed.len(),
        summary.pending.len(),
        summary.skipped.len(),
    );
    for path in &summary.pending {
        let _ = writeln!(output, "pending {path}");
    }
    for (path, reason) in &summary.skipped {
        let _ = writeln!(output, "skipped {path}: {reason}");
    }
    output
}

fn format_json(summary: &SyncSummary) -> Result<String, CliError> {
    let payload = json!({
        "status": if summary.pending.is_empty() { "ok" } else { "pending" },
        "tracked": summary.tracked,
        "indexed": summary.indexed,
        "pending": summary.pending,
        "skipped": summary.skipped,
    });
    Ok(json_line(&payload, true)?)
}

/// Resolve `--root`, defaulting to the current directory.
pub fn resolve_root(root: Option<&Path>) -> Result<PathBuf, CliError> {
    match root {
        Some(value) => Ok(value.to_path_buf()),
        None => Ok(std::env::current_dir()?),
    }
}
