//! Background blob uploads.
//!
//! [`FileUploader::upload`] names the content, queues it and returns at once;
//! a spawned drain sends it to the blob service. Upload failures are logged
//! and reported through [`UploadEvent`]s but never surface to the caller:
//! the probe cycle notices the blob is still unknown and asks for it again.

use blob_sync_domain::{BlobName, QualifiedPath};
use blob_sync_ports::{
    BlobApiPort, BlobNameCalculatorPort, LogFields, LoggerPort, TelemetryPort, UploadBlob,
    log_fields,
};
use blob_sync_shared::{
    BatchWorkQueue, BoxFuture, ErrorCode, ErrorEnvelope, PromiseWorkQueue, RequestContext,
    Result, ResultProcessor, RetryPolicy, WorkItemProcessor, retry_async_with_observer,
};
use serde_json::Value;
use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use tokio::sync::broadcast;

const EVENT_CAPACITY: usize = 256;

/// Content queued for upload. Equality and hashing use the blob name only.
#[derive(Debug, Clone)]
pub struct UploadItem {
    /// Path the content was read from.
    pub path: QualifiedPath,
    /// Content-addressed name.
    pub blob_name: BlobName,
    /// File content.
    pub text: Arc<str>,
}

impl PartialEq for UploadItem {
    fn eq(&self, other: &Self) -> bool {
        self.blob_name == other.blob_name
    }
}

impl Eq for UploadItem {}

impl Hash for UploadItem {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.blob_name.hash(state);
    }
}

/// How an upload attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadOutcome {
    /// The server accepted the blob.
    Uploaded,
    /// Every attempt failed.
    Failed,
}

/// Emitted after every upload attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadEvent {
    /// Path of the uploaded content.
    pub path: QualifiedPath,
    /// Blob name.
    pub blob_name: BlobName,
    /// Result of the attempt.
    pub outcome: UploadOutcome,
}

/// Collaborators of [`FileUploader`].
#[derive(Clone)]
pub struct FileUploaderDeps {
    /// Remote blob service.
    pub api: Arc<dyn BlobApiPort>,
    /// Content hashing.
    pub calculator: Arc<dyn BlobNameCalculatorPort>,
    /// Optional logger.
    pub logger: Option<Arc<dyn LoggerPort>>,
    /// Optional telemetry sink.
    pub telemetry: Option<Arc<dyn TelemetryPort>>,
}

struct UploaderInner {
    deps: FileUploaderDeps,
    retry: RetryPolicy,
    ctx: RequestContext,
    events: broadcast::Sender<UploadEvent>,
}

impl UploaderInner {
    async fn send(&self, item: &UploadItem) -> Result<()> {
        let blob = UploadBlob {
            path: item.path.clone(),
            blob_name: item.blob_name.clone(),
            text: Arc::clone(&item.text),
            metadata: BTreeMap::new(),
        };
        let timer = self
            .deps
            .telemetry
            .as_ref()
            .map(|telemetry| telemetry.start_timer("sync.upload.duration", None));
        let mut op = || self.deps.api.batch_upload(&self.ctx, vec![blob.clone()]);
        let result = retry_async_with_observer(
            &self.ctx,
            self.retry,
            "file_uploader.batch_upload",
            &mut op,
            |attempt, error| {
                if let Some(logger) = self.deps.logger.as_ref() {
                    logger.warn_error(
                        "sync.upload.retry",
                        "Upload failed; retrying",
                        Some(log_fields([
                            ("blobName", Value::from(item.blob_name.as_str())),
                            ("attempt", Value::from(attempt)),
                        ])),
                        error,
                    );
                }
            },
        )
        .await;
        if let Some(timer) = timer {
            timer.stop();
        }

        let outcome = match &result {
            Ok(()) => {
                self.increment("sync.upload.succeeded");
                if let Some(logger) = self.deps.logger.as_ref() {
                    logger.debug(
                        "sync.upload.succeeded",
                        "Blob uploaded",
                        Some(item_fields(item)),
                    );
                }
                UploadOutcome::Uploaded
            },
            Err(error) => {
                self.increment("sync.upload.failed");
                if let Some(logger) = self.deps.logger.as_ref() {
                    logger.warn_error(
                        "sync.upload.failed",
                        "Blob upload failed",
                        Some(item_fields(item)),
                        error,
                    );
                }
                UploadOutcome::Failed
            },
        };

        // No subscribers is fine.
        let _ = self.events.send(UploadEvent {
            path: item.path.clone(),
            blob_name: item.blob_name.clone(),
            outcome,
        });
        result
    }

    fn increment(&self, name: &str) {
        if let Some(telemetry) = self.deps.telemetry.as_ref() {
            telemetry.increment(name);
        }
    }
}

fn item_fields(item: &UploadItem) -> LogFields {
    log_fields([
        ("blobName", Value::from(item.blob_name.as_str())),
        ("path", Value::from(item.path.to_string())),
        ("bytes", Value::from(item.text.len())),
    ])
}

/// Fire-and-forget stage: failures are already logged.
struct UploadStage {
    inner: Arc<UploaderInner>,
}

impl WorkItemProcessor<UploadItem> for UploadStage {
    fn process_item(&self, item: UploadItem) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let _ = self.inner.send(&item).await;
            Ok(())
        })
    }
}

/// Confirmed stage: the caller gets the upload result.
struct ConfirmStage {
    inner: Arc<UploaderInner>,
}

impl ResultProcessor<UploadItem, BlobName> for ConfirmStage {
    fn process(&self, item: UploadItem) -> BoxFuture<'_, Result<BlobName>> {
        Box::pin(async move {
            self.inner.send(&item).await?;
            Ok(item.blob_name)
        })
    }
}

/// Names content and uploads it in the background.
pub struct FileUploader {
    inner: Arc<UploaderInner>,
    queue: Arc<BatchWorkQueue<UploadItem>>,
    confirmed: PromiseWorkQueue<UploadItem, BlobName>,
}

impl FileUploader {
    /// Idle uploader.
    pub fn new(deps: FileUploaderDeps, retry: RetryPolicy) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let inner = Arc::new(UploaderInner {
            deps,
            retry,
            ctx: RequestContext::new_sync(),
            events,
        });
        let queue = Arc::new(BatchWorkQueue::new(Arc::new(UploadStage {
            inner: Arc::clone(&inner),
        })));
        let confirmed = PromiseWorkQueue::new(Arc::new(ConfirmStage {
            inner: Arc::clone(&inner),
        }));
        Self {
            inner,
            queue,
            confirmed,
        }
    }

    /// Blob name the uploader would use for `content`.
    pub fn blob_name_for(&self, path: &QualifiedPath, content: &str) -> Result<BlobName> {
        self.inner
            .deps
            .calculator
            .calculate(path, content)
            .ok_or_else(|| {
                ErrorEnvelope::expected(
                    ErrorCode::invalid_input(),
                    "content cannot be named as a blob",
                )
                .with_metadata("path", path.to_string())
                .with_metadata("bytes", content.len().to_string())
            })
    }

    /// Queue `content` for upload and return its blob name without waiting
    /// for the network. Must be called inside a tokio runtime.
    pub fn upload(&self, path: QualifiedPath, content: &str) -> Result<BlobName> {
        let blob_name = self.blob_name_for(&path, content)?;
        self.queue.insert(UploadItem {
            path,
            blob_name: blob_name.clone(),
            text: Arc::from(content),
        });

        let queue = Arc::clone(&self.queue);
        tokio::spawn(async move { queue.kick().await });
        Ok(blob_name)
    }

    /// Upload `content` and resolve once the server accepted it.
    pub async fn upload_and_confirm(&self, path: QualifiedPath, content: &str) -> Result<BlobName> {
        let blob_name = self.blob_name_for(&path, content)?;
        self.confirmed
            .insert_and_kick(UploadItem {
                path,
                blob_name,
                text: Arc::from(content),
            })
            .await
    }

    /// Receive an [`UploadEvent`] after every upload attempt.
    pub fn subscribe(&self) -> broadcast::Receiver<UploadEvent> {
        self.inner.events.subscribe()
    }

    /// Uploads queued but not started.
    pub fn pending(&self) -> usize {
        self.queue.len() + self.confirmed.len()
    }

    /// Stop both queues and cancel retries in flight.
    pub fn dispose(&self) {
        self.queue.dispose();
        self.confirmed.dispose();
        self.inner.ctx.cancel();
    }
}
