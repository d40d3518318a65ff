//! Workspace manager backed by the status store and the uploader.

use crate::blob_status_store::BlobStatusStore;
use crate::file_uploader::FileUploader;
use blob_sync_domain::{BlobName, QualifiedPath};
use blob_sync_ports::{BoxFuture, ContentSourcePort, LoggerPort, WorkspacePort, log_fields};
use blob_sync_shared::{RequestContext, Result};
use serde_json::Value;
use std::sync::Arc;

/// Collaborators of [`WorkspaceTracker`].
#[derive(Clone)]
pub struct WorkspaceTrackerDeps {
    /// Path ↔ blob bookkeeping.
    pub store: Arc<BlobStatusStore>,
    /// Background uploads.
    pub uploader: Arc<FileUploader>,
    /// Current file content.
    pub content: Arc<dyn ContentSourcePort>,
    /// Optional logger.
    pub logger: Option<Arc<dyn LoggerPort>>,
}

/// Keeps the store in step with file content and answers the probe cycle.
pub struct WorkspaceTracker {
    deps: WorkspaceTrackerDeps,
    ctx: RequestContext,
}

impl WorkspaceTracker {
    /// Tracker with its own sync context.
    pub fn new(deps: WorkspaceTrackerDeps) -> Self {
        Self {
            deps,
            ctx: RequestContext::new_sync(),
        }
    }

    /// Read `path`, upload it when its content is new and record the upload.
    ///
    /// Returns `None` when the file is gone (its records are dropped) or the
    /// path is embargoed.
    pub async fn track_path(&self, path: QualifiedPath) -> Result<Option<BlobName>> {
        self.ctx.ensure_not_cancelled("workspace_tracker.track_path")?;
        let store = &self.deps.store;
        if store.is_embargoed(&path) {
            self.debug("sync.tracker.embargoed", "Skipping embargoed path", &path);
            return Ok(None);
        }

        let Some(text) = self.deps.content.read_text(&self.ctx, &path).await? else {
            store.remove_path(&path);
            self.debug("sync.tracker.file_gone", "File no longer exists", &path);
            return Ok(None);
        };

        let blob_name = self.deps.uploader.blob_name_for(&path, &text)?;
        if store.is_tracking_blob(&blob_name) {
            return Ok(Some(blob_name));
        }
        self.deps.uploader.upload(path.clone(), &text)?;
        store.add_uploaded_blob(blob_name.clone(), path)?;
        Ok(Some(blob_name))
    }

    /// Stop tracking `path`.
    pub fn forget_path(&self, path: &QualifiedPath) {
        self.deps.store.remove_path(path);
    }

    /// Shared status store.
    pub fn store(&self) -> &Arc<BlobStatusStore> {
        &self.deps.store
    }

    /// Cancel reads in flight.
    pub fn dispose(&self) {
        self.ctx.cancel();
    }

    async fn reupload(&self, path: QualifiedPath, blob_name: BlobName) -> Result<()> {
        let Some(text) = self.deps.content.read_text(&self.ctx, &path).await? else {
            self.deps.store.remove_path(&path);
            return Ok(());
        };
        let current = self.deps.uploader.blob_name_for(&path, &text)?;
        if current == blob_name {
            self.deps.uploader.upload(path, &text)?;
            return Ok(());
        }
        // Content changed since the probe was queued; track the new blob.
        self.track_path(path).await.map(|_| ())
    }

    fn debug(&self, event: &str, message: &str, path: &QualifiedPath) {
        if let Some(logger) = self.deps.logger.as_ref() {
            logger.debug(
                event,
                message,
                Some(log_fields([("path", Value::from(path.to_string()))])),
            );
        }
    }
}

impl WorkspacePort for WorkspaceTracker {
    fn get_blob_name(&self, path: &QualifiedPath) -> Option<BlobName> {
        self.deps.store.get_last_blob_name_for_path(path)
    }

    fn notify_blob_missing(&self, path: QualifiedPath, blob_name: BlobName) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            if self.get_blob_name(&path).as_ref() != Some(&blob_name) {
                self.debug(
                    "sync.tracker.missing_stale",
                    "Ignoring missing notice for outdated blob",
                    &path,
                );
                return;
            }
            if let Err(error) = self.reupload(path.clone(), blob_name.clone()).await {
                if let Some(logger) = self.deps.logger.as_ref() {
                    logger.warn_error(
                        "sync.tracker.reupload_failed",
                        "Re-upload of missing blob failed",
                        Some(log_fields([
                            ("path", Value::from(path.to_string())),
                            ("blobName", Value::from(blob_name.as_str())),
                        ])),
                        &error,
                    );
                }
            }
        })
    }

    fn notify_blob_indexed(&self, _path: QualifiedPath, blob_name: BlobName) -> BoxFuture<'_, ()> {
        self.deps.store.update_blob_indexed(&blob_name);
        Box::pin(async {})
    }
}
