//! Workspace manager boundary contract.

use crate::BoxFuture;
use blob_sync_domain::{BlobName, QualifiedPath};

/// What the probe protocol needs to know about the local workspace.
pub trait WorkspacePort: Send + Sync {
    /// Blob name currently expected for `path`, if the path is tracked.
    fn get_blob_name(&self, path: &QualifiedPath) -> Option<BlobName>;

    /// The service does not know `blob_name`; the workspace should re-upload.
    fn notify_blob_missing(&self, path: QualifiedPath, blob_name: BlobName) -> BoxFuture<'_, ()>;

    /// The service reported `blob_name` as indexed.
    fn notify_blob_indexed(&self, path: QualifiedPath, blob_name: BlobName) -> BoxFuture<'_, ()> {
        let _ = (path, blob_name);
        Box::pin(async {})
    }
}
