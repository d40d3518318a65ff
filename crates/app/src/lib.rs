//! # blob-sync-app
//!
//! The sync engine: path ↔ blob bookkeeping, background uploads, the
//! probe/retry protocol for blobs the server does not know yet, and the
//! workspace tracker tying them together.
//! This crate depends on `ports`, `domain`, and `shared`.

pub mod blob_status_store;
pub mod file_uploader;
pub mod unknown_blob_handler;
pub mod workspace_tracker;

/// Returns the app crate version.
#[must_use]
pub const fn app_crate_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

pub use blob_status_store::{BlobStatusStore, BlobStoreStats, IndexOutcome};
pub use file_uploader::{FileUploader, FileUploaderDeps, UploadEvent, UploadItem, UploadOutcome};
pub use unknown_blob_handler::{
    DEFAULT_LONG_RETRY_WAIT, DEFAULT_PROBE_BATCH_SIZE, DEFAULT_PROBE_PATIENCE_MS,
    DEFAULT_PROBE_RETRY_WAIT, ProbeEntry, ProbeQueueStats, ProbeSettings, UnknownBlobHandler,
    UnknownBlobHandlerDeps, WaiterQueue,
};
pub use workspace_tracker::{WorkspaceTracker, WorkspaceTrackerDeps};
