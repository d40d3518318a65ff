//! Content hashing boundary contract.

use blob_sync_domain::{BlobName, QualifiedPath};

/// Computes content-addressed blob names.
pub trait BlobNameCalculatorPort: Send + Sync {
    /// Name for `content` at `path`, or `None` when the content cannot be a blob
    /// (for example it exceeds the size limit).
    fn calculate(&self, path: &QualifiedPath, content: &str) -> Option<BlobName>;
}
