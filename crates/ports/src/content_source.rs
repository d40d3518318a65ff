//! File content boundary contract.

use crate::BoxFuture;
use blob_sync_domain::QualifiedPath;
use blob_sync_shared::{RequestContext, Result};

/// Reads the current text of workspace files.
pub trait ContentSourcePort: Send + Sync {
    /// Current content of `path`; `Ok(None)` when the file no longer exists.
    fn read_text(
        &self,
        ctx: &RequestContext,
        path: &QualifiedPath,
    ) -> BoxFuture<'_, Result<Option<Box<str>>>>;
}
