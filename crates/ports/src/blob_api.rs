//! Remote blob service boundary contract.

use crate::BoxFuture;
use blob_sync_domain::{BlobName, QualifiedPath};
use blob_sync_shared::{RequestContext, Result};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Classification returned by a find-missing probe.
///
/// Names absent from both lists are known and indexed by the service.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FindMissingResult {
    /// The service has never seen these blobs.
    pub unknown_blob_names: Vec<BlobName>,
    /// The service has the bytes but has not finished indexing them.
    pub nonindexed_blob_names: Vec<BlobName>,
}

/// One blob in a batch upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadBlob {
    /// Path the content was read from.
    pub path: QualifiedPath,
    /// Content-addressed name.
    pub blob_name: BlobName,
    /// File content.
    pub text: Arc<str>,
    /// Extra key/value metadata (currently always empty).
    pub metadata: BTreeMap<Box<str>, Box<str>>,
}

/// Boundary contract for the remote blob service.
pub trait BlobApiPort: Send + Sync {
    /// Ask which of `blob_names` are unknown or not yet indexed.
    fn find_missing(
        &self,
        ctx: &RequestContext,
        blob_names: Vec<BlobName>,
    ) -> BoxFuture<'_, Result<FindMissingResult>>;

    /// Upload blobs. Fails as a whole.
    fn batch_upload(&self, ctx: &RequestContext, blobs: Vec<UploadBlob>)
    -> BoxFuture<'_, Result<()>>;
}
