//! Blob lifecycle records tracked by the status store.

use crate::{BlobName, QualifiedPath};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle stage of a blob on the remote service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlobStatus {
    /// Upload requested, indexing not confirmed.
    Uploaded,
    /// Remote service reported the blob as indexed.
    Indexed,
}

impl BlobStatus {
    /// Stable lowercase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Uploaded => "uploaded",
            Self::Indexed => "indexed",
        }
    }
}

impl fmt::Display for BlobStatus {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

/// One blob known for a path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlobRecord {
    /// Primary key.
    pub blob_name: BlobName,
    /// Path the blob was computed from.
    pub path: QualifiedPath,
    /// Lifecycle stage.
    pub status: BlobStatus,
    /// When the upload was requested (ms since epoch).
    pub upload_requested_at_ms: Option<u64>,
    /// When the blob was confirmed indexed (ms since epoch).
    pub indexed_at_ms: Option<u64>,
}

impl BlobRecord {
    /// New record in the `Uploaded` stage.
    #[must_use]
    pub const fn uploaded(blob_name: BlobName, path: QualifiedPath, now_ms: u64) -> Self {
        Self {
            blob_name,
            path,
            status: BlobStatus::Uploaded,
            upload_requested_at_ms: Some(now_ms),
            indexed_at_ms: None,
        }
    }

    /// Returns true once indexed.
    #[must_use]
    pub fn is_indexed(&self) -> bool {
        self.status == BlobStatus::Indexed
    }
}

/// Filter for record searches. `None` fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlobQuery {
    /// Restrict to one path.
    pub path: Option<QualifiedPath>,
    /// Restrict to one lifecycle stage.
    pub status: Option<BlobStatus>,
}

impl BlobQuery {
    /// Records for `path`.
    #[must_use]
    pub const fn for_path(path: QualifiedPath) -> Self {
        Self {
            path: Some(path),
            status: None,
        }
    }

    /// Restrict the query to `status`.
    #[must_use]
    pub const fn with_status(mut self, status: BlobStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// Returns true when `record` satisfies every set field.
    #[must_use]
    pub fn matches(&self, record: &BlobRecord) -> bool {
        self.path.as_ref().is_none_or(|path| *path == record.path)
            && self.status.is_none_or(|status| status == record.status)
    }
}
