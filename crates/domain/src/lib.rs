//! # blob-sync-domain
//!
//! Value types shared by the sync engine and its adapters:
//!
//! - **Primitives** - `BlobName`, `QualifiedPath`
//! - **Blob records** - `BlobStatus`, `BlobRecord`, `BlobQuery`
//!
//! ## Dependency Rules
//!
//! - Depends only on `shared` crate
//! - No I/O

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

pub use blob_sync_shared::shared_crate_version;

pub mod blob;
pub mod primitives;

pub use blob::{BlobQuery, BlobRecord, BlobStatus};
pub use primitives::{BlobName, PrimitiveError, QualifiedPath};

/// Returns the domain crate version.
#[must_use]
pub const fn domain_crate_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domain_crate_compiles() {
        let version = domain_crate_version();
        assert!(!version.is_empty());
    }

    #[test]
    fn domain_depends_on_shared() {
        let shared_version = shared_crate_version();
        assert!(!shared_version.is_empty());
    }
}
