//! # blob-sync-ports
//!
//! Port traits for the blob-sync hexagonal architecture.
//!
//! These are the seams between the sync engine (`blob-sync-app`) and the
//! outside world: the remote blob service, the workspace manager, content
//! hashing, file content, wall-clock time, logging and telemetry.
//! This crate depends only on `domain` and `shared`.

pub use blob_sync_shared::BoxFuture;

/// Returns the ports crate version.
#[must_use]
pub const fn ports_crate_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

pub mod blob_api;
pub mod blob_name;
pub mod clock;
pub mod content_source;
pub mod logger;
pub mod telemetry;
pub mod workspace;

pub use blob_api::*;
pub use blob_name::*;
pub use clock::*;
pub use content_source::*;
pub use logger::*;
pub use telemetry::*;
pub use workspace::*;

// Re-export domain types used in port signatures, so adapter crates can
// implement ports without directly depending on `blob-sync-domain`.
pub use blob_sync_domain::{BlobName, QualifiedPath};

#[cfg(test)]
mod tests {
    use super::*;
    use blob_sync_domain::domain_crate_version;
    use blob_sync_shared::shared_crate_version;

    fn workspace_deps() -> Vec<String> {
        let cargo_toml = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/Cargo.toml"));
        let mut deps = Vec::new();
        let mut in_deps = false;
        let mut in_dev_deps = false;

        for raw_line in cargo_toml.lines() {
            let line = raw_line.split('#').next().unwrap_or("").trim();
            if line.is_empty() {
                continue;
            }
            if line.starts_with('[') {
                in_deps = line == "[dependencies]";
                in_dev_deps = line == "[dev-dependencies]";
                continue;
            }
            if !(in_deps || in_dev_deps) {
                continue;
            }
            if line.starts_with("blob-sync-") {
                let key = line.split('=').next().unwrap_or("").trim();
                let name = key.split('.').next().unwrap_or("").trim();
                deps.push(name.to_string());
            }
        }

        deps
    }

    #[test]
    fn ports_depends_only_on_domain_and_shared() {
        let deps = workspace_deps();
        let allowed = ["blob-sync-domain", "blob-sync-shared"];

        for dep in &deps {
            assert!(
                allowed.contains(&dep.as_str()),
                "unexpected dependency found: {dep}"
            );
        }

        for expected in allowed {
            assert!(
                deps.iter().any(|dep| dep == expected),
                "missing dependency: {expected}"
            );
        }
    }

    #[test]
    fn ports_crate_compiles() {
        let version = ports_crate_version();
        assert!(!version.is_empty());
        assert!(!domain_crate_version().is_empty());
        assert!(!shared_crate_version().is_empty());
    }
}
