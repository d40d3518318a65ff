//! SHA-256 content-addressed blob names.

use blob_sync_ports::{BlobName, BlobNameCalculatorPort, QualifiedPath};
use sha2::{Digest, Sha256};

/// Default size cap for a single blob (1 MiB).
pub const DEFAULT_MAX_BLOB_SIZE_BYTES: u64 = 1_048_576;

/// Names blobs `hex(sha256(rel_path || content))`.
///
/// Content larger than the configured cap is not nameable and yields `None`.
#[derive(Debug, Clone, Copy)]
pub struct Sha256BlobNameCalculator {
    max_blob_size_bytes: u64,
}

impl Sha256BlobNameCalculator {
    /// Calculator with a size cap.
    pub const fn new(max_blob_size_bytes: u64) -> Self {
        Self {
            max_blob_size_bytes,
        }
    }

    /// Configured size cap.
    pub const fn max_blob_size_bytes(&self) -> u64 {
        self.max_blob_size_bytes
    }
}

impl Default for Sha256BlobNameCalculator {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_BLOB_SIZE_BYTES)
    }
}

impl BlobNameCalculatorPort for Sha256BlobNameCalculator {
    fn calculate(&self, path: &QualifiedPath, content: &str) -> Option<BlobName> {
        let len = u64::try_from(content.len()).ok()?;
        if len > self.max_blob_size_bytes {
            return None;
        }
        let mut hasher = Sha256::new();
        hasher.update(path.rel_path().as_bytes());
        hasher.update(content.as_bytes());
        BlobName::parse(format!("{:x}", hasher.finalize())).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use blob_sync_shared::{ErrorEnvelope, Result};

    fn path(root: &str, rel: &str) -> Result<QualifiedPath> {
        QualifiedPath::new(root, rel).map_err(ErrorEnvelope::from)
    }

    #[test]
    fn name_is_stable_hex_digest() -> Result<()> {
        let calculator = Sha256BlobNameCalculator::default();
        let file = path("/ws", "a.txt")?;

        let first = calculator.calculate(&file, "hello");
        let second = calculator.calculate(&file, "hello");

        assert_eq!(first, second);
        let name = first.map(|name| name.as_str().to_owned()).unwrap_or_default();
        assert_eq!(name.len(), 64);
        assert!(name.chars().all(|c| c.is_ascii_hexdigit()));
        Ok(())
    }

    #[test]
    fn known_digest_for_path_and_content() -> Result<()> {
        // sha256("a.txthello")
        let calculator = Sha256BlobNameCalculator::default();
        let name = calculator.calculate(&path("/ws", "a.txt")?, "hello");
        let mut hasher = Sha256::new();
        hasher.update(b"a.txthello");
        assert_eq!(
            name.map(|name| name.as_str().to_owned()),
            Some(format!("{:x}", hasher.finalize()))
        );
        Ok(())
    }

    #[test]
    fn root_does_not_affect_name_but_path_does() -> Result<()> {
        let calculator = Sha256BlobNameCalculator::default();
        let a = calculator.calculate(&path("/one", "src/lib.rs")?, "x");
        let b = calculator.calculate(&path("/two", "src/lib.rs")?, "x");
        let c = calculator.calculate(&path("/one", "src/main.rs")?, "x");

        assert_eq!(a, b);
        assert_ne!(a, c);
        Ok(())
    }

    #[test]
    fn oversized_content_is_not_named() -> Result<()> {
        let calculator = Sha256BlobNameCalculator::new(4);
        let file = path("/ws", "big.bin")?;

        assert!(calculator.calculate(&file, "1234").is_some());
        assert_eq!(calculator.calculate(&file, "12345"), None);
        Ok(())
    }
}
