//! Secret detection and redaction.
//!
//! Used by the JSON logger and telemetry (field values) and by the env
//! loader (API token).

use std::fmt;

/// Placeholder written in place of secret field values.
pub const REDACTED: &str = "[REDACTED]";

const SECRET_MARKERS: [&str; 6] = ["KEY", "TOKEN", "SECRET", "PASSWORD", "CREDENTIAL", "AUTH"];

/// Whether a field or variable name looks like it holds a secret.
///
/// ```
/// use blob_sync_shared::is_secret_key;
///
/// assert!(is_secret_key("apiToken"));
/// assert!(is_secret_key("BLOB_SYNC_API_TOKEN"));
/// assert!(!is_secret_key("blobName"));
/// ```
pub fn is_secret_key(key: &str) -> bool {
    let upper = key.to_ascii_uppercase();
    SECRET_MARKERS.iter().any(|marker| upper.contains(marker))
}

/// String that prints as [`REDACTED`] through `Debug` and `Display`.
#[derive(Clone, PartialEq, Eq)]
pub struct SecretString(Box<str>);

impl SecretString {
    /// Wrap a secret value.
    pub fn new(value: impl Into<Box<str>>) -> Self {
        Self(value.into())
    }

    /// Borrow the underlying secret.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SecretString {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(REDACTED)
    }
}

impl fmt::Display for SecretString {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(REDACTED)
    }
}
