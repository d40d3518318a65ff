//! Domain primitives with validated constructors.

use blob_sync_shared::{ErrorCode, ErrorEnvelope};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Validation failures for domain primitives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrimitiveError {
    /// `BlobName` is empty after trimming.
    InvalidBlobName {
        /// Length of the raw input before trimming.
        input_length: usize,
    },
    /// Workspace root is empty after trimming.
    EmptyRoot {
        /// Length of the raw input before trimming.
        input_length: usize,
    },
    /// Relative path is empty or refers to the root itself.
    EmptyRelativePath,
    /// Relative path is absolute (`/x`, `C:/x`).
    AbsoluteRelativePath {
        /// Normalized input.
        input: String,
    },
    /// Relative path contains a `..` segment.
    PathTraversal {
        /// Normalized input.
        input: String,
    },
}

impl PrimitiveError {
    fn error_code(&self) -> ErrorCode {
        match self {
            Self::InvalidBlobName { .. } => ErrorCode::new("domain", "invalid_blob_name"),
            Self::EmptyRoot { .. } => ErrorCode::new("domain", "invalid_root"),
            Self::EmptyRelativePath
            | Self::AbsoluteRelativePath { .. }
            | Self::PathTraversal { .. } => ErrorCode::new("domain", "invalid_relative_path"),
        }
    }
}

impl fmt::Display for PrimitiveError {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidBlobName { .. } => formatter.write_str("BlobName must be non-empty"),
            Self::EmptyRoot { .. } => formatter.write_str("workspace root must be non-empty"),
            Self::EmptyRelativePath => formatter.write_str("relative path must name a file"),
            Self::AbsoluteRelativePath { .. } => {
                formatter.write_str("absolute paths are not allowed")
            },
            Self::PathTraversal { .. } => formatter.write_str("path traversal is not allowed"),
        }
    }
}

impl std::error::Error for PrimitiveError {}

impl From<PrimitiveError> for ErrorEnvelope {
    fn from(error: PrimitiveError) -> Self {
        let envelope = Self::expected(error.error_code(), error.to_string());
        match error {
            PrimitiveError::InvalidBlobName { input_length }
            | PrimitiveError::EmptyRoot { input_length } => {
                envelope.with_metadata("input_length", input_length.to_string())
            },
            PrimitiveError::AbsoluteRelativePath { input }
            | PrimitiveError::PathTraversal { input } => envelope.with_metadata("input", input),
            PrimitiveError::EmptyRelativePath => envelope,
        }
    }
}

/// Content-addressed name of a blob (hex digest).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlobName(Box<str>);

impl BlobName {
    /// Parse a `BlobName`; the value is trimmed and must be non-empty.
    pub fn parse(input: impl AsRef<str>) -> Result<Self, PrimitiveError> {
        let raw = input.as_ref();
        let Some(trimmed) = trimmed_non_empty(raw) else {
            return Err(PrimitiveError::InvalidBlobName {
                input_length: raw.len(),
            });
        };

        Ok(Self(trimmed.to_owned().into_boxed_str()))
    }

    /// Access the underlying string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consume and return the underlying string.
    #[must_use]
    pub fn into_inner(self) -> Box<str> {
        self.0
    }
}

impl AsRef<str> for BlobName {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl fmt::Display for BlobName {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

/// A file inside a workspace root.
///
/// `rel_path` is normalized: forward slashes, no leading `./`, no duplicate
/// separators, never absolute and never containing `..`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QualifiedPath {
    root: Box<str>,
    rel_path: Box<str>,
}

impl QualifiedPath {
    /// Build a qualified path from a root and a relative path.
    pub fn new(root: impl AsRef<str>, rel_path: impl AsRef<str>) -> Result<Self, PrimitiveError> {
        let raw_root = root.as_ref();
        let Some(root) = trimmed_non_empty(raw_root) else {
            return Err(PrimitiveError::EmptyRoot {
                input_length: raw_root.len(),
            });
        };
        let rel_path = normalize_relative_path(rel_path.as_ref())?;

        Ok(Self {
            root: root.to_owned().into_boxed_str(),
            rel_path: rel_path.into_boxed_str(),
        })
    }

    /// Workspace root.
    #[must_use]
    pub fn root(&self) -> &str {
        &self.root
    }

    /// Normalized path relative to the root.
    #[must_use]
    pub fn rel_path(&self) -> &str {
        &self.rel_path
    }

    /// Root joined with the relative path.
    #[must_use]
    pub fn to_path_buf(&self) -> PathBuf {
        self.rel_path
            .split('/')
            .fold(PathBuf::from(self.root.as_ref()), |path, segment| {
                path.join(segment)
            })
    }
}

impl fmt::Display for QualifiedPath {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            formatter,
            "{}/{}",
            self.root.trim_end_matches(['/', '\\']),
            self.rel_path
        )
    }
}

fn normalize_relative_path(input: &str) -> Result<String, PrimitiveError> {
    let replaced = input.trim().replace('\\', "/");
    let collapsed = collapse_forward_slashes(&replaced);
    if is_absolute_like(&collapsed) {
        return Err(PrimitiveError::AbsoluteRelativePath { input: collapsed });
    }

    let mut stripped = collapsed.as_str();
    while let Some(rest) = stripped.strip_prefix("./") {
        stripped = rest;
    }
    let stripped = stripped.trim_matches('/');
    if stripped.is_empty() || stripped == "." {
        return Err(PrimitiveError::EmptyRelativePath);
    }

    if stripped.split('/').any(|segment| segment == "..") {
        return Err(PrimitiveError::PathTraversal {
            input: stripped.to_owned(),
        });
    }

    Ok(stripped.to_owned())
}

fn is_absolute_like(path: &str) -> bool {
    if path.starts_with('/') {
        return true;
    }
    let bytes = path.as_bytes();
    matches!(bytes, [drive, b':', b'/', ..] if drive.is_ascii_alphabetic())
}

fn collapse_forward_slashes(input: &str) -> String {
    let mut output = String::with_capacity(input.len());
    let mut previous_was_slash = false;

    for ch in input.chars() {
        if ch == '/' {
            if previous_was_slash {
                continue;
            }
            previous_was_slash = true;
        } else {
            previous_was_slash = false;
        }
        output.push(ch);
    }

    output
}

fn trimmed_non_empty(input: &str) -> Option<&str> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}
