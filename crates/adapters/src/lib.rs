//! # blob-sync-adapters
//!
//! Adapter implementations for ports: the HTTP blob service client, SHA-256
//! blob naming, local file content, wall-clock time and JSON log/metric sinks.
//! This crate depends on `ports`, `shared`, and `config`.

pub mod blob_name;
pub mod clock;
pub mod content_source;
pub mod http_blob_api;
pub mod log_sink;
pub mod logger;
pub mod telemetry;

/// Returns the adapters crate version.
#[must_use]
pub const fn adapters_crate_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

pub use blob_name::{DEFAULT_MAX_BLOB_SIZE_BYTES, Sha256BlobNameCalculator};
pub use clock::SystemClock;
pub use content_source::LocalContentSource;
pub use http_blob_api::{HttpBlobApi, HttpBlobApiConfig};
pub use log_sink::{LogSink, MemoryLogSink, StderrLogSink};
pub use logger::{JsonLogger, parse_log_level};
pub use telemetry::JsonTelemetry;
