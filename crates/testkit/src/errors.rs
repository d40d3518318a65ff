//! Error fixtures shaped like the ones the HTTP blob API adapter produces.

use blob_sync_shared::{ErrorClass, ErrorCode, ErrorEnvelope};

/// Retriable "service unavailable", as a 503 maps.
pub fn unavailable_error() -> ErrorEnvelope {
    ErrorEnvelope::unexpected(
        ErrorCode::unavailable(),
        "service unavailable",
        ErrorClass::Retriable,
    )
    .with_metadata("status", "503")
}

/// Non-retriable rejection, as a 400 maps.
pub fn rejected_error() -> ErrorEnvelope {
    ErrorEnvelope::unexpected(
        ErrorCode::new("http", "bad_request"),
        "rejected",
        ErrorClass::NonRetriable,
    )
    .with_metadata("status", "400")
}
