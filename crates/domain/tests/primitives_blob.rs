//! Integration coverage for domain primitives and blob records.

use blob_sync_domain::{BlobName, BlobRecord, BlobStatus, PrimitiveError, QualifiedPath};
use blob_sync_shared::ErrorEnvelope;

#[test]
fn primitive_errors_map_into_error_envelopes() -> Result<(), PrimitiveError> {
    let Err(error) = BlobName::parse(" ") else {
        return Err(PrimitiveError::InvalidBlobName { input_length: 0 });
    };

    let envelope: ErrorEnvelope = error.into();
    assert_eq!(envelope.code.namespace(), "domain");
    assert_eq!(envelope.code.code(), "invalid_blob_name");
    assert_eq!(
        envelope.metadata.get("input_length"),
        Some(&"1".to_string())
    );

    let Err(path_error) = QualifiedPath::new("ws", "a/../../b") else {
        return Err(PrimitiveError::EmptyRelativePath);
    };

    let envelope: ErrorEnvelope = path_error.into();
    assert_eq!(envelope.code.code(), "invalid_relative_path");
    assert_eq!(envelope.metadata.get("input"), Some(&"a/../../b".to_string()));

    Ok(())
}

#[test]
fn blob_record_serializes_camel_case() -> Result<(), Box<dyn std::error::Error>> {
    let record = BlobRecord::uploaded(
        BlobName::parse("abc")?,
        QualifiedPath::new("/ws", "src/lib.rs")?,
        42,
    );
    let value = serde_json::to_value(&record)?;

    assert_eq!(value["blobName"], "abc");
    assert_eq!(value["path"]["relPath"], "src/lib.rs");
    assert_eq!(value["status"], "uploaded");
    assert_eq!(value["uploadRequestedAtMs"], 42);
    assert!(value["indexedAtMs"].is_null());

    let back: BlobRecord = serde_json::from_value(value)?;
    assert_eq!(back, record);
    assert_eq!(back.status, BlobStatus::Uploaded);
    Ok(())
}
