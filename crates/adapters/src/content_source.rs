//! Local filesystem content source.

use blob_sync_ports::{BoxFuture, ContentSourcePort, QualifiedPath};
use blob_sync_shared::{ErrorCode, ErrorEnvelope, RequestContext, Result};
use std::io::ErrorKind;

/// Reads workspace files with `tokio::fs`.
///
/// A missing file is `Ok(None)`; content that is not valid UTF-8 is an
/// `invalid_input` error.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalContentSource;

impl ContentSourcePort for LocalContentSource {
    fn read_text(
        &self,
        ctx: &RequestContext,
        path: &QualifiedPath,
    ) -> BoxFuture<'_, Result<Option<Box<str>>>> {
        let ctx = ctx.clone();
        let full_path = path.to_path_buf();
        let display = path.to_string();
        Box::pin(async move {
            ctx.ensure_not_cancelled("local_content_source.read_text")?;
            let bytes = match tokio::fs::read(&full_path).await {
                Ok(bytes) => bytes,
                Err(error) if error.kind() == ErrorKind::NotFound => return Ok(None),
                Err(error) => {
                    return Err(ErrorEnvelope::from(error).with_metadata("path", display));
                },
            };
            let text = String::from_utf8(bytes).map_err(|_| {
                ErrorEnvelope::expected(ErrorCode::invalid_input(), "file is not valid UTF-8")
                    .with_metadata("path", display.clone())
            })?;
            Ok(Some(text.into_boxed_str()))
        })
    }
}
