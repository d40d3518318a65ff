//! HTTP blob service adapter.

use blob_sync_config::ApiConfig;
use blob_sync_ports::{
    BlobApiPort, BlobName, BoxFuture, FindMissingResult, QualifiedPath, UploadBlob,
};
use blob_sync_shared::{ErrorClass, ErrorCode, ErrorEnvelope, RequestContext, Result};
use reqwest::StatusCode;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// HTTP blob API configuration.
#[derive(Debug, Clone)]
pub struct HttpBlobApiConfig {
    /// Service base URL; endpoints are appended to it.
    pub base_url: Box<str>,
    /// Optional bearer token.
    pub api_token: Option<Box<str>>,
    /// Request timeout in milliseconds.
    pub timeout_ms: u64,
}

impl HttpBlobApiConfig {
    /// Build from the validated API config. Fails when no base URL is set.
    pub fn from_api_config(config: &ApiConfig) -> Result<Self> {
        let base_url = config.base_url.as_deref().ok_or_else(|| {
            ErrorEnvelope::expected(ErrorCode::invalid_input(), "api.baseUrl must be set")
        })?;
        Ok(Self {
            base_url: base_url.into(),
            api_token: config.api_token.as_deref().map(Box::from),
            timeout_ms: config.timeout_ms,
        })
    }
}

/// Blob service client speaking JSON over HTTP POST.
pub struct HttpBlobApi {
    client: reqwest::Client,
    find_missing_endpoint: Box<str>,
    batch_upload_endpoint: Box<str>,
}

impl HttpBlobApi {
    /// Create a new client.
    pub fn new(config: &HttpBlobApiConfig) -> Result<Self> {
        let base_url = config.base_url.trim().trim_end_matches('/');
        if base_url.is_empty() {
            return Err(ErrorEnvelope::expected(
                ErrorCode::invalid_input(),
                "base url must be non-empty",
            ));
        }
        if config.timeout_ms == 0 {
            return Err(ErrorEnvelope::expected(
                ErrorCode::invalid_input(),
                "timeout must be greater than zero",
            ));
        }

        let mut headers = HeaderMap::new();
        let token = config
            .api_token
            .as_deref()
            .map(str::trim)
            .filter(|token| !token.is_empty());
        if let Some(token) = token {
            let mut auth_header =
                HeaderValue::from_str(&format!("Bearer {token}")).map_err(|_| {
                    ErrorEnvelope::expected(
                        ErrorCode::invalid_input(),
                        "api token contains invalid header characters",
                    )
                })?;
            auth_header.set_sensitive(true);
            headers.insert(AUTHORIZATION, auth_header);
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .default_headers(headers)
            .build()
            .map_err(|error| {
                ErrorEnvelope::unexpected(
                    ErrorCode::new("blob_api", "client_init_failed"),
                    format!("failed to build blob API client: {error}"),
                    ErrorClass::NonRetriable,
                )
            })?;

        Ok(Self {
            client,
            find_missing_endpoint: format!("{base_url}/find-missing").into_boxed_str(),
            batch_upload_endpoint: format!("{base_url}/batch-upload").into_boxed_str(),
        })
    }

    async fn post<Req, Resp>(
        &self,
        ctx: &RequestContext,
        endpoint: &str,
        request: &Req,
        operation: &'static str,
    ) -> Result<Resp>
    where
        Req: Serialize + Sync,
        Resp: DeserializeOwned,
    {
        ctx.ensure_not_cancelled(operation)?;

        let response = tokio::select! {
            () = ctx.cancelled() => return Err(cancelled_error(operation)),
            result = self.client.post(endpoint).json(request).send() => {
                result.map_err(|error| map_reqwest_error(&error, operation))?
            }
        };

        let status = response.status();
        let payload = tokio::select! {
            () = ctx.cancelled() => return Err(cancelled_error(operation)),
            result = response.bytes() => {
                result.map_err(|error| map_reqwest_error(&error, operation))?
            }
        };

        if !status.is_success() {
            return Err(map_http_error(status, &payload, operation));
        }

        serde_json::from_slice(&payload).map_err(|error| {
            ErrorEnvelope::unexpected(
                ErrorCode::new("blob_api", "invalid_response"),
                format!("failed to decode blob API response: {error}"),
                ErrorClass::NonRetriable,
            )
            .with_metadata("operation", operation)
        })
    }
}

impl BlobApiPort for HttpBlobApi {
    fn find_missing(
        &self,
        ctx: &RequestContext,
        blob_names: Vec<BlobName>,
    ) -> BoxFuture<'_, Result<FindMissingResult>> {
        let ctx = ctx.clone();
        Box::pin(async move {
            let request = FindMissingRequest {
                mem_object_names: blob_names.iter().map(BlobName::as_str).collect(),
            };
            let response: FindMissingResponse = self
                .post(
                    &ctx,
                    &self.find_missing_endpoint,
                    &request,
                    "http_blob_api.find_missing",
                )
                .await?;
            Ok(FindMissingResult {
                unknown_blob_names: parse_names(response.unknown_memory_names)?,
                nonindexed_blob_names: parse_names(response.nonindexed_blob_names)?,
            })
        })
    }

    fn batch_upload(
        &self,
        ctx: &RequestContext,
        blobs: Vec<UploadBlob>,
    ) -> BoxFuture<'_, Result<()>> {
        let ctx = ctx.clone();
        Box::pin(async move {
            let request = BatchUploadRequest {
                blobs: blobs
                    .iter()
                    .map(|blob| UploadEntry {
                        blob_name: blob.blob_name.as_str(),
                        path: blob.path.rel_path(),
                        content: &blob.text,
                        metadata: blob
                            .metadata
                            .iter()
                            .map(|(key, value)| MetadataEntry { key, value })
                            .collect(),
                    })
                    .collect(),
            };
            let response: BatchUploadResponse = self
                .post(
                    &ctx,
                    &self.batch_upload_endpoint,
                    &request,
                    "http_blob_api.batch_upload",
                )
                .await?;

            let accepted = parse_names(response.blob_names)?;
            if let Some(rejected) = blobs
                .iter()
                .find(|blob| !accepted.contains(&blob.blob_name))
            {
                return Err(rejected_upload(&rejected.path, &rejected.blob_name));
            }
            Ok(())
        })
    }
}

#[derive(Debug, Serialize)]
struct FindMissingRequest<'a> {
    mem_object_names: Vec<&'a str>,
}

#[derive(Debug, Deserialize)]
struct FindMissingResponse {
    #[serde(default)]
    unknown_memory_names: Vec<String>,
    #[serde(default)]
    nonindexed_blob_names: Vec<String>,
}

#[derive(Debug, Serialize)]
struct BatchUploadRequest<'a> {
    blobs: Vec<UploadEntry<'a>>,
}

#[derive(Debug, Serialize)]
struct UploadEntry<'a> {
    blob_name: &'a str,
    path: &'a str,
    content: &'a str,
    metadata: Vec<MetadataEntry<'a>>,
}

#[derive(Debug, Serialize)]
struct MetadataEntry<'a> {
    key: &'a str,
    value: &'a str,
}

#[derive(Debug, Deserialize)]
struct BatchUploadResponse {
    #[serde(default)]
    blob_names: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    #[serde(alias = "error")]
    message: String,
}

fn parse_names(raw: Vec<String>) -> Result<Vec<BlobName>> {
    raw.into_iter()
        .map(|name| BlobName::parse(name).map_err(ErrorEnvelope::from))
        .collect()
}

fn rejected_upload(path: &QualifiedPath, blob_name: &BlobName) -> ErrorEnvelope {
    ErrorEnvelope::unexpected(
        ErrorCode::new("blob_api", "upload_not_accepted"),
        "blob service did not accept the upload",
        ErrorClass::Retriable,
    )
    .with_metadata("path", path.to_string())
    .with_metadata("blobName", blob_name.as_str())
}

fn cancelled_error(operation: &'static str) -> ErrorEnvelope {
    ErrorEnvelope::cancelled("operation cancelled").with_metadata("operation", operation)
}

fn map_reqwest_error(error: &reqwest::Error, operation: &'static str) -> ErrorEnvelope {
    let envelope = if error.is_timeout() {
        ErrorEnvelope::unexpected(
            ErrorCode::timeout(),
            "blob API request timed out",
            ErrorClass::Retriable,
        )
    } else if error.is_connect() {
        ErrorEnvelope::unexpected(
            ErrorCode::io(),
            format!("blob API connection failed: {error}"),
            ErrorClass::Retriable,
        )
    } else {
        ErrorEnvelope::unexpected(
            ErrorCode::new("blob_api", "request_failed"),
            format!("blob API request failed: {error}"),
            ErrorClass::NonRetriable,
        )
    };
    envelope.with_metadata("operation", operation)
}

fn map_http_error(status: StatusCode, payload: &[u8], operation: &'static str) -> ErrorEnvelope {
    let message = serde_json::from_slice::<ErrorResponse>(payload).map_or_else(
        |_| format!("blob API request failed with status {}", status.as_u16()),
        |parsed| parsed.message,
    );
    let envelope = match status.as_u16() {
        401 | 403 => ErrorEnvelope::expected(ErrorCode::permission_denied(), message),
        408 => ErrorEnvelope::unexpected(ErrorCode::timeout(), message, ErrorClass::Retriable),
        429 => ErrorEnvelope::unexpected(ErrorCode::rate_limited(), message, ErrorClass::Retriable),
        _ if status.is_server_error() => {
            ErrorEnvelope::unexpected(ErrorCode::unavailable(), message, ErrorClass::Retriable)
        },
        _ => ErrorEnvelope::unexpected(
            ErrorCode::new("http", "bad_request"),
            message,
            ErrorClass::NonRetriable,
        ),
    };
    envelope
        .with_metadata("status", status.as_u16().to_string())
        .with_metadata("operation", operation)
}
