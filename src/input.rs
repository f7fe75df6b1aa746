//! Normalization of the four accepted input shapes.
//!
//! Base64 and raw uploads become an in-memory byte buffer, remote URIs
//! are parsed and handed to the backend without fetching, and blob
//! references are downloaded and fully buffered because the analysis
//! backend needs a seekable document.

use base64::prelude::*;
use bytes::{Bytes, BytesMut};
use reqwest::Url;

use crate::backend::{BlobBackend, BlobError, BlobStream};
use crate::service::ServiceError;

/// Document supplied by a caller.
#[derive(Debug, Clone, PartialEq)]
pub enum AnalysisRequest {
    Base64Document(String),
    RawBytes(Bytes),
    RemoteUri(String),
    BlobRef { container: String, blob: String },
}

/// What the analysis backend is called with.
#[derive(Debug, Clone, PartialEq)]
pub enum DocumentSource {
    Stream(Bytes),
    Uri(Url),
}

#[derive(Debug)]
pub enum Normalized {
    Ready(DocumentSource),
    /// The blob store refused or failed the download.  Reported to the
    /// caller as a failed analysis, not as an error.
    BlobUnavailable(BlobError),
}

pub async fn normalize(
    request: AnalysisRequest,
    blobs: &dyn BlobBackend,
) -> Result<Normalized, ServiceError> {
    let source = match request {
        AnalysisRequest::Base64Document(encoded) => DocumentSource::Stream(decode_base64(&encoded)?),
        AnalysisRequest::RawBytes(bytes) => DocumentSource::Stream(bytes),
        AnalysisRequest::RemoteUri(raw) => DocumentSource::Uri(parse_uri(&raw)?),
        AnalysisRequest::BlobRef { container, blob } => {
            let stream = match blobs.fetch_blob(&container, &blob).await {
                Ok(stream) => stream,
                Err(err) => {
                    tracing::warn!(container = %container, blob = %blob, error = %err, "blob fetch failed");
                    return Ok(Normalized::BlobUnavailable(err));
                }
            };
            DocumentSource::Stream(buffer_stream(stream).await?)
        }
    };
    Ok(Normalized::Ready(source))
}

pub fn decode_base64(encoded: &str) -> Result<Bytes, ServiceError> {
    BASE64_STANDARD
        .decode(encoded)
        .map(Bytes::from)
        .map_err(ServiceError::Decode)
}

pub fn parse_uri(raw: &str) -> Result<Url, ServiceError> {
    Url::parse(raw).map_err(|err| ServiceError::InvalidUri(err.to_string()))
}

/// Drain a forward-only blob stream into one contiguous buffer.
pub async fn buffer_stream(mut stream: BlobStream) -> Result<Bytes, ServiceError> {
    let mut buf = BytesMut::new();
    while let Some(chunk) = stream.next_chunk().await.map_err(ServiceError::BlobRead)? {
        buf.extend_from_slice(&chunk);
    }
    Ok(buf.freeze())
}
