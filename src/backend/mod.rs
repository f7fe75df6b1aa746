//! Backend seams.
//!
//! The service talks to two external collaborators: a document analysis
//! backend and a blob store.  Each one sits behind an async trait so the
//! router can hold `Arc<dyn …>` handles that are shared across requests
//! and replaced by in-process fakes in tests.  The HTTP implementations
//! for Azure live in the submodules.

use std::collections::BTreeMap;
use std::fmt;

use bytes::Bytes;
use reqwest::Url;
use serde::Deserialize;

pub mod analysis;
pub mod blob;

pub use analysis::{AnalysisClientConfig, DocumentIntelligenceClient};
pub use blob::{BlobStorageClient, ConnectionString, ConnectionStringError};

/// Raw analysis result as reported by the backend.  Only the parts the
/// result mapper reads are kept.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawAnalyzeResult {
    #[serde(default)]
    pub api_version: String,
    #[serde(default)]
    pub model_id: String,
    #[serde(default)]
    pub content: String,
    /// `None` when the backend omitted the collection entirely.
    #[serde(default)]
    pub documents: Option<Vec<RawDocument>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawDocument {
    #[serde(default)]
    pub fields: BTreeMap<String, RawField>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawField {
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub confidence: Option<f32>,
}

/// Detail the analysis backend attaches to a rejected request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct InnerError {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, thiserror::Error)]
pub enum AnalysisError {
    /// The backend answered and rejected the request.
    #[error("{}", request_failed_message(.status, .inner))]
    RequestFailed {
        status: u16,
        inner: Option<InnerError>,
    },
    /// Transport failure before any answer.  Mapped to a soft failure
    /// like `RequestFailed`, without inner detail.
    #[error("analysis backend unreachable: {0}")]
    Unreachable(#[from] reqwest::Error),
    #[error("unexpected analysis backend response: {0}")]
    InvalidResponse(String),
}

fn request_failed_message(status: &u16, inner: &Option<InnerError>) -> String {
    match inner {
        Some(inner) => format!(
            "Service request failed. Status: {} ({}: {})",
            status, inner.code, inner.message
        ),
        None => format!("Service request failed. Status: {}", status),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BlobError {
    #[error("{message} Status: {status}, ErrorCode: {}", .code.as_deref().unwrap_or("unknown"))]
    RequestFailed {
        status: u16,
        code: Option<String>,
        message: String,
    },
    #[error("blob storage unreachable: {0}")]
    Unreachable(#[from] reqwest::Error),
    /// Fetch failure raised by a non-HTTP blob backend.
    #[error("{0}")]
    Other(String),
}

/// Forward-only byte source returned by a blob download.  Implementors
/// yield chunks until `None`.
#[async_trait::async_trait]
pub trait ChunkSource: Send {
    async fn next_chunk(&mut self) -> Result<Option<Bytes>, BlobError>;
}

#[async_trait::async_trait]
impl ChunkSource for reqwest::Response {
    async fn next_chunk(&mut self) -> Result<Option<Bytes>, BlobError> {
        self.chunk().await.map_err(BlobError::Unreachable)
    }
}

pub struct BlobStream {
    source: Box<dyn ChunkSource>,
}

impl BlobStream {
    pub fn new(source: impl ChunkSource + 'static) -> Self {
        Self {
            source: Box::new(source),
        }
    }

    pub async fn next_chunk(&mut self) -> Result<Option<Bytes>, BlobError> {
        self.source.next_chunk().await
    }
}

impl fmt::Debug for BlobStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlobStream").finish_non_exhaustive()
    }
}

/// Document analysis backend.  Both calls block until the long-running
/// operation completes.
#[async_trait::async_trait]
pub trait AnalysisBackend: Send + Sync {
    async fn analyze_stream(
        &self,
        document: Bytes,
        model_id: &str,
    ) -> Result<RawAnalyzeResult, AnalysisError>;

    async fn analyze_uri(&self, uri: &Url, model_id: &str)
        -> Result<RawAnalyzeResult, AnalysisError>;
}

/// Blob store addressed by container and blob name.
#[async_trait::async_trait]
pub trait BlobBackend: Send + Sync {
    async fn fetch_blob(&self, container: &str, blob: &str) -> Result<BlobStream, BlobError>;
}
