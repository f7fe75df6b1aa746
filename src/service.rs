//! Request orchestration independent of HTTP.
//!
//! `DocumentService` normalizes the input, calls the analysis backend and
//! maps the outcome into an envelope.  Errors it returns are the
//! unclassified kind; the route decides which HTTP status they get.

use std::sync::Arc;

use crate::backend::{AnalysisBackend, AnalysisError, BlobBackend, BlobError};
use crate::envelope::ResponseEnvelope;
use crate::input::{self, AnalysisRequest, DocumentSource, Normalized};
use crate::mapper::{self, AnalyzeResult};

pub const BLOB_FETCH_FALLBACK: &str = "Error while fetching blob from Azure Blob Storage";

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("The input is not a valid Base-64 string: {0}")]
    Decode(#[from] base64::DecodeError),
    #[error("Invalid URI: {0}")]
    InvalidUri(String),
    #[error("Failed to read blob content: {0}")]
    BlobRead(BlobError),
    #[error(transparent)]
    Analysis(#[from] AnalysisError),
}

#[derive(Clone)]
pub struct DocumentService {
    analysis: Arc<dyn AnalysisBackend>,
    blobs: Arc<dyn BlobBackend>,
}

impl DocumentService {
    pub fn new(analysis: Arc<dyn AnalysisBackend>, blobs: Arc<dyn BlobBackend>) -> Self {
        Self { analysis, blobs }
    }

    pub async fn analyze(
        &self,
        request: AnalysisRequest,
        model_id: &str,
    ) -> Result<ResponseEnvelope<AnalyzeResult>, ServiceError> {
        let source = match input::normalize(request, self.blobs.as_ref()).await? {
            Normalized::Ready(source) => source,
            Normalized::BlobUnavailable(err) => {
                let message = err.to_string();
                let content = if message.is_empty() {
                    BLOB_FETCH_FALLBACK.to_string()
                } else {
                    message
                };
                return Ok(ResponseEnvelope::ok(AnalyzeResult::failed(model_id, content)));
            }
        };

        let outcome = match &source {
            DocumentSource::Stream(bytes) => {
                tracing::debug!(model_id, bytes = bytes.len(), "analyzing document stream");
                self.analysis.analyze_stream(bytes.clone(), model_id).await
            }
            DocumentSource::Uri(uri) => {
                tracing::debug!(model_id, uri = %uri, "analyzing document uri");
                self.analysis.analyze_uri(uri, model_id).await
            }
        };
        let result = mapper::map_outcome(outcome, model_id)?;
        tracing::info!(
            model_id,
            success = result.success,
            field_count = result.fields.len(),
            "analysis completed"
        );
        Ok(ResponseEnvelope::ok(result))
    }
}
