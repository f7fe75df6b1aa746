use std::time::Duration;

use bytes::Bytes;
use reqwest::header::{HeaderMap, CONTENT_TYPE, RETRY_AFTER};
use reqwest::{StatusCode, Url};
use serde::Deserialize;

use super::{AnalysisBackend, AnalysisError, InnerError, RawAnalyzeResult};

const KEY_HEADER: &str = "Ocp-Apim-Subscription-Key";
const OPERATION_LOCATION: &str = "operation-location";

pub fn default_api_version() -> String {
    "2023-07-31".to_string()
}

/// Connection settings for the Document Intelligence REST API.
#[derive(Clone, Debug)]
pub struct AnalysisClientConfig {
    pub endpoint: Url,
    pub api_key: String,
    pub api_version: String,
    /// Wait between status polls when the service sends no `Retry-After`.
    pub poll_interval: Duration,
}

/// Azure Document Intelligence client.  Submits an analyze operation and
/// polls it until it reaches a terminal state.
#[derive(Clone)]
pub struct DocumentIntelligenceClient {
    config: AnalysisClientConfig,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OperationStatus {
    status: String,
    #[serde(default)]
    analyze_result: Option<RawAnalyzeResult>,
    #[serde(default)]
    error: Option<ServiceErrorBody>,
}

#[derive(Debug, Default, Deserialize)]
struct ServiceErrorBody {
    #[serde(default, rename = "innererror")]
    inner_error: Option<InnerError>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ServiceErrorBody,
}

enum SubmitBody<'a> {
    Bytes(Bytes),
    Uri(&'a Url),
}

impl DocumentIntelligenceClient {
    pub fn new(config: AnalysisClientConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().build()?;
        Ok(Self { config, client })
    }

    fn analyze_url(&self, model_id: &str) -> Result<Url, AnalysisError> {
        let mut url = self.config.endpoint.clone();
        url.path_segments_mut()
            .map_err(|_| AnalysisError::InvalidResponse("endpoint cannot be a base URL".into()))?
            .pop_if_empty()
            .extend(["formrecognizer", "documentModels"])
            .push(&format!("{}:analyze", model_id));
        url.query_pairs_mut()
            .append_pair("api-version", &self.config.api_version);
        Ok(url)
    }

    async fn run(&self, model_id: &str, body: SubmitBody<'_>) -> Result<RawAnalyzeResult, AnalysisError> {
        let url = self.analyze_url(model_id)?;
        let request = self
            .client
            .post(url)
            .header(KEY_HEADER, &self.config.api_key);
        let request = match body {
            SubmitBody::Bytes(bytes) => request
                .header(CONTENT_TYPE, "application/octet-stream")
                .body(bytes),
            SubmitBody::Uri(uri) => request.json(&serde_json::json!({ "urlSource": uri.as_str() })),
        };
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(request_failed(status, response.text().await.unwrap_or_default()));
        }
        let location = response
            .headers()
            .get(OPERATION_LOCATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| AnalysisError::InvalidResponse("missing Operation-Location header".into()))?
            .to_string();
        tracing::debug!(model_id, operation = %location, "analyze operation accepted");
        self.poll(&location).await
    }

    async fn poll(&self, location: &str) -> Result<RawAnalyzeResult, AnalysisError> {
        loop {
            let response = self
                .client
                .get(location)
                .header(KEY_HEADER, &self.config.api_key)
                .send()
                .await?;
            let status = response.status();
            let delay = retry_after(response.headers()).unwrap_or(self.config.poll_interval);
            let text = response.text().await?;
            if !status.is_success() {
                return Err(request_failed(status, text));
            }
            let operation: OperationStatus = serde_json::from_str(&text)
                .map_err(|e| AnalysisError::InvalidResponse(e.to_string()))?;
            match operation.status.as_str() {
                "succeeded" => return Ok(operation.analyze_result.unwrap_or_default()),
                "failed" | "canceled" => {
                    return Err(AnalysisError::RequestFailed {
                        status: status.as_u16(),
                        inner: operation.error.and_then(|e| e.inner_error),
                    })
                }
                other => {
                    tracing::trace!(state = other, delay_ms = delay.as_millis() as u64, "analyze operation pending");
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

/// The inner error is optional: bodies that are not the documented error
/// shape still produce a `RequestFailed`.
fn request_failed(status: StatusCode, body: String) -> AnalysisError {
    let inner = serde_json::from_str::<ErrorEnvelope>(&body)
        .ok()
        .and_then(|envelope| envelope.error.inner_error);
    AnalysisError::RequestFailed {
        status: status.as_u16(),
        inner,
    }
}

#[async_trait::async_trait]
impl AnalysisBackend for DocumentIntelligenceClient {
    async fn analyze_stream(
        &self,
        document: Bytes,
        model_id: &str,
    ) -> Result<RawAnalyzeResult, AnalysisError> {
        self.run(model_id, SubmitBody::Bytes(document)).await
    }

    async fn analyze_uri(
        &self,
        uri: &Url,
        model_id: &str,
    ) -> Result<RawAnalyzeResult, AnalysisError> {
        self.run(model_id, SubmitBody::Uri(uri)).await
    }
}
