#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use axum::body::Body;
use axum::http::{header, Request};
use axum::response::Response;
use bytes::Bytes;
use fieldwise::auth::AuthGate;
use fieldwise::backend::{
    AnalysisBackend, AnalysisError, BlobBackend, BlobError, BlobStream, ChunkSource,
    RawAnalyzeResult, RawDocument, RawField,
};
use fieldwise::AppState;
use http_body_util::BodyExt;
use reqwest::Url;

pub const TOKEN: &str = "valid_token";

/// Tracks environment variable mutations and restores originals on drop.
pub struct EnvGuard {
    originals: HashMap<String, Option<String>>,
}

impl EnvGuard {
    pub fn new() -> Self {
        Self {
            originals: HashMap::new(),
        }
    }

    pub fn set(&mut self, key: &str, value: &str) {
        self.capture(key);
        std::env::set_var(key, value);
    }

    pub fn set_many(&mut self, entries: &[(&str, &str)]) {
        for (key, value) in entries {
            self.set(key, value);
        }
    }

    pub fn remove(&mut self, key: &str) {
        self.capture(key);
        std::env::remove_var(key);
    }

    fn capture(&mut self, key: &str) {
        if self.originals.contains_key(key) {
            return;
        }
        let original = std::env::var(key).ok();
        self.originals.insert(key.to_string(), original);
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, original) in self.originals.drain() {
            match original {
                Some(value) => std::env::set_var(&key, value),
                None => std::env::remove_var(&key),
            }
        }
    }
}

/// What the analysis stub was asked to do.
#[derive(Debug, Clone, PartialEq)]
pub enum AnalysisCall {
    Stream { document: Bytes, model_id: String },
    Uri { uri: String, model_id: String },
}

type Outcome = Box<dyn Fn() -> Result<RawAnalyzeResult, AnalysisError> + Send + Sync>;

/// In-process analysis backend with a fixed outcome.
pub struct StubAnalysis {
    outcome: Outcome,
    calls: Mutex<Vec<AnalysisCall>>,
}

impl StubAnalysis {
    pub fn new(
        outcome: impl Fn() -> Result<RawAnalyzeResult, AnalysisError> + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            outcome: Box::new(outcome),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn returning(result: RawAnalyzeResult) -> Arc<Self> {
        Self::new(move || Ok(result.clone()))
    }

    pub fn calls(&self) -> Vec<AnalysisCall> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: AnalysisCall) -> Result<RawAnalyzeResult, AnalysisError> {
        self.calls.lock().unwrap().push(call);
        (self.outcome)()
    }
}

#[async_trait::async_trait]
impl AnalysisBackend for StubAnalysis {
    async fn analyze_stream(
        &self,
        document: Bytes,
        model_id: &str,
    ) -> Result<RawAnalyzeResult, AnalysisError> {
        self.record(AnalysisCall::Stream {
            document,
            model_id: model_id.to_string(),
        })
    }

    async fn analyze_uri(
        &self,
        uri: &Url,
        model_id: &str,
    ) -> Result<RawAnalyzeResult, AnalysisError> {
        self.record(AnalysisCall::Uri {
            uri: uri.to_string(),
            model_id: model_id.to_string(),
        })
    }
}

struct MemoryChunks(VecDeque<Result<Bytes, BlobError>>);

#[async_trait::async_trait]
impl ChunkSource for MemoryChunks {
    async fn next_chunk(&mut self) -> Result<Option<Bytes>, BlobError> {
        self.0.pop_front().transpose()
    }
}

#[derive(Clone)]
pub enum StoredBlob {
    Found(Vec<Bytes>),
    /// Download refused before any bytes were sent.
    Refused(String),
    /// Download starts, then fails after the given chunks.
    BrokenAfter(Vec<Bytes>, String),
}

/// In-memory blob store keyed by `container/blob`.  Unknown keys are refused
/// with the storage service's not-found wording.
#[derive(Default)]
pub struct StubBlobs {
    blobs: HashMap<String, StoredBlob>,
}

impl StubBlobs {
    pub fn empty() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with(entries: &[(&str, StoredBlob)]) -> Arc<Self> {
        Arc::new(Self {
            blobs: entries
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
        })
    }
}

#[async_trait::async_trait]
impl BlobBackend for StubBlobs {
    async fn fetch_blob(&self, container: &str, blob: &str) -> Result<BlobStream, BlobError> {
        match self.blobs.get(&format!("{}/{}", container, blob)) {
            Some(StoredBlob::Found(chunks)) => Ok(BlobStream::new(MemoryChunks(
                chunks.iter().cloned().map(Ok).collect(),
            ))),
            Some(StoredBlob::Refused(message)) => Err(BlobError::Other(message.clone())),
            Some(StoredBlob::BrokenAfter(chunks, message)) => {
                let mut queue: VecDeque<_> = chunks.iter().cloned().map(Ok).collect();
                queue.push_back(Err(BlobError::Other(message.clone())));
                Ok(BlobStream::new(MemoryChunks(queue)))
            }
            None => Err(BlobError::RequestFailed {
                status: 404,
                code: Some("BlobNotFound".into()),
                message: "The specified blob does not exist.".into(),
            }),
        }
    }
}

pub fn state(analysis: Arc<StubAnalysis>, blobs: Arc<StubBlobs>) -> AppState {
    AppState::new(AuthGate::new(TOKEN).unwrap(), analysis, blobs)
}

/// Analysis result for a single invoice with one `Amount` field.
pub fn invoice_result() -> RawAnalyzeResult {
    let mut document = RawDocument::default();
    document.fields.insert(
        "Amount".into(),
        RawField {
            content: Some("150.00".into()),
            confidence: Some(0.85),
        },
    );
    RawAnalyzeResult {
        api_version: "2023-07-31".into(),
        model_id: "prebuilt-invoice".into(),
        content: "INVOICE ... 150.00".into(),
        documents: Some(vec![document]),
    }
}

pub fn json_request(uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .header(header::AUTHORIZATION, format!("Bearer {}", TOKEN))
        .body(Body::from(serde_json::to_vec(&body).unwrap()))
        .unwrap()
}

pub const BOUNDARY: &str = "fieldwise-boundary";

/// Multipart body with a single file part named `field`.
pub fn multipart_request(uri: &str, field: &str, content: &[u8]) -> Request<Body> {
    let mut body = Vec::new();
    body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
    body.extend_from_slice(
        format!(
            "Content-Disposition: form-data; name=\"{}\"; filename=\"slip.pdf\"\r\n",
            field
        )
        .as_bytes(),
    );
    body.extend_from_slice(b"Content-Type: application/pdf\r\n\r\n");
    body.extend_from_slice(content);
    body.extend_from_slice(format!("\r\n--{}--\r\n", BOUNDARY).as_bytes());
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={}", BOUNDARY),
        )
        .header(header::AUTHORIZATION, format!("Bearer {}", TOKEN))
        .body(Body::from(body))
        .unwrap()
}

pub async fn body_bytes(resp: Response) -> Bytes {
    resp.into_body().collect().await.unwrap().to_bytes()
}

pub async fn body_text(resp: Response) -> String {
    String::from_utf8(body_bytes(resp).await.to_vec()).unwrap()
}

pub async fn body_json(resp: Response) -> serde_json::Value {
    serde_json::from_slice(&body_bytes(resp).await).unwrap()
}
