//! Core library for Fieldwise.  This module wires together the bearer
//! token gate, the document analysis service and the HTTP handlers for
//! the four supported input shapes.

pub mod auth;
pub mod backend;
mod config;
pub mod envelope;
pub mod input;
pub mod mapper;
pub mod service;

pub use config::AppConfig;

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::multipart::{MultipartError, MultipartRejection};
use axum::extract::{DefaultBodyLimit, Multipart, Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{middleware, routing::post, Json, Router};
use bytes::Bytes;
use serde::Deserialize;
use tower_http::trace::TraceLayer;

use crate::auth::AuthGate;
use crate::backend::{
    AnalysisBackend, BlobBackend, BlobStorageClient, DocumentIntelligenceClient,
};
use crate::envelope::ResponseEnvelope;
use crate::input::AnalysisRequest;
use crate::mapper::AnalyzeResult;
use crate::service::{DocumentService, ServiceError};

pub use crate::envelope::{ErrorEntry, Payload};
pub use crate::mapper::SlipField;

pub const DEFAULT_MAX_REQUEST_BYTES: usize = 50 * 1024 * 1024;

// Request bodies.  Absent and `null` values both read as missing.

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Base64Request {
    #[serde(default)]
    pub base64_document: Option<String>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(rename_all = "camelCase")]
pub struct UriRequest {
    #[serde(default)]
    pub uri_document: Option<String>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(rename_all = "camelCase")]
pub struct BlobRequest {
    #[serde(default)]
    pub container_name: Option<String>,
    #[serde(default)]
    pub blob_name: Option<String>,
}

/// Application state shared across handlers.  Everything in here is
/// immutable after startup; backend handles are shared clients.
#[derive(Clone)]
pub struct AppState {
    pub service: DocumentService,
    pub auth: AuthGate,
    /// Model for the routes without a `{modelId}` segment.
    pub default_model_id: Option<String>,
    pub max_request_bytes: usize,
}

impl AppState {
    pub fn new(
        auth: AuthGate,
        analysis: Arc<dyn AnalysisBackend>,
        blobs: Arc<dyn BlobBackend>,
    ) -> Self {
        Self {
            service: DocumentService::new(analysis, blobs),
            auth,
            default_model_id: None,
            max_request_bytes: DEFAULT_MAX_REQUEST_BYTES,
        }
    }

    pub fn with_default_model(mut self, model_id: impl Into<String>) -> Self {
        self.default_model_id = Some(model_id.into());
        self
    }

    pub fn with_max_request_bytes(mut self, limit: usize) -> Self {
        self.max_request_bytes = limit;
        self
    }
}

/// Build state from environment variables (see `AppConfig::from_env`).
/// Any missing required setting is fatal.
pub async fn build_state_from_env() -> Result<AppState> {
    let config = AppConfig::from_env()?;
    let AppConfig {
        api_token,
        analysis,
        default_model_id,
        blob_connection,
        max_request_bytes,
    } = config;

    let auth = AuthGate::new(api_token).context("Failed to configure authentication")?;
    tracing::info!(
        endpoint = %analysis.endpoint,
        api_version = %analysis.api_version,
        default_model = ?default_model_id,
        "configuring document intelligence client"
    );
    let analysis = DocumentIntelligenceClient::new(analysis)
        .context("Failed to build document intelligence client")?;
    tracing::info!(endpoint = %blob_connection.blob_endpoint, "configuring blob storage client");
    let blobs = BlobStorageClient::new(blob_connection).context("Failed to build blob storage client")?;

    let mut state = AppState::new(auth, Arc::new(analysis), Arc::new(blobs))
        .with_max_request_bytes(max_request_bytes);
    state.default_model_id = default_model_id;
    Ok(state)
}

/// Build the Axum router.  Every route, including unknown paths, passes
/// the bearer token gate first.
pub fn app(state: AppState) -> Router {
    let mut documents = Router::new()
        .route("/base64/:model_id", post(base64_handler))
        .route("/bytes/:model_id", post(bytes_handler))
        .route("/uri/:model_id", post(uri_handler))
        .route("/azure-blob/:model_id", post(blob_handler));
    if state.default_model_id.is_some() {
        documents = documents
            .route("/base64", post(base64_handler))
            .route("/bytes", post(bytes_handler))
            .route("/uri", post(uri_handler))
            .route("/azure-blob", post(blob_handler));
    }

    Router::new()
        .nest("/api/azuredocument", documents)
        .fallback(|| async { StatusCode::NOT_FOUND })
        .layer(middleware::from_fn_with_state(
            state.auth.clone(),
            auth::require_bearer,
        ))
        .layer(DefaultBodyLimit::max(state.max_request_bytes))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn bad_request(message: &str) -> Response {
    (StatusCode::BAD_REQUEST, message.to_string()).into_response()
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

fn resolve_model(state: &AppState, model: Option<Path<String>>) -> Option<String> {
    model
        .map(|Path(id)| id)
        .or_else(|| state.default_model_id.clone())
        .filter(|id| !id.is_empty())
}

fn internal_error(err: &ServiceError) -> Response {
    tracing::error!(error = %err, "document analysis failed");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        format!("Internal server error: {}", err),
    )
        .into_response()
}

fn blob_processing_error(err: &ServiceError) -> Response {
    tracing::error!(error = %err, "blob document analysis failed");
    (
        StatusCode::BAD_REQUEST,
        format!("Failed to process invoice: {}", err),
    )
        .into_response()
}

async fn run(
    state: &AppState,
    request: AnalysisRequest,
    model_id: &str,
    on_error: fn(&ServiceError) -> Response,
) -> Response {
    match state.service.analyze(request, model_id).await {
        Ok(envelope) => respond(envelope),
        Err(err) => on_error(&err),
    }
}

fn respond(envelope: ResponseEnvelope<AnalyzeResult>) -> Response {
    (StatusCode::OK, Json(envelope)).into_response()
}

/// `POST /api/azuredocument/base64[/{modelId}]`
async fn base64_handler(
    State(state): State<AppState>,
    model: Option<Path<String>>,
    Json(body): Json<Base64Request>,
) -> Response {
    let Some(document) = non_empty(body.base64_document) else {
        return bad_request("No document provided.");
    };
    let Some(model_id) = resolve_model(&state, model) else {
        return bad_request("No model id provided.");
    };
    run(
        &state,
        AnalysisRequest::Base64Document(document),
        &model_id,
        internal_error,
    )
    .await
}

/// `POST /api/azuredocument/bytes[/{modelId}]` with the file in the
/// multipart field `document`.
async fn bytes_handler(
    State(state): State<AppState>,
    model: Option<Path<String>>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Response {
    let document = match multipart {
        Ok(multipart) => match read_document_field(multipart).await {
            Ok(document) => document,
            Err(err) => {
                tracing::warn!(error = %err, "failed to read multipart body");
                return err.into_response();
            }
        },
        Err(rejection) => {
            tracing::debug!(error = %rejection, "request is not multipart");
            None
        }
    };
    let Some(document) = document.filter(|d| !d.is_empty()) else {
        return bad_request("No document provided.");
    };
    let Some(model_id) = resolve_model(&state, model) else {
        return bad_request("No model id provided.");
    };
    run(
        &state,
        AnalysisRequest::RawBytes(document),
        &model_id,
        internal_error,
    )
    .await
}

async fn read_document_field(mut multipart: Multipart) -> Result<Option<Bytes>, MultipartError> {
    while let Some(field) = multipart.next_field().await? {
        if field.name() == Some("document") {
            return Ok(Some(field.bytes().await?));
        }
    }
    Ok(None)
}

/// `POST /api/azuredocument/uri[/{modelId}]`
async fn uri_handler(
    State(state): State<AppState>,
    model: Option<Path<String>>,
    Json(body): Json<UriRequest>,
) -> Response {
    let Some(uri) = non_empty(body.uri_document) else {
        return bad_request("No URI provided.");
    };
    let Some(model_id) = resolve_model(&state, model) else {
        return bad_request("No model id provided.");
    };
    run(
        &state,
        AnalysisRequest::RemoteUri(uri),
        &model_id,
        internal_error,
    )
    .await
}

/// `POST /api/azuredocument/azure-blob[/{modelId}]`.  Unhandled failures
/// on this route answer 400 instead of 500.
async fn blob_handler(
    State(state): State<AppState>,
    model: Option<Path<String>>,
    Json(body): Json<BlobRequest>,
) -> Response {
    let Some(container) = non_empty(body.container_name) else {
        return bad_request("No container name provided.");
    };
    let Some(blob) = non_empty(body.blob_name) else {
        return bad_request("No blob name provided.");
    };
    let Some(model_id) = resolve_model(&state, model) else {
        return bad_request("No model id provided.");
    };
    run(
        &state,
        AnalysisRequest::BlobRef { container, blob },
        &model_id,
        blob_processing_error,
    )
    .await
}
