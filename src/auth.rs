//! Bearer token gate applied in front of every route.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::{header::AUTHORIZATION, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;

use crate::envelope::{codes, ErrorEntry, ResponseEnvelope};

const BEARER_PREFIX: &str = "Bearer ";

#[derive(Debug, thiserror::Error)]
pub enum AuthConfigError {
    #[error("API token is not configured")]
    MissingToken,
}

/// Holds the single token every caller must present.  Built once at
/// startup and shared read-only.
#[derive(Clone)]
pub struct AuthGate {
    expected: Arc<str>,
}

impl AuthGate {
    pub fn new(token: impl Into<String>) -> Result<Self, AuthConfigError> {
        let token = token.into();
        if token.is_empty() {
            return Err(AuthConfigError::MissingToken);
        }
        Ok(Self {
            expected: Arc::from(token),
        })
    }

    /// Admit only `Bearer <token>` with the scheme spelled exactly and the
    /// token matching byte for byte.
    pub fn admits(&self, header: Option<&str>) -> bool {
        header
            .and_then(|raw| raw.strip_prefix(BEARER_PREFIX))
            .map_or(false, |token| token == &*self.expected)
    }
}

impl std::fmt::Debug for AuthGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthGate").finish_non_exhaustive()
    }
}

pub fn unauthorized() -> Response {
    let envelope = ResponseEnvelope::<()>::domain_error(ErrorEntry::with_message(
        codes::MISSING_CREDENTIALS,
        "Invalid or missing token",
    ));
    (StatusCode::UNAUTHORIZED, Json(envelope)).into_response()
}

/// Middleware for `axum::middleware::from_fn_with_state`.  Rejected
/// requests never reach the inner service.
pub async fn require_bearer(State(gate): State<AuthGate>, request: Request, next: Next) -> Response {
    let header = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok());
    if gate.admits(header) {
        return next.run(request).await;
    }
    tracing::warn!(
        method = %request.method(),
        path = %request.uri().path(),
        header_present = header.is_some(),
        "rejected request: invalid or missing bearer token"
    );
    unauthorized()
}
