//! Error taxonomy for the proxy boundary.
//!
//! Every failure leaves the server as the OpenAI-style error envelope
//! `{"error": {"message", "type", "code"}}`. Nothing here is fatal to the
//! process; each error is scoped to one request.

use crate::schemas::ErrorResponse;
use crate::schemas::validate::ValidationError;
use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProxyError {
    /// Malformed or out-of-domain request field(s). Never propagated past
    /// the boundary; rejected, not best-effort accepted.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Authorization header required")]
    MissingAuth,

    #[error("Invalid API key")]
    InvalidApiKey,

    #[error("Model '{0}' not supported. Use '{1}'")]
    UnknownModel(String, String),

    #[error("No Z.AI cookies configured. Please set Z_AI_COOKIES")]
    NoCookies,

    #[error("Upstream error: {detail}")]
    Upstream { status: StatusCode, detail: String },

    #[error("Upstream service unavailable: {0}")]
    UpstreamUnavailable(String),
}

impl ProxyError {
    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::Validation(_) => StatusCode::BAD_REQUEST,
            ProxyError::MissingAuth | ProxyError::InvalidApiKey => StatusCode::UNAUTHORIZED,
            ProxyError::UnknownModel(_, _) => StatusCode::BAD_REQUEST,
            ProxyError::NoCookies => StatusCode::SERVICE_UNAVAILABLE,
            ProxyError::Upstream { status, .. } => *status,
            ProxyError::UpstreamUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    fn error_type(&self) -> &'static str {
        match self {
            ProxyError::Validation(_)
            | ProxyError::MissingAuth
            | ProxyError::InvalidApiKey
            | ProxyError::UnknownModel(_, _) => "invalid_request_error",
            ProxyError::NoCookies | ProxyError::UpstreamUnavailable(_) => "service_unavailable",
            ProxyError::Upstream { .. } => "upstream_error",
        }
    }

    /// Wrap this failure in the wire-level error envelope.
    pub fn to_envelope(&self) -> ErrorResponse {
        let mut error = json!({
            "message": self.to_string(),
            "type": self.error_type(),
            "code": self.status().as_u16(),
        });
        // Validation failures additionally enumerate each violated field so
        // a caller can fix all of them in one round trip.
        if let ProxyError::Validation(e) = self {
            error["violations"] = json!(
                e.violations
                    .iter()
                    .map(|v| json!({"field": v.field, "message": v.message}))
                    .collect::<Vec<_>>()
            );
        }
        ErrorResponse { error }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        tracing::debug!(status = %self.status(), error = %self, "Request failed");
        (self.status(), Json(self.to_envelope())).into_response()
    }
}
