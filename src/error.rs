//! Crate-wide error taxonomy.
//!
//! Mirrors the status-code mapping the public API would apply (see
//! SPEC_FULL.md §8); a plain enum with a hand-written `IntoResponse` impl,
//! following the style of `AuthError`/`AuthApiError` rather than a derive
//! macro crate.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::fmt;

#[derive(Debug)]
pub enum AppError {
    /// Bad input at an API boundary. No retry.
    Validation(String),
    /// Unknown contract/settlement/webhook id.
    NotFound(String),
    /// Observation or forecast source unreachable, timed out, or returned 5xx,
    /// and no fallback exists for the caller.
    UpstreamUnavailable(String),
    /// Upstream returned 4xx, indicating a mis-configured request.
    UpstreamClientError { status: u16, detail: String },
    /// Hash-chain or uniqueness violation on append that isn't a benign race.
    Integrity(String),
    /// Unhandled internal failure.
    Internal(anyhow::Error),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Validation(msg) => write!(f, "validation error: {msg}"),
            AppError::NotFound(msg) => write!(f, "not found: {msg}"),
            AppError::UpstreamUnavailable(msg) => write!(f, "upstream unavailable: {msg}"),
            AppError::UpstreamClientError { status, detail } => {
                write!(f, "upstream client error ({status}): {detail}")
            }
            AppError::Integrity(msg) => write!(f, "integrity violation: {msg}"),
            AppError::Internal(err) => write!(f, "internal error: {err}"),
        }
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AppError::Internal(err) => Some(err.as_ref()),
            _ => None,
        }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        if let Some(collision) = err.downcast_ref::<crate::store::HashCollision>() {
            return AppError::Integrity(collision.to_string());
        }
        AppError::Internal(err)
    }
}

impl From<rusqlite::Error> for AppError {
    fn from(err: rusqlite::Error) -> Self {
        AppError::Internal(anyhow::Error::new(err))
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone()),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg.clone()),
            AppError::UpstreamUnavailable(msg) => {
                (StatusCode::BAD_GATEWAY, "UPSTREAM_UNAVAILABLE", msg.clone())
            }
            AppError::UpstreamClientError { detail, .. } => {
                (StatusCode::BAD_GATEWAY, "UPSTREAM_CLIENT_ERROR", detail.clone())
            }
            AppError::Integrity(msg) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "INTEGRITY_VIOLATION", msg.clone())
            }
            AppError::Internal(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                "An unexpected error occurred.".to_string(),
            ),
        };

        if matches!(self, AppError::Internal(_)) {
            tracing::error!(error = %self, "unhandled internal error");
        }

        (
            status,
            Json(json!({
                "error": {
                    "code": code,
                    "message": message,
                }
            })),
        )
            .into_response()
    }
}
