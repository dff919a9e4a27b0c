//! Pipeline error taxonomy and HTTP mapping.
//!
//! # Responsibilities
//! - One error type per rejection class the pipeline can produce
//! - Stable JSON bodies; no internals leak past the declared detail
//!
//! # Design Decisions
//! - Only `StoreUnavailable` is fail-open (handled inside the limiter);
//!   every other variant terminates the request
//! - 5xx bodies are generic; threat lists and field errors are the only
//!   structured detail exposed

use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

use crate::security::validation::rules::FieldError;

#[derive(Debug, Error)]
pub enum SecurityError {
    /// Retryable after the window resets.
    #[error("rate limit exceeded")]
    RateLimitExceeded {
        retry_after_ms: u64,
        violations: Option<u32>,
    },

    /// Deny-listed identity; not retryable.
    #[error("access denied")]
    DenyListed,

    /// Not retryable without a fresh token.
    #[error("CSRF validation failed")]
    CsrfValidationFailed,

    /// Caller must correct the input.
    #[error("validation failed")]
    ValidationFailed(Vec<FieldError>),

    /// Threat detected; not retryable with the same file.
    #[error("upload rejected")]
    UploadRejected(Vec<String>),

    /// Internal scanner fault. The upload already failed closed.
    #[error("scan fault: {0}")]
    ScanFault(String),

    /// Distributed counter store unreachable. The limiter degrades to its
    /// local strategy instead of surfacing this to callers.
    #[error("counter store unavailable: {0}")]
    StoreUnavailable(String),
}

impl IntoResponse for SecurityError {
    fn into_response(self) -> Response {
        match self {
            SecurityError::RateLimitExceeded {
                retry_after_ms,
                violations,
            } => {
                let mut body = json!({
                    "error": "rate limit exceeded",
                    "retry_after_ms": retry_after_ms,
                });
                if let Some(violations) = violations {
                    body["violations"] = json!(violations);
                }
                let retry_secs = retry_after_ms.div_ceil(1000).to_string();
                (
                    StatusCode::TOO_MANY_REQUESTS,
                    [(header::RETRY_AFTER, retry_secs)],
                    Json(body),
                )
                    .into_response()
            }
            SecurityError::DenyListed => (
                StatusCode::FORBIDDEN,
                Json(json!({ "error": "access denied" })),
            )
                .into_response(),
            SecurityError::CsrfValidationFailed => (
                StatusCode::FORBIDDEN,
                Json(json!({ "error": "CSRF validation failed" })),
            )
                .into_response(),
            SecurityError::ValidationFailed(fields) => (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": "validation failed", "fields": fields })),
            )
                .into_response(),
            SecurityError::UploadRejected(threats) => (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": "upload rejected", "threats": threats })),
            )
                .into_response(),
            SecurityError::ScanFault(_) | SecurityError::StoreUnavailable(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "internal security error" })),
            )
                .into_response(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limit_response_carries_retry_hint() {
        let response = SecurityError::RateLimitExceeded {
            retry_after_ms: 1_500,
            violations: Some(2),
        }
        .into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[header::RETRY_AFTER], "2");
    }

    #[test]
    fn internal_faults_hide_detail() {
        let response = SecurityError::ScanFault("disk exploded".into()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
