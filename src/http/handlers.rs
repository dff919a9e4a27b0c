//! Public route handlers.
//!
//! # Responsibilities
//! - Guarded application endpoint (stand-in for the protected backend)
//! - Upload endpoint: scan every buffer before persistence
//! - CSRF token issuance for the caller's session
//! - Liveness endpoint backed by the orchestrator roll-up

use axum::{
    body::Bytes,
    extract::{ConnectInfo, Multipart, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;

use crate::http::server::AppState;
use crate::security::events::{Action, EventKind, SecurityEvent, Severity};
use crate::security::health::ComponentHealth;
use crate::security::upload::UploadScanner;
use crate::security::SecurityError;

/// Stand-in for the protected application: echoes the (already sanitized)
/// body back so integration tests can observe the rewrite.
pub async fn api_handler(body: Bytes) -> Response {
    let echo: Value = if body.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&body).unwrap_or(Value::Null)
    };
    Json(json!({ "status": "accepted", "data": echo })).into_response()
}

/// Issue a CSRF token for the caller's session.
pub async fn issue_csrf_token(
    State(state): State<AppState>,
    request: axum::http::Request<axum::body::Body>,
) -> Response {
    let Some(session) = crate::http::middleware::session_identity(&request, &state) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "session identity required" })),
        )
            .into_response();
    };
    let token = state.orchestrator.csrf.issue(&session, None);
    let max_age = state.orchestrator.csrf.config().max_age_secs;
    Json(json!({ "csrf_token": token, "expires_in_secs": max_age })).into_response()
}

/// One scanned upload in the response body.
#[derive(serde::Serialize)]
struct UploadedFile {
    file_name: String,
    size: usize,
    sha256: String,
}

/// Multipart upload endpoint. Every part is scanned; the first unsafe part
/// rejects the whole request after quarantining the offending buffer.
pub async fn upload_handler(
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Response {
    let config = state.config.load();
    if !config.upload.enabled {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "error": "uploads are disabled" })),
        )
            .into_response();
    }

    let identity = addr.ip().to_string();
    let mut stored = Vec::new();

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(_) => {
                return SecurityError::UploadRejected(vec!["malformed multipart body".into()])
                    .into_response()
            }
        };
        if field.file_name().is_none() {
            continue;
        }

        let file_name = field.file_name().unwrap_or("unnamed").to_string();
        let mime = field
            .content_type()
            .unwrap_or("application/octet-stream")
            .to_string();
        let bytes = match field.bytes().await {
            Ok(bytes) => bytes,
            Err(_) => {
                return SecurityError::UploadRejected(vec!["unreadable upload part".into()])
                    .into_response()
            }
        };

        // The scan walks the whole buffer; keep it off the async workers.
        let scanner = Arc::clone(&state.orchestrator.uploads);
        let scan_name = file_name.clone();
        let scan_mime = mime.clone();
        let scan_bytes = bytes.clone();
        let result = match tokio::task::spawn_blocking(move || {
            scanner.scan(&scan_bytes, &scan_name, &scan_mime)
        })
        .await
        {
            Ok(result) => result,
            Err(e) => {
                // Scanner fault: fail closed and make it operator-visible.
                tracing::error!(error = %e, file = %file_name, "Upload scan failed");
                let result = UploadScanner::scan_error_result(&file_name, &mime, bytes.len());
                let event = SecurityEvent::new(
                    EventKind::FileThreat,
                    Severity::Critical,
                    &identity,
                    Action::Blocked,
                )
                .endpoint("/uploads")
                .detail("scan error");
                state.orchestrator.log_event(event);
                return SecurityError::UploadRejected(result.threats).into_response();
            }
        };

        if !result.safe {
            let severity = if result.details.signature_matches.is_empty() {
                Severity::High
            } else {
                Severity::Critical
            };
            let quarantined = state.orchestrator.uploads.quarantine(&bytes, &result).await;
            let action = match &quarantined {
                Ok(_) => Action::Quarantined,
                Err(e) => {
                    tracing::error!(error = %e, file = %file_name, "Quarantine write failed");
                    Action::Blocked
                }
            };
            let event = SecurityEvent::new(EventKind::FileThreat, severity, &identity, action)
                .endpoint("/uploads")
                .detail(result.threats.join("; "));
            state.orchestrator.log_event(event);
            return SecurityError::UploadRejected(result.threats).into_response();
        }

        match state.orchestrator.uploads.save(&bytes, &result).await {
            Ok(_) => stored.push(UploadedFile {
                file_name: result.file_name,
                size: result.size,
                sha256: result.sha256,
            }),
            Err(e) => {
                tracing::error!(error = %e, file = %file_name, "Upload persistence failed");
                return (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({ "error": "upload persistence failed" })),
                )
                    .into_response();
            }
        }
    }

    if stored.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "no file parts in request" })),
        )
            .into_response();
    }
    Json(json!({ "status": "stored", "files": stored })).into_response()
}

/// Liveness endpoint. Unhealthy components surface as 503.
pub async fn health_handler(State(state): State<AppState>) -> Response {
    let report = state.orchestrator.health();
    let status = match report.overall {
        ComponentHealth::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::OK,
    };
    (status, Json(report)).into_response()
}
