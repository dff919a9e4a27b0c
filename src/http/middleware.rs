//! Guard middleware chain.
//!
//! # Data Flow
//! ```text
//! Request
//!     → rate_limit_middleware   (429 / 403 or pass)
//!     → csrf_middleware         (403 or pass, mutating methods only)
//!     → validate_middleware     (400, or body/query rewritten in place)
//!     → route handler
//! ```
//!
//! # Design Decisions
//! - Client identity is the peer IP; forwarded headers are not trusted
//! - Every terminal rejection is reported to the orchestrator as an event
//! - Validation buffers the body once and forwards the sanitized bytes

use axum::{
    body::{to_bytes, Body},
    extract::{ConnectInfo, State},
    http::{header, Method, Request, Uri},
    middleware::Next,
    response::{IntoResponse, Response},
};
use chrono::Utc;
use serde_json::{Map, Value};
use std::net::SocketAddr;
use std::str::FromStr;

use crate::http::server::AppState;
use crate::security::events::{Action, EventKind, SecurityEvent, Severity};
use crate::security::rate_limit::Decision;
use crate::security::validation::rules::FieldError;
use crate::security::SecurityError;

/// Peer identity used for rate limiting and audit events.
fn client_identity(addr: &SocketAddr) -> String {
    addr.ip().to_string()
}

fn user_agent(request: &Request<Body>) -> Option<String> {
    request
        .headers()
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

fn is_mutating(method: &Method) -> bool {
    !matches!(*method, Method::GET | Method::HEAD | Method::OPTIONS)
}

/// Admission control. Runs first in the chain.
pub async fn rate_limit_middleware(
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let config = state.config.load();
    if !config.rate_limit.enabled {
        return next.run(request).await;
    }

    let identity = client_identity(&addr);
    let path = request.uri().path().to_string();
    let method = request.method().as_str().to_string();
    let agent = user_agent(&request);
    let now_ms = Utc::now().timestamp_millis() as u64;

    match state
        .orchestrator
        .rate_limiter
        .admit(&identity, &path, &method, now_ms)
        .await
    {
        Decision::Allow => {
            let rule = state.orchestrator.rate_limiter.resolve_rule(&path, &method);
            let response = next.run(request).await;
            if let Some(rule) = rule {
                let success = response.status().is_success();
                if (success && rule.skip_successful) || (!success && rule.skip_failed) {
                    state
                        .orchestrator
                        .rate_limiter
                        .forgive(&identity, &path, &method, now_ms);
                }
            }
            response
        }
        Decision::Block {
            retry_after_ms,
            violations,
        } => {
            tracing::warn!(client = %identity, path = %path, "Rate limit exceeded");
            let mut event = SecurityEvent::new(
                EventKind::RateLimit,
                Severity::Medium,
                &identity,
                Action::Blocked,
            )
            .endpoint(&path);
            if let Some(agent) = agent {
                event = event.user_agent(agent);
            }
            state.orchestrator.log_event(event);
            SecurityError::RateLimitExceeded {
                retry_after_ms,
                violations,
            }
            .into_response()
        }
        Decision::Deny => {
            tracing::warn!(client = %identity, path = %path, "Deny-listed identity rejected");
            let mut event = SecurityEvent::new(
                EventKind::RateLimit,
                Severity::High,
                &identity,
                Action::Blocked,
            )
            .endpoint(&path)
            .detail("deny-listed identity");
            if let Some(agent) = agent {
                event = event.user_agent(agent);
            }
            state.orchestrator.log_event(event);
            SecurityError::DenyListed.into_response()
        }
    }
}

/// Session identity for CSRF: header first, then the session cookie.
pub fn session_identity(request: &Request<Body>, state: &AppState) -> Option<String> {
    let csrf_config = state.orchestrator.csrf.config();
    if let Some(session) = request
        .headers()
        .get(csrf_config.session_header.as_str())
        .and_then(|v| v.to_str().ok())
        .filter(|s| !s.is_empty())
    {
        return Some(session.to_string());
    }
    let cookie_header = request
        .headers()
        .get(header::COOKIE)
        .and_then(|v| v.to_str().ok())?;
    cookie_header
        .split(';')
        .map(str::trim)
        .find_map(|kv| kv.strip_prefix(&format!("{}=", csrf_config.session_cookie)))
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Token lookup order: header, query parameter, body field.
fn token_from_query(uri: &Uri, name: &str) -> Option<String> {
    let query = uri.query()?;
    url::form_urlencoded::parse(query.as_bytes())
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.into_owned())
}

fn token_from_body(bytes: &[u8], content_type: Option<&str>, name: &str) -> Option<String> {
    match content_type {
        Some(ct) if ct.starts_with("application/json") => {
            serde_json::from_slice::<Value>(bytes)
                .ok()?
                .get(name)?
                .as_str()
                .map(str::to_string)
        }
        Some(ct) if ct.starts_with("application/x-www-form-urlencoded") => {
            url::form_urlencoded::parse(bytes)
                .find(|(k, _)| k == name)
                .map(|(_, v)| v.into_owned())
        }
        _ => None,
    }
}

/// CSRF validation. Safe methods and excluded paths bypass it.
pub async fn csrf_middleware(
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let config = state.config.load();
    let path = request.uri().path().to_string();
    if !config.csrf.enabled
        || !is_mutating(request.method())
        || state.orchestrator.csrf.is_excluded(&path)
    {
        return next.run(request).await;
    }

    let agent = user_agent(&request);
    let reject = |source: String, detail: &str| {
        let mut event = SecurityEvent::new(
            EventKind::CsrfAttack,
            Severity::High,
            &source,
            Action::Blocked,
        )
        .endpoint(&path)
        .detail(detail);
        if let Some(agent) = agent.clone() {
            event = event.user_agent(agent);
        }
        state.orchestrator.log_event(event);
        SecurityError::CsrfValidationFailed.into_response()
    };

    let Some(session) = session_identity(&request, &state) else {
        return reject(client_identity(&addr), "missing session identity");
    };

    let header_name = config.csrf.header_name.as_str();
    let mut token = request
        .headers()
        .get(header_name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .or_else(|| token_from_query(request.uri(), "csrf_token"));

    // Fall back to the body only when cheaper carriers had no token.
    let request = if token.is_none() {
        let content_type = request
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let (parts, body) = request.into_parts();
        let bytes = match to_bytes(body, config.listener.max_body_size).await {
            Ok(bytes) => bytes,
            Err(_) => return reject(session, "unreadable request body"),
        };
        token = token_from_body(&bytes, content_type.as_deref(), "csrf_token");
        Request::from_parts(parts, Body::from(bytes))
    } else {
        request
    };

    let Some(token) = token else {
        return reject(session, "missing CSRF token");
    };

    if state.orchestrator.csrf.validate(&session, &token) {
        next.run(request).await
    } else {
        reject(session, "invalid or expired CSRF token")
    }
}

/// Body and query validation plus in-place sanitization.
pub async fn validate_middleware(
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let config = state.config.load();
    let path = request.uri().path().to_string();
    let protected = config
        .validation
        .protected_paths
        .iter()
        .any(|prefix| path.starts_with(prefix.as_str()));
    if !config.validation.enabled || !protected || !is_mutating(request.method()) {
        return next.run(request).await;
    }

    let identity = client_identity(&addr);
    let agent = user_agent(&request);
    let rules = state.rules.load();
    let engine = &state.orchestrator.validation;

    // Query parameters become a string map for the engine.
    let query_map: Map<String, Value> = request
        .uri()
        .query()
        .map(|q| {
            url::form_urlencoded::parse(q.as_bytes())
                .map(|(k, v)| (k.into_owned(), Value::String(v.into_owned())))
                .collect()
        })
        .unwrap_or_default();

    let is_json = request
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|ct| ct.starts_with("application/json"))
        .unwrap_or(false);

    let (parts, body) = request.into_parts();
    let bytes = match to_bytes(body, config.listener.max_body_size).await {
        Ok(bytes) => bytes,
        Err(_) => {
            return SecurityError::ValidationFailed(vec![
                FieldError::new("body", "unreadable request body"),
            ])
            .into_response()
        }
    };

    let body_map: Option<Map<String, Value>> = if is_json && !bytes.is_empty() {
        match serde_json::from_slice::<Value>(&bytes) {
            Ok(Value::Object(map)) => Some(map),
            Ok(_) => None,
            Err(_) => {
                return SecurityError::ValidationFailed(vec![
                    FieldError::new("body", "malformed JSON"),
                ])
                .into_response()
            }
        }
    } else {
        None
    };

    // Rules see one combined view so a required field may arrive in either
    // carrier; body values shadow query values of the same name.
    let mut combined = query_map.clone();
    if let Some(map) = &body_map {
        combined.extend(map.clone());
    }
    let errors = engine.validate(&combined, &rules);

    if !errors.is_empty() {
        let kind = classify_errors(&errors);
        let severity = if kind == EventKind::ValidationFailure {
            Severity::Low
        } else {
            Severity::High
        };
        let detail = errors
            .iter()
            .map(|e| format!("{}: {}", e.field, e.message))
            .collect::<Vec<_>>()
            .join("; ");
        let mut event =
            SecurityEvent::new(kind, severity, &identity, Action::Blocked)
                .endpoint(&path)
                .detail(detail);
        if let Some(agent) = agent {
            event = event.user_agent(agent);
        }
        state.orchestrator.log_event(event);
        return SecurityError::ValidationFailed(errors).into_response();
    }

    // Rewrite the URI query and the JSON body with sanitized values.
    let mut parts = parts;
    if !query_map.is_empty() {
        let sanitized_query = engine.sanitize(query_map, &rules);
        let mut serializer = url::form_urlencoded::Serializer::new(String::new());
        for (key, value) in &sanitized_query {
            let text = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            serializer.append_pair(key, &text);
        }
        let rewritten = serializer.finish();
        let path_only = parts.uri.path().to_string();
        if let Ok(uri) = Uri::from_str(&format!("{path_only}?{rewritten}")) {
            parts.uri = uri;
        }
    }

    let new_body = match body_map {
        Some(map) => {
            let sanitized = engine.sanitize(map, &rules);
            match serde_json::to_vec(&Value::Object(sanitized)) {
                Ok(json) => Body::from(json),
                Err(_) => Body::from(bytes),
            }
        }
        None => Body::from(bytes),
    };

    next.run(Request::from_parts(parts, new_body)).await
}

/// Pick the event kind that best describes a batch of field errors.
fn classify_errors(errors: &[FieldError]) -> EventKind {
    if errors.iter().any(|e| e.message.contains("SQL injection")) {
        EventKind::SqlInjection
    } else if errors.iter().any(|e| e.message.contains("XSS")) {
        EventKind::XssAttempt
    } else {
        EventKind::ValidationFailure
    }
}

/// Outermost layer: request counters and latency.
pub async fn track_requests(request: Request<Body>, next: Next) -> Response {
    let started = std::time::Instant::now();
    let method = request.method().as_str().to_string();
    let response = next.run(request).await;
    crate::observability::metrics::record_request(&method, response.status().as_u16(), started);
    response
}
