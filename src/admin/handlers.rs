//! Admin API handlers.
//!
//! # Responsibilities
//! - Read endpoints: overview, metrics, events, health, report
//! - Write endpoints: access lists, rate rules, quarantine actions,
//!   signatures, ad-hoc rule checks, config update, metrics reset
//! - Live event feed over SSE
//!
//! # Design Decisions
//! - Everything speaks JSON; errors reuse the `{ "error": ... }` shape
//! - Config updates are validated before the atomic swap; a rejected
//!   config leaves the running one untouched

use std::convert::Infallible;
use std::time::Duration;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    response::{IntoResponse, Response},
    Json,
};
use futures_util::stream::Stream;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::broadcast;

use crate::config::schema::{FieldRuleConfig, RateLimitRuleConfig};
use crate::config::validation::validate_config;
use crate::config::GatewayConfig;
use crate::http::server::AppState;
use crate::security::events::{EventFilter, SecurityEvent};
use crate::security::orchestrator::{SecurityAlert, Timeframe};
use crate::security::rate_limit::RateLimitRule;
use crate::security::validation::rules::ValidationRule;

fn not_found(what: &str) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "error": format!("{what} not found") })),
    )
        .into_response()
}

fn io_error(e: std::io::Error) -> Response {
    tracing::error!(error = %e, "Admin operation failed");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": "storage operation failed" })),
    )
        .into_response()
}

// Read surface ------------------------------------------------------------

pub async fn get_overview(State(state): State<AppState>) -> Json<Value> {
    let metrics = state.orchestrator.metrics();
    let health = state.orchestrator.health();
    Json(json!({
        "version": env!("CARGO_PKG_VERSION"),
        "status": health.overall,
        "total_requests": metrics.rate_limit.total_requests,
        "blocked_requests": metrics.rate_limit.blocked_requests,
        "threats_found": metrics.uploads.threats_found,
        "events_retained": metrics.events_retained,
    }))
}

pub async fn get_metrics(State(state): State<AppState>) -> Response {
    Json(state.orchestrator.metrics()).into_response()
}

pub async fn get_events(
    State(state): State<AppState>,
    Query(filter): Query<EventFilter>,
) -> Json<Vec<SecurityEvent>> {
    Json(state.orchestrator.events(&filter))
}

pub async fn get_health(State(state): State<AppState>) -> Response {
    Json(state.orchestrator.health()).into_response()
}

#[derive(Deserialize)]
pub struct ReportParams {
    timeframe: Option<Timeframe>,
}

pub async fn get_report(
    State(state): State<AppState>,
    Query(params): Query<ReportParams>,
) -> Response {
    let timeframe = params.timeframe.unwrap_or(Timeframe::Hour);
    Json(state.orchestrator.report(timeframe)).into_response()
}

pub async fn get_field_stats(State(state): State<AppState>) -> Json<Value> {
    let stats: Vec<Value> = state
        .orchestrator
        .validation
        .field_stats()
        .into_iter()
        .map(|(field, s)| json!({ "field": field, "total": s.total, "failures": s.failures }))
        .collect();
    Json(json!({ "fields": stats }))
}

/// Live feed of security events and alerts. The receivers are dropped with
/// the stream on client disconnect, which also ends the heartbeat.
pub async fn stream_events(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    struct Feed {
        events: broadcast::Receiver<SecurityEvent>,
        alerts: broadcast::Receiver<SecurityAlert>,
    }
    let feed = Feed {
        events: state.orchestrator.subscribe_events(),
        alerts: state.orchestrator.subscribe_alerts(),
    };

    let stream = futures_util::stream::unfold(feed, |mut feed| async move {
        loop {
            tokio::select! {
                event = feed.events.recv() => match event {
                    Ok(event) => {
                        let Ok(sse) = Event::default().event("security_event").json_data(&event)
                        else {
                            continue;
                        };
                        return Some((Ok(sse), feed));
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        let sse = Event::default().event("lagged").data(skipped.to_string());
                        return Some((Ok(sse), feed));
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                },
                alert = feed.alerts.recv() => match alert {
                    Ok(alert) => {
                        let Ok(sse) = Event::default().event("alert").json_data(&alert) else {
                            continue;
                        };
                        return Some((Ok(sse), feed));
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => return None,
                },
            }
        }
    });

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("heartbeat"),
    )
}

// Access lists ------------------------------------------------------------

pub async fn get_access_lists(State(state): State<AppState>) -> Json<Value> {
    let (allow, deny) = state.orchestrator.rate_limiter.lists();
    Json(json!({ "allow": allow, "deny": deny }))
}

#[derive(Deserialize)]
pub struct AccessListChange {
    pub identity: String,
    /// One of `allow`, `deny`, `clear`.
    pub action: String,
}

pub async fn update_access_list(
    State(state): State<AppState>,
    Json(change): Json<AccessListChange>,
) -> Response {
    let limiter = &state.orchestrator.rate_limiter;
    match change.action.as_str() {
        "allow" => limiter.allow_identity(&change.identity),
        "deny" => limiter.deny_identity(&change.identity),
        "clear" => limiter.clear_identity(&change.identity),
        other => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": format!("unknown action '{other}'") })),
            )
                .into_response()
        }
    }
    tracing::info!(identity = %change.identity, action = %change.action, "Access list updated");
    Json(json!({ "status": "updated" })).into_response()
}

// Rate limit rules --------------------------------------------------------

pub async fn get_rate_rules(State(state): State<AppState>) -> Json<Vec<RateLimitRule>> {
    Json(state.orchestrator.rate_limiter.rules())
}

pub async fn upsert_rate_rule(
    State(state): State<AppState>,
    Json(rule): Json<RateLimitRuleConfig>,
) -> Response {
    if rule.path_prefix.is_empty() || rule.window_ms == 0 || rule.max_requests == 0 {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "path_prefix, window_ms, and max_requests are required" })),
        )
            .into_response();
    }
    state.orchestrator.rate_limiter.upsert_rule(RateLimitRule {
        path_prefix: rule.path_prefix,
        method: rule.method.map(|m| m.to_uppercase()),
        window_ms: rule.window_ms,
        max_requests: rule.max_requests,
        skip_successful: rule.skip_successful,
        skip_failed: rule.skip_failed,
    });
    Json(json!({ "status": "updated" })).into_response()
}

#[derive(Deserialize)]
pub struct RateRuleSelector {
    pub path_prefix: String,
    pub method: Option<String>,
}

pub async fn delete_rate_rule(
    State(state): State<AppState>,
    Json(selector): Json<RateRuleSelector>,
) -> Response {
    let removed = state
        .orchestrator
        .rate_limiter
        .remove_rule(&selector.path_prefix, selector.method.as_deref());
    if removed {
        Json(json!({ "status": "removed" })).into_response()
    } else {
        not_found("rate limit rule")
    }
}

#[derive(Deserialize)]
pub struct LoadSample {
    pub load: u8,
}

/// Feed the adaptive strategy a server-load sample (0-100).
pub async fn record_load(
    State(state): State<AppState>,
    Json(sample): Json<LoadSample>,
) -> Json<Value> {
    state.orchestrator.rate_limiter.record_load(sample.load);
    Json(json!({ "status": "recorded" }))
}

// Quarantine --------------------------------------------------------------

pub async fn list_quarantine(State(state): State<AppState>) -> Response {
    match state.orchestrator.uploads.quarantine_store().list().await {
        Ok(entries) => Json(entries).into_response(),
        Err(e) => io_error(e),
    }
}

pub async fn release_quarantine(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Response {
    let dest = state.orchestrator.uploads.upload_dir().join("released");
    match state
        .orchestrator
        .uploads
        .quarantine_store()
        .release(&id, &dest)
        .await
    {
        Ok(Some(path)) => Json(json!({
            "status": "released",
            "path": path.to_string_lossy(),
        }))
        .into_response(),
        Ok(None) => not_found("quarantine entry"),
        Err(e) => io_error(e),
    }
}

pub async fn delete_quarantine(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.orchestrator.uploads.quarantine_store().delete(&id).await {
        Ok(true) => Json(json!({ "status": "deleted" })).into_response(),
        Ok(false) => not_found("quarantine entry"),
        Err(e) => io_error(e),
    }
}

// Signatures --------------------------------------------------------------

pub async fn get_signatures(State(state): State<AppState>) -> Json<Value> {
    let mut names = state.orchestrator.uploads.signatures().names();
    names.sort();
    Json(json!({ "signatures": names }))
}

#[derive(Deserialize)]
pub struct SignatureUpdate {
    pub name: String,
    /// Hex-encoded byte pattern.
    pub hex: String,
}

pub async fn add_signature(
    State(state): State<AppState>,
    Json(update): Json<SignatureUpdate>,
) -> Response {
    if state
        .orchestrator
        .uploads
        .signatures()
        .add(&update.name, &update.hex)
    {
        tracing::info!(name = %update.name, "Signature registered");
        Json(json!({ "status": "added" })).into_response()
    } else {
        (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "signature is not valid hex" })),
        )
            .into_response()
    }
}

pub async fn remove_signature(State(state): State<AppState>, Path(name): Path<String>) -> Response {
    if state.orchestrator.uploads.signatures().remove(&name) {
        Json(json!({ "status": "removed" })).into_response()
    } else {
        not_found("signature")
    }
}

// Rule checks and token issuance ------------------------------------------

#[derive(Deserialize)]
pub struct RuleCheck {
    pub value: Value,
    pub rule: FieldRuleConfig,
}

/// Ad-hoc "test a rule" endpoint: one value against one declarative rule.
pub async fn validate_rule(
    State(state): State<AppState>,
    Json(check): Json<RuleCheck>,
) -> Response {
    let Some(rule) = ValidationRule::from_config(&check.rule) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "rule does not compile" })),
        )
            .into_response();
    };
    let errors = state.orchestrator.validation.validate_single(&check.value, &rule);
    Json(json!({ "valid": errors.is_empty(), "errors": errors })).into_response()
}

#[derive(Deserialize)]
pub struct TokenRequest {
    pub session_id: String,
    pub user_id: Option<String>,
}

/// Issue a CSRF token for an arbitrary session (operator tooling).
pub async fn issue_token(
    State(state): State<AppState>,
    Json(request): Json<TokenRequest>,
) -> Json<Value> {
    let token = state
        .orchestrator
        .csrf
        .issue(&request.session_id, request.user_id.as_deref());
    Json(json!({ "csrf_token": token }))
}

// Config and reset --------------------------------------------------------

/// Validate and install a new configuration. Listener and admin bind
/// addresses only take effect on restart.
pub async fn update_config(
    State(state): State<AppState>,
    Json(config): Json<GatewayConfig>,
) -> Response {
    if let Err(errors) = validate_config(&config) {
        let detail: Vec<Value> = errors
            .iter()
            .map(|e| json!({ "field": e.field, "message": e.message }))
            .collect();
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "configuration rejected", "fields": detail })),
        )
            .into_response();
    }
    state.apply_config(config);
    Json(json!({
        "status": "applied",
        "note": "listener and admin bind addresses require a restart",
    }))
    .into_response()
}

pub async fn reset_metrics(State(state): State<AppState>) -> Json<Value> {
    state.orchestrator.reset();
    Json(json!({ "status": "reset" }))
}
