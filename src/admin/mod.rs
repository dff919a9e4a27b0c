//! Operator API.
//!
//! Served on its own bind address, authenticated with a Bearer key. Reads
//! expose the orchestrator's metrics, events, health, and reports; writes
//! manage access lists, rate rules, quarantine, signatures, and the active
//! configuration. `/admin/events/stream` pushes live events over SSE.

pub mod auth;
pub mod handlers;

use axum::{
    middleware,
    routing::{delete, get, post, put},
    Router,
};

use crate::http::server::AppState;
use self::auth::admin_auth_middleware;
use self::handlers::*;

pub fn admin_router(state: AppState) -> Router {
    Router::new()
        .route("/admin/overview", get(get_overview))
        .route("/admin/metrics", get(get_metrics))
        .route("/admin/metrics/reset", post(reset_metrics))
        .route("/admin/events", get(get_events))
        .route("/admin/events/stream", get(stream_events))
        .route("/admin/health", get(get_health))
        .route("/admin/report", get(get_report))
        .route("/admin/validation/fields", get(get_field_stats))
        .route("/admin/validation/check", post(validate_rule))
        .route(
            "/admin/access-list",
            get(get_access_lists).post(update_access_list),
        )
        .route(
            "/admin/rate-limit/rules",
            get(get_rate_rules).post(upsert_rate_rule).delete(delete_rate_rule),
        )
        .route("/admin/rate-limit/load", post(record_load))
        .route("/admin/quarantine", get(list_quarantine))
        .route("/admin/quarantine/{id}/release", post(release_quarantine))
        .route("/admin/quarantine/{id}", delete(delete_quarantine))
        .route("/admin/signatures", get(get_signatures).post(add_signature))
        .route("/admin/signatures/{name}", delete(remove_signature))
        .route("/admin/csrf/issue", post(issue_token))
        .route("/admin/config", put(update_config))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            admin_auth_middleware,
        ))
        .with_state(state)
}
