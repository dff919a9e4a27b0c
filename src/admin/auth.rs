//! Admin API authentication.

use axum::{
    body::Body,
    extract::State,
    http::{header, Request, StatusCode},
    middleware::Next,
    response::Response,
};

use crate::http::server::AppState;

/// Require `Authorization: Bearer <api_key>` on every admin request.
pub async fn admin_auth_middleware(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, StatusCode> {
    let api_key = state.config.load().admin.api_key.clone();

    let auth_header = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok());

    match auth_header {
        Some(value) if value == format!("Bearer {api_key}") => Ok(next.run(request).await),
        _ => Err(StatusCode::UNAUTHORIZED),
    }
}
