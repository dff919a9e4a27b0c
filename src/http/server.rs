//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create the Axum router with all public handlers
//! - Wire the guard middleware chain in its fixed order
//! - Wire cross-cutting middleware (tracing, timeout, request ID, limits)
//! - Bind the server to a listener and serve until shutdown
//!
//! # Design Decisions
//! - Guards run rate-limit → CSRF → validation before any handler
//! - State is explicit: guards are constructor-injected services shared
//!   through `AppState`, never process-global singletons
//! - The active configuration is swappable at runtime (admin API)

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use arc_swap::ArcSwap;
use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{any, get, post},
    Router,
};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower::ServiceBuilder;
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::config::GatewayConfig;
use crate::http::handlers;
use crate::http::middleware::{
    csrf_middleware, rate_limit_middleware, track_requests, validate_middleware,
};
use crate::security::validation::rules::ValidationRule;
use crate::security::SecurityOrchestrator;

/// Application state injected into handlers and middleware.
#[derive(Clone)]
pub struct AppState {
    /// Active configuration, swappable through the admin API.
    pub config: Arc<ArcSwap<GatewayConfig>>,
    /// The four guards plus event log, metrics, and alerting.
    pub orchestrator: Arc<SecurityOrchestrator>,
    /// Compiled field rules, swapped together with the config.
    pub rules: Arc<ArcSwap<Vec<ValidationRule>>>,
}

impl AppState {
    pub fn new(config: GatewayConfig) -> Self {
        let orchestrator = Arc::new(SecurityOrchestrator::from_config(&config));
        let rules = compile_rules(&config);
        Self {
            config: Arc::new(ArcSwap::from_pointee(config)),
            orchestrator,
            rules: Arc::new(ArcSwap::from_pointee(rules)),
        }
    }

    /// Install a validated configuration: swap the snapshot, recompile the
    /// field rules, and push tunable knobs into the guards.
    pub fn apply_config(&self, config: GatewayConfig) {
        self.orchestrator.apply_config(&config);
        self.rules.store(Arc::new(compile_rules(&config)));
        self.config.store(Arc::new(config));
        tracing::info!("Configuration updated");
    }
}

/// Compile declarative field rules. Config validation already rejected
/// malformed entries; anything still uncompilable is skipped with a warning.
fn compile_rules(config: &GatewayConfig) -> Vec<ValidationRule> {
    config
        .validation
        .rules
        .iter()
        .filter_map(|rule| {
            let compiled = ValidationRule::from_config(rule);
            if compiled.is_none() {
                tracing::warn!(field = %rule.field, "Skipping uncompilable field rule");
            }
            compiled
        })
        .collect()
}

/// HTTP server for the security gateway.
pub struct HttpServer {
    state: AppState,
}

impl HttpServer {
    /// Create a new server with the given configuration.
    pub fn new(config: GatewayConfig) -> Self {
        Self {
            state: AppState::new(config),
        }
    }

    pub fn state(&self) -> AppState {
        self.state.clone()
    }

    /// Build the public router with the full guard chain.
    pub fn router(&self) -> Router {
        let state = self.state.clone();
        let config = state.config.load();
        let request_timeout = Duration::from_secs(config.listener.request_timeout_secs);
        let body_limit = config.listener.max_body_size;
        // Uploads carry whole files; the scanner enforces max_file_size with
        // a threat verdict, so the transport cap sits above it.
        let upload_limit = body_limit.max(config.upload.max_file_size + 64 * 1024);

        Router::new()
            .route("/api", any(handlers::api_handler))
            .route("/api/{*rest}", any(handlers::api_handler))
            .route(
                "/uploads",
                post(handlers::upload_handler).route_layer(DefaultBodyLimit::max(upload_limit)),
            )
            .route("/csrf/token", get(handlers::issue_csrf_token))
            .route("/health", get(handlers::health_handler))
            .layer(middleware::from_fn_with_state(
                state.clone(),
                validate_middleware,
            ))
            .layer(middleware::from_fn_with_state(state.clone(), csrf_middleware))
            .layer(middleware::from_fn_with_state(
                state.clone(),
                rate_limit_middleware,
            ))
            .layer(
                ServiceBuilder::new()
                    .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                    .layer(PropagateRequestIdLayer::x_request_id())
                    .layer(TraceLayer::new_for_http())
                    .layer(TimeoutLayer::new(request_timeout))
                    .layer(DefaultBodyLimit::max(body_limit)),
            )
            .layer(middleware::from_fn(track_requests))
            .with_state(state)
    }

    /// Serve until the shutdown broadcast fires.
    pub async fn run(
        self,
        listener: TcpListener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> std::io::Result<()> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "Gateway listening");

        axum::serve(
            listener,
            self.router()
                .into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
            tracing::info!("Gateway listener draining");
        })
        .await
    }
}
