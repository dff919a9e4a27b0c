//! watchgate: request security gateway.
//!
//! # Architecture Overview
//!
//! ```text
//!                      ┌───────────────────────────────────────────────┐
//!                      │                 WATCHGATE                     │
//!                      │                                               │
//!   Client Request     │  ┌────────────┐  ┌──────┐  ┌────────────┐    │
//!   ───────────────────┼─▶│ rate limit │─▶│ CSRF │─▶│ validation │─┐  │
//!                      │  └────────────┘  └──────┘  └────────────┘ │  │
//!                      │                                           ▼  │
//!                      │                    ┌──────────┐  ┌─────────┐ │
//!   Client Response    │                    │  upload  │◀─│ handler │ │
//!   ◀──────────────────┼────────────────────│  scanner │  └─────────┘ │
//!                      │                    └──────────┘              │
//!                      │                                               │
//!                      │  ┌─────────────────────────────────────────┐ │
//!                      │  │          Security Orchestrator          │ │
//!                      │  │  event log · metrics · alerts · health  │ │
//!                      │  └─────────────────────────────────────────┘ │
//!                      │  ┌─────────┐ ┌───────────────┐ ┌───────────┐ │
//!                      │  │ config  │ │ observability │ │ lifecycle │ │
//!                      │  └─────────┘ └───────────────┘ └───────────┘ │
//!                      └───────────────────────────────────────────────┘
//!                                        ▲
//!                          Admin API (own bind address, Bearer auth)
//! ```

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use tokio::net::TcpListener;

use watchgate::config::loader::load_config;
use watchgate::config::GatewayConfig;
use watchgate::lifecycle::{signals, sweeper, Shutdown};
use watchgate::HttpServer;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Config path from the first argument; defaults apply without one.
    let config = match std::env::args().nth(1) {
        Some(path) => load_config(Path::new(&path))?,
        None => GatewayConfig::default(),
    };

    watchgate::observability::logging::init(&config.observability.log_level);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "watchgate starting");
    tracing::info!(
        bind_address = %config.listener.bind_address,
        rate_limit_strategy = ?config.rate_limit.strategy,
        csrf_enabled = config.csrf.enabled,
        upload_enabled = config.upload.enabled,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => watchgate::observability::metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    let server = HttpServer::new(config.clone());
    let state = server.state();
    let shutdown = Shutdown::new();

    // Background maintenance, decoupled from request traffic.
    let csrf_sweep = sweeper::spawn_csrf_sweep(
        Arc::clone(&state.orchestrator),
        config.csrf.sweep_interval_secs,
        shutdown.subscribe(),
    );
    let rate_prune = sweeper::spawn_rate_limit_prune(
        Arc::clone(&state.orchestrator),
        config.rate_limit.prune_interval_secs,
        shutdown.subscribe(),
    );

    // Admin API on its own bind address.
    let admin_task = if config.admin.enabled {
        let admin_listener = TcpListener::bind(&config.admin.bind_address).await?;
        tracing::info!(address = %admin_listener.local_addr()?, "Admin API listening");
        let router = watchgate::admin::admin_router(state.clone());
        let mut rx = shutdown.subscribe();
        Some(tokio::spawn(async move {
            let result = axum::serve(
                admin_listener,
                router.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(async move {
                let _ = rx.recv().await;
            })
            .await;
            if let Err(e) = result {
                tracing::error!(error = %e, "Admin server error");
            }
        }))
    } else {
        None
    };

    let server_rx = shutdown.subscribe();
    let server_task = tokio::spawn(async move {
        if let Err(e) = server.run(listener, server_rx).await {
            tracing::error!(error = %e, "Gateway server error");
        }
    });

    signals::shutdown_signal().await;
    shutdown.trigger();

    server_task.await?;
    if let Some(task) = admin_task {
        task.await?;
    }
    csrf_sweep.await?;
    rate_prune.await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
