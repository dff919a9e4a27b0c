//! Shared helpers for integration tests.
//!
//! Boots a real gateway (public listener plus admin API) on loopback ports
//! and hands back the addresses, the shared state, and the shutdown handle.

use std::net::SocketAddr;
use tokio::net::TcpListener;
use watchgate::config::GatewayConfig;
use watchgate::http::{AppState, HttpServer};
use watchgate::lifecycle::Shutdown;

pub const ADMIN_KEY: &str = "test-admin-key";

pub struct TestGateway {
    pub addr: SocketAddr,
    pub admin_addr: SocketAddr,
    pub state: AppState,
    pub shutdown: Shutdown,
    /// Owns the upload/quarantine directories for the gateway's lifetime.
    pub data_dir: tempfile::TempDir,
}

impl TestGateway {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    #[allow(dead_code)]
    pub fn admin_url(&self, path: &str) -> String {
        format!("http://{}{}", self.admin_addr, path)
    }
}

impl Drop for TestGateway {
    fn drop(&mut self) {
        self.shutdown.trigger();
    }
}

/// Start a gateway with `config`, rewriting its storage dirs and admin key
/// so tests stay isolated from each other.
pub async fn start_gateway(mut config: GatewayConfig) -> TestGateway {
    let data_dir = tempfile::tempdir().unwrap();
    config.upload.upload_dir = data_dir
        .path()
        .join("uploads")
        .to_string_lossy()
        .into_owned();
    config.upload.quarantine_dir = data_dir
        .path()
        .join("quarantine")
        .to_string_lossy()
        .into_owned();
    config.admin.enabled = true;
    config.admin.api_key = ADMIN_KEY.to_string();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let admin_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let admin_addr = admin_listener.local_addr().unwrap();

    let server = HttpServer::new(config);
    let state = server.state();
    let shutdown = Shutdown::new();

    let admin_router = watchgate::admin::admin_router(state.clone());
    let mut admin_rx = shutdown.subscribe();
    tokio::spawn(async move {
        let _ = axum::serve(
            admin_listener,
            admin_router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move {
            let _ = admin_rx.recv().await;
        })
        .await;
    });

    let server_rx = shutdown.subscribe();
    tokio::spawn(async move {
        let _ = server.run(listener, server_rx).await;
    });

    TestGateway {
        addr,
        admin_addr,
        state,
        shutdown,
        data_dir,
    }
}

pub fn client() -> reqwest::Client {
    reqwest::Client::builder().no_proxy().build().unwrap()
}
