//! Request security gateway library.
//!
//! Every inbound request passes a chain of stateful guards: rate limiting,
//! CSRF token validation, input validation and sanitization, and upload
//! threat scanning, with a security orchestrator aggregating events,
//! metrics, alerts, health, and reports.

pub mod admin;
pub mod config;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod security;

pub use config::GatewayConfig;
pub use http::{AppState, HttpServer};
pub use lifecycle::Shutdown;
pub use security::SecurityOrchestrator;
