//! HTTP surface of the gateway.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, middleware layering)
//!     → middleware.rs (rate limit → CSRF → validation)
//!     → handlers.rs (api echo, uploads, token issuance, health)
//! ```

pub mod handlers;
pub mod middleware;
pub mod server;

pub use server::{AppState, HttpServer};
