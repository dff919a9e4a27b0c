//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request:
//!     → rate_limit (admission control, allow/deny lists)
//!     → csrf (token validation for mutating methods)
//!     → validation (body/query rules, injection screening, sanitization)
//!     → route handler
//!     → upload (scan buffers before persistence, upload routes only)
//!
//! Every decision:
//!     → orchestrator (event log, metrics, alerts, health, reports)
//! ```
//!
//! # Design Decisions
//! - Defense in depth: independent guards, fixed chain order
//! - Fail closed everywhere except the distributed counter fallback
//! - Guards are explicit service objects with injected configuration,
//!   shared through request state rather than globals

pub mod csrf;
pub mod error;
pub mod events;
pub mod health;
pub mod orchestrator;
pub mod rate_limit;
pub mod upload;
pub mod validation;

pub use error::SecurityError;
pub use orchestrator::SecurityOrchestrator;
