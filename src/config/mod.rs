//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → GatewayConfig (validated, immutable)
//!     → shared via Arc to all subsystems
//!
//! On admin config update:
//!     new config validated
//!     → atomic swap of Arc<GatewayConfig>
//!     → guards pick up tunable knobs
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes go through the admin API
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use schema::GatewayConfig;
pub use schema::RateLimitConfig;
pub use schema::RateLimitStrategy;
pub use schema::CsrfConfig;
pub use schema::UploadConfig;
pub use schema::ValidationConfig;
