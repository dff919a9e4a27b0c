//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (main.rs):
//!     Load config → Validate → Initialize guards → Start listeners
//!
//! Background (sweeper.rs):
//!     CSRF token sweep, rate-limit pruning on jittered timers
//!
//! Shutdown (shutdown.rs, signals.rs):
//!     SIGTERM/SIGINT → broadcast → tasks drain and exit
//! ```
//!
//! # Design Decisions
//! - Ordered startup: config first, then guards, then listeners
//! - Background tasks carry a shutdown receiver, never a bare timer
//! - Listeners start last (traffic only when ready)

pub mod shutdown;
pub mod signals;
pub mod sweeper;

pub use shutdown::Shutdown;
