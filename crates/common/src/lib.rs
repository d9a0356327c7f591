//! Rinkside Common Library
//!
//! Shared code for the rinkside services including:
//! - Error types and handling
//! - Configuration management
//! - Identity & access guard (session tokens, role scopes)
//! - Scope-aware fingerprint cache with single-flight
//! - Metrics and observability

pub mod auth;
pub mod cache;
pub mod config;
pub mod errors;
pub mod metrics;

// Re-export commonly used types
pub use auth::{AccessGuard, Scope, UserContext, UserRole};
pub use cache::{fingerprint, FlightCache};
pub use config::AppConfig;
pub use errors::{EngineError, Result};

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
