//! Auth (Authentication and Authorization) Backend Module
//!
//! Clean Architecture structure:
//! - `domain/` - Entities, value objects, repository traits, password rules
//! - `application/` - Credential verification, abuse detection, MFA codes,
//!   sessions, password policy, permission arbitration, login orchestration
//! - `infra/` - PostgreSQL and in-memory repositories, delivery and event adapters
//! - `presentation/` - HTTP handlers, DTOs, middleware, router
//!
//! ## Features
//! - Employee and client login with email + password
//! - One-time codes over email/SMS for login MFA, password reset and
//!   email verification
//! - Server-side sessions with sliding expiration and a per-principal cap
//! - Client self-service signup with per-IP and global daily quotas
//! - Flat role-to-permission checks with an audit trail
//!
//! ## Security Model
//! - Passwords hashed with Argon2id and an optional pepper
//! - Session tokens stored only as keyed digests
//! - Every credential failure renders identically
//! - Abuse detection fails open; permission checks fail closed

pub mod application;
pub mod domain;
pub mod error;
pub mod infra;
pub mod presentation;

#[cfg(test)]
mod tests;

// Re-exports for convenience
pub use application::config::AuthConfig;
pub use application::login::LoginOrchestrator;
pub use application::permission_arbiter::PermissionArbiter;
pub use error::{AuthError, AuthResult};
pub use infra::postgres::PgAuthRepository;
pub use presentation::router::auth_router;
pub use presentation::state::{AuthAppState, AuthStack, PgStack};

// Re-export kernel error types for unified error handling
pub use kernel::error::{
    app_error::{AppError, AppResult},
    kind::ErrorKind,
};

// Convenience re-exports
pub mod config {
    pub use crate::application::config::*;
}

pub mod models {
    pub use crate::domain::entity::*;
    pub use crate::domain::value_object::*;
    pub use crate::presentation::dto::*;
}

pub mod store {
    pub use crate::infra::memory::InMemoryAuthRepository as MemoryStore;
    pub use crate::infra::postgres::PgAuthRepository as AuthStore;
}

pub mod middleware {
    pub use crate::presentation::middleware::*;
}
