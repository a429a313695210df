//! Presentation Layer
//!
//! HTTP handlers, DTOs, router, and middleware.

pub mod dto;
pub mod handlers;
pub mod middleware;
pub mod router;
pub mod state;

pub use middleware::{
    AuthenticatedPrincipal, ClientInfo, PermissionGuard, require_permission, require_session,
};
pub use router::auth_router;
pub use state::{AuthAppState, AuthStack, PgStack};
