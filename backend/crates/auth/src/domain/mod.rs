//! Domain Layer
//!
//! Contains entities, value objects, repository traits and the pure
//! password rules.

pub mod entity;
pub mod patch;
pub mod policy;
pub mod repository;
pub mod value_object;

// Re-exports
pub use entity::{principal::Principal, session::Session};
pub use repository::AuthStore;
