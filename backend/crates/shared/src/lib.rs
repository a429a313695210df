//! Shared Kernel - Domain-crossing minimal core
//!
//! - [`error`]: the unified [`AppError`](error::app_error::AppError) rendered at the HTTP
//!   boundary, its [`ErrorKind`](error::kind::ErrorKind) taxonomy and conversions
//! - [`id`]: typed UUID identifiers shared by every crate
//!
//! Only things with the same meaning in every domain belong here.

pub mod error {
    pub mod app_error;
    pub mod conversions;
    pub mod kind;
}
pub mod id;
