//! Platform Crate - Technical Infrastructure
//!
//! Shared technical foundations with no knowledge of principals or roles:
//! - Cryptographic utilities (random tokens and codes, SHA-256, HMAC, Base64)
//! - Password hashing (Argon2id with pepper and a timing-equalising dummy verify)
//! - Cookie building and extraction
//! - Client IP / user agent / device fingerprint extraction
//! - Clock abstraction
//! - Sliding-window counter store and TTL decision cache, both with a
//!   background sweeper lifecycle

pub mod cache;
pub mod client;
pub mod clock;
pub mod cookie;
pub mod crypto;
pub mod password;
pub mod rate_limit;
pub mod sweeper;
