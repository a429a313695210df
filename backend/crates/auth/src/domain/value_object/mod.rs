//! Value Object Module

pub mod email;
pub mod mfa_code;
pub mod password;
pub mod permission_key;
pub mod principal_kind;
pub mod principal_status;
pub mod session_token;
