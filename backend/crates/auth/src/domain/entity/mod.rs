//! Entity Module

pub mod abuse;
pub mod access;
pub mod mfa_challenge;
pub mod password_policy;
pub mod principal;
pub mod session;
pub mod trusted_device;
