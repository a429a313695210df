//! Client identification utilities
//!
//! Common functions for identifying clients via HTTP headers.

use axum::http::{HeaderMap, header};
use std::net::IpAddr;

/// Header carrying a client-computed device fingerprint
pub const DEVICE_FINGERPRINT_HEADER: &str = "x-device-fingerprint";

/// Longest fingerprint accepted from a client
const MAX_FINGERPRINT_LENGTH: usize = 256;

/// Longest user agent kept for session rows and audit entries
const MAX_USER_AGENT_LENGTH: usize = 512;

/// Request-side facts about the caller
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientContext {
    /// Client IP address (from X-Forwarded-For or direct connection)
    pub ip: Option<IpAddr>,
    pub user_agent: Option<String>,
    /// Device fingerprint used for trusted-device checks
    pub device_fingerprint: Option<String>,
}

impl ClientContext {
    pub fn new(ip: Option<IpAddr>, user_agent: Option<String>) -> Self {
        Self {
            ip,
            user_agent,
            device_fingerprint: None,
        }
    }

    pub fn with_device_fingerprint(mut self, fingerprint: impl Into<String>) -> Self {
        self.device_fingerprint = Some(fingerprint.into());
        self
    }

    /// Collect IP, user agent and device fingerprint from a request
    pub fn from_headers(headers: &HeaderMap, direct_ip: Option<IpAddr>) -> Self {
        let user_agent = headers
            .get(header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .map(|ua| ua.chars().take(MAX_USER_AGENT_LENGTH).collect());

        let device_fingerprint = headers
            .get(DEVICE_FINGERPRINT_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|fp| !fp.is_empty() && fp.len() <= MAX_FINGERPRINT_LENGTH)
            .map(str::to_string);

        Self {
            ip: extract_client_ip(headers, direct_ip),
            user_agent,
            device_fingerprint,
        }
    }

    /// Stable string for keying counters. Unknown peers share one bucket.
    pub fn ip_key(&self) -> String {
        self.ip
            .map(|ip| ip.to_string())
            .unwrap_or_else(|| "unknown".to_string())
    }

    /// Get IP as string (for database storage)
    pub fn ip_string(&self) -> Option<String> {
        self.ip.map(|ip| ip.to_string())
    }
}

/// Extract client IP address from headers
///
/// Checks X-Forwarded-For header first (for reverse proxy setups),
/// then falls back to direct connection IP.
pub fn extract_client_ip(headers: &HeaderMap, direct_ip: Option<IpAddr>) -> Option<IpAddr> {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|xff| xff.split(',').next())
        .and_then(|first| first.trim().parse::<IpAddr>().ok())
        .or(direct_ip)
}
