//! Trusted Device Entity
//!
//! Read-only input to the login flow; records are created elsewhere.

use chrono::{DateTime, Utc};
use kernel::id::PrincipalId;
use platform::crypto::sha256_hex;

use crate::domain::value_object::principal_kind::PrincipalKind;

#[derive(Debug, Clone)]
pub struct TrustedDevice {
    pub principal_id: PrincipalId,
    pub principal_kind: PrincipalKind,
    /// SHA-256 hex of the client fingerprint
    pub fingerprint_digest: String,
    pub trusted_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl TrustedDevice {
    pub fn new(
        principal_id: PrincipalId,
        principal_kind: PrincipalKind,
        fingerprint: &str,
        trusted_at: DateTime<Utc>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            principal_id,
            principal_kind,
            fingerprint_digest: Self::digest(fingerprint),
            trusted_at,
            expires_at,
        }
    }

    pub fn digest(fingerprint: &str) -> String {
        sha256_hex(fingerprint.as_bytes())
    }

    pub fn is_valid(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_none_or(|at| at > now)
    }
}
