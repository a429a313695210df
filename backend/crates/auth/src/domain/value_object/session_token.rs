//! Session Token
//!
//! Opaque bearer credential: 32 random bytes, URL-safe base64. Only an
//! HMAC-SHA256 digest keyed with the server secret is ever stored.

use platform::crypto::{hmac_sha256, random_token};
use std::fmt;

/// Entropy of a freshly generated token
const TOKEN_BYTES: usize = 32;

/// Encoded length of a 32-byte token without padding
const TOKEN_LENGTH: usize = 43;

#[derive(Clone, PartialEq, Eq)]
pub struct SessionToken(String);

impl SessionToken {
    pub fn generate() -> Self {
        Self(random_token(TOKEN_BYTES))
    }

    /// Accept a presented token. Anything that could not have been issued
    /// is rejected before touching storage.
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        let well_formed = raw.len() == TOKEN_LENGTH
            && raw
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_');
        well_formed.then(|| Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Digest stored and looked up instead of the token
    pub fn digest(&self, secret: &[u8]) -> Vec<u8> {
        hmac_sha256(secret, self.0.as_bytes()).to_vec()
    }
}

impl fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("SessionToken").field(&"[REDACTED]").finish()
    }
}
