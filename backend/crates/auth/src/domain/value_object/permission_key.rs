//! Permission Key
//!
//! Dotted lower-case identifiers such as `manage.security_sessions.enable`.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{AuthError, AuthResult};

const MAX_LENGTH: usize = 128;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PermissionKey(String);

impl PermissionKey {
    pub fn new(key: impl Into<String>) -> AuthResult<Self> {
        let key = key.into();
        if Self::is_valid(&key) {
            Ok(Self(key))
        } else {
            Err(AuthError::Validation(format!("Invalid permission key: {}", key)))
        }
    }

    /// At least two non-empty segments of `[a-z0-9_]`
    fn is_valid(key: &str) -> bool {
        if key.is_empty() || key.len() > MAX_LENGTH {
            return false;
        }
        let mut segments = 0;
        for segment in key.split('.') {
            if segment.is_empty()
                || !segment
                    .bytes()
                    .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_')
            {
                return false;
            }
            segments += 1;
        }
        segments >= 2
    }

    pub fn from_db(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PermissionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
