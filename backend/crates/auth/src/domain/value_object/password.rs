//! Password Value Objects
//!
//! `RawPassword` is user input (zeroized on drop); `PasswordHash` is the
//! Argon2id PHC string kept in storage. Complexity rules live in the
//! password policy, not here.

use platform::password::{
    Argon2Hasher, ClearTextPassword, HashedPassword, PasswordInputError,
};
use std::fmt;

use crate::error::{AuthError, AuthResult};

/// Raw password from user input
pub struct RawPassword(ClearTextPassword);

impl RawPassword {
    /// Sanity checks only: not blank, bounded length, no control characters
    pub fn new(raw: String) -> AuthResult<Self> {
        let clear_text = ClearTextPassword::new(raw).map_err(|e| match e {
            PasswordInputError::EmptyOrWhitespace => {
                AuthError::Validation("Password cannot be empty".into())
            }
            PasswordInputError::TooLong { max, .. } => {
                AuthError::Validation(format!("Password must be at most {} characters", max))
            }
            PasswordInputError::InvalidCharacter => {
                AuthError::Validation("Password contains invalid characters".into())
            }
        })?;
        Ok(Self(clear_text))
    }

    pub fn expose_secret(&self) -> &str {
        self.0.expose_secret()
    }

    pub fn char_count(&self) -> usize {
        self.0.char_count()
    }

    pub(crate) fn inner(&self) -> &ClearTextPassword {
        &self.0
    }
}

impl fmt::Debug for RawPassword {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("RawPassword").field(&"[REDACTED]").finish()
    }
}

/// Stored password hash
#[derive(Clone, PartialEq, Eq)]
pub struct PasswordHash(HashedPassword);

impl PasswordHash {
    pub fn from_raw(raw: &RawPassword, hasher: &Argon2Hasher) -> AuthResult<Self> {
        Ok(Self(hasher.hash(raw.inner())?))
    }

    /// Create from PHC string (from database)
    pub fn from_phc_string(phc_string: impl Into<String>) -> AuthResult<Self> {
        HashedPassword::from_phc_string(phc_string)
            .map(Self)
            .map_err(|_| AuthError::Internal("Invalid password hash in storage".into()))
    }

    pub fn as_phc_string(&self) -> &str {
        self.0.as_phc_string()
    }

    /// Constant-time verification
    pub fn verify(&self, raw: &RawPassword, hasher: &Argon2Hasher) -> bool {
        hasher.verify(&self.0, raw.inner())
    }

    pub fn needs_rehash(&self, hasher: &Argon2Hasher) -> bool {
        hasher.needs_rehash(&self.0)
    }
}

impl fmt::Debug for PasswordHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PasswordHash").field(&"[HASH]").finish()
    }
}
