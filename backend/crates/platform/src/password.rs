//! Password Hashing and Verification
//!
//! - Argon2id hashing with configurable cost and an optional pepper
//! - Zeroization of clear-text material
//! - A dummy verification path with the same cost as a real one, used when
//!   there is no stored hash to compare against
//!
//! Complexity rules (length limits, character classes, denylists) are a
//! policy concern and live with the caller; [`ClearTextPassword`] only
//! normalises input and rejects values that cannot be a password at all.

use std::fmt;
use std::sync::OnceLock;

use argon2::{
    Algorithm, Argon2, Params, PasswordHash, PasswordHasher, PasswordVerifier, Version,
    password_hash::SaltString,
};
use rand::rngs::OsRng;
use thiserror::Error;
use unicode_normalization::UnicodeNormalization;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::crypto::random_token;

// ============================================================================
// Constants
// ============================================================================

/// Hard ceiling on accepted input, independent of any policy, so that a
/// single request cannot make the hasher chew on megabytes.
pub const MAX_INPUT_LENGTH: usize = 1024;

// ============================================================================
// Error Types
// ============================================================================

/// Input that cannot be treated as a password
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PasswordInputError {
    #[error("Password cannot be empty or contain only whitespace")]
    EmptyOrWhitespace,

    #[error("Password must be at most {max} characters (got {actual})")]
    TooLong { max: usize, actual: usize },

    #[error("Password contains invalid control characters")]
    InvalidCharacter,
}

/// Password hashing/verification errors
#[derive(Debug, Error)]
pub enum PasswordHashError {
    #[error("Password hashing failed: {0}")]
    HashingFailed(String),

    #[error("Invalid password hash format")]
    InvalidHashFormat,

    #[error("Invalid Argon2 parameters: {0}")]
    InvalidParams(String),
}

// ============================================================================
// Clear Text Password (Zeroized on drop)
// ============================================================================

/// Clear text password with automatic memory zeroization
///
/// - NFKC-normalised on construction
/// - Not `Clone`, Debug output is redacted
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct ClearTextPassword(String);

impl ClearTextPassword {
    pub fn new(raw: String) -> Result<Self, PasswordInputError> {
        let mut raw = raw;
        let normalized: String = raw.nfkc().collect();
        raw.zeroize();

        if normalized.trim().is_empty() {
            return Err(PasswordInputError::EmptyOrWhitespace);
        }

        let char_count = normalized.chars().count();
        if char_count > MAX_INPUT_LENGTH {
            return Err(PasswordInputError::TooLong {
                max: MAX_INPUT_LENGTH,
                actual: char_count,
            });
        }

        // Space and tab are fine, other control characters are not
        if normalized
            .chars()
            .any(|ch| ch.is_control() && ch != ' ' && ch != '\t')
        {
            return Err(PasswordInputError::InvalidCharacter);
        }

        Ok(Self(normalized))
    }

    /// Borrow the normalised text for policy evaluation
    pub fn expose_secret(&self) -> &str {
        &self.0
    }

    /// Number of Unicode code points (not bytes)
    pub fn char_count(&self) -> usize {
        self.0.chars().count()
    }

    fn peppered(&self, pepper: Option<&[u8]>) -> Zeroizing<Vec<u8>> {
        let mut bytes = self.0.as_bytes().to_vec();
        if let Some(p) = pepper {
            bytes.extend_from_slice(p);
        }
        Zeroizing::new(bytes)
    }
}

impl fmt::Debug for ClearTextPassword {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ClearTextPassword")
            .field(&"[REDACTED]")
            .finish()
    }
}

// ============================================================================
// Argon2 parameters
// ============================================================================

/// Argon2id cost parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Argon2Params {
    /// Memory in KiB
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl Default for Argon2Params {
    /// OWASP recommendation: m=19456 (19 MiB), t=2, p=1
    fn default() -> Self {
        Self {
            memory_kib: 19_456,
            iterations: 2,
            parallelism: 1,
        }
    }
}

impl Argon2Params {
    /// Minimal cost. Only for tests and local development.
    pub fn low_cost() -> Self {
        Self {
            memory_kib: 1024,
            iterations: 1,
            parallelism: 1,
        }
    }

    fn to_params(self) -> Result<Params, PasswordHashError> {
        Params::new(self.memory_kib, self.iterations, self.parallelism, None)
            .map_err(|e| PasswordHashError::InvalidParams(e.to_string()))
    }
}

// ============================================================================
// Hasher
// ============================================================================

/// Argon2id hasher bound to one parameter set and pepper
pub struct Argon2Hasher {
    argon2: Argon2<'static>,
    params: Argon2Params,
    pepper: Option<Vec<u8>>,
    /// Reference hash for [`Argon2Hasher::dummy_verify`], built on first use
    reference: OnceLock<String>,
}

impl Argon2Hasher {
    pub fn new(params: Argon2Params, pepper: Option<Vec<u8>>) -> Result<Self, PasswordHashError> {
        let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params.to_params()?);
        Ok(Self {
            argon2,
            params,
            pepper,
            reference: OnceLock::new(),
        })
    }

    /// Hash with a fresh 128-bit salt, producing a PHC string
    pub fn hash(&self, password: &ClearTextPassword) -> Result<HashedPassword, PasswordHashError> {
        let salt = SaltString::generate(OsRng);
        let bytes = password.peppered(self.pepper.as_deref());

        let hash = self
            .argon2
            .hash_password(&bytes, &salt)
            .map_err(|e| PasswordHashError::HashingFailed(e.to_string()))?;

        Ok(HashedPassword {
            hash: hash.to_string(),
        })
    }

    /// Verify against a stored hash. The parameters embedded in the PHC
    /// string are used, so older hashes keep verifying after a cost change.
    pub fn verify(&self, hashed: &HashedPassword, password: &ClearTextPassword) -> bool {
        let parsed = match PasswordHash::new(&hashed.hash) {
            Ok(h) => h,
            Err(_) => return false,
        };
        let bytes = password.peppered(self.pepper.as_deref());

        // Argon2 compares digests in constant time internally
        self.argon2.verify_password(&bytes, &parsed).is_ok()
    }

    /// Run a full verification against a fixed reference hash and discard
    /// the outcome. Always returns `false`.
    pub fn dummy_verify(&self, password: &ClearTextPassword) -> bool {
        let reference = self.reference.get_or_init(|| {
            let filler = ClearTextPassword(random_token(24));
            match self.hash(&filler) {
                Ok(h) => h.hash,
                Err(e) => {
                    tracing::error!(error = %e, "Failed to build reference password hash");
                    String::new()
                }
            }
        });
        let reference = HashedPassword {
            hash: reference.clone(),
        };
        let _ = self.verify(&reference, password);
        false
    }

    /// True when the stored hash is not Argon2id or uses other cost parameters
    pub fn needs_rehash(&self, hashed: &HashedPassword) -> bool {
        let parsed = match PasswordHash::new(&hashed.hash) {
            Ok(h) => h,
            Err(_) => return true,
        };

        if parsed.algorithm != Algorithm::Argon2id.ident() {
            return true;
        }

        match Params::try_from(&parsed) {
            Ok(p) => {
                p.m_cost() != self.params.memory_kib
                    || p.t_cost() != self.params.iterations
                    || p.p_cost() != self.params.parallelism
            }
            Err(_) => true,
        }
    }
}

impl fmt::Debug for Argon2Hasher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Argon2Hasher")
            .field("params", &self.params)
            .field("pepper", &self.pepper.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

// ============================================================================
// Hashed Password (Safe to store)
// ============================================================================

/// Hashed password in PHC string format
#[derive(Clone, PartialEq, Eq)]
pub struct HashedPassword {
    hash: String,
}

impl HashedPassword {
    /// Create from PHC string (e.g., from database)
    pub fn from_phc_string(s: impl Into<String>) -> Result<Self, PasswordHashError> {
        let hash = s.into();
        PasswordHash::new(&hash).map_err(|_| PasswordHashError::InvalidHashFormat)?;
        Ok(Self { hash })
    }

    /// Get the PHC string for storage
    pub fn as_phc_string(&self) -> &str {
        &self.hash
    }
}

impl fmt::Debug for HashedPassword {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HashedPassword")
            .field("hash", &"[HASH]")
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================
