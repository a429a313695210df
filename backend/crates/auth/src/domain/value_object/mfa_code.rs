//! One-time verification codes

use derive_more::Display;
use platform::crypto::{random_numeric_code, sha256_hex};
use serde::{Deserialize, Serialize};
use std::fmt;

/// What a code may be used for. A code only verifies for its own type.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MfaCodeType {
    #[display("login")]
    Login,
    #[display("reset")]
    Reset,
    #[display("phone_verification")]
    PhoneVerification,
    #[display("email_verification")]
    EmailVerification,
}

impl MfaCodeType {
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Login => "login",
            Self::Reset => "reset",
            Self::PhoneVerification => "phone_verification",
            Self::EmailVerification => "email_verification",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "login" => Some(Self::Login),
            "reset" => Some(Self::Reset),
            "phone_verification" => Some(Self::PhoneVerification),
            "email_verification" => Some(Self::EmailVerification),
            _ => None,
        }
    }

    /// Human wording for delivered messages
    pub const fn purpose(&self) -> &'static str {
        match self {
            Self::Login => "sign-in",
            Self::Reset => "password reset",
            Self::PhoneVerification => "phone verification",
            Self::EmailVerification => "email verification",
        }
    }
}

/// Numeric code in clear text. Lives only between issue and delivery.
#[derive(Clone, PartialEq, Eq)]
pub struct MfaCode(String);

impl MfaCode {
    pub fn generate(length: usize) -> Self {
        Self(random_numeric_code(length))
    }

    /// Normalise user input. Spaces and dashes are tolerated.
    pub fn parse(input: &str, length: usize) -> Option<Self> {
        let digits: String = input
            .chars()
            .filter(|c| !c.is_whitespace() && *c != '-')
            .collect();
        (digits.len() == length && digits.bytes().all(|b| b.is_ascii_digit()))
            .then_some(Self(digits))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Digest stored and looked up instead of the code
    pub fn digest(&self) -> String {
        sha256_hex(self.0.as_bytes())
    }
}

impl fmt::Debug for MfaCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("MfaCode").field(&"[REDACTED]").finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_length_and_digits() {
        let code = MfaCode::generate(6);
        assert_eq!(code.as_str().len(), 6);
        assert!(code.as_str().bytes().all(|b| b.is_ascii_digit()));
    }

    #[test]
    fn test_parse_normalises_input() {
        assert_eq!(MfaCode::parse(" 123-456 ", 6).unwrap().as_str(), "123456");
        assert!(MfaCode::parse("12345", 6).is_none());
        assert!(MfaCode::parse("12a456", 6).is_none());
    }

    #[test]
    fn test_digest_is_stable_hex() {
        let code = MfaCode::parse("000111", 6).unwrap();
        assert_eq!(code.digest().len(), 64);
        assert_eq!(code.digest(), MfaCode::parse("000111", 6).unwrap().digest());
    }

    #[test]
    fn test_code_type_roundtrip() {
        for t in [
            MfaCodeType::Login,
            MfaCodeType::Reset,
            MfaCodeType::PhoneVerification,
            MfaCodeType::EmailVerification,
        ] {
            assert_eq!(MfaCodeType::from_code(t.code()), Some(t));
            assert_eq!(t.to_string(), t.code());
        }
    }
}
