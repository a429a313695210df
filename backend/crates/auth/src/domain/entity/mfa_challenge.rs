//! MFA Challenge Entity

use chrono::{DateTime, Duration, Utc};
use kernel::id::{MfaChallengeId, PrincipalId};

use crate::domain::value_object::{
    email::Email,
    mfa_code::{MfaCode, MfaCodeType},
};

/// A stored one-time code. Marking used is terminal.
#[derive(Debug, Clone)]
pub struct MfaChallenge {
    pub id: MfaChallengeId,
    pub principal_id: PrincipalId,
    pub email: Email,
    /// SHA-256 hex of the code
    pub code_digest: String,
    pub code_type: MfaCodeType,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub used_at: Option<DateTime<Utc>>,
    pub delivery_phone: Option<String>,
    /// Wrong guesses against this challenge so far
    pub failed_attempts: u32,
}

impl MfaChallenge {
    pub fn new(
        principal_id: PrincipalId,
        email: Email,
        code: &MfaCode,
        code_type: MfaCodeType,
        delivery_phone: Option<String>,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Self {
        Self {
            id: MfaChallengeId::new(),
            principal_id,
            email,
            code_digest: code.digest(),
            code_type,
            created_at: now,
            expires_at: now + ttl,
            used_at: None,
            delivery_phone,
            failed_attempts: 0,
        }
    }

    /// Unused and unexpired
    pub fn is_consumable(&self, now: DateTime<Utc>) -> bool {
        self.used_at.is_none() && self.expires_at > now
    }

    /// Count one wrong guess. Reaching `max_attempts` burns the challenge.
    /// Returns true when this miss burned it.
    pub fn record_miss(&mut self, now: DateTime<Utc>, max_attempts: u32) -> bool {
        self.failed_attempts = self.failed_attempts.saturating_add(1);
        if self.failed_attempts >= max_attempts {
            self.used_at = Some(now);
            return true;
        }
        false
    }
}
