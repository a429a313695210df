//! Password Policy Entities

use chrono::{DateTime, Utc};
use kernel::id::PrincipalId;
use serde::Serialize;

use crate::domain::value_object::{password::PasswordHash, principal_kind::PrincipalKind};

/// Special characters accepted by the default policy
pub const DEFAULT_SPECIAL_CHARS: &str = "!@#$%^&*()_+-=[]{};':\",./<>?\\|`~";

/// Exactly one policy is active per principal kind
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PasswordPolicy {
    pub principal_kind: PrincipalKind,
    pub min_length: u32,
    pub max_length: u32,
    pub require_uppercase: bool,
    pub require_lowercase: bool,
    pub require_numbers: bool,
    pub require_special: bool,
    pub special_chars: String,
    pub prevent_common_passwords: bool,
    pub prevent_identity_in_password: bool,
    /// 0 disables history
    pub history_count: u32,
    /// 0 disables expiry
    pub expiration_days: u32,
}

impl PasswordPolicy {
    /// Hard-coded fallback when no active policy row exists
    pub fn safe_default(kind: PrincipalKind) -> Self {
        let (min_length, history_count, expiration_days) = match kind {
            PrincipalKind::Employee => (12, 5, 90),
            PrincipalKind::Client => (8, 3, 0),
        };
        Self {
            principal_kind: kind,
            min_length,
            max_length: 128,
            require_uppercase: true,
            require_lowercase: true,
            require_numbers: true,
            require_special: true,
            special_chars: DEFAULT_SPECIAL_CHARS.to_string(),
            prevent_common_passwords: true,
            prevent_identity_in_password: true,
            history_count,
            expiration_days,
        }
    }

    pub fn history_enabled(&self) -> bool {
        self.history_count > 0
    }
}

#[derive(Debug, Clone)]
pub struct PasswordHistoryEntry {
    pub principal_id: PrincipalId,
    pub password_hash: PasswordHash,
    pub created_at: DateTime<Utc>,
}

/// Password age as seen by the principal
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpirationInfo {
    pub changed_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub days_remaining: Option<i64>,
    pub is_expired: bool,
    pub force_change: bool,
}

impl ExpirationInfo {
    /// Explicit expiry wins; otherwise `changed_at + expiration_days`
    pub fn derive(
        changed_at: Option<DateTime<Utc>>,
        explicit_expiry: Option<DateTime<Utc>>,
        expiration_days: u32,
        force_change: bool,
        now: DateTime<Utc>,
    ) -> Self {
        let expires_at = explicit_expiry.or_else(|| {
            (expiration_days > 0)
                .then_some(changed_at)
                .flatten()
                .map(|at| at + chrono::Duration::days(i64::from(expiration_days)))
        });
        let is_expired = expires_at.is_some_and(|at| at <= now);
        Self {
            changed_at,
            expires_at,
            days_remaining: expires_at.map(|at| (at - now).num_days().max(0)),
            is_expired,
            force_change,
        }
    }

    /// The principal must pick a new password before continuing
    pub fn requires_change(&self) -> bool {
        self.is_expired || self.force_change
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_derived_expiry() {
        let now = Utc::now();
        let info = ExpirationInfo::derive(Some(now - Duration::days(80)), None, 90, false, now);
        assert_eq!(info.expires_at, Some(now + Duration::days(10)));
        assert_eq!(info.days_remaining, Some(10));
        assert!(!info.is_expired);

        let info = ExpirationInfo::derive(Some(now - Duration::days(91)), None, 90, false, now);
        assert!(info.is_expired);
        assert_eq!(info.days_remaining, Some(0));
    }

    #[test]
    fn test_explicit_expiry_wins_and_zero_days_disables() {
        let now = Utc::now();
        let explicit = now + Duration::days(3);
        let info = ExpirationInfo::derive(Some(now), Some(explicit), 90, false, now);
        assert_eq!(info.expires_at, Some(explicit));

        let info = ExpirationInfo::derive(Some(now - Duration::days(999)), None, 0, true, now);
        assert_eq!(info.expires_at, None);
        assert!(!info.is_expired);
        assert!(info.requires_change());
    }

    #[test]
    fn test_safe_default_is_strict() {
        let policy = PasswordPolicy::safe_default(PrincipalKind::Employee);
        assert!(policy.require_special && policy.prevent_common_passwords);
        assert!(policy.history_enabled());
    }
}
