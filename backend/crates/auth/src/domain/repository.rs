//! Repository Traits
//!
//! Interfaces for data persistence. Implementations are in the
//! infrastructure layer (PostgreSQL and in-memory).

use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, Utc};
use kernel::id::{PrincipalId, SessionId};

use crate::domain::entity::{
    abuse::{LoginFailureRecord, SignupAttemptRecord, SignupLimits},
    access::{LastRecordResource, PermissionAuditEntry},
    mfa_challenge::MfaChallenge,
    password_policy::{PasswordHistoryEntry, PasswordPolicy},
    principal::Principal,
    session::{Session, SessionActivity, SweepOutcome},
    trusted_device::TrustedDevice,
};
use crate::domain::patch::PrincipalPatch;
use crate::domain::value_object::{
    email::Email, mfa_code::MfaCodeType, password::PasswordHash, principal_kind::PrincipalKind,
};
use crate::error::AuthResult;

/// Principal repository trait
#[trait_variant::make(PrincipalRepository: Send)]
pub trait LocalPrincipalRepository {
    /// Insert a new principal. Duplicate email within a kind is `EmailTaken`.
    async fn insert_principal(&self, principal: &Principal) -> AuthResult<()>;

    async fn find_principal(&self, id: &PrincipalId) -> AuthResult<Option<Principal>>;

    async fn find_principal_by_email(
        &self,
        kind: PrincipalKind,
        email: &Email,
    ) -> AuthResult<Option<Principal>>;

    /// Apply a partial update. Returns false when no row matched.
    async fn update_principal(&self, id: &PrincipalId, patch: &PrincipalPatch) -> AuthResult<bool>;
}

/// Session repository trait
#[trait_variant::make(SessionRepository: Send)]
pub trait LocalSessionRepository {
    async fn insert_session(&self, session: &Session) -> AuthResult<()>;

    /// Active, unexpired sessions of a principal
    async fn count_live_sessions(&self, principal_id: &PrincipalId, now: DateTime<Utc>)
    -> AuthResult<u64>;

    /// Deactivate the live session with the oldest `created_at`
    async fn evict_oldest_session(
        &self,
        principal_id: &PrincipalId,
        now: DateTime<Utc>,
    ) -> AuthResult<Option<SessionId>>;

    /// Atomically find a live session by digest and extend it.
    /// `None` when no live row matches.
    async fn touch_session(
        &self,
        token_digest: &[u8],
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> AuthResult<Option<Session>>;

    /// Deactivate by digest. `None` when already inactive or unknown.
    async fn end_session(&self, token_digest: &[u8]) -> AuthResult<Option<Session>>;

    /// Deactivate every active session of a principal, optionally sparing one
    async fn end_all_sessions(
        &self,
        principal_id: &PrincipalId,
        except: Option<&SessionId>,
    ) -> AuthResult<u64>;

    async fn session_activity(
        &self,
        principal_ids: &[PrincipalId],
        now: DateTime<Utc>,
    ) -> AuthResult<HashMap<PrincipalId, SessionActivity>>;

    /// Deactivate expired sessions and purge inactive rows older than `purge_before`
    async fn sweep_sessions(
        &self,
        now: DateTime<Utc>,
        purge_before: DateTime<Utc>,
    ) -> AuthResult<SweepOutcome>;
}

/// MFA challenge repository trait
#[trait_variant::make(MfaChallengeRepository: Send)]
pub trait LocalMfaChallengeRepository {
    /// Store a challenge, invalidating any unused challenge of the same type
    /// for the same principal. Returns how many were invalidated.
    async fn replace_challenge(&self, challenge: &MfaChallenge) -> AuthResult<u64>;

    /// Matching unused, unexpired challenge of this principal, left untouched
    async fn find_challenge(
        &self,
        principal_id: &PrincipalId,
        code_type: MfaCodeType,
        code_digest: &str,
        now: DateTime<Utc>,
    ) -> AuthResult<Option<MfaChallenge>>;

    /// Atomically mark a matching unused, unexpired challenge of this
    /// principal as used
    async fn consume_challenge(
        &self,
        principal_id: &PrincipalId,
        code_type: MfaCodeType,
        code_digest: &str,
        now: DateTime<Utc>,
    ) -> AuthResult<Option<MfaChallenge>>;

    /// Count a wrong guess against the principal's live challenge of this
    /// type. Returns true when the challenge got burned by it.
    async fn record_challenge_miss(
        &self,
        principal_id: &PrincipalId,
        code_type: MfaCodeType,
        now: DateTime<Utc>,
        max_attempts: u32,
    ) -> AuthResult<bool>;

    async fn find_trusted_device(
        &self,
        principal_id: &PrincipalId,
        kind: PrincipalKind,
        fingerprint_digest: &str,
    ) -> AuthResult<Option<TrustedDevice>>;

    async fn record_sms_delivery(&self, phone: &str, at: DateTime<Utc>) -> AuthResult<()>;

    async fn count_sms_deliveries(&self, phone: &str, since: DateTime<Utc>) -> AuthResult<u64>;
}

/// Roles, grants, audit and last-record counts
#[trait_variant::make(AccessRepository: Send)]
pub trait LocalAccessRepository {
    /// First held role with an active, granted permission of this key
    async fn find_granting_role(&self, role_names: &[String], key: &str)
    -> AuthResult<Option<String>>;

    /// Every active permission key granted to any held role
    async fn granted_permissions(&self, role_names: &[String]) -> AuthResult<Vec<String>>;

    /// Every active permission key
    async fn permission_catalog(&self) -> AuthResult<Vec<String>>;

    async fn append_audit(&self, entry: &PermissionAuditEntry) -> AuthResult<()>;

    /// Active, non-deleted rows of a resource type within a scope
    async fn count_active_records(
        &self,
        resource: LastRecordResource,
        scope_id: &uuid::Uuid,
    ) -> AuthResult<u64>;
}

/// Password policy and history
#[trait_variant::make(PasswordPolicyRepository: Send)]
pub trait LocalPasswordPolicyRepository {
    async fn active_policy(&self, kind: PrincipalKind) -> AuthResult<Option<PasswordPolicy>>;

    /// Append and prune to the `keep` most recent entries
    async fn append_password_history(&self, entry: &PasswordHistoryEntry, keep: u32)
    -> AuthResult<()>;

    /// Most recent first
    async fn recent_password_hashes(
        &self,
        principal_id: &PrincipalId,
        limit: u32,
    ) -> AuthResult<Vec<PasswordHash>>;
}

/// Durable logs and settings behind the abuse detector
#[trait_variant::make(AbuseLogRepository: Send)]
pub trait LocalAbuseLogRepository {
    async fn record_login_failure(&self, record: &LoginFailureRecord) -> AuthResult<()>;

    async fn count_login_failures_from_ip(&self, ip: &str, since: DateTime<Utc>) -> AuthResult<u64>;

    async fn record_signup_attempt(&self, record: &SignupAttemptRecord) -> AuthResult<()>;

    async fn count_signup_attempts(&self, ip: &str, day: NaiveDate) -> AuthResult<u64>;

    /// `None` when the settings store has no override
    async fn signup_limits(&self) -> AuthResult<Option<SignupLimits>>;
}

/// Everything the auth application needs from storage
pub trait AuthStore:
    PrincipalRepository
    + SessionRepository
    + MfaChallengeRepository
    + AccessRepository
    + PasswordPolicyRepository
    + AbuseLogRepository
    + Clone
    + Send
    + Sync
    + 'static
{
}

impl<T> AuthStore for T where
    T: PrincipalRepository
        + SessionRepository
        + MfaChallengeRepository
        + AccessRepository
        + PasswordPolicyRepository
        + AbuseLogRepository
        + Clone
        + Send
        + Sync
        + 'static
{
}
