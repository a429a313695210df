//! In-memory repository
//!
//! Implements every repository trait with the same observable semantics as
//! the PostgreSQL adapter, including the atomic consume and extend
//! operations. Used by tests and single-process development setups.
//!
//! Failure switches make every call (or only audit writes) return an
//! internal error, to exercise fail-open and fail-closed paths.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

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
use crate::domain::repository::{
    AbuseLogRepository, AccessRepository, MfaChallengeRepository, PasswordPolicyRepository,
    PrincipalRepository, SessionRepository,
};
use crate::domain::value_object::{
    email::Email, mfa_code::MfaCodeType, password::PasswordHash, principal_kind::PrincipalKind,
};
use crate::error::{AuthError, AuthResult};

#[derive(Debug, Clone)]
struct Grant {
    role: String,
    permission: String,
    is_granted: bool,
}

#[derive(Default)]
struct State {
    principals: HashMap<PrincipalId, Principal>,
    sessions: Vec<Session>,
    challenges: Vec<MfaChallenge>,
    trusted_devices: Vec<TrustedDevice>,
    sms_deliveries: Vec<(String, DateTime<Utc>)>,
    /// role name -> active
    roles: HashMap<String, bool>,
    /// permission key -> active
    permissions: HashMap<String, bool>,
    grants: Vec<Grant>,
    audit: Vec<PermissionAuditEntry>,
    active_records: HashMap<(LastRecordResource, uuid::Uuid), u64>,
    policies: HashMap<PrincipalKind, PasswordPolicy>,
    history: Vec<PasswordHistoryEntry>,
    login_failures: Vec<LoginFailureRecord>,
    signup_attempts: Vec<SignupAttemptRecord>,
    signup_limits: Option<SignupLimits>,
}

#[derive(Default)]
struct Inner {
    state: Mutex<State>,
    fail_all: AtomicBool,
    fail_audit: AtomicBool,
}

#[derive(Clone, Default)]
pub struct InMemoryAuthRepository {
    inner: Arc<Inner>,
}

impl InMemoryAuthRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.inner.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Lock the state, or fail when the failure switch is on
    fn guard(&self) -> AuthResult<MutexGuard<'_, State>> {
        if self.inner.fail_all.load(Ordering::Acquire) {
            return Err(AuthError::Internal("storage unavailable".into()));
        }
        Ok(self.state())
    }

    // ========================================================================
    // Failure switches
    // ========================================================================

    pub fn set_failing(&self, failing: bool) {
        self.inner.fail_all.store(failing, Ordering::Release);
    }

    pub fn set_audit_failing(&self, failing: bool) {
        self.inner.fail_audit.store(failing, Ordering::Release);
    }

    // ========================================================================
    // Seeding and inspection
    // ========================================================================

    pub fn seed_principal(&self, principal: Principal) {
        self.state().principals.insert(principal.id, principal);
    }

    pub fn principal(&self, id: &PrincipalId) -> Option<Principal> {
        self.state().principals.get(id).cloned()
    }

    /// Grant `permission` to `role`, creating both as active if unknown
    pub fn add_role_grant(&self, role: &str, permission: &str) {
        let mut state = self.state();
        state.roles.entry(role.to_string()).or_insert(true);
        state.permissions.entry(permission.to_string()).or_insert(true);
        state.grants.retain(|g| !(g.role == role && g.permission == permission));
        state.grants.push(Grant {
            role: role.to_string(),
            permission: permission.to_string(),
            is_granted: true,
        });
    }

    /// Keep the grant row but mark it not granted
    pub fn revoke_role_grant(&self, role: &str, permission: &str) {
        let mut state = self.state();
        for grant in state
            .grants
            .iter_mut()
            .filter(|g| g.role == role && g.permission == permission)
        {
            grant.is_granted = false;
        }
    }

    pub fn add_permission(&self, permission: &str) {
        self.state()
            .permissions
            .entry(permission.to_string())
            .or_insert(true);
    }

    pub fn set_permission_active(&self, permission: &str, active: bool) {
        self.state()
            .permissions
            .insert(permission.to_string(), active);
    }

    pub fn add_trusted_device(&self, device: TrustedDevice) {
        self.state().trusted_devices.push(device);
    }

    pub fn set_policy(&self, policy: PasswordPolicy) {
        self.state().policies.insert(policy.principal_kind, policy);
    }

    pub fn set_signup_limits(&self, limits: Option<SignupLimits>) {
        self.state().signup_limits = limits;
    }

    pub fn set_active_records(&self, resource: LastRecordResource, scope_id: uuid::Uuid, count: u64) {
        self.state().active_records.insert((resource, scope_id), count);
    }

    pub fn audit_entries(&self) -> Vec<PermissionAuditEntry> {
        self.state().audit.clone()
    }

    pub fn sessions_of(&self, principal_id: &PrincipalId) -> Vec<Session> {
        self.state()
            .sessions
            .iter()
            .filter(|s| s.principal_id == *principal_id)
            .cloned()
            .collect()
    }

    pub fn challenges_of(&self, principal_id: &PrincipalId) -> Vec<MfaChallenge> {
        self.state()
            .challenges
            .iter()
            .filter(|c| c.principal_id == *principal_id)
            .cloned()
            .collect()
    }

    pub fn login_failures(&self) -> Vec<LoginFailureRecord> {
        self.state().login_failures.clone()
    }

    pub fn history_len(&self, principal_id: &PrincipalId) -> usize {
        self.state()
            .history
            .iter()
            .filter(|h| h.principal_id == *principal_id)
            .count()
    }
}

impl PrincipalRepository for InMemoryAuthRepository {
    async fn insert_principal(&self, principal: &Principal) -> AuthResult<()> {
        let mut state = self.guard()?;
        let taken = state
            .principals
            .values()
            .any(|p| p.kind == principal.kind && p.email == principal.email);
        if taken {
            return Err(AuthError::EmailTaken);
        }
        state.principals.insert(principal.id, principal.clone());
        Ok(())
    }

    async fn find_principal(&self, id: &PrincipalId) -> AuthResult<Option<Principal>> {
        Ok(self.guard()?.principals.get(id).cloned())
    }

    async fn find_principal_by_email(
        &self,
        kind: PrincipalKind,
        email: &Email,
    ) -> AuthResult<Option<Principal>> {
        Ok(self
            .guard()?
            .principals
            .values()
            .find(|p| p.kind == kind && p.email == *email)
            .cloned())
    }

    async fn update_principal(&self, id: &PrincipalId, patch: &PrincipalPatch) -> AuthResult<bool> {
        let mut state = self.guard()?;
        match state.principals.get_mut(id) {
            Some(principal) => {
                patch.apply_to(principal, Utc::now());
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

impl SessionRepository for InMemoryAuthRepository {
    async fn insert_session(&self, session: &Session) -> AuthResult<()> {
        self.guard()?.sessions.push(session.clone());
        Ok(())
    }

    async fn count_live_sessions(
        &self,
        principal_id: &PrincipalId,
        now: DateTime<Utc>,
    ) -> AuthResult<u64> {
        Ok(self
            .guard()?
            .sessions
            .iter()
            .filter(|s| s.principal_id == *principal_id && s.is_live(now))
            .count() as u64)
    }

    async fn evict_oldest_session(
        &self,
        principal_id: &PrincipalId,
        now: DateTime<Utc>,
    ) -> AuthResult<Option<SessionId>> {
        let mut state = self.guard()?;
        let oldest = state
            .sessions
            .iter_mut()
            .filter(|s| s.principal_id == *principal_id && s.is_live(now))
            .min_by_key(|s| s.created_at);
        Ok(oldest.map(|session| {
            session.is_active = false;
            session.id
        }))
    }

    async fn touch_session(
        &self,
        token_digest: &[u8],
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> AuthResult<Option<Session>> {
        let mut state = self.guard()?;
        let session = state
            .sessions
            .iter_mut()
            .find(|s| s.token_digest == token_digest && s.is_live(now));
        Ok(session.map(|session| {
            session.last_activity = now;
            session.expires_at = expires_at;
            session.clone()
        }))
    }

    async fn end_session(&self, token_digest: &[u8]) -> AuthResult<Option<Session>> {
        let mut state = self.guard()?;
        let session = state
            .sessions
            .iter_mut()
            .find(|s| s.token_digest == token_digest && s.is_active);
        Ok(session.map(|session| {
            session.is_active = false;
            session.clone()
        }))
    }

    async fn end_all_sessions(
        &self,
        principal_id: &PrincipalId,
        except: Option<&SessionId>,
    ) -> AuthResult<u64> {
        let mut state = self.guard()?;
        let mut ended = 0;
        for session in state.sessions.iter_mut().filter(|s| {
            s.principal_id == *principal_id && s.is_active && except != Some(&s.id)
        }) {
            session.is_active = false;
            ended += 1;
        }
        Ok(ended)
    }

    async fn session_activity(
        &self,
        principal_ids: &[PrincipalId],
        now: DateTime<Utc>,
    ) -> AuthResult<HashMap<PrincipalId, SessionActivity>> {
        let state = self.guard()?;
        let mut activity: HashMap<PrincipalId, SessionActivity> = HashMap::new();
        for session in state
            .sessions
            .iter()
            .filter(|s| principal_ids.contains(&s.principal_id))
        {
            let entry = activity.entry(session.principal_id).or_default();
            if session.is_live(now) {
                entry.active_sessions += 1;
            }
            entry.last_activity = entry.last_activity.max(Some(session.last_activity));
        }
        Ok(activity)
    }

    async fn sweep_sessions(
        &self,
        now: DateTime<Utc>,
        purge_before: DateTime<Utc>,
    ) -> AuthResult<SweepOutcome> {
        let mut state = self.guard()?;
        let mut deactivated = 0;
        for session in state
            .sessions
            .iter_mut()
            .filter(|s| s.is_active && s.expires_at <= now)
        {
            session.is_active = false;
            deactivated += 1;
        }
        let before = state.sessions.len();
        state
            .sessions
            .retain(|s| s.is_active || s.last_activity >= purge_before);
        let purged = (before - state.sessions.len()) as u64;
        Ok(SweepOutcome {
            deactivated,
            purged,
        })
    }
}

impl MfaChallengeRepository for InMemoryAuthRepository {
    async fn replace_challenge(&self, challenge: &MfaChallenge) -> AuthResult<u64> {
        let mut state = self.guard()?;
        let before = state.challenges.len();
        state.challenges.retain(|c| {
            !(c.principal_id == challenge.principal_id
                && c.code_type == challenge.code_type
                && c.used_at.is_none())
        });
        let invalidated = (before - state.challenges.len()) as u64;
        state.challenges.push(challenge.clone());
        Ok(invalidated)
    }

    async fn find_challenge(
        &self,
        principal_id: &PrincipalId,
        code_type: MfaCodeType,
        code_digest: &str,
        now: DateTime<Utc>,
    ) -> AuthResult<Option<MfaChallenge>> {
        Ok(self
            .guard()?
            .challenges
            .iter()
            .filter(|c| {
                c.principal_id == *principal_id
                    && c.code_type == code_type
                    && c.code_digest == code_digest
                    && c.is_consumable(now)
            })
            .max_by_key(|c| c.created_at)
            .cloned())
    }

    async fn consume_challenge(
        &self,
        principal_id: &PrincipalId,
        code_type: MfaCodeType,
        code_digest: &str,
        now: DateTime<Utc>,
    ) -> AuthResult<Option<MfaChallenge>> {
        let mut state = self.guard()?;
        let challenge = state
            .challenges
            .iter_mut()
            .filter(|c| {
                c.principal_id == *principal_id
                    && c.code_type == code_type
                    && c.code_digest == code_digest
                    && c.is_consumable(now)
            })
            .max_by_key(|c| c.created_at);
        Ok(challenge.map(|challenge| {
            challenge.used_at = Some(now);
            challenge.clone()
        }))
    }

    async fn record_challenge_miss(
        &self,
        principal_id: &PrincipalId,
        code_type: MfaCodeType,
        now: DateTime<Utc>,
        max_attempts: u32,
    ) -> AuthResult<bool> {
        let mut state = self.guard()?;
        let mut burned = false;
        for challenge in state.challenges.iter_mut().filter(|c| {
            c.principal_id == *principal_id && c.code_type == code_type && c.is_consumable(now)
        }) {
            burned |= challenge.record_miss(now, max_attempts);
        }
        Ok(burned)
    }

    async fn find_trusted_device(
        &self,
        principal_id: &PrincipalId,
        kind: PrincipalKind,
        fingerprint_digest: &str,
    ) -> AuthResult<Option<TrustedDevice>> {
        Ok(self
            .guard()?
            .trusted_devices
            .iter()
            .find(|d| {
                d.principal_id == *principal_id
                    && d.principal_kind == kind
                    && d.fingerprint_digest == fingerprint_digest
            })
            .cloned())
    }

    async fn record_sms_delivery(&self, phone: &str, at: DateTime<Utc>) -> AuthResult<()> {
        self.guard()?.sms_deliveries.push((phone.to_string(), at));
        Ok(())
    }

    async fn count_sms_deliveries(&self, phone: &str, since: DateTime<Utc>) -> AuthResult<u64> {
        Ok(self
            .guard()?
            .sms_deliveries
            .iter()
            .filter(|(p, at)| p == phone && *at > since)
            .count() as u64)
    }
}

impl AccessRepository for InMemoryAuthRepository {
    async fn find_granting_role(
        &self,
        role_names: &[String],
        key: &str,
    ) -> AuthResult<Option<String>> {
        let state = self.guard()?;
        if !state.permissions.get(key).copied().unwrap_or(false) {
            return Ok(None);
        }
        let mut roles: Vec<&String> = state
            .grants
            .iter()
            .filter(|g| g.is_granted && g.permission == key && role_names.contains(&g.role))
            .filter(|g| state.roles.get(&g.role).copied().unwrap_or(false))
            .map(|g| &g.role)
            .collect();
        roles.sort();
        Ok(roles.first().map(|r| (*r).clone()))
    }

    async fn granted_permissions(&self, role_names: &[String]) -> AuthResult<Vec<String>> {
        let state = self.guard()?;
        let mut keys: Vec<String> = state
            .grants
            .iter()
            .filter(|g| g.is_granted && role_names.contains(&g.role))
            .filter(|g| state.roles.get(&g.role).copied().unwrap_or(false))
            .filter(|g| state.permissions.get(&g.permission).copied().unwrap_or(false))
            .map(|g| g.permission.clone())
            .collect();
        keys.sort();
        keys.dedup();
        Ok(keys)
    }

    async fn permission_catalog(&self) -> AuthResult<Vec<String>> {
        let state = self.guard()?;
        let mut keys: Vec<String> = state
            .permissions
            .iter()
            .filter(|(_, active)| **active)
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn append_audit(&self, entry: &PermissionAuditEntry) -> AuthResult<()> {
        if self.inner.fail_audit.load(Ordering::Acquire) {
            return Err(AuthError::Internal("audit log unavailable".into()));
        }
        self.guard()?.audit.push(entry.clone());
        Ok(())
    }

    async fn count_active_records(
        &self,
        resource: LastRecordResource,
        scope_id: &uuid::Uuid,
    ) -> AuthResult<u64> {
        Ok(self
            .guard()?
            .active_records
            .get(&(resource, *scope_id))
            .copied()
            .unwrap_or(0))
    }
}

impl PasswordPolicyRepository for InMemoryAuthRepository {
    async fn active_policy(&self, kind: PrincipalKind) -> AuthResult<Option<PasswordPolicy>> {
        Ok(self.guard()?.policies.get(&kind).cloned())
    }

    async fn append_password_history(
        &self,
        entry: &PasswordHistoryEntry,
        keep: u32,
    ) -> AuthResult<()> {
        let mut state = self.guard()?;
        state.history.push(entry.clone());

        let mut mine: Vec<usize> = state
            .history
            .iter()
            .enumerate()
            .filter(|(_, h)| h.principal_id == entry.principal_id)
            .map(|(i, _)| i)
            .collect();
        // Newest last in insertion order; drop everything before the last `keep`
        let excess = mine.len().saturating_sub(keep as usize);
        mine.truncate(excess);
        for index in mine.into_iter().rev() {
            state.history.remove(index);
        }
        Ok(())
    }

    async fn recent_password_hashes(
        &self,
        principal_id: &PrincipalId,
        limit: u32,
    ) -> AuthResult<Vec<PasswordHash>> {
        Ok(self
            .guard()?
            .history
            .iter()
            .rev()
            .filter(|h| h.principal_id == *principal_id)
            .take(limit as usize)
            .map(|h| h.password_hash.clone())
            .collect())
    }
}

impl AbuseLogRepository for InMemoryAuthRepository {
    async fn record_login_failure(&self, record: &LoginFailureRecord) -> AuthResult<()> {
        self.guard()?.login_failures.push(record.clone());
        Ok(())
    }

    async fn count_login_failures_from_ip(&self, ip: &str, since: DateTime<Utc>) -> AuthResult<u64> {
        Ok(self
            .guard()?
            .login_failures
            .iter()
            .filter(|r| r.ip_address == ip && r.attempted_at > since)
            .count() as u64)
    }

    async fn record_signup_attempt(&self, record: &SignupAttemptRecord) -> AuthResult<()> {
        self.guard()?.signup_attempts.push(record.clone());
        Ok(())
    }

    async fn count_signup_attempts(&self, ip: &str, day: NaiveDate) -> AuthResult<u64> {
        Ok(self
            .guard()?
            .signup_attempts
            .iter()
            .filter(|r| r.ip_address == ip && r.day == day)
            .count() as u64)
    }

    async fn signup_limits(&self) -> AuthResult<Option<SignupLimits>> {
        Ok(self.guard()?.signup_limits)
    }
}
