//! Password Policy Service
//!
//! Loads the active policy per principal kind (falling back to a safe
//! default), evaluates candidates, keeps rotation history and reports
//! expiry.

use std::sync::Arc;

use kernel::id::PrincipalId;
use platform::clock::Clock;
use platform::password::Argon2Hasher;

use crate::domain::entity::password_policy::{ExpirationInfo, PasswordHistoryEntry, PasswordPolicy};
use crate::domain::entity::principal::Principal;
use crate::domain::policy::{self, IdentityHints, PolicyEvaluation};
use crate::domain::repository::{PasswordPolicyRepository, PrincipalRepository};
use crate::domain::value_object::{
    password::{PasswordHash, RawPassword},
    principal_kind::PrincipalKind,
};
use crate::error::{AuthError, AuthResult};

pub struct PasswordPolicyService<R> {
    repo: Arc<R>,
    hasher: Arc<Argon2Hasher>,
    clock: Arc<dyn Clock>,
}

impl<R> PasswordPolicyService<R>
where
    R: PasswordPolicyRepository + PrincipalRepository + Send + Sync,
{
    pub fn new(repo: Arc<R>, hasher: Arc<Argon2Hasher>, clock: Arc<dyn Clock>) -> Self {
        Self {
            repo,
            hasher,
            clock,
        }
    }

    /// Active policy, or the safe default when none is configured or the
    /// lookup fails. Authentication is never blocked on configuration.
    pub async fn policy_for(&self, kind: PrincipalKind) -> PasswordPolicy {
        match self.repo.active_policy(kind).await {
            Ok(Some(policy)) => policy,
            Ok(None) => {
                tracing::debug!(kind = %kind, "No active password policy, using default");
                PasswordPolicy::safe_default(kind)
            }
            Err(e) => {
                tracing::warn!(kind = %kind, error = %e, "Password policy lookup failed, using default");
                PasswordPolicy::safe_default(kind)
            }
        }
    }

    pub async fn validate(
        &self,
        password: &RawPassword,
        kind: PrincipalKind,
        hints: &IdentityHints,
    ) -> PolicyEvaluation {
        let policy = self.policy_for(kind).await;
        policy::evaluate(&policy, password.expose_secret(), hints)
    }

    /// Evaluate and turn violations into `PasswordPolicy` errors
    pub async fn enforce(
        &self,
        password: &RawPassword,
        kind: PrincipalKind,
        hints: &IdentityHints,
    ) -> AuthResult<PolicyEvaluation> {
        let evaluation = self.validate(password, kind, hints).await;
        if evaluation.is_valid {
            Ok(evaluation)
        } else {
            Err(AuthError::PasswordPolicy {
                feedback: evaluation.feedback,
            })
        }
    }

    /// Append to history and prune. No-op when history is disabled.
    pub async fn record_used(
        &self,
        principal_id: &PrincipalId,
        kind: PrincipalKind,
        hash: &PasswordHash,
    ) -> AuthResult<()> {
        let policy = self.policy_for(kind).await;
        if !policy.history_enabled() {
            return Ok(());
        }

        let entry = PasswordHistoryEntry {
            principal_id: *principal_id,
            password_hash: hash.clone(),
            created_at: self.clock.now(),
        };
        self.repo
            .append_password_history(&entry, policy.history_count)
            .await
    }

    /// True when `candidate` matches one of the last `history_count`
    /// passwords. Salted hashes cannot be compared with each other, so the
    /// candidate is verified against each stored hash. Allows on failure.
    pub async fn was_used_recently(
        &self,
        principal_id: &PrincipalId,
        kind: PrincipalKind,
        candidate: &RawPassword,
    ) -> bool {
        let policy = self.policy_for(kind).await;
        if !policy.history_enabled() {
            return false;
        }

        let hashes = match self
            .repo
            .recent_password_hashes(principal_id, policy.history_count)
            .await
        {
            Ok(hashes) => hashes,
            Err(e) => {
                tracing::warn!(
                    principal_id = %principal_id,
                    error = %e,
                    "Password history lookup failed, allowing"
                );
                return false;
            }
        };

        hashes
            .iter()
            .any(|hash| hash.verify(candidate, &self.hasher))
    }

    pub async fn expiration_info(&self, principal_id: &PrincipalId) -> AuthResult<ExpirationInfo> {
        let principal = self
            .repo
            .find_principal(principal_id)
            .await?
            .ok_or(AuthError::NotFound("Principal"))?;
        Ok(self.expiration_for(&principal).await)
    }

    pub async fn expiration_for(&self, principal: &Principal) -> ExpirationInfo {
        let policy = self.policy_for(principal.kind).await;
        ExpirationInfo::derive(
            principal.password_changed_at,
            principal.password_expires_at,
            policy.expiration_days,
            principal.force_password_change,
            self.clock.now(),
        )
    }
}
