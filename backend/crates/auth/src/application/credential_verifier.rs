//! Credential Verifier
//!
//! Every rejection path performs exactly one Argon2 verification (a real one
//! or a dummy one against a reference hash) and yields the same
//! undifferentiated outcome. The reason is only for logs and abuse records.

use std::sync::Arc;

use platform::password::Argon2Hasher;

use crate::domain::entity::principal::{Ineligibility, Principal};
use crate::domain::patch::PrincipalPatch;
use crate::domain::repository::PrincipalRepository;
use crate::domain::value_object::{
    email::Email,
    password::{PasswordHash, RawPassword},
    principal_kind::PrincipalKind,
};
use crate::error::AuthResult;

/// Internal cause of a rejected login
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthFailureReason {
    NoAccount,
    MalformedSecret,
    WrongSecret,
    Unverified,
    Suspended,
    Terminated,
}

impl AuthFailureReason {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::NoAccount => "no_account",
            Self::MalformedSecret => "malformed_secret",
            Self::WrongSecret => "wrong_secret",
            Self::Unverified => "unverified",
            Self::Suspended => "suspended",
            Self::Terminated => "terminated",
        }
    }
}

impl From<Ineligibility> for AuthFailureReason {
    fn from(value: Ineligibility) -> Self {
        match value {
            Ineligibility::Unverified => Self::Unverified,
            Ineligibility::Suspended => Self::Suspended,
            Ineligibility::Terminated => Self::Terminated,
        }
    }
}

#[derive(Debug)]
pub enum Authentication {
    Verified(Box<Principal>),
    Rejected(AuthFailureReason),
}

pub struct CredentialVerifier<R> {
    repo: Arc<R>,
    hasher: Arc<Argon2Hasher>,
}

impl<R> CredentialVerifier<R>
where
    R: PrincipalRepository + Send + Sync,
{
    pub fn new(repo: Arc<R>, hasher: Arc<Argon2Hasher>) -> Self {
        Self { repo, hasher }
    }

    pub async fn authenticate(
        &self,
        kind: PrincipalKind,
        identity: &str,
        secret: &str,
    ) -> AuthResult<Authentication> {
        let Ok(secret) = RawPassword::new(secret.to_string()) else {
            self.burn_placeholder();
            return Ok(Authentication::Rejected(AuthFailureReason::MalformedSecret));
        };

        let Ok(email) = Email::new(identity) else {
            self.hasher.dummy_verify(secret.inner());
            return Ok(Authentication::Rejected(AuthFailureReason::NoAccount));
        };

        let Some(principal) = self.repo.find_principal_by_email(kind, &email).await? else {
            self.hasher.dummy_verify(secret.inner());
            return Ok(Authentication::Rejected(AuthFailureReason::NoAccount));
        };

        if let Err(ineligible) = principal.login_eligibility() {
            self.hasher.dummy_verify(secret.inner());
            return Ok(Authentication::Rejected(ineligible.into()));
        }

        if !principal.password_hash.verify(&secret, &self.hasher) {
            return Ok(Authentication::Rejected(AuthFailureReason::WrongSecret));
        }

        self.upgrade_hash(&principal, &secret).await;
        Ok(Authentication::Verified(Box::new(principal)))
    }

    /// Check the current secret of a known principal (password change)
    pub fn verify_secret(&self, principal: &Principal, secret: &RawPassword) -> bool {
        principal.password_hash.verify(secret, &self.hasher)
    }

    /// Dummy comparison for input that never reached a real one
    fn burn_placeholder(&self) {
        if let Ok(placeholder) = RawPassword::new("placeholder-secret".to_string()) {
            self.hasher.dummy_verify(placeholder.inner());
        }
    }

    /// Re-hash with current parameters after a successful verification
    async fn upgrade_hash(&self, principal: &Principal, secret: &RawPassword) {
        if !principal.password_hash.needs_rehash(&self.hasher) {
            return;
        }
        let result = match PasswordHash::from_raw(secret, &self.hasher) {
            Ok(hash) => {
                let patch = PrincipalPatch::new().password_hash(&hash);
                self.repo.update_principal(&principal.id, &patch).await.map(|_| ())
            }
            Err(e) => Err(e),
        };
        match result {
            Ok(()) => tracing::info!(principal_id = %principal.id, "Password hash upgraded"),
            Err(e) => tracing::warn!(
                principal_id = %principal.id,
                error = %e,
                "Password hash upgrade failed"
            ),
        }
    }
}
