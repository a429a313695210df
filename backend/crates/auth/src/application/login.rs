//! Login Orchestrator
//!
//! Composes the credential verifier, abuse detector, MFA manager, session
//! manager and password policy into the boundary operations: login, MFA
//! verification, logout, session validation, password recovery and change,
//! and client signup.
//!
//! Every credential failure leaves here as the same `InvalidCredentials`.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use kernel::id::{PrincipalId, SessionId};
use platform::client::ClientContext;
use platform::clock::Clock;
use platform::password::Argon2Hasher;
use platform::rate_limit::SlidingWindowStore;

use crate::application::abuse_detector::AbuseDetector;
use crate::application::config::AuthConfig;
use crate::application::credential_verifier::{Authentication, CredentialVerifier};
use crate::application::delivery::{DeliveryChannels, DeliveryService};
use crate::application::events::{AuthEvent, EventBroadcaster};
use crate::application::mfa::MfaChallengeManager;
use crate::application::password_policy::PasswordPolicyService;
use crate::application::session_manager::{IssuedSession, SessionManager};
use crate::domain::entity::password_policy::ExpirationInfo;
use crate::domain::entity::principal::Principal;
use crate::domain::entity::session::Session;
use crate::domain::patch::PrincipalPatch;
use crate::domain::policy::{IdentityHints, PolicyEvaluation};
use crate::domain::repository::AuthStore;
use crate::domain::value_object::{
    email::Email,
    mfa_code::MfaCodeType,
    password::{PasswordHash, RawPassword},
    principal_kind::PrincipalKind,
};
use crate::error::{AuthError, AuthResult};

/// Login input
#[derive(Debug, Clone)]
pub struct LoginInput {
    pub kind: PrincipalKind,
    pub identity: String,
    pub secret: String,
    pub channels: DeliveryChannels,
    pub client: ClientContext,
}

/// A completed login
#[derive(Debug)]
pub struct AuthenticatedLogin {
    pub principal_id: PrincipalId,
    pub kind: PrincipalKind,
    pub issued: IssuedSession,
    pub expiration: ExpirationInfo,
}

#[derive(Debug)]
pub enum LoginOutcome {
    Authenticated(Box<AuthenticatedLogin>),
    /// A code was sent; the login completes through `verify_mfa`
    MfaRequired {
        channels: DeliveryChannels,
        expires_at: DateTime<Utc>,
    },
}

/// Client self-service signup input
#[derive(Debug, Clone)]
pub struct SignUpInput {
    pub email: String,
    pub secret: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub phone: Option<String>,
    pub client: ClientContext,
}

#[derive(Debug, Clone)]
pub struct SignUpOutcome {
    pub principal_id: PrincipalId,
    /// False when the account exists but the confirmation code did not go out
    pub verification_sent: bool,
}

pub struct LoginOrchestrator<R, W, D> {
    store: Arc<R>,
    clock: Arc<dyn Clock>,
    config: Arc<AuthConfig>,
    events: Arc<dyn EventBroadcaster>,
    hasher: Arc<Argon2Hasher>,
    credentials: CredentialVerifier<R>,
    abuse: AbuseDetector<W, R>,
    mfa: Arc<MfaChallengeManager<R, D>>,
    sessions: SessionManager<R>,
    policy: PasswordPolicyService<R>,
}

impl<R, W, D> LoginOrchestrator<R, W, D>
where
    R: AuthStore,
    W: SlidingWindowStore + Send + Sync + 'static,
    D: DeliveryService + Send + Sync + 'static,
{
    pub fn new(
        store: Arc<R>,
        window: Arc<W>,
        delivery: Arc<D>,
        clock: Arc<dyn Clock>,
        events: Arc<dyn EventBroadcaster>,
        config: AuthConfig,
    ) -> AuthResult<Self> {
        let hasher = Arc::new(Argon2Hasher::new(config.argon2, config.password_pepper.clone())?);
        let config = Arc::new(config);

        Ok(Self {
            credentials: CredentialVerifier::new(store.clone(), hasher.clone()),
            abuse: AbuseDetector::new(
                window,
                store.clone(),
                clock.clone(),
                config.rate_limit.clone(),
                config.signup.clone(),
            ),
            mfa: Arc::new(MfaChallengeManager::new(
                store.clone(),
                delivery,
                clock.clone(),
                config.mfa.clone(),
            )),
            sessions: SessionManager::new(
                store.clone(),
                clock.clone(),
                config.session.clone(),
                events.clone(),
            ),
            policy: PasswordPolicyService::new(store.clone(), hasher.clone(), clock.clone()),
            store,
            clock,
            config,
            events,
            hasher,
        })
    }

    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    pub fn sessions(&self) -> &SessionManager<R> {
        &self.sessions
    }

    pub fn password_policy(&self) -> &PasswordPolicyService<R> {
        &self.policy
    }

    pub fn mfa(&self) -> &MfaChallengeManager<R, D> {
        &self.mfa
    }

    pub fn abuse(&self) -> &AbuseDetector<W, R> {
        &self.abuse
    }

    // ========================================================================
    // Login
    // ========================================================================

    pub async fn login(&self, input: LoginInput) -> AuthResult<LoginOutcome> {
        let ip = input.client.ip_key();
        self.abuse
            .check_login(&ip, &input.identity, input.kind)
            .await
            .into_result()?;

        let principal = match self
            .credentials
            .authenticate(input.kind, &input.identity, &input.secret)
            .await?
        {
            Authentication::Verified(principal) => principal,
            Authentication::Rejected(reason) => {
                tracing::warn!(
                    ip = %ip,
                    kind = %input.kind,
                    reason = reason.as_str(),
                    "Login rejected"
                );
                self.abuse
                    .record_login_failure(&ip, &input.identity, input.kind, reason.as_str())
                    .await;
                self.events.emit(AuthEvent::LoginFailed {
                    kind: input.kind,
                    ip: input.client.ip_string(),
                });
                return Err(AuthError::InvalidCredentials);
            }
        };

        self.abuse
            .record_login_success(&ip, &input.identity, input.kind)
            .await;

        if self.mfa_required(&principal, &input.client).await {
            let issued = self
                .mfa
                .issue(
                    &principal.id,
                    &principal.email,
                    MfaCodeType::Login,
                    principal.phone.clone(),
                )
                .await?;
            self.mfa.deliver(&issued, input.channels).await?;

            tracing::info!(principal_id = %principal.id, "Login awaiting verification code");
            return Ok(LoginOutcome::MfaRequired {
                channels: input.channels,
                expires_at: issued.challenge.expires_at,
            });
        }

        let login = self.complete_login(&principal, &input.client).await?;
        Ok(LoginOutcome::Authenticated(Box::new(login)))
    }

    /// A valid trusted device skips the challenge
    async fn mfa_required(&self, principal: &Principal, client: &ClientContext) -> bool {
        if !self.config.mfa.required_for(principal.kind) {
            return false;
        }
        match client.device_fingerprint.as_deref() {
            Some(fingerprint) => {
                !self
                    .mfa
                    .check_trusted_device(&principal.id, principal.kind, fingerprint)
                    .await
            }
            None => true,
        }
    }

    /// Consume a login code and open the session
    pub async fn verify_mfa(
        &self,
        kind: PrincipalKind,
        identity: &str,
        code: &str,
        client: &ClientContext,
    ) -> AuthResult<AuthenticatedLogin> {
        let ip = client.ip_key();
        self.abuse
            .check_login(&ip, identity, kind)
            .await
            .into_result()?;

        let Some(principal) = self.code_holder(kind, identity).await? else {
            return Err(self.code_failure(&ip, identity, kind, AuthError::InvalidCode).await);
        };
        if let Err(e) = self.mfa.verify(&principal.id, code, MfaCodeType::Login).await {
            return Err(self.code_failure(&ip, identity, kind, e).await);
        }

        if principal.login_eligibility().is_err() {
            return Err(AuthError::InvalidCredentials);
        }
        self.complete_login(&principal, client).await
    }

    /// The principal a code of this kind would have been issued to
    async fn code_holder(&self, kind: PrincipalKind, identity: &str) -> AuthResult<Option<Principal>> {
        let Ok(email) = Email::new(identity) else {
            return Ok(None);
        };
        self.store.find_principal_by_email(kind, &email).await
    }

    /// Wrong codes count against the same windows as wrong passwords
    async fn code_failure(
        &self,
        ip: &str,
        identity: &str,
        kind: PrincipalKind,
        error: AuthError,
    ) -> AuthError {
        if matches!(error, AuthError::InvalidCode) {
            tracing::warn!(ip = %ip, kind = %kind, "Verification code rejected");
            self.abuse
                .record_login_failure(ip, identity, kind, "invalid_code")
                .await;
        }
        error
    }

    async fn complete_login(
        &self,
        principal: &Principal,
        client: &ClientContext,
    ) -> AuthResult<AuthenticatedLogin> {
        let issued = self
            .sessions
            .create(&principal.id, &principal.email, client)
            .await?;

        let patch = PrincipalPatch::new().last_login_at(self.clock.now());
        if let Err(e) = self.store.update_principal(&principal.id, &patch).await {
            tracing::warn!(principal_id = %principal.id, error = %e, "Failed to record last login");
        }

        let expiration = self.policy.expiration_for(principal).await;

        tracing::info!(
            principal_id = %principal.id,
            kind = %principal.kind,
            session_id = %issued.session.id,
            "Login succeeded"
        );
        self.events.emit(AuthEvent::Login {
            principal_id: principal.id,
            kind: principal.kind,
            ip: client.ip_string(),
        });

        Ok(AuthenticatedLogin {
            principal_id: principal.id,
            kind: principal.kind,
            issued,
            expiration,
        })
    }

    // ========================================================================
    // Sessions
    // ========================================================================

    pub async fn logout(&self, raw_token: &str) -> AuthResult<()> {
        let session = self
            .sessions
            .end(raw_token)
            .await?
            .ok_or(AuthError::SessionAlreadyEnded)?;

        tracing::info!(principal_id = %session.principal_id, session_id = %session.id, "Logout");
        self.events.emit(AuthEvent::Logout {
            principal_id: session.principal_id,
        });
        Ok(())
    }

    /// Live session behind the token, with its expiry slid forward
    pub async fn validate_session(&self, raw_token: &str) -> AuthResult<Session> {
        self.sessions
            .validate(raw_token)
            .await?
            .ok_or(AuthError::SessionInvalid)
    }

    /// Force-logout every session of a principal
    pub async fn revoke_sessions(&self, principal_id: &PrincipalId) -> AuthResult<u64> {
        self.sessions.end_all(principal_id, None).await
    }

    // ========================================================================
    // Password recovery and change
    // ========================================================================

    /// Issue a reset code when the account exists. The result never reveals
    /// whether it does: lookup and delivery run after the response.
    pub async fn forgot_password(
        &self,
        kind: PrincipalKind,
        identity: &str,
        channels: DeliveryChannels,
        client: &ClientContext,
    ) -> AuthResult<()> {
        self.abuse
            .check_password_reset(&client.ip_key())
            .await
            .into_result()?;

        let Ok(email) = Email::new(identity) else {
            return Ok(());
        };

        let store = self.store.clone();
        let mfa = self.mfa.clone();
        tokio::spawn(async move {
            Self::send_reset_code(&store, &mfa, kind, email, channels).await;
        });
        Ok(())
    }

    async fn send_reset_code(
        store: &R,
        mfa: &MfaChallengeManager<R, D>,
        kind: PrincipalKind,
        email: Email,
        channels: DeliveryChannels,
    ) {
        let principal = match store.find_principal_by_email(kind, &email).await {
            Ok(Some(principal)) if principal.status.can_login() => principal,
            Ok(_) => {
                tracing::debug!(kind = %kind, "Password reset for unknown or inactive account");
                return;
            }
            Err(e) => {
                tracing::error!(error = %e, "Password reset lookup failed");
                return;
            }
        };

        let result = match mfa
            .issue(&principal.id, &email, MfaCodeType::Reset, principal.phone.clone())
            .await
        {
            Ok(issued) => mfa.deliver(&issued, channels).await,
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            tracing::warn!(principal_id = %principal.id, error = %e, "Password reset code not sent");
        }
    }

    /// Set a new password with a reset code. The code is matched first and
    /// only consumed once the new password passes the policy, so a rejected
    /// password leaves it usable. Unknown accounts fail like wrong codes.
    pub async fn reset_password(
        &self,
        kind: PrincipalKind,
        identity: &str,
        code: &str,
        new_secret: &str,
        client: &ClientContext,
    ) -> AuthResult<()> {
        let ip = client.ip_key();
        self.abuse
            .check_login(&ip, identity, kind)
            .await
            .into_result()?;

        let new_secret = RawPassword::new(new_secret.to_string())?;

        let Some(principal) = self.code_holder(kind, identity).await? else {
            return Err(self.code_failure(&ip, identity, kind, AuthError::InvalidCode).await);
        };
        if let Err(e) = self.mfa.check(&principal.id, code, MfaCodeType::Reset).await {
            return Err(self.code_failure(&ip, identity, kind, e).await);
        }

        self.policy
            .enforce(&new_secret, kind, &Self::hints_for(&principal))
            .await?;
        if self
            .policy
            .was_used_recently(&principal.id, kind, &new_secret)
            .await
        {
            return Err(AuthError::PasswordReused);
        }

        if let Err(e) = self.mfa.verify(&principal.id, code, MfaCodeType::Reset).await {
            return Err(self.code_failure(&ip, identity, kind, e).await);
        }

        self.store_new_password(&principal, &new_secret).await?;
        self.sessions.end_all(&principal.id, None).await?;
        self.abuse.record_login_success(&ip, identity, kind).await;

        tracing::info!(principal_id = %principal.id, "Password reset");
        self.events.emit(AuthEvent::PasswordReset {
            principal_id: principal.id,
        });
        Ok(())
    }

    /// Change the password of a signed-in principal. Every other session ends.
    pub async fn change_password(
        &self,
        principal_id: &PrincipalId,
        current_session: &SessionId,
        current_secret: &str,
        new_secret: &str,
    ) -> AuthResult<()> {
        let principal = self
            .store
            .find_principal(principal_id)
            .await?
            .ok_or(AuthError::SessionInvalid)?;

        let current =
            RawPassword::new(current_secret.to_string()).map_err(|_| AuthError::IncorrectCurrentPassword)?;
        if !self.credentials.verify_secret(&principal, &current) {
            tracing::warn!(principal_id = %principal.id, "Password change with wrong current password");
            return Err(AuthError::IncorrectCurrentPassword);
        }

        let new_secret = RawPassword::new(new_secret.to_string())?;
        self.policy
            .enforce(&new_secret, principal.kind, &Self::hints_for(&principal))
            .await?;
        if self
            .policy
            .was_used_recently(&principal.id, principal.kind, &new_secret)
            .await
        {
            return Err(AuthError::PasswordReused);
        }

        self.store_new_password(&principal, &new_secret).await?;
        self.sessions
            .end_all(&principal.id, Some(current_session))
            .await?;

        tracing::info!(principal_id = %principal.id, "Password changed");
        self.events.emit(AuthEvent::PasswordChanged {
            principal_id: principal.id,
        });
        Ok(())
    }

    async fn store_new_password(&self, principal: &Principal, secret: &RawPassword) -> AuthResult<()> {
        let hash = PasswordHash::from_raw(secret, &self.hasher)?;
        let patch = PrincipalPatch::new()
            .password_hash(&hash)
            .password_changed_at(self.clock.now())
            .password_expires_at(None)
            .force_password_change(false);
        if !self.store.update_principal(&principal.id, &patch).await? {
            return Err(AuthError::NotFound("Principal"));
        }

        if let Err(e) = self
            .policy
            .record_used(&principal.id, principal.kind, &hash)
            .await
        {
            tracing::warn!(principal_id = %principal.id, error = %e, "Failed to record password history");
        }
        Ok(())
    }

    fn hints_for(principal: &Principal) -> IdentityHints {
        IdentityHints::new(
            principal.first_name.clone(),
            principal.last_name.clone(),
            Some(principal.email.clone()),
        )
    }

    pub async fn password_expiration(&self, principal_id: &PrincipalId) -> AuthResult<ExpirationInfo> {
        self.policy.expiration_info(principal_id).await
    }

    /// Policy feedback and strength for a candidate, nothing stored
    pub async fn validate_password(
        &self,
        kind: PrincipalKind,
        secret: &str,
        hints: &IdentityHints,
    ) -> AuthResult<PolicyEvaluation> {
        let secret = RawPassword::new(secret.to_string())?;
        Ok(self.policy.validate(&secret, kind, hints).await)
    }

    // ========================================================================
    // Signup
    // ========================================================================

    pub async fn sign_up(&self, input: SignUpInput) -> AuthResult<SignUpOutcome> {
        self.abuse
            .check_signup(&input.client.ip_key())
            .await
            .into_result()?;

        let email = Email::new(&input.email)?;
        if self
            .store
            .find_principal_by_email(PrincipalKind::Client, &email)
            .await?
            .is_some()
        {
            return Err(AuthError::EmailTaken);
        }

        let secret = RawPassword::new(input.secret)?;
        let hints = IdentityHints::new(
            input.first_name.clone(),
            input.last_name.clone(),
            Some(email.clone()),
        );
        self.policy
            .enforce(&secret, PrincipalKind::Client, &hints)
            .await?;

        let hash = PasswordHash::from_raw(&secret, &self.hasher)?;
        let principal = Principal::new_client(
            email.clone(),
            hash.clone(),
            self.config.signup.default_client_role.clone(),
            input.first_name,
            input.last_name,
            input.phone,
            self.clock.now(),
        );
        self.store.insert_principal(&principal).await?;

        if let Err(e) = self
            .policy
            .record_used(&principal.id, PrincipalKind::Client, &hash)
            .await
        {
            tracing::warn!(principal_id = %principal.id, error = %e, "Failed to record password history");
        }

        let verification = match self
            .mfa
            .issue(&principal.id, &email, MfaCodeType::EmailVerification, None)
            .await
        {
            Ok(issued) => self.mfa.deliver(&issued, DeliveryChannels::Email).await,
            Err(e) => Err(e),
        };
        let verification_sent = match verification {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(principal_id = %principal.id, error = %e, "Confirmation code not sent");
                false
            }
        };

        tracing::info!(principal_id = %principal.id, "Client signed up");
        self.events.emit(AuthEvent::Signup {
            principal_id: principal.id,
        });
        Ok(SignUpOutcome {
            principal_id: principal.id,
            verification_sent,
        })
    }

    /// Consume an email-verification code and mark the address verified
    pub async fn confirm_email(&self, identity: &str, code: &str, client: &ClientContext) -> AuthResult<()> {
        let kind = PrincipalKind::Client;
        let ip = client.ip_key();
        self.abuse
            .check_login(&ip, identity, kind)
            .await
            .into_result()?;

        let Some(principal) = self.code_holder(kind, identity).await? else {
            return Err(self.code_failure(&ip, identity, kind, AuthError::InvalidCode).await);
        };
        if let Err(e) = self
            .mfa
            .verify(&principal.id, code, MfaCodeType::EmailVerification)
            .await
        {
            return Err(self.code_failure(&ip, identity, kind, e).await);
        }

        let patch = PrincipalPatch::new().email_verified(true);
        if !self.store.update_principal(&principal.id, &patch).await? {
            return Err(AuthError::InvalidCode);
        }

        tracing::info!(principal_id = %principal.id, "Email confirmed");
        self.events.emit(AuthEvent::EmailConfirmed {
            principal_id: principal.id,
        });
        Ok(())
    }
}
