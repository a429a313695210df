//! MFA Challenge Manager
//!
//! Issues single-use numeric codes, delivers them over email/SMS and
//! consumes them. Codes belong to one principal and survive a fixed number
//! of wrong guesses. Trusted devices let the login flow skip the challenge.
//!
//! Store failures while issuing surface as `ChallengeUnavailable` (the code
//! was not issued, retry); delivery failures surface as `DeliveryFailed`.

use std::sync::Arc;

use chrono::Duration;
use kernel::id::PrincipalId;
use platform::clock::Clock;

use crate::application::config::MfaSettings;
use crate::application::delivery::{
    DeliveryChannel, DeliveryChannels, DeliveryMessage, DeliveryService,
};
use crate::domain::entity::abuse::LimitReason;
use crate::domain::entity::mfa_challenge::MfaChallenge;
use crate::domain::entity::trusted_device::TrustedDevice;
use crate::domain::repository::MfaChallengeRepository;
use crate::domain::value_object::{
    email::Email,
    mfa_code::{MfaCode, MfaCodeType},
    principal_kind::PrincipalKind,
};
use crate::error::{AuthError, AuthResult};

/// A stored challenge plus its clear-text code, held until delivery
#[derive(Debug)]
pub struct IssuedChallenge {
    pub challenge: MfaChallenge,
    pub code: MfaCode,
}

pub struct MfaChallengeManager<R, D> {
    repo: Arc<R>,
    delivery: Arc<D>,
    clock: Arc<dyn Clock>,
    settings: MfaSettings,
}

impl<R, D> MfaChallengeManager<R, D>
where
    R: MfaChallengeRepository + Send + Sync,
    D: DeliveryService + Send + Sync,
{
    pub fn new(repo: Arc<R>, delivery: Arc<D>, clock: Arc<dyn Clock>, settings: MfaSettings) -> Self {
        Self {
            repo,
            delivery,
            clock,
            settings,
        }
    }

    pub fn settings(&self) -> &MfaSettings {
        &self.settings
    }

    /// Generate and store a code, replacing any unused code of the same type
    pub async fn issue(
        &self,
        principal_id: &PrincipalId,
        email: &Email,
        code_type: MfaCodeType,
        delivery_phone: Option<String>,
    ) -> AuthResult<IssuedChallenge> {
        let code = MfaCode::generate(self.settings.code_length);
        let ttl = Duration::from_std(self.settings.ttl_for(code_type))
            .map_err(|e| AuthError::Internal(e.to_string()))?;
        let challenge = MfaChallenge::new(
            *principal_id,
            email.clone(),
            &code,
            code_type,
            delivery_phone,
            self.clock.now(),
            ttl,
        );

        match self.repo.replace_challenge(&challenge).await {
            Ok(replaced) => {
                tracing::debug!(
                    principal_id = %principal_id,
                    code_type = %code_type,
                    replaced,
                    "Verification code issued"
                );
                Ok(IssuedChallenge { challenge, code })
            }
            Err(e) => {
                tracing::error!(
                    principal_id = %principal_id,
                    error = %e,
                    "Failed to store verification code"
                );
                Err(AuthError::ChallengeUnavailable)
            }
        }
    }

    /// Send the code. SMS quota is checked before anything is sent; a
    /// refused delivery leaves the stored code untouched.
    pub async fn deliver(&self, issued: &IssuedChallenge, channels: DeliveryChannels) -> AuthResult<()> {
        let phone = if channels.includes_sms() {
            let phone = issued
                .challenge
                .delivery_phone
                .clone()
                .ok_or_else(|| AuthError::Validation("No phone number on file".into()))?;
            self.check_sms_quota(&phone).await?;
            Some(phone)
        } else {
            None
        };

        let subject = format!("Your {} code", issued.challenge.code_type.purpose());
        let minutes = self.settings.ttl_for(issued.challenge.code_type).as_secs() / 60;
        let body = format!(
            "Your {} code is {}. It expires in {} minutes.",
            issued.challenge.code_type.purpose(),
            issued.code.as_str(),
            minutes
        );

        if channels.includes_email() {
            self.send(DeliveryMessage {
                channel: DeliveryChannel::Email,
                recipient: issued.challenge.email.as_str().to_string(),
                subject: subject.clone(),
                body: body.clone(),
            })
            .await?;
        }

        if let Some(phone) = phone {
            self.send(DeliveryMessage {
                channel: DeliveryChannel::Sms,
                recipient: phone.clone(),
                subject,
                body,
            })
            .await?;
            if let Err(e) = self.repo.record_sms_delivery(&phone, self.clock.now()).await {
                tracing::warn!(error = %e, "Failed to record SMS delivery");
            }
        }

        Ok(())
    }

    async fn send(&self, message: DeliveryMessage) -> AuthResult<()> {
        match self.delivery.send(&message).await {
            Ok(outcome) if outcome.sent => Ok(()),
            Ok(_) => {
                tracing::error!(channel = message.channel.code(), "Delivery not sent");
                Err(AuthError::DeliveryFailed)
            }
            Err(e) => {
                tracing::error!(channel = message.channel.code(), error = %e, "Delivery failed");
                Err(AuthError::DeliveryFailed)
            }
        }
    }

    /// Per-phone hourly and daily caps. Fails open like the other limiters.
    async fn check_sms_quota(&self, phone: &str) -> AuthResult<()> {
        let now = self.clock.now();
        let windows = [
            (Duration::hours(1), self.settings.sms_per_hour),
            (Duration::days(1), self.settings.sms_per_day),
        ];

        for (window, cap) in windows {
            match self.repo.count_sms_deliveries(phone, now - window).await {
                Ok(sent) if sent >= cap => {
                    tracing::warn!(cap, "SMS quota exceeded");
                    return Err(AuthError::RateLimited {
                        reason: LimitReason::SmsRateLimit,
                        retry_after_secs: window.num_seconds() as u64,
                    });
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(error = %e, "SMS quota check failed, allowing");
                    return Ok(());
                }
            }
        }
        Ok(())
    }

    /// Match the principal's live code of `code_type` without consuming it.
    /// A miss counts against the code's attempt budget.
    pub async fn check(
        &self,
        principal_id: &PrincipalId,
        code: &str,
        code_type: MfaCodeType,
    ) -> AuthResult<MfaChallenge> {
        let Some(code) = MfaCode::parse(code, self.settings.code_length) else {
            return self.miss(principal_id, code_type).await;
        };

        match self
            .repo
            .find_challenge(principal_id, code_type, &code.digest(), self.clock.now())
            .await
        {
            Ok(Some(challenge)) => Ok(challenge),
            Ok(None) => self.miss(principal_id, code_type).await,
            Err(e) => {
                tracing::error!(error = %e, "Failed to look up verification code");
                Err(AuthError::ChallengeUnavailable)
            }
        }
    }

    /// Consume the principal's matching unused, unexpired code of
    /// `code_type`. Success is terminal: the same code never verifies again.
    pub async fn verify(
        &self,
        principal_id: &PrincipalId,
        code: &str,
        code_type: MfaCodeType,
    ) -> AuthResult<MfaChallenge> {
        let Some(code) = MfaCode::parse(code, self.settings.code_length) else {
            return self.miss(principal_id, code_type).await;
        };

        match self
            .repo
            .consume_challenge(principal_id, code_type, &code.digest(), self.clock.now())
            .await
        {
            Ok(Some(challenge)) => Ok(challenge),
            Ok(None) => self.miss(principal_id, code_type).await,
            Err(e) => {
                tracing::error!(error = %e, "Failed to consume verification code");
                Err(AuthError::ChallengeUnavailable)
            }
        }
    }

    async fn miss<T>(&self, principal_id: &PrincipalId, code_type: MfaCodeType) -> AuthResult<T> {
        match self
            .repo
            .record_challenge_miss(principal_id, code_type, self.clock.now(), self.settings.max_attempts)
            .await
        {
            Ok(true) => {
                tracing::warn!(
                    principal_id = %principal_id,
                    code_type = %code_type,
                    "Verification code burned after too many wrong guesses"
                );
            }
            Ok(false) => {}
            Err(e) => tracing::warn!(error = %e, "Failed to count verification code miss"),
        }
        Err(AuthError::InvalidCode)
    }

    /// Read-only. Any failure means "not trusted".
    pub async fn check_trusted_device(
        &self,
        principal_id: &PrincipalId,
        kind: PrincipalKind,
        fingerprint: &str,
    ) -> bool {
        let digest = TrustedDevice::digest(fingerprint);
        match self.repo.find_trusted_device(principal_id, kind, &digest).await {
            Ok(Some(device)) => device.is_valid(self.clock.now()),
            Ok(None) => false,
            Err(e) => {
                tracing::warn!(principal_id = %principal_id, error = %e, "Trusted device lookup failed");
                false
            }
        }
    }
}
