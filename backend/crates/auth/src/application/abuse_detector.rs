//! Abuse Detector
//!
//! Sliding-window login caps, suspicious-pattern heuristics for employee
//! logins, a per-IP cap on password reset requests and daily signup quotas.
//!
//! Fail-open: an internal error while evaluating any check lets the request
//! through. This subsystem gates access, it does not protect data.

use std::sync::{Arc, RwLock};

use chrono::Duration;
use platform::clock::Clock;
use platform::rate_limit::{RateLimitConfig, RateLimitResult, SlidingWindowStore};

use crate::application::config::{RateLimitSettings, SignupSettings};
use crate::domain::entity::abuse::{
    LimitReason, LoginFailureRecord, SignupAttemptRecord, SignupLimits,
};
use crate::domain::repository::AbuseLogRepository;
use crate::domain::value_object::principal_kind::PrincipalKind;
use crate::error::{AuthError, AuthResult};

const GLOBAL_SIGNUP_KEY: &str = "signup:global";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbuseVerdict {
    Allowed,
    Blocked {
        reason: LimitReason,
        retry_after_secs: u64,
    },
}

impl AbuseVerdict {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed)
    }

    pub fn into_result(self) -> AuthResult<()> {
        match self {
            Self::Allowed => Ok(()),
            Self::Blocked {
                reason,
                retry_after_secs,
            } => Err(AuthError::RateLimited {
                reason,
                retry_after_secs,
            }),
        }
    }

    fn blocked(reason: LimitReason, retry_after_ms: i64) -> Self {
        Self::Blocked {
            reason,
            retry_after_secs: ceil_secs(retry_after_ms),
        }
    }
}

/// Whole seconds, rounded up, never zero
fn ceil_secs(ms: i64) -> u64 {
    (ms.max(0) as u64).div_ceil(1000).max(1)
}

fn normalise_identity(identity: &str) -> String {
    identity.trim().to_lowercase()
}

pub struct AbuseDetector<W, R> {
    store: Arc<W>,
    repo: Arc<R>,
    clock: Arc<dyn Clock>,
    limits: RateLimitSettings,
    signup: SignupSettings,
    /// Settings-store limits and when they were fetched (ms)
    signup_limits: RwLock<Option<(i64, SignupLimits)>>,
}

impl<W, R> AbuseDetector<W, R>
where
    W: SlidingWindowStore + Send + Sync,
    R: AbuseLogRepository + Send + Sync,
{
    pub fn new(
        store: Arc<W>,
        repo: Arc<R>,
        clock: Arc<dyn Clock>,
        limits: RateLimitSettings,
        signup: SignupSettings,
    ) -> Self {
        Self {
            store,
            repo,
            clock,
            limits,
            signup,
            signup_limits: RwLock::new(None),
        }
    }

    // ========================================================================
    // Login
    // ========================================================================

    /// Decide whether a login attempt may proceed
    pub async fn check_login(&self, ip: &str, identity: &str, kind: PrincipalKind) -> AbuseVerdict {
        let identity = normalise_identity(identity);
        let verdict = match kind {
            PrincipalKind::Employee => self.evaluate_employee_login(ip, &identity).await,
            PrincipalKind::Client => self.evaluate_login(ip).await,
        };

        match verdict {
            Ok(verdict) => {
                if let AbuseVerdict::Blocked {
                    reason,
                    retry_after_secs,
                } = verdict
                {
                    tracing::warn!(
                        ip = %ip,
                        kind = %kind,
                        code = reason.code(),
                        retry_after_secs,
                        "Login attempt blocked"
                    );
                }
                verdict
            }
            Err(e) => {
                tracing::warn!(ip = %ip, error = %e, "Login abuse check failed, allowing");
                AbuseVerdict::Allowed
            }
        }
    }

    async fn evaluate_login(&self, ip: &str) -> AuthResult<AbuseVerdict> {
        let limit = RateLimitConfig {
            max_requests: self.limits.login_max_per_ip,
            window: self.limits.login_window,
        };
        self.evaluate_cap(&Self::ip_key(ip), &limit, LimitReason::LoginRateLimit)
            .await
    }

    async fn evaluate_employee_login(&self, ip: &str, identity: &str) -> AuthResult<AbuseVerdict> {
        let now_ms = self.clock.now_ms();

        // Every employee request counts here, successful or not
        let suspicious_key = Self::suspicious_key(ip);
        let window_ms = self.limits.suspicious_window.as_millis() as i64;
        self.store
            .record(&suspicious_key, Some(identity), now_ms)
            .await?;
        let recent = self
            .store
            .snapshot(&suspicious_key, now_ms, window_ms)
            .await?;

        if recent.count > self.limits.suspicious_max_requests
            || recent.distinct_members > self.limits.suspicious_max_identities
        {
            return Ok(AbuseVerdict::blocked(
                LimitReason::SuspiciousActivity,
                recent.retry_after_ms(window_ms, now_ms),
            ));
        }

        let hour = Duration::hours(1);
        let failures = self
            .repo
            .count_login_failures_from_ip(ip, self.clock.now() - hour)
            .await?;
        if failures > self.limits.suspicious_max_failures_per_hour {
            return Ok(AbuseVerdict::blocked(
                LimitReason::SuspiciousActivity,
                hour.num_milliseconds(),
            ));
        }

        let limit = RateLimitConfig {
            max_requests: self.limits.employee_login_max_per_identity,
            window: self.limits.login_window,
        };
        self.evaluate_cap(
            &Self::employee_key(ip, identity),
            &limit,
            LimitReason::EmployeeLoginRateLimit,
        )
        .await
    }

    async fn evaluate_cap(
        &self,
        key: &str,
        limit: &RateLimitConfig,
        reason: LimitReason,
    ) -> AuthResult<AbuseVerdict> {
        let now_ms = self.clock.now_ms();
        let snapshot = self.store.snapshot(key, now_ms, limit.window_ms()).await?;
        let result = RateLimitResult::evaluate(&snapshot, limit, now_ms);
        if result.allowed {
            Ok(AbuseVerdict::Allowed)
        } else {
            Ok(AbuseVerdict::blocked(reason, result.retry_after_ms))
        }
    }

    /// Count a failed attempt in the window and the durable log
    pub async fn record_login_failure(
        &self,
        ip: &str,
        identity: &str,
        kind: PrincipalKind,
        reason: &'static str,
    ) {
        let identity = normalise_identity(identity);
        let key = match kind {
            PrincipalKind::Employee => Self::employee_key(ip, &identity),
            PrincipalKind::Client => Self::ip_key(ip),
        };
        if let Err(e) = self.store.record(&key, None, self.clock.now_ms()).await {
            tracing::warn!(error = %e, "Failed to count login failure");
        }

        let record = LoginFailureRecord {
            ip_address: ip.to_string(),
            identity,
            principal_kind: kind,
            reason,
            attempted_at: self.clock.now(),
        };
        if let Err(e) = self.repo.record_login_failure(&record).await {
            tracing::warn!(error = %e, "Failed to persist login failure");
        }
    }

    /// A successful login clears the (IP, identity) window
    pub async fn record_login_success(&self, ip: &str, identity: &str, kind: PrincipalKind) {
        if kind != PrincipalKind::Employee {
            return;
        }
        let key = Self::employee_key(ip, &normalise_identity(identity));
        if let Err(e) = self.store.clear(&key).await {
            tracing::warn!(error = %e, "Failed to clear login window");
        }
    }

    // ========================================================================
    // Password reset
    // ========================================================================

    /// Cap reset requests per IP. Every admitted request counts, whether or
    /// not the account exists.
    pub async fn check_password_reset(&self, ip: &str) -> AbuseVerdict {
        match self.evaluate_password_reset(ip).await {
            Ok(verdict) => {
                if let AbuseVerdict::Blocked { reason, .. } = verdict {
                    tracing::warn!(ip = %ip, code = reason.code(), "Password reset request blocked");
                }
                verdict
            }
            Err(e) => {
                tracing::warn!(ip = %ip, error = %e, "Password reset check failed, allowing");
                AbuseVerdict::Allowed
            }
        }
    }

    async fn evaluate_password_reset(&self, ip: &str) -> AuthResult<AbuseVerdict> {
        let key = Self::reset_key(ip);
        let limit = RateLimitConfig {
            max_requests: self.limits.reset_max_per_ip,
            window: self.limits.login_window,
        };
        let verdict = self
            .evaluate_cap(&key, &limit, LimitReason::PasswordResetRateLimit)
            .await?;
        if verdict.is_allowed() {
            self.store.record(&key, None, self.clock.now_ms()).await?;
        }
        Ok(verdict)
    }

    fn ip_key(ip: &str) -> String {
        format!("login:ip:{}", ip)
    }

    fn employee_key(ip: &str, identity: &str) -> String {
        format!("login:employee:{}:{}", ip, identity)
    }

    fn suspicious_key(ip: &str) -> String {
        format!("suspicious:{}", ip)
    }

    fn reset_key(ip: &str) -> String {
        format!("reset:ip:{}", ip)
    }

    // ========================================================================
    // Signup
    // ========================================================================

    /// Check the global then the per-IP daily quota. An admitted attempt is
    /// recorded against both.
    pub async fn check_signup(&self, ip: &str) -> AbuseVerdict {
        match self.evaluate_signup(ip).await {
            Ok(verdict) => {
                if let AbuseVerdict::Blocked { reason, .. } = verdict {
                    tracing::warn!(ip = %ip, code = reason.code(), "Signup blocked");
                }
                verdict
            }
            Err(e) => {
                tracing::warn!(ip = %ip, error = %e, "Signup quota check failed, allowing");
                AbuseVerdict::Allowed
            }
        }
    }

    async fn evaluate_signup(&self, ip: &str) -> AuthResult<AbuseVerdict> {
        let limits = self.signup_limits().await;
        let day = self.clock.local_day();
        let until_midnight = self.clock.until_local_midnight().num_milliseconds();

        let global = self.store.day_count(GLOBAL_SIGNUP_KEY, day).await?;
        if global >= limits.global_daily {
            return Ok(AbuseVerdict::blocked(
                LimitReason::GlobalSignupLimit,
                until_midnight,
            ));
        }

        let from_ip = self.repo.count_signup_attempts(ip, day).await?;
        if from_ip >= limits.per_ip_daily {
            return Ok(AbuseVerdict::blocked(LimitReason::IpSignupLimit, until_midnight));
        }

        let record = SignupAttemptRecord {
            ip_address: ip.to_string(),
            day,
            attempted_at: self.clock.now(),
        };
        self.repo.record_signup_attempt(&record).await?;
        self.store.day_increment(GLOBAL_SIGNUP_KEY, day).await?;

        Ok(AbuseVerdict::Allowed)
    }

    /// Settings-store limits, refreshed at most once per interval
    async fn signup_limits(&self) -> SignupLimits {
        let now_ms = self.clock.now_ms();
        let refresh_ms = self.signup.refresh_interval.as_millis() as i64;

        let cached = *self
            .signup_limits
            .read()
            .unwrap_or_else(|e| e.into_inner());
        if let Some((fetched_ms, limits)) = cached {
            if now_ms - fetched_ms < refresh_ms {
                return limits;
            }
        }

        let defaults = SignupLimits {
            per_ip_daily: self.signup.per_ip_daily,
            global_daily: self.signup.global_daily,
        };
        let limits = match self.repo.signup_limits().await {
            Ok(Some(limits)) => limits,
            Ok(None) => defaults,
            Err(e) => {
                tracing::warn!(error = %e, "Signup settings lookup failed, using defaults");
                defaults
            }
        };

        *self
            .signup_limits
            .write()
            .unwrap_or_else(|e| e.into_inner()) = Some((now_ms, limits));
        limits
    }
}
