//! Abuse-detection records and limit reasons

use chrono::{DateTime, NaiveDate, Utc};

use crate::domain::value_object::principal_kind::PrincipalKind;

/// Which limit blocked a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitReason {
    LoginRateLimit,
    EmployeeLoginRateLimit,
    SuspiciousActivity,
    IpSignupLimit,
    GlobalSignupLimit,
    SmsRateLimit,
    PasswordResetRateLimit,
}

impl LimitReason {
    pub const fn code(&self) -> &'static str {
        match self {
            Self::LoginRateLimit => "LOGIN_RATE_LIMIT_EXCEEDED",
            Self::EmployeeLoginRateLimit => "EMPLOYEE_LOGIN_RATE_LIMIT_EXCEEDED",
            Self::SuspiciousActivity => "SUSPICIOUS_ACTIVITY_DETECTED",
            Self::IpSignupLimit => "IP_SIGNUP_LIMIT_EXCEEDED",
            Self::GlobalSignupLimit => "GLOBAL_SIGNUP_LIMIT_EXCEEDED",
            Self::SmsRateLimit => "SMS_RATE_LIMIT_EXCEEDED",
            Self::PasswordResetRateLimit => "PASSWORD_RESET_RATE_LIMIT_EXCEEDED",
        }
    }

    pub const fn message(&self) -> &'static str {
        match self {
            Self::LoginRateLimit | Self::EmployeeLoginRateLimit => {
                "Too many login attempts. Please try again later."
            }
            Self::SuspiciousActivity => "Suspicious activity detected. Please try again later.",
            Self::IpSignupLimit => "Too many signups from this network today.",
            Self::GlobalSignupLimit => "Signups are temporarily unavailable. Please try again tomorrow.",
            Self::SmsRateLimit => "Too many text messages sent to this number.",
            Self::PasswordResetRateLimit => "Too many password reset requests. Please try again later.",
        }
    }
}

/// Durable record of one failed login
#[derive(Debug, Clone)]
pub struct LoginFailureRecord {
    pub ip_address: String,
    pub identity: String,
    pub principal_kind: PrincipalKind,
    /// Internal reason; never rendered
    pub reason: &'static str,
    pub attempted_at: DateTime<Utc>,
}

/// Durable record of one admitted signup
#[derive(Debug, Clone)]
pub struct SignupAttemptRecord {
    pub ip_address: String,
    /// Local calendar day the quota is counted against
    pub day: NaiveDate,
    pub attempted_at: DateTime<Utc>,
}

/// Signup quotas from the settings store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignupLimits {
    pub per_ip_daily: u64,
    pub global_daily: u64,
}
