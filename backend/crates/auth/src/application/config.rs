//! Application Configuration
//!
//! Every tunable of the auth application layer, with safe defaults.

use std::time::Duration;

use platform::password::Argon2Params;

/// Re-export SameSite from platform
pub use platform::cookie::SameSite;

use crate::domain::value_object::mfa_code::MfaCodeType;
use crate::domain::value_object::principal_kind::PrincipalKind;

/// Deployment environment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Environment {
    Development,
    #[default]
    Production,
}

impl Environment {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" | "local" => Some(Self::Development),
            "production" | "prod" => Some(Self::Production),
            _ => None,
        }
    }

    pub fn is_production(&self) -> bool {
        matches!(self, Self::Production)
    }
}

/// Session lifecycle settings
#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// Session cookie name
    pub cookie_name: String,
    /// Whether to require Secure cookie
    pub cookie_secure: bool,
    /// SameSite policy
    pub cookie_same_site: SameSite,
    /// Sliding TTL applied on create and every validate
    pub ttl: Duration,
    /// Concurrent live sessions per principal
    pub max_sessions: u32,
    /// Minimum gap between opportunistic sweeps
    pub sweep_interval: Duration,
    pub sweep_retries: u32,
    pub sweep_retry_delay: Duration,
    /// Inactive rows older than this are purged by the sweep
    pub retention: Duration,
    /// HMAC key for token digests at rest (32 bytes)
    pub token_secret: [u8; 32],
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            cookie_name: "auth_session".to_string(),
            cookie_secure: true,
            cookie_same_site: SameSite::Lax,
            ttl: Duration::from_secs(8 * 3600),
            max_sessions: 5,
            sweep_interval: Duration::from_secs(5 * 60),
            sweep_retries: 3,
            sweep_retry_delay: Duration::from_millis(250),
            retention: Duration::from_secs(30 * 24 * 3600),
            token_secret: [0u8; 32],
        }
    }
}

impl SessionSettings {
    pub fn ttl_secs(&self) -> u64 {
        self.ttl.as_secs()
    }
}

/// Login brute-force and suspicious-pattern settings
#[derive(Debug, Clone)]
pub struct RateLimitSettings {
    pub login_window: Duration,
    pub login_max_per_ip: u32,
    pub employee_login_max_per_identity: u32,
    pub suspicious_window: Duration,
    pub suspicious_max_requests: u32,
    pub suspicious_max_identities: u32,
    pub suspicious_max_failures_per_hour: u64,
    /// Password reset requests per IP within `login_window`
    pub reset_max_per_ip: u32,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            login_window: Duration::from_secs(15 * 60),
            login_max_per_ip: 5,
            employee_login_max_per_identity: 3,
            suspicious_window: Duration::from_secs(5 * 60),
            suspicious_max_requests: 10,
            suspicious_max_identities: 5,
            suspicious_max_failures_per_hour: 15,
            reset_max_per_ip: 5,
        }
    }
}

/// Signup quota defaults, overridden by the settings store
#[derive(Debug, Clone)]
pub struct SignupSettings {
    pub per_ip_daily: u64,
    pub global_daily: u64,
    /// Settings store is consulted at most this often
    pub refresh_interval: Duration,
    /// Role given to self-service clients
    pub default_client_role: String,
}

impl Default for SignupSettings {
    fn default() -> Self {
        Self {
            per_ip_daily: 3,
            global_daily: 20,
            refresh_interval: Duration::from_secs(3600),
            default_client_role: "client_owner".to_string(),
        }
    }
}

/// One-time code settings
#[derive(Debug, Clone)]
pub struct MfaSettings {
    pub code_length: usize,
    pub login_ttl: Duration,
    pub reset_ttl: Duration,
    pub phone_verification_ttl: Duration,
    pub email_verification_ttl: Duration,
    pub sms_per_hour: u64,
    pub sms_per_day: u64,
    /// Wrong guesses a single code survives
    pub max_attempts: u32,
    pub require_for_employees: bool,
    pub require_for_clients: bool,
}

impl Default for MfaSettings {
    fn default() -> Self {
        Self {
            code_length: 6,
            login_ttl: Duration::from_secs(10 * 60),
            reset_ttl: Duration::from_secs(30 * 60),
            phone_verification_ttl: Duration::from_secs(10 * 60),
            email_verification_ttl: Duration::from_secs(24 * 3600),
            sms_per_hour: 5,
            sms_per_day: 10,
            max_attempts: 5,
            require_for_employees: true,
            require_for_clients: false,
        }
    }
}

impl MfaSettings {
    pub fn ttl_for(&self, code_type: MfaCodeType) -> Duration {
        match code_type {
            MfaCodeType::Login => self.login_ttl,
            MfaCodeType::Reset => self.reset_ttl,
            MfaCodeType::PhoneVerification => self.phone_verification_ttl,
            MfaCodeType::EmailVerification => self.email_verification_ttl,
        }
    }

    pub fn required_for(&self, kind: PrincipalKind) -> bool {
        match kind {
            PrincipalKind::Employee => self.require_for_employees,
            PrincipalKind::Client => self.require_for_clients,
        }
    }
}

/// Permission arbiter settings
#[derive(Debug, Clone)]
pub struct PermissionSettings {
    /// Role that is granted every permission
    pub override_role: String,
    pub cache_ttl: Duration,
}

impl Default for PermissionSettings {
    fn default() -> Self {
        Self {
            override_role: "super_admin".to_string(),
            cache_ttl: Duration::from_secs(5 * 60),
        }
    }
}

/// Auth application configuration
#[derive(Debug, Clone, Default)]
pub struct AuthConfig {
    pub environment: Environment,
    pub session: SessionSettings,
    pub rate_limit: RateLimitSettings,
    pub signup: SignupSettings,
    pub mfa: MfaSettings,
    pub permissions: PermissionSettings,
    /// Password pepper (optional, application-wide secret)
    pub password_pepper: Option<Vec<u8>>,
    pub argon2: Argon2Params,
}

impl AuthConfig {
    /// Create config with a random session secret
    pub fn with_random_secret() -> Self {
        use rand::RngCore;
        let mut secret = [0u8; 32];
        rand::rng().fill_bytes(&mut secret);
        let mut config = Self::default();
        config.session.token_secret = secret;
        config
    }

    /// Create config for development (insecure cookie)
    pub fn development() -> Self {
        let mut config = Self::with_random_secret();
        config.environment = Environment::Development;
        config.session.cookie_secure = false;
        config
    }

    /// Get password pepper as slice
    pub fn pepper(&self) -> Option<&[u8]> {
        self.password_pepper.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AuthConfig::default();
        assert_eq!(config.session.ttl, Duration::from_secs(28_800));
        assert_eq!(config.session.max_sessions, 5);
        assert_eq!(config.rate_limit.login_max_per_ip, 5);
        assert_eq!(config.rate_limit.employee_login_max_per_identity, 3);
        assert_eq!(config.signup.per_ip_daily, 3);
        assert_eq!(config.signup.global_daily, 20);
        assert_eq!(config.permissions.override_role, "super_admin");
        assert!(config.session.cookie_secure);
    }

    #[test]
    fn test_development_is_insecure_with_random_secret() {
        let config = AuthConfig::development();
        assert!(!config.session.cookie_secure);
        assert_ne!(config.session.token_secret, [0u8; 32]);
        assert!(!config.environment.is_production());
    }

    #[test]
    fn test_mfa_requirement_per_kind() {
        let mfa = MfaSettings::default();
        assert!(mfa.required_for(PrincipalKind::Employee));
        assert!(!mfa.required_for(PrincipalKind::Client));
        assert_eq!(mfa.ttl_for(MfaCodeType::Reset), Duration::from_secs(1800));
    }
}
