//! Scenario tests
//!
//! Every suite runs against the in-memory repository, a manual clock and a
//! delivery double that keeps the messages it was asked to send.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, TimeZone, Utc};
use kernel::id::{PrincipalId, RoleId};
use platform::cache::InMemoryDecisionCache;
use platform::client::ClientContext;
use platform::clock::{Clock, ManualClock};
use platform::password::{Argon2Hasher, Argon2Params};
use platform::rate_limit::InMemorySlidingWindowStore;
use tokio::sync::broadcast;

use crate::application::config::AuthConfig;
use crate::application::delivery::{
    DeliveryChannel, DeliveryChannels, DeliveryError, DeliveryMessage, DeliveryOutcome,
    DeliveryService,
};
use crate::application::events::AuthEvent;
use crate::application::login::{AuthenticatedLogin, LoginInput, LoginOrchestrator, LoginOutcome};
use crate::application::permission_arbiter::PermissionArbiter;
use crate::domain::entity::principal::{Principal, RoleRef};
use crate::domain::value_object::{
    email::Email,
    password::{PasswordHash, RawPassword},
    principal_kind::PrincipalKind,
};
use crate::infra::events::ChannelEventBroadcaster;
use crate::infra::memory::InMemoryAuthRepository;
use crate::presentation::state::AuthStack;

const EMPLOYEE_SECRET: &str = "Quartz-Harbor-719!";
const CLIENT_SECRET: &str = "Maple-Orbit-56!";
const NEW_SECRET: &str = "Velvet-Canyon-482#";

// ============================================================================
// Harness
// ============================================================================

/// Delivery double: records messages, optionally refuses to send
#[derive(Default)]
pub(crate) struct RecordingDelivery {
    sent: Mutex<Vec<DeliveryMessage>>,
    failing: AtomicBool,
}

impl RecordingDelivery {
    fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn messages(&self) -> Vec<DeliveryMessage> {
        self.sent.lock().unwrap().clone()
    }

    /// Code from the latest message sent to `recipient`
    fn last_code_for(&self, recipient: &str) -> Option<String> {
        self.messages()
            .iter()
            .rev()
            .find(|m| m.recipient == recipient)
            .and_then(|m| {
                m.body
                    .split_whitespace()
                    .map(|w| w.trim_end_matches('.'))
                    .find(|w| w.len() == 6 && w.chars().all(|c| c.is_ascii_digit()))
                    .map(str::to_string)
            })
    }
}

impl DeliveryService for RecordingDelivery {
    async fn send(&self, message: &DeliveryMessage) -> Result<DeliveryOutcome, DeliveryError> {
        if self.failing.load(Ordering::SeqCst) {
            return Ok(DeliveryOutcome { sent: false });
        }
        self.sent.lock().unwrap().push(message.clone());
        Ok(DeliveryOutcome { sent: true })
    }
}

pub(crate) struct TestStack;

impl AuthStack for TestStack {
    type Store = InMemoryAuthRepository;
    type Window = InMemorySlidingWindowStore;
    type Cache = InMemoryDecisionCache;
    type Delivery = RecordingDelivery;
}

type TestOrchestrator =
    LoginOrchestrator<InMemoryAuthRepository, InMemorySlidingWindowStore, RecordingDelivery>;
type TestArbiter = PermissionArbiter<InMemoryAuthRepository, InMemoryDecisionCache>;

fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 10, 12, 0, 0).unwrap()
}

fn test_config() -> AuthConfig {
    let mut config = AuthConfig::development();
    config.argon2 = Argon2Params::low_cost();
    config
}

fn client_at(ip: &str) -> ClientContext {
    ClientContext::new(Some(ip.parse().unwrap()), Some("test-agent".to_string()))
}

fn login_input(kind: PrincipalKind, identity: &str, secret: &str, ip: &str) -> LoginInput {
    LoginInput {
        kind,
        identity: identity.to_string(),
        secret: secret.to_string(),
        channels: DeliveryChannels::Email,
        client: client_at(ip),
    }
}

fn drain(rx: &mut broadcast::Receiver<AuthEvent>) -> Vec<AuthEvent> {
    std::iter::from_fn(|| rx.try_recv().ok()).collect()
}

/// Let spawned work such as reset code delivery run
async fn settle() {
    for _ in 0..16 {
        tokio::task::yield_now().await;
    }
}

struct Harness {
    repo: InMemoryAuthRepository,
    clock: Arc<ManualClock>,
    delivery: Arc<RecordingDelivery>,
    events: Arc<ChannelEventBroadcaster>,
    auth: Arc<TestOrchestrator>,
    arbiter: Arc<TestArbiter>,
    hasher: Argon2Hasher,
}

impl Harness {
    fn new() -> Self {
        Self::with_config(test_config())
    }

    fn with_config(config: AuthConfig) -> Self {
        let repo = InMemoryAuthRepository::new();
        let clock = Arc::new(ManualClock::new(start()));
        let dyn_clock: Arc<dyn Clock> = clock.clone();
        let store = Arc::new(repo.clone());
        let window = Arc::new(InMemorySlidingWindowStore::new(
            dyn_clock.clone(),
            std::time::Duration::from_secs(3600),
        ));
        let cache = Arc::new(InMemoryDecisionCache::new(dyn_clock.clone()));
        let delivery = Arc::new(RecordingDelivery::default());
        let events = Arc::new(ChannelEventBroadcaster::new(64));
        let hasher = Argon2Hasher::new(config.argon2, None).unwrap();

        let arbiter = PermissionArbiter::new(
            store.clone(),
            cache,
            dyn_clock.clone(),
            config.permissions.clone(),
        );
        let auth = LoginOrchestrator::new(
            store,
            window,
            delivery.clone(),
            dyn_clock,
            events.clone(),
            config,
        )
        .unwrap();

        Self {
            repo,
            clock,
            delivery,
            events,
            auth: Arc::new(auth),
            arbiter: Arc::new(arbiter),
            hasher,
        }
    }

    fn hash(&self, secret: &str) -> PasswordHash {
        PasswordHash::from_raw(&RawPassword::new(secret.to_string()).unwrap(), &self.hasher)
            .unwrap()
    }

    /// Store the principal and its current password in history
    async fn seed(&self, principal: Principal) -> PrincipalId {
        let id = principal.id;
        let kind = principal.kind;
        let hash = principal.password_hash.clone();
        self.repo.seed_principal(principal);
        self.auth
            .password_policy()
            .record_used(&id, kind, &hash)
            .await
            .unwrap();
        id
    }

    fn employee(&self, email: &str, roles: &[&str]) -> Principal {
        let roles = roles
            .iter()
            .map(|name| RoleRef {
                id: RoleId::new(),
                name: name.to_string(),
            })
            .collect();
        Principal::new_employee(
            Email::new(email).unwrap(),
            self.hash(EMPLOYEE_SECRET),
            roles,
            self.clock.now(),
        )
    }

    fn client(&self, email: &str) -> Principal {
        let mut client = Principal::new_client(
            Email::new(email).unwrap(),
            self.hash(CLIENT_SECRET),
            "client_owner",
            None,
            None,
            None,
            self.clock.now(),
        );
        client.email_verified = true;
        client
    }

    async fn seed_employee(&self, email: &str, roles: &[&str]) -> PrincipalId {
        self.seed(self.employee(email, roles)).await
    }

    async fn seed_client(&self, email: &str) -> PrincipalId {
        self.seed(self.client(email)).await
    }

    async fn login_client(&self, email: &str, secret: &str) -> AuthenticatedLogin {
        match self
            .auth
            .login(login_input(PrincipalKind::Client, email, secret, "10.0.0.1"))
            .await
            .unwrap()
        {
            LoginOutcome::Authenticated(login) => *login,
            other => panic!("expected a session, got {other:?}"),
        }
    }

    /// Raw token of a fresh session, bypassing login and MFA
    async fn session_token(&self, id: &PrincipalId, email: &str) -> String {
        let issued = self
            .auth
            .sessions()
            .create(id, &Email::new(email).unwrap(), &client_at("10.0.0.7"))
            .await
            .unwrap();
        issued.token.as_str().to_string()
    }
}

// ============================================================================
// Password policy
// ============================================================================

mod password_policy_tests {
    use super::*;
    use crate::domain::entity::password_policy::PasswordPolicy;
    use crate::domain::policy::IdentityHints;
    use crate::error::AuthError;

    #[tokio::test]
    async fn test_safe_default_without_configured_policy() {
        let h = Harness::new();
        let employee = h.auth.password_policy().policy_for(PrincipalKind::Employee).await;
        let client = h.auth.password_policy().policy_for(PrincipalKind::Client).await;
        assert_eq!(employee.min_length, 12);
        assert_eq!(client.min_length, 8);
    }

    #[tokio::test]
    async fn test_lookup_failure_falls_back_to_default() {
        let h = Harness::new();
        h.repo.set_policy(PasswordPolicy {
            min_length: 30,
            ..PasswordPolicy::safe_default(PrincipalKind::Client)
        });
        h.repo.set_failing(true);
        let policy = h.auth.password_policy().policy_for(PrincipalKind::Client).await;
        assert_eq!(policy.min_length, 8);
    }

    #[tokio::test]
    async fn test_configured_policy_reports_every_violation() {
        let h = Harness::new();
        h.repo.set_policy(PasswordPolicy {
            min_length: 20,
            ..PasswordPolicy::safe_default(PrincipalKind::Client)
        });

        let evaluation = h
            .auth
            .validate_password(PrincipalKind::Client, CLIENT_SECRET, &IdentityHints::default())
            .await
            .unwrap();
        assert!(!evaluation.is_valid);
        assert_eq!(evaluation.feedback, vec!["Password must be at least 20 characters"]);

        // Employee kind is unaffected
        let evaluation = h
            .auth
            .validate_password(PrincipalKind::Employee, EMPLOYEE_SECRET, &IdentityHints::default())
            .await
            .unwrap();
        assert!(evaluation.is_valid);
    }

    #[tokio::test]
    async fn test_identity_overlap_uses_hints() {
        let h = Harness::new();
        let hints = IdentityHints::new(
            Some("Marigold".into()),
            None,
            Some(Email::new("m.sun@example.com").unwrap()),
        );
        let evaluation = h
            .auth
            .validate_password(PrincipalKind::Client, "Marigold-2024!", &hints)
            .await
            .unwrap();
        assert!(!evaluation.is_valid);
        assert!(evaluation.strength <= 20);
    }

    #[tokio::test]
    async fn test_history_detects_recent_reuse() {
        let h = Harness::new();
        let id = h.seed_client("hist@example.com").await;
        let service = h.auth.password_policy();

        let current = RawPassword::new(CLIENT_SECRET.to_string()).unwrap();
        let other = RawPassword::new(NEW_SECRET.to_string()).unwrap();
        assert!(service.was_used_recently(&id, PrincipalKind::Client, &current).await);
        assert!(!service.was_used_recently(&id, PrincipalKind::Client, &other).await);
    }

    #[tokio::test]
    async fn test_history_disabled_records_nothing() {
        let h = Harness::new();
        h.repo.set_policy(PasswordPolicy {
            history_count: 0,
            ..PasswordPolicy::safe_default(PrincipalKind::Client)
        });
        let id = h.seed_client("nohist@example.com").await;

        assert_eq!(h.repo.history_len(&id), 0);
        let current = RawPassword::new(CLIENT_SECRET.to_string()).unwrap();
        assert!(
            !h.auth
                .password_policy()
                .was_used_recently(&id, PrincipalKind::Client, &current)
                .await
        );
    }

    #[tokio::test]
    async fn test_history_is_pruned_to_policy_count() {
        let h = Harness::new();
        let id = h.seed_client("prune@example.com").await;
        for i in 0..5 {
            let hash = h.hash(&format!("Rotating-Key-{i}!"));
            h.auth
                .password_policy()
                .record_used(&id, PrincipalKind::Client, &hash)
                .await
                .unwrap();
        }
        assert_eq!(h.repo.history_len(&id), 3);
    }

    #[tokio::test]
    async fn test_expiration_derived_from_policy_age() {
        let h = Harness::new();
        let mut employee = h.employee("old.pass@example.com", &[]);
        employee.password_changed_at = Some(h.clock.now() - Duration::days(100));
        let id = h.seed(employee).await;

        let info = h.auth.password_expiration(&id).await.unwrap();
        assert!(info.is_expired);
        assert_eq!(info.days_remaining, Some(0));
        assert!(info.requires_change());
    }

    #[tokio::test]
    async fn test_explicit_expiry_wins() {
        let h = Harness::new();
        let mut employee = h.employee("explicit@example.com", &[]);
        employee.password_expires_at = Some(h.clock.now() + Duration::days(3));
        let id = h.seed(employee).await;

        let info = h.auth.password_expiration(&id).await.unwrap();
        assert!(!info.is_expired);
        assert_eq!(info.days_remaining, Some(3));
    }

    #[tokio::test]
    async fn test_expiration_for_unknown_principal() {
        let h = Harness::new();
        let result = h.auth.password_expiration(&PrincipalId::new()).await;
        assert!(matches!(result, Err(AuthError::NotFound(_))));
    }
}

// ============================================================================
// Abuse detection
// ============================================================================

mod abuse_tests {
    use super::*;
    use crate::application::abuse_detector::AbuseVerdict;
    use crate::domain::entity::abuse::{LimitReason, SignupLimits};

    fn reason(verdict: AbuseVerdict) -> Option<LimitReason> {
        match verdict {
            AbuseVerdict::Allowed => None,
            AbuseVerdict::Blocked { reason, .. } => Some(reason),
        }
    }

    #[tokio::test]
    async fn test_client_ip_cap_and_window_expiry() {
        let h = Harness::new();
        let abuse = h.auth.abuse();
        for _ in 0..5 {
            abuse
                .record_login_failure("10.1.1.1", "x@example.com", PrincipalKind::Client, "wrong_secret")
                .await;
        }

        match abuse.check_login("10.1.1.1", "x@example.com", PrincipalKind::Client).await {
            AbuseVerdict::Blocked {
                reason,
                retry_after_secs,
            } => {
                assert_eq!(reason, LimitReason::LoginRateLimit);
                assert!((1..=900).contains(&retry_after_secs));
            }
            AbuseVerdict::Allowed => panic!("expected a block"),
        }

        // Another IP is unaffected
        assert!(
            abuse
                .check_login("10.1.1.2", "x@example.com", PrincipalKind::Client)
                .await
                .is_allowed()
        );

        h.clock.advance(Duration::minutes(16));
        assert!(
            abuse
                .check_login("10.1.1.1", "x@example.com", PrincipalKind::Client)
                .await
                .is_allowed()
        );
    }

    #[tokio::test]
    async fn test_employee_identity_cap_cleared_by_success() {
        let h = Harness::new();
        let abuse = h.auth.abuse();
        for _ in 0..3 {
            abuse
                .record_login_failure("10.2.0.1", "Staff@Example.com", PrincipalKind::Employee, "wrong_secret")
                .await;
        }

        let verdict = abuse
            .check_login("10.2.0.1", "staff@example.com", PrincipalKind::Employee)
            .await;
        assert_eq!(reason(verdict), Some(LimitReason::EmployeeLoginRateLimit));

        abuse
            .record_login_success("10.2.0.1", "staff@example.com", PrincipalKind::Employee)
            .await;
        assert!(
            abuse
                .check_login("10.2.0.1", "staff@example.com", PrincipalKind::Employee)
                .await
                .is_allowed()
        );
    }

    #[tokio::test]
    async fn test_request_burst_is_suspicious() {
        let h = Harness::new();
        let abuse = h.auth.abuse();
        for _ in 0..10 {
            assert!(
                abuse
                    .check_login("10.3.0.1", "burst@example.com", PrincipalKind::Employee)
                    .await
                    .is_allowed()
            );
        }
        let verdict = abuse
            .check_login("10.3.0.1", "burst@example.com", PrincipalKind::Employee)
            .await;
        assert_eq!(reason(verdict), Some(LimitReason::SuspiciousActivity));
    }

    #[tokio::test]
    async fn test_identity_spray_is_suspicious() {
        let h = Harness::new();
        let abuse = h.auth.abuse();
        for i in 0..5 {
            let identity = format!("user{i}@example.com");
            assert!(
                abuse
                    .check_login("10.4.0.1", &identity, PrincipalKind::Employee)
                    .await
                    .is_allowed()
            );
        }
        let verdict = abuse
            .check_login("10.4.0.1", "user5@example.com", PrincipalKind::Employee)
            .await;
        assert_eq!(reason(verdict), Some(LimitReason::SuspiciousActivity));
    }

    #[tokio::test]
    async fn test_hourly_failure_volume_is_suspicious() {
        let h = Harness::new();
        let abuse = h.auth.abuse();
        for i in 0..16 {
            let identity = format!("c{i}@example.com");
            abuse
                .record_login_failure("10.5.0.1", &identity, PrincipalKind::Client, "no_account")
                .await;
        }
        assert_eq!(h.repo.login_failures().len(), 16);

        let verdict = abuse
            .check_login("10.5.0.1", "fresh@example.com", PrincipalKind::Employee)
            .await;
        assert_eq!(reason(verdict), Some(LimitReason::SuspiciousActivity));
    }

    #[tokio::test]
    async fn test_failure_log_outage_fails_open() {
        let h = Harness::new();
        let abuse = h.auth.abuse();
        for i in 0..16 {
            let identity = format!("c{i}@example.com");
            abuse
                .record_login_failure("10.6.0.1", &identity, PrincipalKind::Client, "no_account")
                .await;
        }

        h.repo.set_failing(true);
        assert!(
            abuse
                .check_login("10.6.0.1", "fresh@example.com", PrincipalKind::Employee)
                .await
                .is_allowed()
        );
        assert!(abuse.check_signup("10.6.0.1").await.is_allowed());
    }

    #[tokio::test]
    async fn test_signup_per_ip_quota() {
        let h = Harness::new();
        let abuse = h.auth.abuse();
        for _ in 0..3 {
            assert!(abuse.check_signup("10.7.0.1").await.is_allowed());
        }
        assert_eq!(
            reason(abuse.check_signup("10.7.0.1").await),
            Some(LimitReason::IpSignupLimit)
        );
        assert!(abuse.check_signup("10.7.0.2").await.is_allowed());
    }

    #[tokio::test]
    async fn test_signup_global_quota_from_settings_store() {
        let h = Harness::new();
        h.repo.set_signup_limits(Some(SignupLimits {
            per_ip_daily: 100,
            global_daily: 2,
        }));
        let abuse = h.auth.abuse();

        assert!(abuse.check_signup("10.8.0.1").await.is_allowed());
        assert!(abuse.check_signup("10.8.0.2").await.is_allowed());
        match abuse.check_signup("10.8.0.3").await {
            AbuseVerdict::Blocked {
                reason,
                retry_after_secs,
            } => {
                assert_eq!(reason, LimitReason::GlobalSignupLimit);
                assert!((1..=25 * 3600).contains(&retry_after_secs));
            }
            AbuseVerdict::Allowed => panic!("expected a block"),
        }
    }

    #[test]
    fn test_verdict_into_result_carries_retry() {
        let err = AbuseVerdict::Blocked {
            reason: LimitReason::IpSignupLimit,
            retry_after_secs: 12,
        }
        .into_result()
        .unwrap_err();
        assert_eq!(err.code(), "IP_SIGNUP_LIMIT_EXCEEDED");
        assert!(AbuseVerdict::Allowed.into_result().is_ok());
    }
}

// ============================================================================
// MFA challenges
// ============================================================================

mod mfa_tests {
    use super::*;
    use crate::domain::entity::abuse::LimitReason;
    use crate::domain::entity::trusted_device::TrustedDevice;
    use crate::domain::value_object::mfa_code::MfaCodeType;
    use crate::error::AuthError;

    const EMAIL: &str = "mfa.user@example.com";

    async fn issue_and_send(h: &Harness, id: &PrincipalId, code_type: MfaCodeType) -> String {
        let email = Email::new(EMAIL).unwrap();
        let issued = h.auth.mfa().issue(id, &email, code_type, None).await.unwrap();
        h.auth
            .mfa()
            .deliver(&issued, DeliveryChannels::Email)
            .await
            .unwrap();
        h.delivery.last_code_for(EMAIL).unwrap()
    }

    #[tokio::test]
    async fn test_code_is_single_use() {
        let h = Harness::new();
        let id = PrincipalId::new();
        let code = issue_and_send(&h, &id, MfaCodeType::Login).await;

        let challenge = h.auth.mfa().verify(&id, &code, MfaCodeType::Login).await.unwrap();
        assert_eq!(challenge.principal_id, id);
        assert!(matches!(
            h.auth.mfa().verify(&id, &code, MfaCodeType::Login).await,
            Err(AuthError::InvalidCode)
        ));
    }

    #[tokio::test]
    async fn test_code_only_verifies_for_its_type() {
        let h = Harness::new();
        let id = PrincipalId::new();
        let code = issue_and_send(&h, &id, MfaCodeType::Reset).await;

        assert!(matches!(
            h.auth.mfa().verify(&id, &code, MfaCodeType::Login).await,
            Err(AuthError::InvalidCode)
        ));
        assert!(h.auth.mfa().verify(&id, &code, MfaCodeType::Reset).await.is_ok());
    }

    #[tokio::test]
    async fn test_code_only_verifies_for_its_principal() {
        let h = Harness::new();
        let owner = PrincipalId::new();
        let other = PrincipalId::new();
        let code = issue_and_send(&h, &owner, MfaCodeType::Login).await;

        assert!(matches!(
            h.auth.mfa().verify(&other, &code, MfaCodeType::Login).await,
            Err(AuthError::InvalidCode)
        ));
        assert!(h.auth.mfa().verify(&owner, &code, MfaCodeType::Login).await.is_ok());
    }

    #[tokio::test]
    async fn test_check_leaves_code_usable() {
        let h = Harness::new();
        let id = PrincipalId::new();
        let code = issue_and_send(&h, &id, MfaCodeType::Reset).await;

        assert!(h.auth.mfa().check(&id, &code, MfaCodeType::Reset).await.is_ok());
        assert!(h.auth.mfa().check(&id, &code, MfaCodeType::Reset).await.is_ok());
        assert!(h.auth.mfa().verify(&id, &code, MfaCodeType::Reset).await.is_ok());
        assert!(matches!(
            h.auth.mfa().check(&id, &code, MfaCodeType::Reset).await,
            Err(AuthError::InvalidCode)
        ));
    }

    #[tokio::test]
    async fn test_code_burns_after_max_wrong_guesses() {
        let h = Harness::new();
        let id = PrincipalId::new();
        let code = issue_and_send(&h, &id, MfaCodeType::Reset).await;
        let wrong = if code == "000000" { "111111" } else { "000000" };

        let max = h.auth.mfa().settings().max_attempts;
        for _ in 0..max - 1 {
            assert!(matches!(
                h.auth.mfa().check(&id, wrong, MfaCodeType::Reset).await,
                Err(AuthError::InvalidCode)
            ));
        }
        assert_eq!(h.repo.challenges_of(&id)[0].failed_attempts, max - 1);
        assert!(h.auth.mfa().check(&id, &code, MfaCodeType::Reset).await.is_ok());

        assert!(h.auth.mfa().verify(&id, wrong, MfaCodeType::Reset).await.is_err());
        assert!(matches!(
            h.auth.mfa().verify(&id, &code, MfaCodeType::Reset).await,
            Err(AuthError::InvalidCode)
        ));
    }

    #[tokio::test]
    async fn test_expired_code_is_rejected() {
        let h = Harness::new();
        let id = PrincipalId::new();
        let code = issue_and_send(&h, &id, MfaCodeType::Login).await;
        h.clock.advance(Duration::minutes(11));

        assert!(matches!(
            h.auth.mfa().verify(&id, &code, MfaCodeType::Login).await,
            Err(AuthError::InvalidCode)
        ));
    }

    #[tokio::test]
    async fn test_reissue_replaces_unused_code() {
        let h = Harness::new();
        let id = PrincipalId::new();
        let first = issue_and_send(&h, &id, MfaCodeType::Login).await;
        let second = issue_and_send(&h, &id, MfaCodeType::Login).await;
        assert_eq!(h.repo.challenges_of(&id).len(), 1);

        if first != second {
            assert!(h.auth.mfa().verify(&id, &first, MfaCodeType::Login).await.is_err());
        }
        assert!(h.auth.mfa().verify(&id, &second, MfaCodeType::Login).await.is_ok());
    }

    #[tokio::test]
    async fn test_malformed_code_is_invalid() {
        let h = Harness::new();
        let id = PrincipalId::new();
        issue_and_send(&h, &id, MfaCodeType::Login).await;
        for input in ["", "12ab56", "1234567"] {
            assert!(matches!(
                h.auth.mfa().verify(&id, input, MfaCodeType::Login).await,
                Err(AuthError::InvalidCode)
            ));
        }
        assert_eq!(h.repo.challenges_of(&id)[0].failed_attempts, 3);
    }

    #[tokio::test]
    async fn test_store_outage_means_no_code() {
        let h = Harness::new();
        h.repo.set_failing(true);
        let id = PrincipalId::new();
        let email = Email::new(EMAIL).unwrap();
        let result = h
            .auth
            .mfa()
            .issue(&id, &email, MfaCodeType::Login, None)
            .await;
        assert!(matches!(result, Err(AuthError::ChallengeUnavailable)));

        let result = h.auth.mfa().verify(&id, "123456", MfaCodeType::Login).await;
        assert!(matches!(result, Err(AuthError::ChallengeUnavailable)));
    }

    #[tokio::test]
    async fn test_refused_delivery_is_an_error() {
        let h = Harness::new();
        h.delivery.set_failing(true);
        let email = Email::new(EMAIL).unwrap();
        let issued = h
            .auth
            .mfa()
            .issue(&PrincipalId::new(), &email, MfaCodeType::Login, None)
            .await
            .unwrap();
        let result = h.auth.mfa().deliver(&issued, DeliveryChannels::Email).await;
        assert!(matches!(result, Err(AuthError::DeliveryFailed)));
    }

    #[tokio::test]
    async fn test_sms_requires_a_phone() {
        let h = Harness::new();
        let email = Email::new(EMAIL).unwrap();
        let issued = h
            .auth
            .mfa()
            .issue(&PrincipalId::new(), &email, MfaCodeType::Login, None)
            .await
            .unwrap();
        let result = h.auth.mfa().deliver(&issued, DeliveryChannels::Sms).await;
        assert!(matches!(result, Err(AuthError::Validation(_))));
        assert!(h.delivery.messages().is_empty());
    }

    #[tokio::test]
    async fn test_sms_hourly_quota() {
        let h = Harness::new();
        let email = Email::new(EMAIL).unwrap();
        let issued = h
            .auth
            .mfa()
            .issue(
                &PrincipalId::new(),
                &email,
                MfaCodeType::Login,
                Some("+15550100".to_string()),
            )
            .await
            .unwrap();

        for _ in 0..5 {
            h.auth.mfa().deliver(&issued, DeliveryChannels::Both).await.unwrap();
        }
        let sms = h
            .delivery
            .messages()
            .iter()
            .filter(|m| m.channel == DeliveryChannel::Sms)
            .count();
        assert_eq!(sms, 5);

        match h.auth.mfa().deliver(&issued, DeliveryChannels::Sms).await {
            Err(AuthError::RateLimited {
                reason,
                retry_after_secs,
            }) => {
                assert_eq!(reason, LimitReason::SmsRateLimit);
                assert_eq!(retry_after_secs, 3600);
            }
            other => panic!("expected SMS quota, got {other:?}"),
        }

        // Email alone is not subject to the phone quota
        assert!(h.auth.mfa().deliver(&issued, DeliveryChannels::Email).await.is_ok());
    }

    #[tokio::test]
    async fn test_trusted_device_lookup() {
        let h = Harness::new();
        let id = PrincipalId::new();
        let now = h.clock.now();
        h.repo.add_trusted_device(TrustedDevice::new(
            id,
            PrincipalKind::Employee,
            "laptop-1",
            now,
            Some(now + Duration::days(30)),
        ));
        let mfa = h.auth.mfa();

        assert!(mfa.check_trusted_device(&id, PrincipalKind::Employee, "laptop-1").await);
        assert!(!mfa.check_trusted_device(&id, PrincipalKind::Client, "laptop-1").await);
        assert!(!mfa.check_trusted_device(&id, PrincipalKind::Employee, "phone-2").await);

        h.clock.advance(Duration::days(31));
        assert!(!mfa.check_trusted_device(&id, PrincipalKind::Employee, "laptop-1").await);

        h.clock.set(now);
        h.repo.set_failing(true);
        assert!(!mfa.check_trusted_device(&id, PrincipalKind::Employee, "laptop-1").await);
    }
}

// ============================================================================
// Credential verification
// ============================================================================

mod credential_tests {
    use super::*;
    use crate::application::credential_verifier::{
        AuthFailureReason, Authentication, CredentialVerifier,
    };
    use crate::domain::value_object::principal_status::PrincipalStatus;

    fn verifier(h: &Harness) -> CredentialVerifier<InMemoryAuthRepository> {
        let hasher = Argon2Hasher::new(Argon2Params::low_cost(), None).unwrap();
        CredentialVerifier::new(Arc::new(h.repo.clone()), Arc::new(hasher))
    }

    fn rejection(outcome: Authentication) -> Option<AuthFailureReason> {
        match outcome {
            Authentication::Verified(_) => None,
            Authentication::Rejected(reason) => Some(reason),
        }
    }

    #[tokio::test]
    async fn test_correct_secret_verifies() {
        let h = Harness::new();
        let id = h.seed_client("ok@example.com").await;
        match verifier(&h)
            .authenticate(PrincipalKind::Client, "OK@example.com", CLIENT_SECRET)
            .await
            .unwrap()
        {
            Authentication::Verified(principal) => assert_eq!(principal.id, id),
            Authentication::Rejected(reason) => panic!("rejected: {reason:?}"),
        }
    }

    #[tokio::test]
    async fn test_rejection_reasons() {
        let h = Harness::new();
        h.seed_client("known@example.com").await;

        let mut unverified = h.client("unverified@example.com");
        unverified.email_verified = false;
        h.seed(unverified).await;

        let mut suspended = h.client("suspended@example.com");
        suspended.status = PrincipalStatus::Suspended;
        h.seed(suspended).await;

        let mut terminated = h.client("terminated@example.com");
        terminated.status = PrincipalStatus::Terminated;
        h.seed(terminated).await;

        let v = verifier(&h);
        let cases = [
            ("known@example.com", NEW_SECRET, AuthFailureReason::WrongSecret),
            ("nobody@example.com", CLIENT_SECRET, AuthFailureReason::NoAccount),
            ("not-an-email", CLIENT_SECRET, AuthFailureReason::NoAccount),
            ("known@example.com", "   ", AuthFailureReason::MalformedSecret),
            ("unverified@example.com", CLIENT_SECRET, AuthFailureReason::Unverified),
            ("suspended@example.com", CLIENT_SECRET, AuthFailureReason::Suspended),
            ("terminated@example.com", CLIENT_SECRET, AuthFailureReason::Terminated),
        ];
        for (identity, secret, expected) in cases {
            let outcome = v
                .authenticate(PrincipalKind::Client, identity, secret)
                .await
                .unwrap();
            assert_eq!(rejection(outcome), Some(expected), "{identity}");
        }
    }

    #[tokio::test]
    async fn test_identity_is_scoped_by_kind() {
        let h = Harness::new();
        h.seed_employee("shared@example.com", &[]).await;

        let outcome = verifier(&h)
            .authenticate(PrincipalKind::Client, "shared@example.com", EMPLOYEE_SECRET)
            .await
            .unwrap();
        assert_eq!(rejection(outcome), Some(AuthFailureReason::NoAccount));
    }

    #[tokio::test]
    async fn test_storage_error_propagates() {
        let h = Harness::new();
        h.repo.set_failing(true);
        let result = verifier(&h)
            .authenticate(PrincipalKind::Client, "any@example.com", CLIENT_SECRET)
            .await;
        assert!(result.is_err());
    }
}

// ============================================================================
// Sessions
// ============================================================================

mod session_tests {
    use super::*;
    use crate::error::AuthError;

    const EMAIL: &str = "sess@example.com";

    #[tokio::test]
    async fn test_token_is_stored_as_digest() {
        let h = Harness::new();
        let id = PrincipalId::new();
        let token = h.session_token(&id, EMAIL).await;

        let stored = h.repo.sessions_of(&id);
        assert_eq!(stored.len(), 1);
        assert_ne!(stored[0].token_digest, token.as_bytes());
        assert_eq!(stored[0].ip_address.as_deref(), Some("10.0.0.7"));

        let session = h.auth.sessions().validate(&token).await.unwrap().unwrap();
        assert_eq!(session.principal_id, id);
    }

    #[tokio::test]
    async fn test_sliding_expiration() {
        let h = Harness::new();
        let id = PrincipalId::new();
        let token = h.session_token(&id, EMAIL).await;
        let sessions = h.auth.sessions();

        h.clock.advance(Duration::hours(7));
        let session = sessions.validate(&token).await.unwrap().unwrap();
        assert_eq!(session.expires_at, h.clock.now() + Duration::hours(8));
        assert_eq!(session.last_activity, h.clock.now());

        h.clock.advance(Duration::hours(7));
        assert!(sessions.validate(&token).await.unwrap().is_some());

        h.clock.advance(Duration::hours(9));
        assert!(sessions.validate(&token).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unknown_and_malformed_tokens() {
        let h = Harness::new();
        let sessions = h.auth.sessions();
        assert!(sessions.validate("").await.unwrap().is_none());
        assert!(sessions.validate("not a token").await.unwrap().is_none());
        assert!(sessions.end("not a token").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_cap_evicts_oldest() {
        let h = Harness::new();
        let mut rx = h.events.subscribe();
        let id = PrincipalId::new();

        let mut tokens = Vec::new();
        for _ in 0..6 {
            tokens.push(h.session_token(&id, EMAIL).await);
            h.clock.advance(Duration::seconds(1));
        }

        let now = h.clock.now();
        let live = h.repo.sessions_of(&id).iter().filter(|s| s.is_live(now)).count();
        assert_eq!(live, 5);
        assert!(h.auth.sessions().validate(&tokens[0]).await.unwrap().is_none());
        assert!(h.auth.sessions().validate(&tokens[5]).await.unwrap().is_some());

        let evicted: Vec<_> = drain(&mut rx)
            .into_iter()
            .filter(|e| matches!(e, AuthEvent::SessionEvicted { .. }))
            .collect();
        assert_eq!(evicted.len(), 1);
    }

    #[tokio::test]
    async fn test_end_is_terminal() {
        let h = Harness::new();
        let id = PrincipalId::new();
        let token = h.session_token(&id, EMAIL).await;
        let sessions = h.auth.sessions();

        let ended = sessions.end(&token).await.unwrap().unwrap();
        assert_eq!(ended.principal_id, id);
        assert!(sessions.end(&token).await.unwrap().is_none());
        assert!(sessions.validate(&token).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_end_all_spares_current() {
        let h = Harness::new();
        let id = PrincipalId::new();
        let keep = h.session_token(&id, EMAIL).await;
        let other_a = h.session_token(&id, EMAIL).await;
        let other_b = h.session_token(&id, EMAIL).await;
        let sessions = h.auth.sessions();

        let current = sessions.validate(&keep).await.unwrap().unwrap();
        assert_eq!(sessions.end_all(&id, Some(&current.id)).await.unwrap(), 2);
        assert!(sessions.validate(&keep).await.unwrap().is_some());
        assert!(sessions.validate(&other_a).await.unwrap().is_none());
        assert!(sessions.validate(&other_b).await.unwrap().is_none());

        assert_eq!(sessions.end_all(&id, None).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_activity_covers_every_requested_id() {
        let h = Harness::new();
        let active = PrincipalId::new();
        let idle = PrincipalId::new();
        h.session_token(&active, EMAIL).await;
        h.session_token(&active, EMAIL).await;

        let activity = h
            .auth
            .sessions()
            .active_sessions_for(&[active, idle])
            .await
            .unwrap();
        assert_eq!(activity[&active].active_sessions, 2);
        assert_eq!(activity[&active].last_activity, Some(start()));
        assert_eq!(activity[&idle].active_sessions, 0);
        assert_eq!(activity[&idle].last_activity, None);
    }

    #[tokio::test]
    async fn test_sweep_deactivates_then_purges() {
        let h = Harness::new();
        let id = PrincipalId::new();
        h.session_token(&id, EMAIL).await;
        let sessions = h.auth.sessions();

        h.clock.advance(Duration::hours(9));
        let outcome = sessions.sweep_expired().await.unwrap();
        assert_eq!((outcome.deactivated, outcome.purged), (1, 0));
        assert_eq!(h.repo.sessions_of(&id).len(), 1);

        h.clock.advance(Duration::days(31));
        let outcome = sessions.sweep_expired().await.unwrap();
        assert_eq!((outcome.deactivated, outcome.purged), (0, 1));
        assert!(h.repo.sessions_of(&id).is_empty());
    }

    #[tokio::test]
    async fn test_opportunistic_sweep_is_throttled() {
        let h = Harness::new();
        let token = h.session_token(&PrincipalId::new(), EMAIL).await;
        let sessions = h.auth.sessions();
        assert_eq!(sessions.last_sweep_ms(), i64::MIN);

        sessions.validate(&token).await.unwrap();
        let first = sessions.last_sweep_ms();
        assert_eq!(first, h.clock.now_ms());

        h.clock.advance(Duration::minutes(1));
        sessions.validate(&token).await.unwrap();
        assert_eq!(sessions.last_sweep_ms(), first);

        h.clock.advance(Duration::minutes(5));
        sessions.validate(&token).await.unwrap();
        assert_eq!(sessions.last_sweep_ms(), h.clock.now_ms());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_gives_up_after_retries() {
        let h = Harness::new();
        h.repo.set_failing(true);
        let result = h.auth.sessions().sweep_expired().await;
        assert!(matches!(result, Err(AuthError::Internal(_))));
    }

    #[tokio::test]
    async fn test_background_sweeper_stops() {
        let h = Harness::new();
        let handle = h.auth.sessions().spawn_sweeper();
        assert!(handle.is_running());
        handle.stop();
    }
}

// ============================================================================
// Permissions
// ============================================================================

mod permission_tests {
    use super::*;
    use crate::domain::entity::access::{AccessContext, AuditResult, LastRecordResource};
    use crate::domain::value_object::principal_status::PrincipalStatus;
    use crate::error::AuthError;

    const KEY: &str = "view.schedule";

    async fn dispatcher(h: &Harness) -> PrincipalId {
        h.repo.add_role_grant("dispatcher", KEY);
        h.seed_employee("dispatch@example.com", &["dispatcher"]).await
    }

    #[tokio::test]
    async fn test_explicit_grant_and_audit() {
        let h = Harness::new();
        let id = dispatcher(&h).await;
        let ctx = AccessContext {
            ip_address: Some("10.9.0.1".into()),
            ..AccessContext::default()
        }
        .resource("schedule", "42");

        assert!(h.arbiter.check(&id, KEY, &ctx).await);

        let audit = h.repo.audit_entries();
        assert_eq!(audit.len(), 1);
        assert_eq!(audit[0].result, AuditResult::Granted);
        assert_eq!(audit[0].role_used.as_deref(), Some("dispatcher"));
        assert_eq!(audit[0].resource_id.as_deref(), Some("42"));
        assert_eq!(audit[0].ip_address.as_deref(), Some("10.9.0.1"));
    }

    #[tokio::test]
    async fn test_missing_grant_denies() {
        let h = Harness::new();
        let id = dispatcher(&h).await;
        assert!(!h.arbiter.check(&id, "manage.roles", &AccessContext::default()).await);

        let audit = h.repo.audit_entries();
        assert_eq!(audit[0].result, AuditResult::Denied);
        assert_eq!(audit[0].details.as_deref(), Some("no_grant"));
    }

    #[tokio::test]
    async fn test_override_role_holds_everything() {
        let h = Harness::new();
        let id = h.seed_employee("root@example.com", &["super_admin"]).await;
        assert!(h.arbiter.check(&id, "anything.at.all", &AccessContext::default()).await);
        assert_eq!(h.repo.audit_entries()[0].role_used.as_deref(), Some("super_admin"));
    }

    #[tokio::test]
    async fn test_decisions_are_cached_until_invalidated() {
        let h = Harness::new();
        let id = dispatcher(&h).await;
        let ctx = AccessContext::default();

        assert!(h.arbiter.check(&id, KEY, &ctx).await);
        h.repo.revoke_role_grant("dispatcher", KEY);
        assert!(h.arbiter.check(&id, KEY, &ctx).await);
        assert_eq!(h.repo.audit_entries()[1].details.as_deref(), Some("cached"));

        h.arbiter.invalidate(Some(&id)).await.unwrap();
        assert!(!h.arbiter.check(&id, KEY, &ctx).await);
    }

    #[tokio::test]
    async fn test_cache_expires() {
        let h = Harness::new();
        let id = dispatcher(&h).await;
        let ctx = AccessContext::default();

        assert!(h.arbiter.check(&id, KEY, &ctx).await);
        h.repo.revoke_role_grant("dispatcher", KEY);
        h.clock.advance(Duration::minutes(6));
        assert!(!h.arbiter.check(&id, KEY, &ctx).await);
    }

    #[tokio::test]
    async fn test_resolution_failure_denies_without_caching() {
        let h = Harness::new();
        let id = dispatcher(&h).await;
        let ctx = AccessContext::default();

        h.repo.set_failing(true);
        assert!(!h.arbiter.check(&id, KEY, &ctx).await);

        h.repo.set_failing(false);
        assert!(h.arbiter.check(&id, KEY, &ctx).await);
    }

    #[tokio::test]
    async fn test_audit_failure_does_not_change_decision() {
        let h = Harness::new();
        let id = dispatcher(&h).await;
        h.repo.set_audit_failing(true);

        assert!(h.arbiter.check(&id, KEY, &AccessContext::default()).await);
        assert!(h.repo.audit_entries().is_empty());
    }

    #[tokio::test]
    async fn test_unaudited_check() {
        let h = Harness::new();
        let id = dispatcher(&h).await;
        assert!(h.arbiter.check(&id, KEY, &AccessContext::unaudited()).await);
        assert!(h.repo.audit_entries().is_empty());
    }

    #[tokio::test]
    async fn test_inactive_principal_and_permission() {
        let h = Harness::new();
        h.repo.add_role_grant("dispatcher", KEY);
        let mut suspended = h.employee("away@example.com", &["dispatcher"]);
        suspended.status = PrincipalStatus::Suspended;
        let suspended = h.seed(suspended).await;
        assert!(!h.arbiter.check(&suspended, KEY, &AccessContext::default()).await);
        assert_eq!(
            h.repo.audit_entries()[0].details.as_deref(),
            Some("inactive_principal")
        );

        let active = h.seed_employee("here@example.com", &["dispatcher"]).await;
        h.repo.set_permission_active(KEY, false);
        assert!(!h.arbiter.check(&active, KEY, &AccessContext::default()).await);
    }

    #[tokio::test]
    async fn test_client_role_grants() {
        let h = Harness::new();
        h.repo.add_role_grant("client_owner", "view.invoices");
        let id = h.seed_client("owner@example.com").await;
        assert!(h.arbiter.check(&id, "view.invoices", &AccessContext::default()).await);
    }

    #[tokio::test]
    async fn test_require_maps_to_permission_denied() {
        let h = Harness::new();
        let id = dispatcher(&h).await;
        let err = h
            .arbiter
            .require(&id, "manage.roles", &AccessContext::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::PermissionDenied { ref permission } if permission == "manage.roles"));
        assert_eq!(err.code(), "INSUFFICIENT_ACCESS_LEVEL");
    }

    #[tokio::test]
    async fn test_list_permissions() {
        let h = Harness::new();
        h.repo.add_role_grant("dispatcher", "view.schedule");
        h.repo.add_role_grant("dispatcher", "edit.schedule");
        h.repo.add_role_grant("auditor", "view.audit");
        h.repo.add_role_grant("auditor", "view.schedule");
        let id = h
            .seed_employee("multi@example.com", &["dispatcher", "auditor"])
            .await;
        assert_eq!(
            h.arbiter.list_permissions(&id).await.unwrap(),
            vec!["edit.schedule", "view.audit", "view.schedule"]
        );

        let root = h.seed_employee("root@example.com", &["super_admin"]).await;
        h.repo.add_permission("manage.roles");
        let all = h.arbiter.list_permissions(&root).await.unwrap();
        assert_eq!(all.len(), 4);
        assert!(all.contains(&"manage.roles".to_string()));

        assert!(h.arbiter.list_permissions(&PrincipalId::new()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_last_record_protection() {
        let h = Harness::new();
        let actor = dispatcher(&h).await;
        let root = h.seed_employee("root@example.com", &["super_admin"]).await;
        let scope = uuid::Uuid::new_v4();
        let resource = LastRecordResource::ServiceLocation;

        h.repo.set_active_records(resource, scope, 2);
        assert!(h.arbiter.check_last_record_protection(resource, &scope, &actor).await.allowed);

        h.repo.set_active_records(resource, scope, 1);
        let decision = h.arbiter.check_last_record_protection(resource, &scope, &actor).await;
        assert!(!decision.allowed);
        assert_eq!(decision.count, 1);
        assert_eq!(
            decision.message.as_deref(),
            Some("Cannot delete the last remaining service location. At least one must remain.")
        );

        assert!(h.arbiter.check_last_record_protection(resource, &scope, &root).await.allowed);

        let empty = uuid::Uuid::new_v4();
        let decision = h
            .arbiter
            .check_last_record_protection(LastRecordResource::Client, &empty, &actor)
            .await;
        assert!(decision.allowed);
        assert_eq!(decision.count, 0);

        h.repo.set_failing(true);
        let decision = h.arbiter.check_last_record_protection(resource, &scope, &root).await;
        assert!(!decision.allowed);
        assert_eq!(decision.message.as_deref(), Some("Unable to verify remaining records"));
    }

    #[tokio::test]
    async fn test_invalidate_all() {
        let h = Harness::new();
        let id = dispatcher(&h).await;
        let ctx = AccessContext::unaudited();
        assert!(h.arbiter.check(&id, KEY, &ctx).await);
        h.repo.revoke_role_grant("dispatcher", KEY);

        h.arbiter.invalidate(None).await.unwrap();
        assert!(!h.arbiter.check(&id, KEY, &ctx).await);
    }
}

// ============================================================================
// Login orchestration
// ============================================================================

mod orchestrator_tests {
    use super::*;
    use crate::application::login::SignUpInput;
    use crate::domain::entity::abuse::LimitReason;
    use crate::domain::entity::trusted_device::TrustedDevice;
    use crate::error::AuthError;

    const CLIENT: &str = "client.one@example.com";
    const EMPLOYEE: &str = "staff.member@example.com";

    fn signup(email: &str, ip: &str) -> SignUpInput {
        SignUpInput {
            email: email.to_string(),
            secret: CLIENT_SECRET.to_string(),
            first_name: Some("Iris".into()),
            last_name: Some("Vale".into()),
            phone: None,
            client: client_at(ip),
        }
    }

    #[tokio::test]
    async fn test_client_login_opens_session() {
        let h = Harness::new();
        let mut rx = h.events.subscribe();
        let id = h.seed_client(CLIENT).await;

        let login = h.login_client(CLIENT, CLIENT_SECRET).await;
        assert_eq!(login.principal_id, id);
        assert_eq!(login.kind, PrincipalKind::Client);
        assert!(!login.expiration.requires_change());

        let session = h
            .auth
            .validate_session(login.issued.token.as_str())
            .await
            .unwrap();
        assert_eq!(session.principal_id, id);
        assert_eq!(h.repo.principal(&id).unwrap().last_login_at, Some(start()));

        let events = drain(&mut rx);
        assert!(events.iter().any(|e| matches!(e, AuthEvent::Login { principal_id, .. } if *principal_id == id)));
    }

    #[tokio::test]
    async fn test_every_failure_is_indistinguishable() {
        let h = Harness::new();
        h.seed_client(CLIENT).await;
        let mut unverified = h.client("pending@example.com");
        unverified.email_verified = false;
        h.seed(unverified).await;

        let attempts = [
            (CLIENT, NEW_SECRET),
            ("ghost@example.com", CLIENT_SECRET),
            ("pending@example.com", CLIENT_SECRET),
        ];
        for (identity, secret) in attempts {
            let err = h
                .auth
                .login(login_input(PrincipalKind::Client, identity, secret, "10.0.0.2"))
                .await
                .unwrap_err();
            assert!(matches!(err, AuthError::InvalidCredentials));
            assert_eq!(err.to_string(), "Invalid email or password");
        }

        let reasons: Vec<_> = h.repo.login_failures().iter().map(|r| r.reason).collect();
        assert_eq!(reasons, vec!["wrong_secret", "no_account", "unverified"]);
    }

    #[tokio::test]
    async fn test_client_lockout_even_with_right_secret() {
        let h = Harness::new();
        h.seed_client(CLIENT).await;
        for _ in 0..5 {
            let _ = h
                .auth
                .login(login_input(PrincipalKind::Client, CLIENT, NEW_SECRET, "10.0.0.3"))
                .await;
        }
        let err = h
            .auth
            .login(login_input(PrincipalKind::Client, CLIENT, CLIENT_SECRET, "10.0.0.3"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AuthError::RateLimited {
                reason: LimitReason::LoginRateLimit,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_employee_login_goes_through_mfa() {
        let h = Harness::new();
        let id = h.seed_employee(EMPLOYEE, &[]).await;

        let outcome = h
            .auth
            .login(login_input(PrincipalKind::Employee, EMPLOYEE, EMPLOYEE_SECRET, "10.0.1.1"))
            .await
            .unwrap();
        match outcome {
            LoginOutcome::MfaRequired {
                channels,
                expires_at,
            } => {
                assert_eq!(channels, DeliveryChannels::Email);
                assert_eq!(expires_at, start() + Duration::minutes(10));
            }
            other => panic!("expected MFA, got {other:?}"),
        }
        assert!(h.repo.sessions_of(&id).is_empty());

        let code = h.delivery.last_code_for(EMPLOYEE).unwrap();
        let login = h
            .auth
            .verify_mfa(PrincipalKind::Employee, EMPLOYEE, &code, &client_at("10.0.1.1"))
            .await
            .unwrap();
        assert_eq!(login.principal_id, id);
        assert_eq!(h.repo.sessions_of(&id).len(), 1);
    }

    #[tokio::test]
    async fn test_wrong_mfa_code_counts_as_failure() {
        let h = Harness::new();
        h.seed_employee(EMPLOYEE, &[]).await;
        h.auth
            .login(login_input(PrincipalKind::Employee, EMPLOYEE, EMPLOYEE_SECRET, "10.0.1.2"))
            .await
            .unwrap();

        let code = h.delivery.last_code_for(EMPLOYEE).unwrap();
        let wrong = if code == "000000" { "111111" } else { "000000" };
        let err = h
            .auth
            .verify_mfa(PrincipalKind::Employee, EMPLOYEE, wrong, &client_at("10.0.1.2"))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::InvalidCode));
        assert_eq!(h.repo.login_failures()[0].reason, "invalid_code");
    }

    #[tokio::test]
    async fn test_mfa_code_cannot_cross_kinds() {
        let h = Harness::new();
        h.seed_employee(EMPLOYEE, &[]).await;
        h.auth
            .login(login_input(PrincipalKind::Employee, EMPLOYEE, EMPLOYEE_SECRET, "10.0.1.3"))
            .await
            .unwrap();
        let code = h.delivery.last_code_for(EMPLOYEE).unwrap();

        let err = h
            .auth
            .verify_mfa(PrincipalKind::Client, EMPLOYEE, &code, &client_at("10.0.1.3"))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::InvalidCode));
        h.auth
            .verify_mfa(PrincipalKind::Employee, EMPLOYEE, &code, &client_at("10.0.1.3"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_shared_email_codes_stay_with_their_kind() {
        let mut config = test_config();
        config.mfa.require_for_clients = true;
        let h = Harness::with_config(config);
        let shared = "shared.inbox@example.com";
        let employee = h.seed_employee(shared, &[]).await;
        let client = h.seed(h.client(shared)).await;

        h.auth
            .login(login_input(PrincipalKind::Client, shared, CLIENT_SECRET, "10.0.1.6"))
            .await
            .unwrap();
        let client_code = h.delivery.last_code_for(shared).unwrap();

        assert!(matches!(
            h.auth
                .verify_mfa(PrincipalKind::Employee, shared, &client_code, &client_at("10.0.1.6"))
                .await,
            Err(AuthError::InvalidCode)
        ));
        assert!(h.repo.sessions_of(&employee).is_empty());

        let login = h
            .auth
            .verify_mfa(PrincipalKind::Client, shared, &client_code, &client_at("10.0.1.6"))
            .await
            .unwrap();
        assert_eq!(login.principal_id, client);
    }

    #[tokio::test]
    async fn test_trusted_device_skips_mfa() {
        let h = Harness::new();
        let id = h.seed_employee(EMPLOYEE, &[]).await;
        h.repo.add_trusted_device(TrustedDevice::new(
            id,
            PrincipalKind::Employee,
            "office-desktop",
            h.clock.now(),
            None,
        ));

        let mut input = login_input(PrincipalKind::Employee, EMPLOYEE, EMPLOYEE_SECRET, "10.0.1.4");
        input.client = input.client.with_device_fingerprint("office-desktop");
        let outcome = h.auth.login(input).await.unwrap();
        assert!(matches!(outcome, LoginOutcome::Authenticated(_)));
        assert!(h.delivery.messages().is_empty());
    }

    #[tokio::test]
    async fn test_undeliverable_mfa_code_fails_login() {
        let h = Harness::new();
        h.seed_employee(EMPLOYEE, &[]).await;
        h.delivery.set_failing(true);
        let err = h
            .auth
            .login(login_input(PrincipalKind::Employee, EMPLOYEE, EMPLOYEE_SECRET, "10.0.1.5"))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::DeliveryFailed));
    }

    #[tokio::test]
    async fn test_forced_change_is_surfaced() {
        let h = Harness::new();
        let mut client = h.client(CLIENT);
        client.force_password_change = true;
        h.seed(client).await;

        let login = h.login_client(CLIENT, CLIENT_SECRET).await;
        assert!(login.expiration.force_change);
        assert!(login.expiration.requires_change());
    }

    #[tokio::test]
    async fn test_logout_is_terminal() {
        let h = Harness::new();
        h.seed_client(CLIENT).await;
        let login = h.login_client(CLIENT, CLIENT_SECRET).await;
        let token = login.issued.token.as_str();

        h.auth.logout(token).await.unwrap();
        assert!(matches!(
            h.auth.logout(token).await,
            Err(AuthError::SessionAlreadyEnded)
        ));
        assert!(matches!(
            h.auth.validate_session(token).await,
            Err(AuthError::SessionInvalid)
        ));
    }

    #[tokio::test]
    async fn test_forgot_password_never_reveals_accounts() {
        let h = Harness::new();
        h.seed_client(CLIENT).await;
        let client = client_at("10.0.2.9");

        h.auth
            .forgot_password(PrincipalKind::Client, "ghost@example.com", DeliveryChannels::Email, &client)
            .await
            .unwrap();
        h.auth
            .forgot_password(PrincipalKind::Client, "not an email", DeliveryChannels::Email, &client)
            .await
            .unwrap();
        settle().await;
        assert!(h.delivery.messages().is_empty());

        h.delivery.set_failing(true);
        h.auth
            .forgot_password(PrincipalKind::Client, CLIENT, DeliveryChannels::Email, &client)
            .await
            .unwrap();
        settle().await;
    }

    #[tokio::test]
    async fn test_forgot_password_returns_before_delivery() {
        let h = Harness::new();
        h.seed_client(CLIENT).await;

        h.auth
            .forgot_password(PrincipalKind::Client, CLIENT, DeliveryChannels::Email, &client_at("10.0.2.8"))
            .await
            .unwrap();
        assert!(h.delivery.messages().is_empty());

        settle().await;
        assert!(h.delivery.last_code_for(CLIENT).is_some());
    }

    #[tokio::test]
    async fn test_forgot_password_is_rate_limited_per_ip() {
        let h = Harness::new();
        h.seed_client(CLIENT).await;
        let client = client_at("10.0.2.7");

        for i in 0..5 {
            h.auth
                .forgot_password(
                    PrincipalKind::Client,
                    &format!("nobody{i}@example.com"),
                    DeliveryChannels::Email,
                    &client,
                )
                .await
                .unwrap();
        }
        let err = h
            .auth
            .forgot_password(PrincipalKind::Client, CLIENT, DeliveryChannels::Email, &client)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AuthError::RateLimited {
                reason: LimitReason::PasswordResetRateLimit,
                ..
            }
        ));

        h.auth
            .forgot_password(PrincipalKind::Client, CLIENT, DeliveryChannels::Email, &client_at("10.0.2.6"))
            .await
            .unwrap();
        h.clock.advance(Duration::minutes(16));
        h.auth
            .forgot_password(PrincipalKind::Client, CLIENT, DeliveryChannels::Email, &client)
            .await
            .unwrap();
    }

    async fn request_reset_code(h: &Harness, kind: PrincipalKind, email: &str) -> String {
        h.auth
            .forgot_password(kind, email, DeliveryChannels::Email, &client_at("10.0.2.5"))
            .await
            .unwrap();
        settle().await;
        h.delivery.last_code_for(email).unwrap()
    }

    #[tokio::test]
    async fn test_reset_password_flow() {
        let h = Harness::new();
        let mut rx = h.events.subscribe();
        let id = h.seed_client(CLIENT).await;
        let before = h.login_client(CLIENT, CLIENT_SECRET).await;
        let client = client_at("10.0.2.1");

        let code = request_reset_code(&h, PrincipalKind::Client, CLIENT).await;
        h.auth
            .reset_password(PrincipalKind::Client, CLIENT, &code, NEW_SECRET, &client)
            .await
            .unwrap();

        assert!(h.auth.validate_session(before.issued.token.as_str()).await.is_err());
        assert!(matches!(
            h.auth
                .login(login_input(PrincipalKind::Client, CLIENT, CLIENT_SECRET, "10.0.2.1"))
                .await,
            Err(AuthError::InvalidCredentials)
        ));
        h.login_client(CLIENT, NEW_SECRET).await;
        assert_eq!(h.repo.history_len(&id), 2);

        assert!(matches!(
            h.auth
                .reset_password(PrincipalKind::Client, CLIENT, &code, "Another-Fresh-91!", &client)
                .await,
            Err(AuthError::InvalidCode)
        ));
        assert!(drain(&mut rx).iter().any(|e| matches!(e, AuthEvent::PasswordReset { .. })));
    }

    #[tokio::test]
    async fn test_policy_violation_does_not_burn_reset_code() {
        let h = Harness::new();
        h.seed_client(CLIENT).await;
        let code = request_reset_code(&h, PrincipalKind::Client, CLIENT).await;
        let client = client_at("10.0.2.2");

        match h
            .auth
            .reset_password(PrincipalKind::Client, CLIENT, &code, "short", &client)
            .await
        {
            Err(AuthError::PasswordPolicy { feedback }) => assert!(!feedback.is_empty()),
            other => panic!("expected policy violation, got {other:?}"),
        }
        assert!(matches!(
            h.auth
                .reset_password(PrincipalKind::Client, CLIENT, &code, CLIENT_SECRET, &client)
                .await,
            Err(AuthError::PasswordReused)
        ));
        h.auth
            .reset_password(PrincipalKind::Client, CLIENT, &code, NEW_SECRET, &client)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_reset_with_wrong_code() {
        let h = Harness::new();
        h.seed_client(CLIENT).await;
        let err = h
            .auth
            .reset_password(PrincipalKind::Client, CLIENT, "123456", NEW_SECRET, &client_at("10.0.2.3"))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::InvalidCode));
        assert_eq!(h.repo.login_failures()[0].reason, "invalid_code");
    }

    #[tokio::test]
    async fn test_reset_without_code_reveals_nothing_about_password() {
        let h = Harness::new();
        h.seed_client(CLIENT).await;
        let client = client_at("10.0.2.4");

        // Current password would be rejected as reused, a weak one by policy
        for secret in [CLIENT_SECRET, "short"] {
            let err = h
                .auth
                .reset_password(PrincipalKind::Client, CLIENT, "000000", secret, &client)
                .await
                .unwrap_err();
            assert!(matches!(err, AuthError::InvalidCode));
        }

        let err = h
            .auth
            .reset_password(PrincipalKind::Client, "ghost@example.com", "000000", "short", &client)
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::InvalidCode));
    }

    #[tokio::test]
    async fn test_reset_code_dies_after_repeated_wrong_guesses() {
        let h = Harness::new();
        h.seed_client(CLIENT).await;
        let code = request_reset_code(&h, PrincipalKind::Client, CLIENT).await;
        let wrong = if code == "000000" { "111111" } else { "000000" };

        // Spread across addresses so only the per-code budget applies
        for i in 0..h.auth.config().mfa.max_attempts {
            let err = h
                .auth
                .reset_password(PrincipalKind::Client, CLIENT, wrong, NEW_SECRET, &client_at(&format!("10.0.5.{i}")))
                .await
                .unwrap_err();
            assert!(matches!(err, AuthError::InvalidCode));
        }

        assert!(matches!(
            h.auth
                .reset_password(PrincipalKind::Client, CLIENT, &code, NEW_SECRET, &client_at("10.0.5.99"))
                .await,
            Err(AuthError::InvalidCode)
        ));
        h.login_client(CLIENT, CLIENT_SECRET).await;
    }

    #[tokio::test]
    async fn test_reset_guesses_share_the_login_window() {
        let h = Harness::new();
        h.seed_client(CLIENT).await;
        let client = client_at("10.0.5.200");

        for _ in 0..5 {
            let _ = h
                .auth
                .reset_password(PrincipalKind::Client, CLIENT, "000000", NEW_SECRET, &client)
                .await;
        }
        let err = h
            .auth
            .reset_password(PrincipalKind::Client, CLIENT, "111111", NEW_SECRET, &client)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AuthError::RateLimited {
                reason: LimitReason::LoginRateLimit,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_employee_reset_cannot_use_client_code() {
        let h = Harness::new();
        let shared = "shared.inbox@example.com";
        h.seed_employee(shared, &[]).await;
        h.seed(h.client(shared)).await;

        let code = request_reset_code(&h, PrincipalKind::Client, shared).await;
        assert!(matches!(
            h.auth
                .reset_password(PrincipalKind::Employee, shared, &code, NEW_SECRET, &client_at("10.0.2.10"))
                .await,
            Err(AuthError::InvalidCode)
        ));
        h.auth
            .reset_password(PrincipalKind::Client, shared, &code, NEW_SECRET, &client_at("10.0.2.10"))
            .await
            .unwrap();
        h.login_client(shared, NEW_SECRET).await;
    }

    #[tokio::test]
    async fn test_change_password_keeps_current_session() {
        let h = Harness::new();
        let id = h.seed_client(CLIENT).await;
        let current = h.login_client(CLIENT, CLIENT_SECRET).await;
        let other = h.login_client(CLIENT, CLIENT_SECRET).await;

        h.auth
            .change_password(&id, &current.issued.session.id, CLIENT_SECRET, NEW_SECRET)
            .await
            .unwrap();

        assert!(h.auth.validate_session(current.issued.token.as_str()).await.is_ok());
        assert!(h.auth.validate_session(other.issued.token.as_str()).await.is_err());
        let principal = h.repo.principal(&id).unwrap();
        assert_eq!(principal.password_changed_at, Some(start()));
        assert!(!principal.force_password_change);
    }

    #[tokio::test]
    async fn test_change_password_rejections() {
        let h = Harness::new();
        let id = h.seed_client(CLIENT).await;
        let session = h.login_client(CLIENT, CLIENT_SECRET).await.issued.session.id;

        assert!(matches!(
            h.auth.change_password(&id, &session, NEW_SECRET, NEW_SECRET).await,
            Err(AuthError::IncorrectCurrentPassword)
        ));
        assert!(matches!(
            h.auth.change_password(&id, &session, CLIENT_SECRET, "weak").await,
            Err(AuthError::PasswordPolicy { .. })
        ));

        h.auth
            .change_password(&id, &session, CLIENT_SECRET, NEW_SECRET)
            .await
            .unwrap();
        assert!(matches!(
            h.auth.change_password(&id, &session, NEW_SECRET, CLIENT_SECRET).await,
            Err(AuthError::PasswordReused)
        ));
    }

    #[tokio::test]
    async fn test_signup_then_confirm() {
        let h = Harness::new();
        let mut rx = h.events.subscribe();
        let email = "new.client@example.com";

        let outcome = h.auth.sign_up(signup(email, "10.0.3.1")).await.unwrap();
        assert!(outcome.verification_sent);

        let principal = h.repo.principal(&outcome.principal_id).unwrap();
        assert!(!principal.email_verified);
        assert!(principal.roles.holds("client_owner"));
        assert_eq!(h.repo.history_len(&outcome.principal_id), 1);

        assert!(matches!(
            h.auth
                .login(login_input(PrincipalKind::Client, email, CLIENT_SECRET, "10.0.3.1"))
                .await,
            Err(AuthError::InvalidCredentials)
        ));

        let code = h.delivery.last_code_for(email).unwrap();
        h.auth
            .confirm_email(email, &code, &client_at("10.0.3.1"))
            .await
            .unwrap();
        assert!(h.repo.principal(&outcome.principal_id).unwrap().email_verified);
        h.login_client(email, CLIENT_SECRET).await;

        let events = drain(&mut rx);
        assert!(events.iter().any(|e| matches!(e, AuthEvent::Signup { .. })));
        assert!(events.iter().any(|e| matches!(e, AuthEvent::EmailConfirmed { .. })));
    }

    #[tokio::test]
    async fn test_signup_rejections() {
        let h = Harness::new();
        h.seed_client(CLIENT).await;

        assert!(matches!(
            h.auth.sign_up(signup(CLIENT, "10.0.3.2")).await,
            Err(AuthError::EmailTaken)
        ));

        let mut weak = signup("weak@example.com", "10.0.3.3");
        weak.secret = "password1".into();
        assert!(matches!(
            h.auth.sign_up(weak).await,
            Err(AuthError::PasswordPolicy { .. })
        ));

        assert!(matches!(
            h.auth.sign_up(signup("not-an-email", "10.0.3.4")).await,
            Err(AuthError::Validation(_))
        ));

        assert!(matches!(
            h.auth
                .confirm_email(CLIENT, "123456", &client_at("10.0.3.2"))
                .await,
            Err(AuthError::InvalidCode)
        ));
    }

    #[tokio::test]
    async fn test_confirm_email_guesses_are_limited() {
        let h = Harness::new();
        let email = "guess.target@example.com";
        h.auth.sign_up(signup(email, "10.0.3.7")).await.unwrap();
        let code = h.delivery.last_code_for(email).unwrap();
        let wrong = if code == "000000" { "111111" } else { "000000" };
        let client = client_at("10.0.3.8");

        for _ in 0..5 {
            assert!(matches!(
                h.auth.confirm_email(email, wrong, &client).await,
                Err(AuthError::InvalidCode)
            ));
        }
        assert!(matches!(
            h.auth.confirm_email(email, wrong, &client).await,
            Err(AuthError::RateLimited {
                reason: LimitReason::LoginRateLimit,
                ..
            })
        ));

        assert!(matches!(
            h.auth
                .confirm_email(email, &code, &client_at("10.0.3.9"))
                .await,
            Err(AuthError::InvalidCode)
        ));
        assert!(h.repo.login_failures().iter().all(|r| r.reason == "invalid_code"));
    }

    #[tokio::test]
    async fn test_signup_survives_delivery_failure() {
        let h = Harness::new();
        h.delivery.set_failing(true);
        let outcome = h
            .auth
            .sign_up(signup("quiet@example.com", "10.0.3.5"))
            .await
            .unwrap();
        assert!(!outcome.verification_sent);
        assert!(h.repo.principal(&outcome.principal_id).is_some());
    }

    #[tokio::test]
    async fn test_signup_quota_per_ip() {
        let h = Harness::new();
        for i in 0..3 {
            h.auth
                .sign_up(signup(&format!("bulk{i}@example.com"), "10.0.3.6"))
                .await
                .unwrap();
        }
        let err = h
            .auth
            .sign_up(signup("bulk9@example.com", "10.0.3.6"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AuthError::RateLimited {
                reason: LimitReason::IpSignupLimit,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_revoke_sessions() {
        let h = Harness::new();
        let id = h.seed_client(CLIENT).await;
        h.login_client(CLIENT, CLIENT_SECRET).await;
        h.login_client(CLIENT, CLIENT_SECRET).await;
        assert_eq!(h.auth.revoke_sessions(&id).await.unwrap(), 2);
        assert_eq!(h.auth.revoke_sessions(&id).await.unwrap(), 0);
    }
}

// ============================================================================
// Error rendering
// ============================================================================

mod error_tests {
    use crate::domain::entity::abuse::LimitReason;
    use crate::error::AuthError;
    use axum::http::{StatusCode, header};
    use axum::response::IntoResponse;

    async fn body(err: AuthError) -> (StatusCode, axum::http::HeaderMap, serde_json::Value) {
        let response = err.into_response();
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, headers, serde_json::from_slice(&bytes).unwrap())
    }

    #[test]
    fn test_status_and_code_table() {
        let cases = [
            (AuthError::InvalidCredentials, 401, "INVALID_CREDENTIALS"),
            (AuthError::SessionInvalid, 401, "SESSION_INVALID"),
            (AuthError::SessionAlreadyEnded, 404, "SESSION_ALREADY_ENDED"),
            (AuthError::InvalidCode, 400, "INVALID_OR_EXPIRED_CODE"),
            (AuthError::PasswordReused, 400, "PASSWORD_REUSED_RECENTLY"),
            (AuthError::IncorrectCurrentPassword, 400, "INCORRECT_CURRENT_PASSWORD"),
            (AuthError::EmailTaken, 409, "EMAIL_ALREADY_REGISTERED"),
            (AuthError::ChallengeUnavailable, 503, "MFA_CHALLENGE_UNAVAILABLE"),
            (
                AuthError::PermissionDenied {
                    permission: "manage.roles".into(),
                },
                403,
                "INSUFFICIENT_ACCESS_LEVEL",
            ),
            (
                AuthError::LastRecordProtected("last one".into()),
                403,
                "LAST_RECORD_PROTECTION",
            ),
        ];
        for (err, status, code) in cases {
            assert_eq!(err.status_code().as_u16(), status, "{code}");
            assert_eq!(err.code(), code);
        }
    }

    #[test]
    fn test_limit_reason_codes() {
        for (reason, code) in [
            (LimitReason::SuspiciousActivity, "SUSPICIOUS_ACTIVITY_DETECTED"),
            (LimitReason::EmployeeLoginRateLimit, "EMPLOYEE_LOGIN_RATE_LIMIT_EXCEEDED"),
            (LimitReason::IpSignupLimit, "IP_SIGNUP_LIMIT_EXCEEDED"),
            (LimitReason::GlobalSignupLimit, "GLOBAL_SIGNUP_LIMIT_EXCEEDED"),
            (LimitReason::PasswordResetRateLimit, "PASSWORD_RESET_RATE_LIMIT_EXCEEDED"),
        ] {
            let err = AuthError::RateLimited {
                reason,
                retry_after_secs: 1,
            };
            assert_eq!(err.code(), code);
            assert_eq!(err.status_code(), StatusCode::TOO_MANY_REQUESTS);
        }
    }

    #[tokio::test]
    async fn test_rate_limit_response() {
        let (status, headers, json) = body(AuthError::RateLimited {
            reason: LimitReason::SuspiciousActivity,
            retry_after_secs: 30,
        })
        .await;
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(headers.get(header::RETRY_AFTER).unwrap(), "30");
        assert_eq!(json["code"], "SUSPICIOUS_ACTIVITY_DETECTED");
        assert_eq!(json["retryAfter"], 30);
    }

    #[tokio::test]
    async fn test_policy_feedback_is_specific() {
        let (status, _, json) = body(AuthError::PasswordPolicy {
            feedback: vec!["Password must contain at least one number".into()],
        })
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["feedback"][0], "Password must contain at least one number");
    }

    #[tokio::test]
    async fn test_internal_details_stay_hidden() {
        let (status, _, json) = body(AuthError::Internal("pool exhausted at db-3".into())).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!json.to_string().contains("db-3"));
    }
}

// ============================================================================
// HTTP router
// ============================================================================

mod router_tests {
    use super::*;
    use crate::domain::entity::access::{AuditResult, LastRecordResource};
    use crate::presentation::router::auth_router;
    use crate::presentation::state::AuthAppState;
    use axum::Router;
    use axum::body::Body;
    use axum::extract::connect_info::MockConnectInfo;
    use axum::http::{HeaderMap, Method, Request, StatusCode, header};
    use serde_json::{Value, json};
    use std::net::SocketAddr;
    use tower::ServiceExt;

    fn app(h: &Harness) -> Router {
        let state =
            AuthAppState::<TestStack>::new(h.auth.clone(), h.arbiter.clone(), h.events.clone());
        auth_router(state).layer(MockConnectInfo(SocketAddr::from(([10, 0, 0, 7], 40_000))))
    }

    fn json_request(method: Method, uri: &str, token: Option<&str>, body: Value) -> Request<Body> {
        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .header(header::USER_AGENT, "router-test");
        if let Some(token) = token {
            builder = builder.header(header::COOKIE, format!("auth_session={token}"));
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    fn get(uri: &str, token: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().method(Method::GET).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::COOKIE, format!("auth_session={token}"));
        }
        builder.body(Body::empty()).unwrap()
    }

    async fn send(app: &Router, request: Request<Body>) -> (StatusCode, HeaderMap, Value) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, headers, json)
    }

    fn set_cookie(headers: &HeaderMap) -> String {
        headers
            .get(header::SET_COOKIE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string()
    }

    fn login_body(kind: &str, identity: &str, secret: &str) -> Value {
        json!({ "kind": kind, "identity": identity, "secret": secret })
    }

    #[tokio::test]
    async fn test_login_sets_cookie_and_session_works() {
        let h = Harness::new();
        let id = h.seed_client("web@example.com").await;
        let app = app(&h);

        let (status, headers, json) = send(
            &app,
            json_request(
                Method::POST,
                "/login",
                None,
                login_body("client", "web@example.com", CLIENT_SECRET),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["requiresMfa"], false);
        assert_eq!(json["principalId"], serde_json::to_value(id).unwrap());

        let cookie = set_cookie(&headers);
        assert!(cookie.starts_with("auth_session="));
        assert!(cookie.contains("HttpOnly"));
        assert!(cookie.contains("Max-Age=28800"));
        assert!(!cookie.contains("Secure"));

        let token = json["session"]["token"].as_str().unwrap().to_string();
        let (status, _, json) = send(&app, get("/session", Some(&token))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["principalId"], serde_json::to_value(id).unwrap());

        let bearer = Request::builder()
            .method(Method::POST)
            .uri("/session/heartbeat")
            .header(header::AUTHORIZATION, format!("Bearer {token}"))
            .body(Body::empty())
            .unwrap();
        let (status, _, json) = send(&app, bearer).await;
        assert_eq!(status, StatusCode::OK);
        assert!(json["expiresAt"].is_string());
    }

    #[tokio::test]
    async fn test_failed_logins_render_identically() {
        let h = Harness::new();
        h.seed_client("web@example.com").await;
        let app = app(&h);

        let (status, _, wrong) = send(
            &app,
            json_request(
                Method::POST,
                "/login",
                None,
                login_body("client", "web@example.com", NEW_SECRET),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(wrong["code"], "INVALID_CREDENTIALS");

        let (status, _, unknown) = send(
            &app,
            json_request(
                Method::POST,
                "/login",
                None,
                login_body("client", "ghost@example.com", CLIENT_SECRET),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(wrong, unknown);
    }

    #[tokio::test]
    async fn test_login_rate_limit_is_429() {
        let h = Harness::new();
        h.seed_client("web@example.com").await;
        let app = app(&h);
        for _ in 0..5 {
            send(
                &app,
                json_request(
                    Method::POST,
                    "/login",
                    None,
                    login_body("client", "web@example.com", NEW_SECRET),
                ),
            )
            .await;
        }
        let (status, headers, json) = send(
            &app,
            json_request(
                Method::POST,
                "/login",
                None,
                login_body("client", "web@example.com", CLIENT_SECRET),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
        assert!(headers.contains_key(header::RETRY_AFTER));
        assert_eq!(json["code"], "LOGIN_RATE_LIMIT_EXCEEDED");
        assert!(json["retryAfter"].as_u64().unwrap() > 0);
    }

    #[tokio::test]
    async fn test_employee_mfa_over_http() {
        let h = Harness::new();
        h.seed_employee("desk@example.com", &[]).await;
        let app = app(&h);

        let (status, headers, json) = send(
            &app,
            json_request(
                Method::POST,
                "/login",
                None,
                login_body("employee", "desk@example.com", EMPLOYEE_SECRET),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["requiresMfa"], true);
        assert!(json.get("session").is_none());
        assert!(!headers.contains_key(header::SET_COOKIE));

        let code = h.delivery.last_code_for("desk@example.com").unwrap();
        let (status, headers, json) = send(
            &app,
            json_request(
                Method::POST,
                "/mfa/verify",
                None,
                json!({ "kind": "employee", "identity": "desk@example.com", "code": code }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(json["session"]["token"].is_string());
        assert!(set_cookie(&headers).starts_with("auth_session="));

        let (status, _, json) = send(
            &app,
            json_request(
                Method::POST,
                "/mfa/verify",
                None,
                json!({ "kind": "employee", "identity": "desk@example.com", "code": code }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["code"], "INVALID_OR_EXPIRED_CODE");
    }

    #[tokio::test]
    async fn test_session_requires_token() {
        let h = Harness::new();
        let (status, _, json) = send(&app(&h), get("/session", None)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(json["code"], "SESSION_INVALID");

        let (status, _, _) = send(&app(&h), get("/session", Some("forged-token"))).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_logout_clears_cookie_every_time() {
        let h = Harness::new();
        let id = h.seed_client("web@example.com").await;
        let token = h.session_token(&id, "web@example.com").await;
        let app = app(&h);

        let (status, headers, _) =
            send(&app, json_request(Method::POST, "/logout", Some(&token), json!({}))).await;
        assert_eq!(status, StatusCode::OK);
        assert!(set_cookie(&headers).contains("Max-Age=0"));

        let (status, headers, json) =
            send(&app, json_request(Method::POST, "/logout", Some(&token), json!({}))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(json["code"], "SESSION_ALREADY_ENDED");
        assert!(set_cookie(&headers).contains("Max-Age=0"));
    }

    #[tokio::test]
    async fn test_logout_without_token_is_already_ended() {
        let h = Harness::new();
        let (status, headers, json) =
            send(&app(&h), json_request(Method::POST, "/logout", None, json!({}))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(json["code"], "SESSION_ALREADY_ENDED");
        assert!(set_cookie(&headers).contains("Max-Age=0"));
    }

    #[tokio::test]
    async fn test_password_recovery_over_http() {
        let h = Harness::new();
        h.seed_client("web@example.com").await;
        let app = app(&h);

        let forgot = |identity: &str| {
            json_request(
                Method::POST,
                "/password/forgot",
                None,
                json!({ "kind": "client", "identity": identity }),
            )
        };
        let (known_status, _, known) = send(&app, forgot("web@example.com")).await;
        let (unknown_status, _, unknown) = send(&app, forgot("ghost@example.com")).await;
        assert_eq!(known_status, StatusCode::OK);
        assert_eq!(unknown_status, StatusCode::OK);
        assert_eq!(known, unknown);

        settle().await;
        let code = h.delivery.last_code_for("web@example.com").unwrap();
        let (status, _, json) = send(
            &app,
            json_request(
                Method::POST,
                "/password/reset",
                None,
                json!({
                    "kind": "client",
                    "identity": "web@example.com",
                    "code": code,
                    "newSecret": "abc"
                }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["code"], "PASSWORD_POLICY_VIOLATION");
        assert!(json["feedback"].as_array().unwrap().len() > 1);

        let (status, _, _) = send(
            &app,
            json_request(
                Method::POST,
                "/password/reset",
                None,
                json!({
                    "kind": "client",
                    "identity": "web@example.com",
                    "code": code,
                    "newSecret": NEW_SECRET
                }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_change_password_and_expiration() {
        let h = Harness::new();
        let id = h.seed_client("web@example.com").await;
        let token = h.session_token(&id, "web@example.com").await;
        let app = app(&h);

        let (status, _, json) = send(
            &app,
            json_request(
                Method::POST,
                "/password/change",
                Some(&token),
                json!({ "currentSecret": NEW_SECRET, "newSecret": NEW_SECRET }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["code"], "INCORRECT_CURRENT_PASSWORD");

        let (status, _, _) = send(
            &app,
            json_request(
                Method::POST,
                "/password/change",
                Some(&token),
                json!({ "currentSecret": CLIENT_SECRET, "newSecret": NEW_SECRET }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, _, json) = send(&app, get("/password/expiration", Some(&token))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["isExpired"], false);
        assert_eq!(json["forceChange"], false);
    }

    #[tokio::test]
    async fn test_password_strength_meter() {
        let h = Harness::new();
        let (status, _, json) = send(
            &app(&h),
            json_request(
                Method::POST,
                "/password/validate",
                None,
                json!({ "kind": "client", "secret": "password" }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["isValid"], false);
        assert_eq!(json["label"], "weak");
        assert!(!json["feedback"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_signup_and_confirm_over_http() {
        let h = Harness::new();
        let app = app(&h);

        let (status, _, json) = send(
            &app,
            json_request(
                Method::POST,
                "/signup",
                None,
                json!({ "email": "fresh@example.com", "secret": CLIENT_SECRET }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(json["verificationSent"], true);

        let (status, _, json) = send(
            &app,
            json_request(
                Method::POST,
                "/signup",
                None,
                json!({ "email": "fresh@example.com", "secret": CLIENT_SECRET }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(json["code"], "EMAIL_ALREADY_REGISTERED");

        let code = h.delivery.last_code_for("fresh@example.com").unwrap();
        let (status, _, _) = send(
            &app,
            json_request(
                Method::POST,
                "/signup/confirm",
                None,
                json!({ "identity": "fresh@example.com", "code": code }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_admin_route_denied_and_audited() {
        let h = Harness::new();
        let id = h.seed_employee("ops@example.com", &["dispatcher"]).await;
        let token = h.session_token(&id, "ops@example.com").await;

        let (status, _, json) = send(
            &app(&h),
            json_request(
                Method::POST,
                "/admin/sessions/activity",
                Some(&token),
                json!({ "principalIds": [id] }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(json["code"], "INSUFFICIENT_ACCESS_LEVEL");

        let audit = h.repo.audit_entries();
        assert_eq!(audit.len(), 1);
        assert_eq!(audit[0].permission_key, "view.security_sessions");
        assert_eq!(audit[0].result, AuditResult::Denied);
        assert_eq!(audit[0].resource_type.as_deref(), Some("route"));
        assert_eq!(audit[0].resource_id.as_deref(), Some("/admin/sessions/activity"));
        assert_eq!(audit[0].ip_address.as_deref(), Some("10.0.0.7"));
        assert_eq!(audit[0].user_agent.as_deref(), Some("router-test"));
    }

    #[tokio::test]
    async fn test_admin_session_activity_with_grant() {
        let h = Harness::new();
        h.repo.add_role_grant("security", "view.security_sessions");
        let id = h.seed_employee("sec@example.com", &["security"]).await;
        let token = h.session_token(&id, "sec@example.com").await;
        let idle = PrincipalId::new();

        let (status, _, json) = send(
            &app(&h),
            json_request(
                Method::POST,
                "/admin/sessions/activity",
                Some(&token),
                json!({ "principalIds": [id, idle] }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["activity"][0]["activeSessions"], 1);
        assert_eq!(json["activity"][1]["activeSessions"], 0);
        assert!(json["activity"][1]["lastActivity"].is_null());
    }

    #[tokio::test]
    async fn test_admin_revoke_and_invalidate() {
        let h = Harness::new();
        let mut rx = h.events.subscribe();
        let root = h.seed_employee("root@example.com", &["super_admin"]).await;
        let token = h.session_token(&root, "root@example.com").await;
        let target = h.seed_client("web@example.com").await;
        h.session_token(&target, "web@example.com").await;
        h.session_token(&target, "web@example.com").await;
        let app = app(&h);

        let (status, _, json) = send(
            &app,
            json_request(
                Method::POST,
                &format!("/admin/principals/{target}/sessions/revoke"),
                Some(&token),
                json!({}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["ended"], 2);

        let (status, _, _) = send(
            &app,
            json_request(Method::POST, "/admin/permissions/invalidate", Some(&token), json!({})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(
            drain(&mut rx)
                .iter()
                .any(|e| matches!(e, AuthEvent::PolicyChanged { principal_id: None }))
        );
    }

    #[tokio::test]
    async fn test_my_permissions() {
        let h = Harness::new();
        h.repo.add_role_grant("dispatcher", "view.schedule");
        h.repo.add_role_grant("dispatcher", "edit.schedule");
        let id = h.seed_employee("ops@example.com", &["dispatcher"]).await;
        let token = h.session_token(&id, "ops@example.com").await;

        let (status, _, json) = send(&app(&h), get("/me/permissions", Some(&token))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["permissions"], json!(["edit.schedule", "view.schedule"]));
    }

    #[tokio::test]
    async fn test_last_record_check() {
        let h = Harness::new();
        let id = h.seed_employee("ops@example.com", &["dispatcher"]).await;
        let token = h.session_token(&id, "ops@example.com").await;
        let scope = uuid::Uuid::new_v4();
        let app = app(&h);
        let check = || {
            json_request(
                Method::POST,
                "/admin/last-record-check",
                Some(&token),
                json!({ "resource": "service_location", "scopeId": scope }),
            )
        };

        h.repo
            .set_active_records(LastRecordResource::ServiceLocation, scope, 1);
        let (status, _, json) = send(&app, check()).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(json["code"], "LAST_RECORD_PROTECTION");
        assert!(json["detail"].as_str().unwrap().contains("service location"));

        h.repo
            .set_active_records(LastRecordResource::ServiceLocation, scope, 3);
        let (status, _, json) = send(&app, check()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["allowed"], true);
        assert_eq!(json["count"], 3);
    }
}
