//! Application Layer
//!
//! The auth components and the orchestrator composing them.

pub mod abuse_detector;
pub mod config;
pub mod credential_verifier;
pub mod delivery;
pub mod events;
pub mod login;
pub mod mfa;
pub mod password_policy;
pub mod permission_arbiter;
pub mod session_manager;

// Re-exports
pub use abuse_detector::{AbuseDetector, AbuseVerdict};
pub use config::AuthConfig;
pub use credential_verifier::{AuthFailureReason, Authentication, CredentialVerifier};
pub use delivery::{DeliveryChannel, DeliveryChannels, DeliveryMessage, DeliveryService};
pub use events::{AuthEvent, EventBroadcaster};
pub use login::{
    AuthenticatedLogin, LoginInput, LoginOrchestrator, LoginOutcome, SignUpInput, SignUpOutcome,
};
pub use mfa::{IssuedChallenge, MfaChallengeManager};
pub use password_policy::PasswordPolicyService;
pub use permission_arbiter::PermissionArbiter;
pub use session_manager::{IssuedSession, SessionManager};
