//! Auth events
//!
//! Fire-and-forget notifications. Emitting never blocks and never fails the
//! flow that emitted.

use kernel::id::{PrincipalId, SessionId};
use serde::Serialize;

use crate::domain::value_object::principal_kind::PrincipalKind;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuthEvent {
    Login {
        principal_id: PrincipalId,
        kind: PrincipalKind,
        ip: Option<String>,
    },
    LoginFailed {
        kind: PrincipalKind,
        ip: Option<String>,
    },
    Logout {
        principal_id: PrincipalId,
    },
    SessionEvicted {
        principal_id: PrincipalId,
        session_id: SessionId,
    },
    PasswordChanged {
        principal_id: PrincipalId,
    },
    PasswordReset {
        principal_id: PrincipalId,
    },
    Signup {
        principal_id: PrincipalId,
    },
    EmailConfirmed {
        principal_id: PrincipalId,
    },
    PolicyChanged {
        principal_id: Option<PrincipalId>,
    },
}

impl AuthEvent {
    pub const fn event_type(&self) -> &'static str {
        match self {
            Self::Login { .. } => "login",
            Self::LoginFailed { .. } => "login_failed",
            Self::Logout { .. } => "logout",
            Self::SessionEvicted { .. } => "session_evicted",
            Self::PasswordChanged { .. } => "password_changed",
            Self::PasswordReset { .. } => "password_reset",
            Self::Signup { .. } => "signup",
            Self::EmailConfirmed { .. } => "email_confirmed",
            Self::PolicyChanged { .. } => "policy_changed",
        }
    }
}

pub trait EventBroadcaster: Send + Sync + 'static {
    fn emit(&self, event: AuthEvent);
}
