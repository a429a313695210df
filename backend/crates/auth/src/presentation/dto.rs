//! API DTOs (Data Transfer Objects)

use chrono::{DateTime, Utc};
use kernel::id::PrincipalId;
use serde::{Deserialize, Serialize};

use crate::application::delivery::DeliveryChannels;
use crate::domain::entity::access::LastRecordResource;
use crate::domain::entity::password_policy::ExpirationInfo;
use crate::domain::entity::session::Session;
use crate::domain::value_object::principal_kind::PrincipalKind;

// ============================================================================
// Login
// ============================================================================

/// Login request
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    pub kind: PrincipalKind,
    /// Email address
    pub identity: String,
    pub secret: String,
    /// Where an MFA code goes when one is required
    #[serde(default)]
    pub channels: DeliveryChannels,
}

/// Issued session as returned to the client
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionTokenDto {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

/// Login response
///
/// Exactly one of `session` and `requires_mfa` is meaningful.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub requires_mfa: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub principal_id: Option<PrincipalId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session: Option<SessionTokenDto>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mfa_expires_at: Option<DateTime<Utc>>,
    pub password_expired: bool,
    pub force_change: bool,
}

/// MFA verification request
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MfaVerifyRequest {
    pub kind: PrincipalKind,
    pub identity: String,
    pub code: String,
}

// ============================================================================
// Session
// ============================================================================

/// Session validation / heartbeat response
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatusResponse {
    pub principal_id: PrincipalId,
    pub expires_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

impl From<&Session> for SessionStatusResponse {
    fn from(session: &Session) -> Self {
        Self {
            principal_id: session.principal_id,
            expires_at: session.expires_at,
            last_activity: session.last_activity,
        }
    }
}

/// Generic acknowledgement
#[derive(Debug, Clone, Serialize)]
pub struct MessageResponse {
    pub message: &'static str,
}

impl MessageResponse {
    pub const fn new(message: &'static str) -> Self {
        Self { message }
    }
}

// ============================================================================
// Password
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForgotPasswordRequest {
    pub kind: PrincipalKind,
    pub identity: String,
    #[serde(default)]
    pub channels: DeliveryChannels,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResetPasswordRequest {
    pub kind: PrincipalKind,
    pub identity: String,
    pub code: String,
    pub new_secret: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangePasswordRequest {
    pub current_secret: String,
    pub new_secret: String,
}

/// Strength meter request; identity fields feed the overlap rule
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidatePasswordRequest {
    pub kind: PrincipalKind,
    pub secret: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
}

/// Password age response
pub type PasswordExpirationResponse = ExpirationInfo;

// ============================================================================
// Signup
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignUpRequest {
    pub email: String,
    pub secret: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub phone: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SignUpResponse {
    pub principal_id: PrincipalId,
    pub verification_sent: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmEmailRequest {
    pub identity: String,
    pub code: String,
}

// ============================================================================
// Introspection and administration
// ============================================================================

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionsResponse {
    pub principal_id: PrincipalId,
    pub permissions: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionActivityRequest {
    pub principal_ids: Vec<PrincipalId>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionActivityDto {
    pub principal_id: PrincipalId,
    pub active_sessions: u32,
    pub last_activity: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionActivityResponse {
    pub activity: Vec<SessionActivityDto>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RevokeSessionsResponse {
    pub ended: u64,
}

/// Omit `principalId` to clear every cached decision
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvalidatePermissionsRequest {
    pub principal_id: Option<PrincipalId>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LastRecordCheckRequest {
    pub resource: LastRecordResource,
    pub scope_id: uuid::Uuid,
}
