//! Auth Error Types
//!
//! Auth-specific error variants that integrate with the unified
//! `kernel::error::AppError` system. Every variant carries a stable
//! machine-readable code so clients can branch without parsing messages.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use kernel::error::{app_error::AppError, kind::ErrorKind};
use platform::password::PasswordHashError;
use platform::rate_limit::StoreError;
use thiserror::Error;

use crate::domain::entity::abuse::LimitReason;

/// Auth-specific result type alias
pub type AuthResult<T> = Result<T, AuthError>;

/// Auth-specific error variants
#[derive(Debug, Error)]
pub enum AuthError {
    /// Any credential failure. The real cause is logged, never rendered.
    #[error("Invalid email or password")]
    InvalidCredentials,

    /// A rate or abuse limit blocked the request
    #[error("{}", reason.message())]
    RateLimited {
        reason: LimitReason,
        retry_after_secs: u64,
    },

    /// No matching unused, unexpired code
    #[error("Invalid or expired verification code")]
    InvalidCode,

    /// Session not found, inactive or expired
    #[error("Session not found or expired")]
    SessionInvalid,

    /// Logout of a session that was already ended
    #[error("Session has already ended")]
    SessionAlreadyEnded,

    /// Permission check denied
    #[error("You do not have permission to perform this action")]
    PermissionDenied { permission: String },

    /// Deleting the final remaining record of a scope
    #[error("{0}")]
    LastRecordProtected(String),

    /// New password violates the active policy
    #[error("Password does not meet the password policy")]
    PasswordPolicy { feedback: Vec<String> },

    /// New password matches one of the recent passwords
    #[error("Password was used recently")]
    PasswordReused,

    /// Current password did not match on change
    #[error("Current password is incorrect")]
    IncorrectCurrentPassword,

    /// Signup with an email already registered for the kind
    #[error("Email is already registered")]
    EmailTaken,

    /// Delivery collaborator did not send the message
    #[error("Verification code could not be delivered")]
    DeliveryFailed,

    /// Challenge store failed; the code was not issued
    #[error("Verification code could not be issued")]
    ChallengeUnavailable,

    /// Malformed input
    #[error("{0}")]
    Validation(String),

    #[error("{0} not found")]
    NotFound(&'static str),

    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AuthError {
    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        StatusCode::from_u16(self.kind().status_code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }

    /// Get the ErrorKind for this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            AuthError::InvalidCredentials | AuthError::SessionInvalid => ErrorKind::Unauthorized,
            AuthError::RateLimited { .. } => ErrorKind::TooManyRequests,
            AuthError::InvalidCode
            | AuthError::PasswordPolicy { .. }
            | AuthError::PasswordReused
            | AuthError::IncorrectCurrentPassword
            | AuthError::Validation(_) => ErrorKind::BadRequest,
            AuthError::SessionAlreadyEnded | AuthError::NotFound(_) => ErrorKind::NotFound,
            AuthError::PermissionDenied { .. } | AuthError::LastRecordProtected(_) => {
                ErrorKind::Forbidden
            }
            AuthError::EmailTaken => ErrorKind::Conflict,
            AuthError::DeliveryFailed | AuthError::ChallengeUnavailable => {
                ErrorKind::ServiceUnavailable
            }
            AuthError::Database(_) | AuthError::Internal(_) => ErrorKind::InternalServerError,
        }
    }

    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            AuthError::InvalidCredentials => "INVALID_CREDENTIALS",
            AuthError::RateLimited { reason, .. } => reason.code(),
            AuthError::InvalidCode => "INVALID_OR_EXPIRED_CODE",
            AuthError::SessionInvalid => "SESSION_INVALID",
            AuthError::SessionAlreadyEnded => "SESSION_ALREADY_ENDED",
            AuthError::PermissionDenied { .. } => "INSUFFICIENT_ACCESS_LEVEL",
            AuthError::LastRecordProtected(_) => "LAST_RECORD_PROTECTION",
            AuthError::PasswordPolicy { .. } => "PASSWORD_POLICY_VIOLATION",
            AuthError::PasswordReused => "PASSWORD_REUSED_RECENTLY",
            AuthError::IncorrectCurrentPassword => "INCORRECT_CURRENT_PASSWORD",
            AuthError::EmailTaken => "EMAIL_ALREADY_REGISTERED",
            AuthError::DeliveryFailed => "DELIVERY_FAILED",
            AuthError::ChallengeUnavailable => "MFA_CHALLENGE_UNAVAILABLE",
            AuthError::Validation(_) => "VALIDATION_ERROR",
            AuthError::NotFound(_) => "NOT_FOUND",
            AuthError::Database(_) | AuthError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Convert to AppError
    pub fn to_app_error(&self) -> AppError {
        let error = match self {
            AuthError::Database(_) | AuthError::Internal(_) => {
                AppError::new(self.kind(), "An internal error occurred")
            }
            _ => AppError::new(self.kind(), self.to_string()),
        };
        let error = error.with_code(self.code());

        match self {
            AuthError::RateLimited {
                retry_after_secs, ..
            } => error
                .with_retry_after(*retry_after_secs)
                .with_action("Please wait before trying again"),
            AuthError::PasswordPolicy { feedback } => error
                .with_details(feedback.clone())
                .with_action("Please choose a password that meets every requirement"),
            AuthError::PasswordReused => {
                error.with_action("Please choose a password you have not used recently")
            }
            AuthError::InvalidCode => error.with_action("Request a new code and try again"),
            AuthError::ChallengeUnavailable | AuthError::DeliveryFailed => {
                error.with_action("Please try again in a moment")
            }
            AuthError::SessionInvalid => error.with_action("Please sign in again"),
            _ => error,
        }
    }

    /// Log the error with appropriate level
    fn log(&self) {
        match self {
            AuthError::Database(e) => {
                tracing::error!(error = %e, "Auth database error");
            }
            AuthError::Internal(msg) => {
                tracing::error!(message = %msg, "Auth internal error");
            }
            AuthError::DeliveryFailed | AuthError::ChallengeUnavailable => {
                tracing::error!(code = self.code(), "Verification code unavailable");
            }
            AuthError::RateLimited {
                reason,
                retry_after_secs,
            } => {
                tracing::warn!(code = reason.code(), retry_after_secs, "Request rate limited");
            }
            AuthError::PermissionDenied { permission } => {
                tracing::warn!(permission = %permission, "Permission denied");
            }
            AuthError::LastRecordProtected(_) => {
                tracing::warn!("Last record deletion refused");
            }
            _ => {
                tracing::debug!(error = %self, "Auth error");
            }
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        self.log();
        self.to_app_error().into_response()
    }
}

impl From<AppError> for AuthError {
    fn from(err: AppError) -> Self {
        match err.kind() {
            ErrorKind::BadRequest => {
                AuthError::Validation(err.message().to_string())
            }
            _ => AuthError::Internal(err.to_string()),
        }
    }
}

impl From<StoreError> for AuthError {
    fn from(err: StoreError) -> Self {
        AuthError::Internal(err.to_string())
    }
}

impl From<PasswordHashError> for AuthError {
    fn from(err: PasswordHashError) -> Self {
        AuthError::Internal(err.to_string())
    }
}
