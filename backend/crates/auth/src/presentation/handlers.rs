//! HTTP Handlers

use axum::Json;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use kernel::id::PrincipalId;

use crate::application::events::AuthEvent;
use crate::application::login::{AuthenticatedLogin, LoginInput, LoginOutcome, SignUpInput};
use crate::domain::entity::access::LastRecordDecision;
use crate::domain::entity::password_policy::ExpirationInfo;
use crate::domain::policy::{IdentityHints, PolicyEvaluation};
use crate::domain::value_object::email::Email;
use crate::error::{AuthError, AuthResult};
use crate::presentation::dto::{
    ChangePasswordRequest, ConfirmEmailRequest, ForgotPasswordRequest,
    InvalidatePermissionsRequest, LastRecordCheckRequest, LoginRequest, LoginResponse,
    MessageResponse, MfaVerifyRequest, PermissionsResponse, ResetPasswordRequest,
    RevokeSessionsResponse, SessionActivityDto, SessionActivityRequest, SessionActivityResponse,
    SessionStatusResponse, SessionTokenDto, SignUpRequest, SignUpResponse,
    ValidatePasswordRequest,
};
use crate::presentation::middleware::{AuthenticatedPrincipal, ClientInfo, session_token};
use crate::presentation::state::{AuthAppState, AuthStack};

// ============================================================================
// Login
// ============================================================================

/// POST /api/auth/login
pub async fn login<S: AuthStack>(
    State(state): State<AuthAppState<S>>,
    ClientInfo(client): ClientInfo,
    Json(req): Json<LoginRequest>,
) -> AuthResult<Response> {
    let input = LoginInput {
        kind: req.kind,
        identity: req.identity,
        secret: req.secret,
        channels: req.channels,
        client,
    };

    match state.auth.login(input).await? {
        LoginOutcome::Authenticated(login) => session_response(&state, *login),
        LoginOutcome::MfaRequired { expires_at, .. } => Ok(Json(LoginResponse {
            requires_mfa: true,
            principal_id: None,
            session: None,
            mfa_expires_at: Some(expires_at),
            password_expired: false,
            force_change: false,
        })
        .into_response()),
    }
}

/// POST /api/auth/mfa/verify
pub async fn verify_mfa<S: AuthStack>(
    State(state): State<AuthAppState<S>>,
    ClientInfo(client): ClientInfo,
    Json(req): Json<MfaVerifyRequest>,
) -> AuthResult<Response> {
    let login = state
        .auth
        .verify_mfa(req.kind, &req.identity, &req.code, &client)
        .await?;
    session_response(&state, login)
}

// ============================================================================
// Session
// ============================================================================

/// POST /api/auth/logout
///
/// The cookie is cleared whatever the outcome.
pub async fn logout<S: AuthStack>(
    State(state): State<AuthAppState<S>>,
    headers: HeaderMap,
) -> Response {
    let cookie = state.session_cookie();
    let clear = clear_cookie_headers(cookie.delete_cookie_header());

    let result = match session_token(&headers, &cookie.name) {
        Some(token) => state.auth.logout(&token).await,
        None => Err(AuthError::SessionAlreadyEnded),
    };

    match result {
        Ok(()) => (clear, Json(MessageResponse::new("Logged out"))).into_response(),
        Err(e) => (clear, e).into_response(),
    }
}

/// GET /api/auth/session and POST /api/auth/session/heartbeat
///
/// `require_session` already slid the expiry.
pub async fn session_status(principal: AuthenticatedPrincipal) -> Json<SessionStatusResponse> {
    Json(SessionStatusResponse::from(&principal.session))
}

// ============================================================================
// Password
// ============================================================================

/// POST /api/auth/password/forgot
pub async fn forgot_password<S: AuthStack>(
    State(state): State<AuthAppState<S>>,
    ClientInfo(client): ClientInfo,
    Json(req): Json<ForgotPasswordRequest>,
) -> AuthResult<Json<MessageResponse>> {
    state
        .auth
        .forgot_password(req.kind, &req.identity, req.channels, &client)
        .await?;
    Ok(Json(MessageResponse::new(
        "If the account exists, a reset code has been sent",
    )))
}

/// POST /api/auth/password/reset
pub async fn reset_password<S: AuthStack>(
    State(state): State<AuthAppState<S>>,
    ClientInfo(client): ClientInfo,
    Json(req): Json<ResetPasswordRequest>,
) -> AuthResult<Json<MessageResponse>> {
    state
        .auth
        .reset_password(req.kind, &req.identity, &req.code, &req.new_secret, &client)
        .await?;
    Ok(Json(MessageResponse::new("Password has been reset")))
}

/// POST /api/auth/password/change
pub async fn change_password<S: AuthStack>(
    State(state): State<AuthAppState<S>>,
    principal: AuthenticatedPrincipal,
    Json(req): Json<ChangePasswordRequest>,
) -> AuthResult<Json<MessageResponse>> {
    state
        .auth
        .change_password(
            &principal.principal_id,
            &principal.session_id,
            &req.current_secret,
            &req.new_secret,
        )
        .await?;
    Ok(Json(MessageResponse::new("Password has been changed")))
}

/// GET /api/auth/password/expiration
pub async fn password_expiration<S: AuthStack>(
    State(state): State<AuthAppState<S>>,
    principal: AuthenticatedPrincipal,
) -> AuthResult<Json<ExpirationInfo>> {
    let info = state.auth.password_expiration(&principal.principal_id).await?;
    Ok(Json(info))
}

/// POST /api/auth/password/validate
pub async fn validate_password<S: AuthStack>(
    State(state): State<AuthAppState<S>>,
    Json(req): Json<ValidatePasswordRequest>,
) -> AuthResult<Json<PolicyEvaluation>> {
    let hints = IdentityHints::new(
        req.first_name,
        req.last_name,
        req.email.and_then(|e| Email::new(e).ok()),
    );
    let evaluation = state
        .auth
        .validate_password(req.kind, &req.secret, &hints)
        .await?;
    Ok(Json(evaluation))
}

// ============================================================================
// Signup
// ============================================================================

/// POST /api/auth/signup
pub async fn sign_up<S: AuthStack>(
    State(state): State<AuthAppState<S>>,
    ClientInfo(client): ClientInfo,
    Json(req): Json<SignUpRequest>,
) -> AuthResult<impl IntoResponse> {
    let input = SignUpInput {
        email: req.email,
        secret: req.secret,
        first_name: req.first_name,
        last_name: req.last_name,
        phone: req.phone,
        client,
    };

    let outcome = state.auth.sign_up(input).await?;

    Ok((
        StatusCode::CREATED,
        Json(SignUpResponse {
            principal_id: outcome.principal_id,
            verification_sent: outcome.verification_sent,
        }),
    ))
}

/// POST /api/auth/signup/confirm
pub async fn confirm_email<S: AuthStack>(
    State(state): State<AuthAppState<S>>,
    ClientInfo(client): ClientInfo,
    Json(req): Json<ConfirmEmailRequest>,
) -> AuthResult<Json<MessageResponse>> {
    state
        .auth
        .confirm_email(&req.identity, &req.code, &client)
        .await?;
    Ok(Json(MessageResponse::new("Email confirmed")))
}

// ============================================================================
// Introspection and administration (requires authentication)
// ============================================================================

/// GET /api/auth/me/permissions
pub async fn my_permissions<S: AuthStack>(
    State(state): State<AuthAppState<S>>,
    principal: AuthenticatedPrincipal,
) -> AuthResult<Json<PermissionsResponse>> {
    let permissions = state
        .permissions
        .list_permissions(&principal.principal_id)
        .await?;
    Ok(Json(PermissionsResponse {
        principal_id: principal.principal_id,
        permissions,
    }))
}

/// POST /api/auth/admin/sessions/activity
pub async fn session_activity<S: AuthStack>(
    State(state): State<AuthAppState<S>>,
    Json(req): Json<SessionActivityRequest>,
) -> AuthResult<Json<SessionActivityResponse>> {
    let activity = state
        .auth
        .sessions()
        .active_sessions_for(&req.principal_ids)
        .await?;

    let activity = req
        .principal_ids
        .iter()
        .map(|id| {
            let entry = activity.get(id).cloned().unwrap_or_default();
            SessionActivityDto {
                principal_id: *id,
                active_sessions: entry.active_sessions,
                last_activity: entry.last_activity,
            }
        })
        .collect();

    Ok(Json(SessionActivityResponse { activity }))
}

/// POST /api/auth/admin/principals/{id}/sessions/revoke
pub async fn revoke_sessions<S: AuthStack>(
    State(state): State<AuthAppState<S>>,
    Path(principal_id): Path<PrincipalId>,
) -> AuthResult<Json<RevokeSessionsResponse>> {
    let ended = state.auth.revoke_sessions(&principal_id).await?;
    Ok(Json(RevokeSessionsResponse { ended }))
}

/// POST /api/auth/admin/permissions/invalidate
pub async fn invalidate_permissions<S: AuthStack>(
    State(state): State<AuthAppState<S>>,
    Json(req): Json<InvalidatePermissionsRequest>,
) -> AuthResult<Json<MessageResponse>> {
    state
        .permissions
        .invalidate(req.principal_id.as_ref())
        .await?;
    state.events.emit(AuthEvent::PolicyChanged {
        principal_id: req.principal_id,
    });
    Ok(Json(MessageResponse::new("Permission cache invalidated")))
}

/// POST /api/auth/admin/last-record-check
pub async fn last_record_check<S: AuthStack>(
    State(state): State<AuthAppState<S>>,
    principal: AuthenticatedPrincipal,
    Json(req): Json<LastRecordCheckRequest>,
) -> AuthResult<Json<LastRecordDecision>> {
    let decision = state
        .permissions
        .check_last_record_protection(req.resource, &req.scope_id, &principal.principal_id)
        .await;

    if decision.allowed {
        Ok(Json(decision))
    } else {
        Err(AuthError::LastRecordProtected(
            decision
                .message
                .unwrap_or_else(|| "Last record cannot be deleted".to_string()),
        ))
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

fn session_response<S: AuthStack>(
    state: &AuthAppState<S>,
    login: AuthenticatedLogin,
) -> AuthResult<Response> {
    let token = login.issued.token.as_str();
    let cookie = state
        .session_cookie()
        .set_cookie_header(token)
        .ok_or_else(|| AuthError::Internal("session cookie is not a valid header".into()))?;

    let body = LoginResponse {
        requires_mfa: false,
        principal_id: Some(login.principal_id),
        session: Some(SessionTokenDto {
            token: token.to_string(),
            expires_at: login.issued.session.expires_at,
        }),
        mfa_expires_at: None,
        password_expired: login.expiration.is_expired,
        force_change: login.expiration.force_change,
    };

    Ok(([(header::SET_COOKIE, cookie)], Json(body)).into_response())
}

fn clear_cookie_headers(cookie: Option<HeaderValue>) -> HeaderMap {
    let mut headers = HeaderMap::new();
    if let Some(cookie) = cookie {
        headers.insert(header::SET_COOKIE, cookie);
    }
    headers
}
