//! Auth Middleware
//!
//! `require_session` resolves the presented session token (cookie first,
//! then `Authorization: Bearer`) into an [`AuthenticatedPrincipal`] request
//! extension. `require_permission` runs the permission arbiter for a fixed
//! key and rejects with 403 before the protected handler runs.

use std::convert::Infallible;
use std::net::{IpAddr, SocketAddr};

use axum::extract::connect_info::{ConnectInfo, MockConnectInfo};
use axum::extract::{FromRequestParts, Request, State};
use axum::http::request::Parts;
use axum::http::{Extensions, HeaderMap};
use axum::middleware::Next;
use axum::response::Response;
use kernel::id::{PrincipalId, SessionId};
use platform::client::ClientContext;
use platform::cookie::{extract_bearer_token, extract_cookie};

use crate::domain::entity::access::AccessContext;
use crate::domain::entity::session::Session;
use crate::error::AuthError;
use crate::presentation::state::{AuthAppState, AuthStack};

/// The caller behind a validated session, stored in request extensions
#[derive(Debug, Clone)]
pub struct AuthenticatedPrincipal {
    pub principal_id: PrincipalId,
    pub session_id: SessionId,
    pub session: Session,
}

impl<S> FromRequestParts<S> for AuthenticatedPrincipal
where
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthenticatedPrincipal>()
            .cloned()
            .ok_or(AuthError::SessionInvalid)
    }
}

/// IP, user agent and device fingerprint of the caller
#[derive(Debug, Clone)]
pub struct ClientInfo(pub ClientContext);

impl<S> FromRequestParts<S> for ClientInfo
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(ClientInfo(client_context(&parts.headers, &parts.extensions)))
    }
}

fn peer_ip(extensions: &Extensions) -> Option<IpAddr> {
    extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0.ip())
        .or_else(|| {
            extensions
                .get::<MockConnectInfo<SocketAddr>>()
                .map(|info| info.0.ip())
        })
}

pub(crate) fn client_context(headers: &HeaderMap, extensions: &Extensions) -> ClientContext {
    ClientContext::from_headers(headers, peer_ip(extensions))
}

/// Session token from the named cookie, falling back to a bearer token
pub fn session_token(headers: &HeaderMap, cookie_name: &str) -> Option<String> {
    extract_cookie(headers, cookie_name).or_else(|| extract_bearer_token(headers))
}

/// Middleware that requires a valid session. Validation slides the expiry.
pub async fn require_session<S: AuthStack>(
    State(state): State<AuthAppState<S>>,
    mut req: Request,
    next: Next,
) -> Result<Response, AuthError> {
    let cookie_name = &state.auth.config().session.cookie_name;
    let token = session_token(req.headers(), cookie_name).ok_or(AuthError::SessionInvalid)?;

    let session = state.auth.validate_session(&token).await?;

    req.extensions_mut().insert(AuthenticatedPrincipal {
        principal_id: session.principal_id,
        session_id: session.id,
        session,
    });

    Ok(next.run(req).await)
}

/// State for [`require_permission`]: the app state plus the guarded key
pub struct PermissionGuard<S: AuthStack> {
    pub state: AuthAppState<S>,
    pub permission: &'static str,
}

impl<S: AuthStack> Clone for PermissionGuard<S> {
    fn clone(&self) -> Self {
        Self {
            state: self.state.clone(),
            permission: self.permission,
        }
    }
}

impl<S: AuthStack> PermissionGuard<S> {
    pub fn new(state: AuthAppState<S>, permission: &'static str) -> Self {
        Self { state, permission }
    }
}

/// Middleware that requires the guard's permission. Must run inside
/// `require_session`.
pub async fn require_permission<S: AuthStack>(
    State(guard): State<PermissionGuard<S>>,
    req: Request,
    next: Next,
) -> Result<Response, AuthError> {
    let principal_id = req
        .extensions()
        .get::<AuthenticatedPrincipal>()
        .map(|p| p.principal_id)
        .ok_or(AuthError::SessionInvalid)?;

    let client = client_context(req.headers(), req.extensions());
    let context = AccessContext {
        ip_address: client.ip_string(),
        user_agent: client.user_agent,
        ..AccessContext::default()
    }
    .resource("route", req.uri().path());

    guard
        .state
        .permissions
        .require(&principal_id, guard.permission, &context)
        .await?;

    Ok(next.run(req).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderValue, header};

    #[test]
    fn test_cookie_wins_over_bearer() {
        let mut headers = HeaderMap::new();
        headers.insert(header::COOKIE, HeaderValue::from_static("sid=from-cookie"));
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer from-header"));
        assert_eq!(session_token(&headers, "sid").as_deref(), Some("from-cookie"));
    }

    #[test]
    fn test_bearer_fallback() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer from-header"));
        assert_eq!(session_token(&headers, "sid").as_deref(), Some("from-header"));
        assert_eq!(session_token(&HeaderMap::new(), "sid"), None);
    }

    #[test]
    fn test_peer_ip_prefers_connect_info() {
        let mut extensions = Extensions::new();
        assert_eq!(peer_ip(&extensions), None);

        extensions.insert(MockConnectInfo(SocketAddr::from(([10, 0, 0, 9], 1234))));
        assert_eq!(peer_ip(&extensions), Some(IpAddr::from([10, 0, 0, 9])));

        extensions.insert(ConnectInfo(SocketAddr::from(([10, 0, 0, 1], 80))));
        assert_eq!(peer_ip(&extensions), Some(IpAddr::from([10, 0, 0, 1])));
    }
}
