//! Auth Router

use axum::{
    Router, middleware,
    routing::{MethodRouter, get, post},
};

use crate::presentation::handlers;
use crate::presentation::middleware::{PermissionGuard, require_permission, require_session};
use crate::presentation::state::{AuthAppState, AuthStack};

/// Permission keys guarding the admin routes
pub mod permissions {
    pub const VIEW_SECURITY_SESSIONS: &str = "view.security_sessions";
    pub const MANAGE_SECURITY_SESSIONS: &str = "manage.security_sessions.enable";
    pub const MANAGE_ROLES: &str = "manage.roles";
}

/// Create the Auth router for any stack
pub fn auth_router<S: AuthStack>(state: AuthAppState<S>) -> Router {
    let guarded = |route: MethodRouter<AuthAppState<S>>, permission: &'static str| {
        route.route_layer(middleware::from_fn_with_state(
            PermissionGuard::new(state.clone(), permission),
            require_permission::<S>,
        ))
    };

    let protected = Router::new()
        .route("/session", get(handlers::session_status))
        .route("/session/heartbeat", post(handlers::session_status))
        .route("/password/change", post(handlers::change_password::<S>))
        .route("/password/expiration", get(handlers::password_expiration::<S>))
        .route("/me/permissions", get(handlers::my_permissions::<S>))
        .route(
            "/admin/sessions/activity",
            guarded(
                post(handlers::session_activity::<S>),
                permissions::VIEW_SECURITY_SESSIONS,
            ),
        )
        .route(
            "/admin/principals/{id}/sessions/revoke",
            guarded(
                post(handlers::revoke_sessions::<S>),
                permissions::MANAGE_SECURITY_SESSIONS,
            ),
        )
        .route(
            "/admin/permissions/invalidate",
            guarded(
                post(handlers::invalidate_permissions::<S>),
                permissions::MANAGE_ROLES,
            ),
        )
        .route("/admin/last-record-check", post(handlers::last_record_check::<S>))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            require_session::<S>,
        ));

    Router::new()
        .route("/login", post(handlers::login::<S>))
        .route("/mfa/verify", post(handlers::verify_mfa::<S>))
        .route("/logout", post(handlers::logout::<S>))
        .route("/password/forgot", post(handlers::forgot_password::<S>))
        .route("/password/reset", post(handlers::reset_password::<S>))
        .route("/password/validate", post(handlers::validate_password::<S>))
        .route("/signup", post(handlers::sign_up::<S>))
        .route("/signup/confirm", post(handlers::confirm_email::<S>))
        .merge(protected)
        .with_state(state)
}
