//! Handler state
//!
//! Handlers are generic over one [`AuthStack`] so the router is written once
//! and instantiated with PostgreSQL in production and in-memory storage in
//! tests.

use std::sync::Arc;

use platform::cache::{DecisionCache, InMemoryDecisionCache};
use platform::cookie::CookieConfig;
use platform::rate_limit::{InMemorySlidingWindowStore, SlidingWindowStore};

use crate::application::delivery::DeliveryService;
use crate::application::events::EventBroadcaster;
use crate::application::login::LoginOrchestrator;
use crate::application::permission_arbiter::PermissionArbiter;
use crate::domain::repository::AuthStore;
use crate::infra::delivery::DeliveryClient;
use crate::infra::postgres::PgAuthRepository;

/// The concrete collaborators behind one router instance
pub trait AuthStack: Send + Sync + 'static {
    type Store: AuthStore;
    type Window: SlidingWindowStore + Send + Sync + 'static;
    type Cache: DecisionCache + Send + Sync + 'static;
    type Delivery: DeliveryService + Send + Sync + 'static;
}

/// PostgreSQL storage with process-local counters and decision cache
pub struct PgStack;

impl AuthStack for PgStack {
    type Store = PgAuthRepository;
    type Window = InMemorySlidingWindowStore;
    type Cache = InMemoryDecisionCache;
    type Delivery = DeliveryClient;
}

pub type Orchestrator<S> = LoginOrchestrator<
    <S as AuthStack>::Store,
    <S as AuthStack>::Window,
    <S as AuthStack>::Delivery,
>;

pub type Arbiter<S> = PermissionArbiter<<S as AuthStack>::Store, <S as AuthStack>::Cache>;

/// Shared state for auth handlers and middleware
pub struct AuthAppState<S: AuthStack> {
    pub auth: Arc<Orchestrator<S>>,
    pub permissions: Arc<Arbiter<S>>,
    pub events: Arc<dyn EventBroadcaster>,
}

impl<S: AuthStack> Clone for AuthAppState<S> {
    fn clone(&self) -> Self {
        Self {
            auth: self.auth.clone(),
            permissions: self.permissions.clone(),
            events: self.events.clone(),
        }
    }
}

impl<S: AuthStack> AuthAppState<S> {
    pub fn new(
        auth: Arc<Orchestrator<S>>,
        permissions: Arc<Arbiter<S>>,
        events: Arc<dyn EventBroadcaster>,
    ) -> Self {
        Self {
            auth,
            permissions,
            events,
        }
    }

    /// Session cookie whose Max-Age matches the server-side TTL
    pub fn session_cookie(&self) -> CookieConfig {
        let session = &self.auth.config().session;
        CookieConfig::session(
            session.cookie_name.clone(),
            session.cookie_secure,
            session.cookie_same_site,
            session.ttl_secs(),
        )
    }
}
