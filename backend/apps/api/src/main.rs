//! API Server Entry Point
//!
//! Application entry point and server initialization.
//! Uses `anyhow` for startup errors, but application-level
//! errors should use `kernel::error::AppError`.

use std::env;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use auth::config::{Environment, SameSite};
use auth::infra::delivery::{DeliveryClient, LogDelivery, WebhookDelivery};
use auth::infra::events::TracingEventBroadcaster;
use auth::{AuthAppState, AuthConfig, LoginOrchestrator, PermissionArbiter, PgAuthRepository, PgStack, auth_router};
use axum::{
    Router, http,
    http::{Method, header},
};
use base64::Engine;
use base64::engine::general_purpose;
use platform::cache::InMemoryDecisionCache;
use platform::clock::{Clock, SystemClock};
use platform::rate_limit::InMemorySlidingWindowStore;
use platform::sweeper::Lifecycle;
use sqlx::postgres::PgPoolOptions;
use tokio::net::TcpListener;
use tower_http::cors::{AllowHeaders, AllowMethods, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

// Re-export unified error types for use in handlers
pub use kernel::error::{
    app_error::{AppError, AppResult},
    kind::ErrorKind,
};

/// In-process counters and cached decisions are swept this often
const STORE_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Sliding-window entries older than this are dropped
const WINDOW_MAX_AGE: Duration = Duration::from_secs(3600);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "api=info,auth=info,platform=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Database connection
    let database_url = env::var("DATABASE_URL")
        .map_err(|_| anyhow::anyhow!("DATABASE_URL must be set in environment"))?;

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await?;

    tracing::info!("Connected to database");

    // Run migrations
    sqlx::migrate!("../../../database/migrations")
        .run(&pool)
        .await?;

    tracing::info!("Migrations completed");

    let config = load_auth_config()?;
    tracing::info!(
        environment = ?config.environment,
        session_ttl_secs = config.session.ttl_secs(),
        max_sessions = config.session.max_sessions,
        "Auth configuration loaded"
    );

    // Collaborators
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let store = Arc::new(PgAuthRepository::new(pool.clone()));
    let window = Arc::new(InMemorySlidingWindowStore::new(clock.clone(), WINDOW_MAX_AGE));
    let cache = Arc::new(InMemoryDecisionCache::new(clock.clone()));
    let events = Arc::new(TracingEventBroadcaster);
    let delivery = Arc::new(delivery_client()?);

    window.init(STORE_SWEEP_INTERVAL);
    cache.init(STORE_SWEEP_INTERVAL);

    let permissions = Arc::new(PermissionArbiter::new(
        store.clone(),
        cache.clone(),
        clock.clone(),
        config.permissions.clone(),
    ));
    let auth = Arc::new(LoginOrchestrator::new(
        store,
        window.clone(),
        delivery,
        clock,
        events.clone(),
        config,
    )?);

    // Startup sweep: expired sessions are deactivated, old ones purged.
    // Errors here should not prevent server startup
    match auth.sessions().sweep_expired().await {
        Ok(outcome) => {
            tracing::info!(
                deactivated = outcome.deactivated,
                purged = outcome.purged,
                "Auth session cleanup completed"
            );
        }
        Err(e) => {
            tracing::warn!(
                error = %e,
                "Auth session cleanup failed, continuing anyway"
            );
        }
    }
    let session_sweeper = auth.sessions().spawn_sweeper();

    let state = AuthAppState::<PgStack>::new(auth, permissions, events);

    // CORS configuration
    let frontend_origins = env::var("FRONTEND_ORIGINS")
        .unwrap_or_else(|_| "http://localhost:40922,http://127.0.0.1:40922".to_string());

    let allowed_origins: Vec<http::HeaderValue> = frontend_origins
        .split(',')
        .filter_map(|origin| origin.trim().parse().ok())
        .collect();

    let cors = CorsLayer::new()
        .allow_origin(allowed_origins)
        .allow_methods(AllowMethods::list([
            Method::GET,
            Method::POST,
            Method::OPTIONS,
        ]))
        .allow_headers(AllowHeaders::list([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            header::ACCEPT,
        ]))
        .allow_credentials(true);

    // Build router
    let app = Router::new()
        .nest("/api/auth", auth_router(state))
        .layer(TraceLayer::new_for_http())
        .layer(cors);

    // Start server
    let addr = env::var("BIND_ADDR")
        .ok()
        .and_then(|a| a.parse().ok())
        .unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], 31113)));
    tracing::info!("Listening on {}", addr);

    let listener = TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    session_sweeper.stop();
    window.teardown();
    cache.teardown();
    tracing::info!("Server stopped");

    Ok(())
}

/// Build the auth configuration from the environment
fn load_auth_config() -> anyhow::Result<AuthConfig> {
    let environment = env::var("APP_ENV")
        .ok()
        .and_then(|v| Environment::parse(&v))
        .unwrap_or(if cfg!(debug_assertions) {
            Environment::Development
        } else {
            Environment::Production
        });

    let mut config = match environment {
        Environment::Development => AuthConfig::development(),
        Environment::Production => {
            // In production, load secret from environment
            let secret_b64 = env::var("SESSION_SECRET")
                .map_err(|_| anyhow::anyhow!("SESSION_SECRET must be set in production"))?;
            let secret_bytes = Engine::decode(&general_purpose::STANDARD, &secret_b64)?;
            let secret: [u8; 32] = secret_bytes
                .try_into()
                .map_err(|_| anyhow::anyhow!("SESSION_SECRET must decode to 32 bytes"))?;
            let mut config = AuthConfig::default();
            config.session.token_secret = secret;
            config
        }
    };

    if let Ok(pepper_b64) = env::var("PASSWORD_PEPPER") {
        config.password_pepper = Some(Engine::decode(&general_purpose::STANDARD, &pepper_b64)?);
    }
    if let Ok(name) = env::var("AUTH_COOKIE_NAME") {
        config.session.cookie_name = name;
    }
    if let Some(same_site) = env::var("AUTH_COOKIE_SAME_SITE")
        .ok()
        .and_then(|v| SameSite::parse(&v))
    {
        config.session.cookie_same_site = same_site;
    }
    if let Some(secs) = env_u64("SESSION_TTL_SECS") {
        config.session.ttl = Duration::from_secs(secs);
    }
    if let Some(max) = env_u64("MAX_SESSIONS") {
        config.session.max_sessions = u32::try_from(max).unwrap_or(u32::MAX);
    }
    if let Ok(role) = env::var("AUTH_OVERRIDE_ROLE") {
        config.permissions.override_role = role;
    }

    Ok(config)
}

fn env_u64(key: &str) -> Option<u64> {
    env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

/// Webhook delivery when configured, log-only otherwise
fn delivery_client() -> anyhow::Result<DeliveryClient> {
    match env::var("DELIVERY_WEBHOOK_URL") {
        Ok(url) => {
            let timeout = Duration::from_millis(env_u64("DELIVERY_TIMEOUT_MS").unwrap_or(5_000));
            tracing::info!("Delivering codes through webhook");
            Ok(DeliveryClient::Webhook(WebhookDelivery::new(url, timeout)?))
        }
        Err(_) => {
            tracing::warn!("DELIVERY_WEBHOOK_URL not set, codes are only logged");
            Ok(DeliveryClient::Log(LogDelivery))
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
    }
    tracing::info!("Shutdown signal received");
}
