//! Session Manager
//!
//! Creates, validates (sliding expiration), ends and sweeps server-side
//! sessions. Tokens are only ever looked up by their keyed digest.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use chrono::Duration;
use kernel::id::{PrincipalId, SessionId};
use platform::client::ClientContext;
use platform::clock::Clock;
use platform::sweeper::SweeperHandle;

use crate::application::config::SessionSettings;
use crate::application::events::{AuthEvent, EventBroadcaster};
use crate::domain::entity::session::{Session, SessionActivity, SweepOutcome};
use crate::domain::repository::SessionRepository;
use crate::domain::value_object::{email::Email, session_token::SessionToken};
use crate::error::{AuthError, AuthResult};

/// Upper bound on evictions while making room for one new session
const MAX_EVICTIONS_PER_CREATE: u32 = 16;

/// A stored session and the raw token handed to the caller exactly once
#[derive(Debug)]
pub struct IssuedSession {
    pub session: Session,
    pub token: SessionToken,
}

pub struct SessionManager<R> {
    repo: Arc<R>,
    clock: Arc<dyn Clock>,
    settings: SessionSettings,
    events: Arc<dyn EventBroadcaster>,
    last_sweep_ms: Arc<AtomicI64>,
}

impl<R> SessionManager<R>
where
    R: SessionRepository + Send + Sync + 'static,
{
    pub fn new(
        repo: Arc<R>,
        clock: Arc<dyn Clock>,
        settings: SessionSettings,
        events: Arc<dyn EventBroadcaster>,
    ) -> Self {
        Self {
            repo,
            clock,
            settings,
            events,
            last_sweep_ms: Arc::new(AtomicI64::new(i64::MIN)),
        }
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    fn ttl(&self) -> Duration {
        Duration::seconds(self.settings.ttl.as_secs() as i64)
    }

    fn digest(&self, token: &SessionToken) -> Vec<u8> {
        token.digest(&self.settings.token_secret)
    }

    /// Start a session, evicting the oldest live ones beyond the cap
    pub async fn create(
        &self,
        principal_id: &PrincipalId,
        email: &Email,
        client: &ClientContext,
    ) -> AuthResult<IssuedSession> {
        let now = self.clock.now();
        let cap = u64::from(self.settings.max_sessions.max(1));

        for _ in 0..MAX_EVICTIONS_PER_CREATE {
            let live = self.repo.count_live_sessions(principal_id, now).await?;
            if live < cap {
                break;
            }
            match self.repo.evict_oldest_session(principal_id, now).await? {
                Some(session_id) => {
                    tracing::info!(
                        principal_id = %principal_id,
                        session_id = %session_id,
                        "Oldest session evicted"
                    );
                    self.events.emit(AuthEvent::SessionEvicted {
                        principal_id: *principal_id,
                        session_id,
                    });
                }
                None => break,
            }
        }

        let token = SessionToken::generate();
        let session = Session::new(
            *principal_id,
            email.clone(),
            self.digest(&token),
            client,
            now,
            self.ttl(),
        );
        self.repo.insert_session(&session).await?;

        tracing::debug!(principal_id = %principal_id, session_id = %session.id, "Session created");
        Ok(IssuedSession { session, token })
    }

    /// Resolve a presented token to its live session and slide its expiry.
    /// `None` for malformed, unknown, ended or expired tokens.
    pub async fn validate(&self, raw_token: &str) -> AuthResult<Option<Session>> {
        let Some(token) = SessionToken::parse(raw_token) else {
            return Ok(None);
        };

        let now = self.clock.now();
        let session = self
            .repo
            .touch_session(&self.digest(&token), now, now + self.ttl())
            .await?;

        self.maybe_sweep();
        Ok(session)
    }

    /// Deactivate the session behind a token. `None` when it was already
    /// ended or never existed.
    pub async fn end(&self, raw_token: &str) -> AuthResult<Option<Session>> {
        let Some(token) = SessionToken::parse(raw_token) else {
            return Ok(None);
        };
        self.repo.end_session(&self.digest(&token)).await
    }

    /// Deactivate every active session of a principal, optionally sparing one
    pub async fn end_all(
        &self,
        principal_id: &PrincipalId,
        except: Option<&SessionId>,
    ) -> AuthResult<u64> {
        let ended = self.repo.end_all_sessions(principal_id, except).await?;
        if ended > 0 {
            tracing::info!(principal_id = %principal_id, ended, "Sessions ended");
        }
        Ok(ended)
    }

    /// Presence summary. Every requested id is present in the result.
    pub async fn active_sessions_for(
        &self,
        principal_ids: &[PrincipalId],
    ) -> AuthResult<HashMap<PrincipalId, SessionActivity>> {
        let mut activity = self
            .repo
            .session_activity(principal_ids, self.clock.now())
            .await?;
        for id in principal_ids {
            activity.entry(*id).or_default();
        }
        Ok(activity)
    }

    /// Run one sweep now, retrying transient failures
    pub async fn sweep_expired(&self) -> AuthResult<SweepOutcome> {
        self.job().run().await
    }

    /// Periodic sweep independent of request traffic
    pub fn spawn_sweeper(&self) -> SweeperHandle {
        let job = self.job();
        SweeperHandle::spawn("session_sweep", self.settings.sweep_interval, move || {
            let job = job.clone();
            async move {
                let _ = job.run().await;
            }
        })
    }

    /// At most one opportunistic sweep per interval, off the request path
    fn maybe_sweep(&self) {
        let now_ms = self.clock.now_ms();
        let interval_ms = self.settings.sweep_interval.as_millis() as i64;
        let last = self.last_sweep_ms.load(Ordering::Acquire);
        if last != i64::MIN && now_ms.saturating_sub(last) < interval_ms {
            return;
        }
        if self
            .last_sweep_ms
            .compare_exchange(last, now_ms, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }

        let job = self.job();
        tokio::spawn(async move {
            let _ = job.run().await;
        });
    }

    fn job(&self) -> SweepJob<R> {
        SweepJob {
            repo: self.repo.clone(),
            clock: self.clock.clone(),
            retries: self.settings.sweep_retries,
            retry_delay: self.settings.sweep_retry_delay,
            retention: Duration::seconds(self.settings.retention.as_secs() as i64),
        }
    }

    #[cfg(test)]
    pub(crate) fn last_sweep_ms(&self) -> i64 {
        self.last_sweep_ms.load(Ordering::Acquire)
    }
}

struct SweepJob<R> {
    repo: Arc<R>,
    clock: Arc<dyn Clock>,
    retries: u32,
    retry_delay: std::time::Duration,
    retention: Duration,
}

impl<R> Clone for SweepJob<R> {
    fn clone(&self) -> Self {
        Self {
            repo: self.repo.clone(),
            clock: self.clock.clone(),
            retries: self.retries,
            retry_delay: self.retry_delay,
            retention: self.retention,
        }
    }
}

impl<R> SweepJob<R>
where
    R: SessionRepository + Send + Sync + 'static,
{
    async fn run(&self) -> AuthResult<SweepOutcome> {
        let attempts = self.retries.max(1);
        let mut last_error = None;

        for attempt in 1..=attempts {
            let now = self.clock.now();
            match self.repo.sweep_sessions(now, now - self.retention).await {
                Ok(outcome) => {
                    if outcome.deactivated > 0 || outcome.purged > 0 {
                        tracing::info!(
                            deactivated = outcome.deactivated,
                            purged = outcome.purged,
                            "Expired sessions swept"
                        );
                    }
                    return Ok(outcome);
                }
                Err(e) => {
                    tracing::warn!(attempt, attempts, error = %e, "Session sweep failed");
                    last_error = Some(e);
                    if attempt < attempts {
                        tokio::time::sleep(self.retry_delay).await;
                    }
                }
            }
        }

        Err(last_error.unwrap_or_else(|| AuthError::Internal("session sweep did not run".into())))
    }
}
