//! Session Entity
//!
//! Server-side session record. The raw token is never held here, only its
//! keyed digest.

use chrono::{DateTime, Duration, Utc};
use kernel::id::{PrincipalId, SessionId};
use platform::client::ClientContext;

use crate::domain::value_object::email::Email;

#[derive(Debug, Clone)]
pub struct Session {
    pub id: SessionId,
    pub principal_id: PrincipalId,
    pub email: Email,
    pub token_digest: Vec<u8>,
    pub user_agent: Option<String>,
    pub ip_address: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub is_active: bool,
}

impl Session {
    pub fn new(
        principal_id: PrincipalId,
        email: Email,
        token_digest: Vec<u8>,
        client: &ClientContext,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Self {
        Self {
            id: SessionId::new(),
            principal_id,
            email,
            token_digest,
            user_agent: client.user_agent.clone(),
            ip_address: client.ip_string(),
            created_at: now,
            last_activity: now,
            expires_at: now + ttl,
            is_active: true,
        }
    }

    /// Active and not yet expired
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.is_active && self.expires_at > now
    }

    /// Sliding expiration
    pub fn extend(&mut self, now: DateTime<Utc>, ttl: Duration) {
        self.last_activity = now;
        self.expires_at = now + ttl;
    }
}

/// Presence summary for one principal
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionActivity {
    pub active_sessions: u32,
    pub last_activity: Option<DateTime<Utc>>,
}

/// Rows touched by one sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepOutcome {
    pub deactivated: u64,
    pub purged: u64,
}
