//! Rate Limiting Infrastructure
//!
//! Sliding-window counters keyed by arbitrary strings (IP, IP + identity, ...)
//! plus per-day counters. The store is injected so that a multi-instance
//! deployment can swap the in-memory implementation for a shared one.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use dashmap::DashMap;

use crate::clock::Clock;
use crate::sweeper::{Lifecycle, SweeperHandle, SweeperSlot};

/// Sliding window configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitConfig {
    /// Maximum events allowed in the window
    pub max_requests: u32,
    pub window: Duration,
}

impl RateLimitConfig {
    pub fn new(max_requests: u32, window_secs: u64) -> Self {
        Self {
            max_requests,
            window: Duration::from_secs(window_secs),
        }
    }

    pub fn window_ms(&self) -> i64 {
        self.window.as_millis() as i64
    }
}

/// State of one key inside its window
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WindowSnapshot {
    pub count: u32,
    /// Oldest event still inside the window
    pub earliest_ms: Option<i64>,
    /// Distinct members recorded inside the window
    pub distinct_members: u32,
}

impl WindowSnapshot {
    /// Milliseconds until the oldest event leaves the window
    pub fn retry_after_ms(&self, window_ms: i64, now_ms: i64) -> i64 {
        self.earliest_ms
            .map(|earliest| (earliest + window_ms - now_ms).max(0))
            .unwrap_or(0)
    }

    pub fn exceeds(&self, limit: &RateLimitConfig) -> bool {
        self.count >= limit.max_requests
    }
}

/// Rate limit check result
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitResult {
    pub allowed: bool,
    pub remaining: u32,
    pub retry_after_ms: i64,
}

impl RateLimitResult {
    pub fn evaluate(snapshot: &WindowSnapshot, limit: &RateLimitConfig, now_ms: i64) -> Self {
        if snapshot.exceeds(limit) {
            Self {
                allowed: false,
                remaining: 0,
                retry_after_ms: snapshot.retry_after_ms(limit.window_ms(), now_ms),
            }
        } else {
            Self {
                allowed: true,
                remaining: limit.max_requests - snapshot.count,
                retry_after_ms: 0,
            }
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Counter store unavailable: {0}")]
    Unavailable(String),
}

/// Storage backend for sliding windows and daily counters
///
/// A key must always be read with the same window length: reads prune
/// events older than the window they are given.
#[trait_variant::make(SlidingWindowStore: Send)]
pub trait LocalSlidingWindowStore {
    /// Append one event, optionally tagged with a member (e.g. an identity)
    async fn record(&self, key: &str, member: Option<&str>, now_ms: i64) -> Result<(), StoreError>;

    /// Prune and summarise the window ending at `now_ms`
    async fn snapshot(
        &self,
        key: &str,
        now_ms: i64,
        window_ms: i64,
    ) -> Result<WindowSnapshot, StoreError>;

    /// Forget every event for a key
    async fn clear(&self, key: &str) -> Result<(), StoreError>;

    /// Current count for `day`. A stored count for another day reads as zero.
    async fn day_count(&self, key: &str, day: NaiveDate) -> Result<u64, StoreError>;

    /// Increment the counter for `day`, resetting it when the day changed
    async fn day_increment(&self, key: &str, day: NaiveDate) -> Result<u64, StoreError>;

    /// Drop events older than `max_age_ms` and empty keys
    async fn sweep(&self, now_ms: i64, max_age_ms: i64) -> Result<usize, StoreError>;
}

// ============================================================================
// In-memory implementation
// ============================================================================

#[derive(Debug, Clone)]
struct Hit {
    at_ms: i64,
    member: Option<String>,
}

struct Inner {
    windows: DashMap<String, VecDeque<Hit>>,
    days: DashMap<String, (NaiveDate, u64)>,
    clock: Arc<dyn Clock>,
    max_age: Duration,
    sweeper: SweeperSlot,
}

/// Single-process store backed by sharded concurrent maps
///
/// Counters are advisory and lost on restart.
#[derive(Clone)]
pub struct InMemorySlidingWindowStore {
    inner: Arc<Inner>,
}

impl InMemorySlidingWindowStore {
    /// `max_age` must cover the longest window any caller uses
    pub fn new(clock: Arc<dyn Clock>, max_age: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                windows: DashMap::new(),
                days: DashMap::new(),
                clock,
                max_age,
                sweeper: SweeperSlot::default(),
            }),
        }
    }

    pub fn key_count(&self) -> usize {
        self.inner.windows.len()
    }

    fn sweep_now(inner: &Inner, now_ms: i64, max_age_ms: i64) -> usize {
        let cutoff = now_ms - max_age_ms;
        let before = inner.windows.len();
        inner.windows.retain(|_, hits| {
            while hits.front().is_some_and(|h| h.at_ms <= cutoff) {
                hits.pop_front();
            }
            !hits.is_empty()
        });
        before.saturating_sub(inner.windows.len())
    }
}

impl SlidingWindowStore for InMemorySlidingWindowStore {
    async fn record(&self, key: &str, member: Option<&str>, now_ms: i64) -> Result<(), StoreError> {
        self.inner
            .windows
            .entry(key.to_string())
            .or_default()
            .push_back(Hit {
                at_ms: now_ms,
                member: member.map(str::to_string),
            });
        Ok(())
    }

    async fn snapshot(
        &self,
        key: &str,
        now_ms: i64,
        window_ms: i64,
    ) -> Result<WindowSnapshot, StoreError> {
        let Some(mut hits) = self.inner.windows.get_mut(key) else {
            return Ok(WindowSnapshot::default());
        };

        let cutoff = now_ms - window_ms;
        while hits.front().is_some_and(|h| h.at_ms <= cutoff) {
            hits.pop_front();
        }

        let members: HashSet<&str> = hits.iter().filter_map(|h| h.member.as_deref()).collect();

        Ok(WindowSnapshot {
            count: hits.len() as u32,
            earliest_ms: hits.iter().map(|h| h.at_ms).min(),
            distinct_members: members.len() as u32,
        })
    }

    async fn clear(&self, key: &str) -> Result<(), StoreError> {
        self.inner.windows.remove(key);
        Ok(())
    }

    async fn day_count(&self, key: &str, day: NaiveDate) -> Result<u64, StoreError> {
        Ok(self
            .inner
            .days
            .get(key)
            .filter(|entry| entry.0 == day)
            .map(|entry| entry.1)
            .unwrap_or(0))
    }

    async fn day_increment(&self, key: &str, day: NaiveDate) -> Result<u64, StoreError> {
        let mut entry = self.inner.days.entry(key.to_string()).or_insert((day, 0));
        if entry.0 != day {
            *entry = (day, 0);
        }
        entry.1 += 1;
        Ok(entry.1)
    }

    async fn sweep(&self, now_ms: i64, max_age_ms: i64) -> Result<usize, StoreError> {
        Ok(Self::sweep_now(&self.inner, now_ms, max_age_ms))
    }
}

impl Lifecycle for InMemorySlidingWindowStore {
    fn init(&self, sweep_every: Duration) {
        let inner = self.inner.clone();
        let handle = SweeperHandle::spawn("sliding_window", sweep_every, move || {
            let inner = inner.clone();
            async move {
                let max_age_ms = inner.max_age.as_millis() as i64;
                let removed = Self::sweep_now(&inner, inner.clock.now_ms(), max_age_ms);
                if removed > 0 {
                    tracing::debug!(keys_removed = removed, "Swept idle rate limit keys");
                }
            }
        });
        self.inner.sweeper.replace(Some(handle));
    }

    fn teardown(&self) {
        self.inner.sweeper.replace(None);
    }
}

#[cfg(test)]
mod tests {
    use super::{
        InMemorySlidingWindowStore, Lifecycle, RateLimitConfig, RateLimitResult,
        SlidingWindowStore,
    };
    use crate::clock::ManualClock;
    use chrono::NaiveDate;
    use std::sync::Arc;
    use std::time::Duration;

    const MINUTE: i64 = 60_000;

    fn store() -> InMemorySlidingWindowStore {
        InMemorySlidingWindowStore::new(
            Arc::new(ManualClock::starting_now()),
            Duration::from_secs(3600),
        )
    }

    #[tokio::test]
    async fn test_window_counts_and_prunes() {
        let store = store();
        let t0 = 1_000_000;
        for i in 0..3 {
            store.record("ip:1", None, t0 + i * MINUTE).await.unwrap();
        }

        let snap = store.snapshot("ip:1", t0 + 2 * MINUTE, 15 * MINUTE).await.unwrap();
        assert_eq!(snap.count, 3);
        assert_eq!(snap.earliest_ms, Some(t0));

        // First event falls out exactly at t0 + window
        let snap = store.snapshot("ip:1", t0 + 15 * MINUTE, 15 * MINUTE).await.unwrap();
        assert_eq!(snap.count, 2);
        assert_eq!(snap.earliest_ms, Some(t0 + MINUTE));
    }

    #[tokio::test]
    async fn test_retry_after() {
        let limit = RateLimitConfig::new(2, 900);
        let store = store();
        let t0 = 5_000_000;
        store.record("k", None, t0).await.unwrap();
        store.record("k", None, t0 + MINUTE).await.unwrap();

        let now = t0 + 5 * MINUTE;
        let snap = store.snapshot("k", now, limit.window_ms()).await.unwrap();
        let result = RateLimitResult::evaluate(&snap, &limit, now);
        assert!(!result.allowed);
        assert_eq!(result.retry_after_ms, 10 * MINUTE);
    }

    #[tokio::test]
    async fn test_distinct_members() {
        let store = store();
        for identity in ["a@x.io", "b@x.io", "a@x.io", "c@x.io"] {
            store.record("ids", Some(identity), 10).await.unwrap();
        }
        let snap = store.snapshot("ids", 20, 5 * MINUTE).await.unwrap();
        assert_eq!(snap.count, 4);
        assert_eq!(snap.distinct_members, 3);
    }

    #[tokio::test]
    async fn test_clear() {
        let store = store();
        store.record("k", None, 1).await.unwrap();
        store.clear("k").await.unwrap();
        assert_eq!(store.snapshot("k", 2, MINUTE).await.unwrap().count, 0);
    }

    #[tokio::test]
    async fn test_day_counter_resets_on_new_day() {
        let store = store();
        let monday = NaiveDate::from_ymd_opt(2026, 3, 2).unwrap();
        let tuesday = monday.succ_opt().unwrap();

        assert_eq!(store.day_increment("global", monday).await.unwrap(), 1);
        assert_eq!(store.day_increment("global", monday).await.unwrap(), 2);
        assert_eq!(store.day_count("global", monday).await.unwrap(), 2);

        assert_eq!(store.day_count("global", tuesday).await.unwrap(), 0);
        assert_eq!(store.day_increment("global", tuesday).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_sweep_removes_idle_keys() {
        let store = store();
        store.record("old", None, 0).await.unwrap();
        store.record("fresh", None, 2 * 3_600_000).await.unwrap();

        let removed = store.sweep(2 * 3_600_000, 3_600_000).await.unwrap();
        assert_eq!(removed, 1);
        assert_eq!(store.key_count(), 1);
    }

    #[tokio::test]
    async fn test_lifecycle() {
        let store = store();
        store.init(Duration::from_secs(60));
        assert!(store.inner.sweeper.is_running());
        store.teardown();
        assert!(!store.inner.sweeper.is_running());
    }
}
