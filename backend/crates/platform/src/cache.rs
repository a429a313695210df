//! TTL decision cache
//!
//! Caches boolean decisions (e.g. permission checks) for a bounded time.
//! Entries expire lazily on read; the sweeper reclaims the rest.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;

use crate::clock::Clock;
use crate::rate_limit::StoreError;
use crate::sweeper::{Lifecycle, SweeperHandle, SweeperSlot};

#[trait_variant::make(DecisionCache: Send)]
pub trait LocalDecisionCache {
    /// Cached decision, `None` on miss or expiry
    async fn get(&self, key: &str, now_ms: i64) -> Result<Option<bool>, StoreError>;

    async fn put(&self, key: &str, decision: bool, now_ms: i64, ttl_ms: i64)
    -> Result<(), StoreError>;

    /// Remove every key starting with `prefix`, returning how many were removed
    async fn remove_prefix(&self, prefix: &str) -> Result<usize, StoreError>;

    async fn clear(&self) -> Result<(), StoreError>;

    /// Remove expired entries
    async fn sweep(&self, now_ms: i64) -> Result<usize, StoreError>;
}

#[derive(Debug, Clone, Copy)]
struct Entry {
    decision: bool,
    expires_at_ms: i64,
}

struct Inner {
    entries: DashMap<String, Entry>,
    clock: Arc<dyn Clock>,
    sweeper: SweeperSlot,
}

/// Single-process decision cache
#[derive(Clone)]
pub struct InMemoryDecisionCache {
    inner: Arc<Inner>,
}

impl InMemoryDecisionCache {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Arc::new(Inner {
                entries: DashMap::new(),
                clock,
                sweeper: SweeperSlot::default(),
            }),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.entries.is_empty()
    }

    fn sweep_now(inner: &Inner, now_ms: i64) -> usize {
        let before = inner.entries.len();
        inner.entries.retain(|_, e| e.expires_at_ms > now_ms);
        before.saturating_sub(inner.entries.len())
    }
}

impl DecisionCache for InMemoryDecisionCache {
    async fn get(&self, key: &str, now_ms: i64) -> Result<Option<bool>, StoreError> {
        let hit = self.inner.entries.get(key).map(|e| *e);
        match hit {
            Some(entry) if entry.expires_at_ms > now_ms => Ok(Some(entry.decision)),
            Some(_) => {
                self.inner
                    .entries
                    .remove_if(key, |_, e| e.expires_at_ms <= now_ms);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn put(
        &self,
        key: &str,
        decision: bool,
        now_ms: i64,
        ttl_ms: i64,
    ) -> Result<(), StoreError> {
        self.inner.entries.insert(
            key.to_string(),
            Entry {
                decision,
                expires_at_ms: now_ms + ttl_ms,
            },
        );
        Ok(())
    }

    async fn remove_prefix(&self, prefix: &str) -> Result<usize, StoreError> {
        let before = self.inner.entries.len();
        self.inner.entries.retain(|k, _| !k.starts_with(prefix));
        Ok(before.saturating_sub(self.inner.entries.len()))
    }

    async fn clear(&self) -> Result<(), StoreError> {
        self.inner.entries.clear();
        Ok(())
    }

    async fn sweep(&self, now_ms: i64) -> Result<usize, StoreError> {
        Ok(Self::sweep_now(&self.inner, now_ms))
    }
}

impl Lifecycle for InMemoryDecisionCache {
    fn init(&self, sweep_every: Duration) {
        let inner = self.inner.clone();
        let handle = SweeperHandle::spawn("decision_cache", sweep_every, move || {
            let inner = inner.clone();
            async move {
                let removed = Self::sweep_now(&inner, inner.clock.now_ms());
                if removed > 0 {
                    tracing::debug!(entries_removed = removed, "Swept expired cached decisions");
                }
            }
        });
        self.inner.sweeper.replace(Some(handle));
    }

    fn teardown(&self) {
        self.inner.sweeper.replace(None);
    }
}
