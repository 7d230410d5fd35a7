//! Counter store abstraction.
//!
//! The admission controller only needs a key/value store with per-key TTL
//! expiry. Stores may be eventually consistent; nothing here assumes an
//! atomic increment.

use async_trait::async_trait;
use dashmap::DashMap;
use std::time::{Duration, Instant};

use crate::error::Result;

/// Trait for counter store implementations.
///
/// Implemented by the in-process [`InMemoryCounterStore`] and by
/// [`RedisCounterStore`](super::RedisCounterStore) for counters shared
/// across edge nodes.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Read the counter for `key`. A missing or expired key reads as `None`.
    async fn get(&self, key: &str) -> Result<Option<u64>>;

    /// Write the counter for `key`, expiring after `ttl`.
    async fn put(&self, key: &str, value: u64, ttl: Duration) -> Result<()>;
}

#[derive(Debug, Clone, Copy)]
struct StoredCounter {
    value: u64,
    expires_at: Instant,
}

/// Process-local counter store.
///
/// Expired entries are hidden on read and dropped by [`purge_expired`].
///
/// [`purge_expired`]: InMemoryCounterStore::purge_expired
#[derive(Debug, Default)]
pub struct InMemoryCounterStore {
    entries: DashMap<String, StoredCounter>,
}

impl InMemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove every expired entry, returning how many were dropped.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut purged = 0;
        self.entries.retain(|_, counter| {
            let live = counter.expires_at > now;
            if !live {
                purged += 1;
            }
            live
        });
        purged
    }

    /// Number of stored entries, expired or not.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remaining lifetime of a key, if present.
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        self.entries
            .get(key)
            .map(|counter| counter.expires_at.saturating_duration_since(Instant::now()))
    }
}

#[async_trait]
impl CounterStore for InMemoryCounterStore {
    async fn get(&self, key: &str) -> Result<Option<u64>> {
        let now = Instant::now();
        let value = match self.entries.get(key) {
            Some(counter) if counter.expires_at > now => Some(counter.value),
            Some(_) => None,
            None => return Ok(None),
        };

        if value.is_none() {
            self.entries.remove_if(key, |_, counter| counter.expires_at <= now);
        }
        Ok(value)
    }

    async fn put(&self, key: &str, value: u64, ttl: Duration) -> Result<()> {
        self.entries.insert(
            key.to_string(),
            StoredCounter {
                value,
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }
}

/// Spawn a background task that periodically drops expired counters.
pub fn spawn_purge_task(
    store: std::sync::Arc<InMemoryCounterStore>,
    every: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        loop {
            interval.tick().await;
            let purged = store.purge_expired();
            if purged > 0 {
                tracing::debug!(purged, remaining = store.len(), "Purged expired counters");
            }
        }
    })
}
