//! Redis-backed counter store, shared by every edge node pointed at the
//! same Redis.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::time::Duration;
use tracing::info;

use super::store::CounterStore;
use crate::error::Result;

/// Counter store over a multiplexed, auto-reconnecting Redis connection.
///
/// Reads and writes are plain `GET` and `SET .. EX`, mirroring the
/// read-then-write contract of the admission controller.
#[derive(Clone)]
pub struct RedisCounterStore {
    connection: ConnectionManager,
}

impl RedisCounterStore {
    /// Connect to Redis at `url`, e.g. `redis://127.0.0.1:6379/0`.
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url)?;
        let connection = ConnectionManager::new(client).await?;
        info!("Connected to Redis counter store");
        Ok(Self { connection })
    }
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    async fn get(&self, key: &str) -> Result<Option<u64>> {
        let mut connection = self.connection.clone();
        let value: Option<u64> = connection.get(key).await?;
        Ok(value)
    }

    async fn put(&self, key: &str, value: u64, ttl: Duration) -> Result<()> {
        let mut connection = self.connection.clone();
        // EX 0 is rejected by Redis.
        let seconds = ttl.as_secs().max(1);
        let _: () = connection.set_ex(key, value, seconds).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Needs a live Redis: REDIS_URL=redis://127.0.0.1:6379/0 cargo test -- --ignored
    #[tokio::test]
    #[ignore]
    async fn test_round_trip_and_ttl_clamp() {
        let Ok(url) = std::env::var("REDIS_URL") else {
            return;
        };
        let store = RedisCounterStore::connect(&url).await.unwrap();
        let key = format!("rl:test:{}:api:1", std::process::id());

        assert_eq!(store.get(&key).await.unwrap(), None);

        store.put(&key, 4, Duration::from_secs(120)).await.unwrap();
        assert_eq!(store.get(&key).await.unwrap(), Some(4));

        // A sub-second TTL still produces a valid expiry.
        store.put(&key, 5, Duration::from_millis(10)).await.unwrap();
        assert_eq!(store.get(&key).await.unwrap(), Some(5));

        let mut connection = store.connection.clone();
        let ttl: i64 = redis::cmd("TTL").arg(&key).query_async(&mut connection).await.unwrap();
        assert!((0..=1).contains(&ttl));

        let _: () = connection.del(&key).await.unwrap();
    }
}
