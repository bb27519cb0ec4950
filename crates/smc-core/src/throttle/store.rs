use std::{collections::HashMap, time::Duration};

use async_trait::async_trait;
use tokio::{sync::Mutex, time::Instant};

use crate::{throttle::RateLimitMetadata, Result};

/// Shared key-value store for rate-limit metadata.
///
/// Implementations must make `claim` atomic: two concurrent callers never both
/// observe the same `remaining` value.
#[async_trait]
pub trait RateLimitStore: Send + Sync {
    /// Read the record for `key` and take one unit from its remaining quota.
    ///
    /// Returns the record as it was before the claim.
    async fn claim(&self, key: &str) -> Result<Option<RateLimitMetadata>>;

    /// Overwrite the record for `key`.
    async fn record(&self, key: &str, meta: RateLimitMetadata, ttl: Duration) -> Result<()>;
}

#[derive(Debug)]
struct Entry {
    meta: RateLimitMetadata,
    expires_at: Instant,
}

/// Process-local store. Share one `Arc` between clients of the same process.
#[derive(Debug, Default)]
pub struct MemoryRateLimitStore {
    entries: Mutex<HashMap<String, Entry>>,
}

impl MemoryRateLimitStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current record, without claiming.
    pub async fn peek(&self, key: &str) -> Option<RateLimitMetadata> {
        let entries = self.entries.lock().await;
        entries
            .get(key)
            .filter(|e| e.expires_at > Instant::now())
            .map(|e| e.meta)
    }
}

#[async_trait]
impl RateLimitStore for MemoryRateLimitStore {
    async fn claim(&self, key: &str) -> Result<Option<RateLimitMetadata>> {
        let mut entries = self.entries.lock().await;
        let now = Instant::now();

        if entries.get(key).is_some_and(|e| e.expires_at <= now) {
            entries.remove(key);
        }

        let Some(entry) = entries.get_mut(key) else {
            return Ok(None);
        };
        let before = entry.meta;
        entry.meta.remaining = entry.meta.remaining.saturating_sub(1);
        Ok(Some(before))
    }

    async fn record(&self, key: &str, meta: RateLimitMetadata, ttl: Duration) -> Result<()> {
        let mut entries = self.entries.lock().await;
        entries.insert(
            key.to_string(),
            Entry {
                meta,
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn claim_consumes_quota_atomically() {
        let store = MemoryRateLimitStore::new();
        let meta = RateLimitMetadata {
            reset_ms: i64::MAX,
            remaining: 2,
        };
        store.record("k", meta, Duration::from_secs(60)).await.unwrap();

        let first = store.claim("k").await.unwrap().unwrap();
        let second = store.claim("k").await.unwrap().unwrap();

        // The second caller sees the slot the first one took.
        assert_eq!(first.remaining, 2);
        assert_eq!(second.remaining, 1);
        assert_eq!(store.peek("k").await.unwrap().remaining, 0);
    }

    #[tokio::test]
    async fn claim_on_missing_key_is_none() {
        let store = MemoryRateLimitStore::new();
        assert!(store.claim("absent").await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn records_expire() {
        let store = MemoryRateLimitStore::new();
        let meta = RateLimitMetadata {
            reset_ms: 0,
            remaining: 3,
        };
        store.record("k", meta, Duration::from_secs(10)).await.unwrap();
        assert!(store.peek("k").await.is_some());

        tokio::time::advance(Duration::from_secs(11)).await;
        assert!(store.peek("k").await.is_none());
        assert!(store.claim("k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn record_overwrites() {
        let store = MemoryRateLimitStore::new();
        let ttl = Duration::from_secs(60);
        store
            .record("k", RateLimitMetadata { reset_ms: 1, remaining: 1 }, ttl)
            .await
            .unwrap();
        store
            .record("k", RateLimitMetadata { reset_ms: 2, remaining: 9 }, ttl)
            .await
            .unwrap();
        assert_eq!(
            store.peek("k").await,
            Some(RateLimitMetadata {
                reset_ms: 2,
                remaining: 9
            })
        );
    }
}
