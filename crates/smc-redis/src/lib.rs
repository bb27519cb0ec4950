//! Redis-backed rate-limit store, for several processes sharing one bridge.

use std::time::Duration;

use async_trait::async_trait;
use redis::{aio::MultiplexedConnection, Client, Script};
use smc_core::{
    throttle::{RateLimitMetadata, RateLimitStore},
    Error, Result,
};
use tracing::{debug, trace};

// Read-and-decrement in one step so concurrent clients never share a unit.
const CLAIM_SCRIPT: &str = r#"
local r = redis.call('HMGET', KEYS[1], 'reset', 'remaining')
if not r[1] or not r[2] then
  return false
end
local remaining = tonumber(r[2])
if remaining > 0 then
  redis.call('HSET', KEYS[1], 'remaining', remaining - 1)
end
return {r[1], r[2]}
"#;

/// Rate-limit metadata stored as a hash per cache key, expired by Redis.
#[derive(Debug, Clone)]
pub struct RedisRateLimitStore {
    client: Client,
    claim: Script,
}

impl RedisRateLimitStore {
    /// Parse the connection string. No connection is made until first use.
    pub fn new(connection_string: &str) -> Result<Self> {
        let client = Client::open(connection_string)
            .map_err(|e| Error::Store(format!("failed to create Redis client: {e}")))?;
        Ok(Self {
            client,
            claim: Script::new(CLAIM_SCRIPT),
        })
    }

    /// Connect and check the server answers.
    pub async fn connect(connection_string: &str) -> Result<Self> {
        let store = Self::new(connection_string)?;
        let mut conn = store.conn().await?;
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(store_err)?;
        debug!("redis rate-limit store connected");
        Ok(store)
    }

    async fn conn(&self) -> Result<MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(store_err)
    }
}

fn store_err(e: redis::RedisError) -> Error {
    Error::Store(format!("redis: {e}"))
}

#[async_trait]
impl RateLimitStore for RedisRateLimitStore {
    async fn claim(&self, key: &str) -> Result<Option<RateLimitMetadata>> {
        let mut conn = self.conn().await?;
        let raw: Option<(i64, u32)> = self
            .claim
            .key(key)
            .invoke_async(&mut conn)
            .await
            .map_err(store_err)?;

        trace!(key, found = raw.is_some(), "rate-limit claim");
        Ok(raw.map(|(reset_ms, remaining)| RateLimitMetadata {
            reset_ms,
            remaining,
        }))
    }

    async fn record(&self, key: &str, meta: RateLimitMetadata, ttl: Duration) -> Result<()> {
        let mut conn = self.conn().await?;
        let ttl_secs = i64::try_from(ttl.as_secs().max(1)).unwrap_or(i64::MAX);

        let _: () = redis::pipe()
            .atomic()
            .hset_multiple(
                key,
                &[
                    ("reset", meta.reset_ms.to_string()),
                    ("remaining", meta.remaining.to_string()),
                ],
            )
            .ignore()
            .expire(key, ttl_secs)
            .ignore()
            .query_async(&mut conn)
            .await
            .map_err(store_err)?;
        Ok(())
    }
}
