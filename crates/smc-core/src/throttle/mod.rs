//! Rate-limit aware request throttling.
//!
//! Quota metadata lives in a [`RateLimitStore`] shared by every client talking to
//! the same remote host, so separate processes throttle against each other.

pub mod limiter;
pub mod store;

use std::{sync::Arc, time::Duration};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio_util::sync::CancellationToken;

use crate::{
    config::RuntimeConfig,
    transport::{port::Url, FetchResponse, Fetcher, ReqwestFetcher},
    Result,
};

pub use limiter::RateLimitedFetcher;
pub use store::{MemoryRateLimitStore, RateLimitStore};

pub const CACHE_PREFIX: &str = "smc:connector.drivers.mirai";

const HEADER_REMAINING: &str = "x-ratelimit-remaining";
const HEADER_RESET: &str = "x-ratelimit-reset";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ThrottleConfig {
    /// Longest wait the limiter accepts before failing with `Throttled`.
    pub max_wait: Duration,
    /// Quota window assumed when the remote sends no reset header.
    pub window: Duration,
    /// Expiry of stored metadata.
    pub ttl: Duration,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            max_wait: Duration::from_secs(30),
            window: Duration::from_millis(1000),
            ttl: Duration::from_secs(60 * 60 * 24 * 7),
        }
    }
}

/// Last observed quota for one remote host.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitMetadata {
    /// Epoch milliseconds at which the quota resets.
    pub reset_ms: i64,
    pub remaining: u32,
}

impl RateLimitMetadata {
    /// How long a request must be held back given this record.
    pub fn wait_from(&self, now_ms: i64) -> Duration {
        if self.remaining < 2 && self.reset_ms > now_ms {
            Duration::from_millis((self.reset_ms - now_ms) as u64)
        } else {
            Duration::ZERO
        }
    }

    /// Metadata to persist after `resp`, given the record seen before sending.
    pub fn after_response(
        previous: Option<&RateLimitMetadata>,
        resp: &FetchResponse,
        now_ms: i64,
        window: Duration,
    ) -> Self {
        let remaining = resp
            .header(HEADER_REMAINING)
            .and_then(|v| v.trim().parse::<u32>().ok())
            .unwrap_or_else(|| previous.map(|p| p.remaining.saturating_sub(1)).unwrap_or(0));

        let reset_ms = resp
            .header(HEADER_RESET)
            .and_then(|v| v.trim().parse::<i64>().ok())
            .map(|secs| secs.saturating_mul(1000))
            .unwrap_or_else(|| match previous {
                Some(p) if p.reset_ms > now_ms => p.reset_ms,
                _ => now_ms + window.as_millis() as i64,
            });

        Self {
            reset_ms,
            remaining,
        }
    }
}

/// Store key for the host (and port) a request targets.
pub fn cache_key(url: &Url) -> String {
    let host = url.host_str().unwrap_or_default();
    let port = url.port_or_known_default().unwrap_or(0);
    let digest = Sha256::digest(format!("{host}:{port}").as_bytes());
    format!("{CACHE_PREFIX}.{digest:x}.metadata")
}

pub(crate) fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Default transport: reqwest behind the rate limiter.
pub fn rate_limited_http(
    runtime: &RuntimeConfig,
    store: Arc<dyn RateLimitStore>,
    cancel: CancellationToken,
) -> Result<Arc<dyn Fetcher>> {
    let inner = Arc::new(ReqwestFetcher::new(runtime.http_timeout)?);
    Ok(Arc::new(
        RateLimitedFetcher::new(inner, store, runtime.throttle).with_cancellation(cancel),
    ))
}
