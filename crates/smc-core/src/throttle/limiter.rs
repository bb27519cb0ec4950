use std::sync::Arc;

use async_trait::async_trait;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{
    errors::Error,
    throttle::{cache_key, now_ms, RateLimitMetadata, RateLimitStore, ThrottleConfig},
    transport::{FetchRequest, FetchResponse, Fetcher},
    Result,
};

/// Fetcher decorator that holds requests back while the remote quota is
/// nearly exhausted.
///
/// The wait is bounded by [`ThrottleConfig::max_wait`] and aborted by the
/// cancellation token. Dropping the future (e.g. under `tokio::time::timeout`)
/// also abandons the wait.
pub struct RateLimitedFetcher {
    inner: Arc<dyn Fetcher>,
    store: Arc<dyn RateLimitStore>,
    cfg: ThrottleConfig,
    cancel: CancellationToken,
}

impl RateLimitedFetcher {
    pub fn new(inner: Arc<dyn Fetcher>, store: Arc<dyn RateLimitStore>, cfg: ThrottleConfig) -> Self {
        Self {
            inner,
            store,
            cfg,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    async fn throttle(&self, key: &str) -> Result<Option<RateLimitMetadata>> {
        let previous = self.store.claim(key).await?;
        let Some(prev) = previous else {
            return Ok(None);
        };

        let wait = prev.wait_from(now_ms());
        if wait.is_zero() {
            return Ok(previous);
        }
        if wait > self.cfg.max_wait {
            warn!(
                wait_ms = wait.as_millis() as u64,
                max_wait_ms = self.cfg.max_wait.as_millis() as u64,
                "rate limit wait exceeds bound; refusing request"
            );
            return Err(Error::Throttled { retry_after: wait });
        }

        debug!(
            wait_ms = wait.as_millis() as u64,
            remaining = prev.remaining,
            "rate limit nearly exhausted; holding request"
        );
        tokio::select! {
            _ = sleep(wait) => Ok(previous),
            _ = self.cancel.cancelled() => Err(Error::Cancelled),
        }
    }
}

#[async_trait]
impl Fetcher for RateLimitedFetcher {
    async fn request(&self, req: FetchRequest) -> Result<FetchResponse> {
        let key = cache_key(&req.url);
        let previous = self.throttle(&key).await?;

        let resp = self.inner.request(req).await?;

        let meta =
            RateLimitMetadata::after_response(previous.as_ref(), &resp, now_ms(), self.cfg.window);
        if let Err(e) = self.store.record(&key, meta, self.cfg.ttl).await {
            warn!(error = %e, "failed to persist rate limit metadata");
        }

        Ok(resp)
    }
}

impl std::fmt::Debug for RateLimitedFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimitedFetcher")
            .field("cfg", &self.cfg)
            .finish_non_exhaustive()
    }
}
