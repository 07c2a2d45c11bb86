//! Short-lived response cache.
//!
//! Successful GET responses are kept for about a second, which is enough to
//! absorb the bursts of identical reads a page issues while rendering. There
//! is no invalidation API; entries leave by TTL or the capacity cap.
//!
//! Lookup and populate are one step: concurrent identical GETs share a single
//! network call, and only its successful response is stored.

use crate::config::Config;
use crate::error::{Error, Result};
use crate::transport::{HttpRequest, HttpResponse};
use moka::future::Cache;
use std::future::Future;
use std::time::Duration;
use tandem_engine::Method;

/// Why a loaded response was not stored.
#[derive(Debug)]
enum Uncached {
    Response(HttpResponse),
    Failed(Error),
}

/// Response cache owned by one client instance.
#[derive(Clone)]
pub struct ResponseCache {
    inner: Cache<String, HttpResponse>,
}

impl ResponseCache {
    pub fn new(ttl: Duration, capacity: u64) -> Self {
        Self {
            inner: Cache::builder()
                .max_capacity(capacity)
                .time_to_live(ttl)
                .build(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.cache_ttl, config.cache_capacity)
    }

    /// Answer `request` from the cache, or run `load` and keep a successful
    /// GET response. Callers asking for the same key while `load` runs wait
    /// for its outcome instead of loading again. Other methods always load.
    pub async fn get_or_load<F, Fut>(&self, request: &HttpRequest, load: F) -> Result<HttpResponse>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<HttpResponse>>,
    {
        if request.method != Method::Get {
            return load().await;
        }

        let entry = self
            .inner
            .entry(request.cache_key())
            .or_try_insert_with(async move {
                match load().await {
                    Ok(response) if response.is_success() => Ok(response),
                    Ok(response) => Err(Uncached::Response(response)),
                    Err(err) => Err(Uncached::Failed(err)),
                }
            })
            .await;

        match entry {
            Ok(entry) => {
                if !entry.is_fresh() {
                    tracing::debug!(url = %request.url, "Response cache hit");
                }
                Ok(entry.into_value())
            }
            Err(uncached) => match uncached.as_ref() {
                Uncached::Response(response) => Ok(response.clone()),
                Uncached::Failed(err) => Err(err.clone()),
            },
        }
    }

    pub async fn entry_count(&self) -> u64 {
        self.inner.run_pending_tasks().await;
        self.inner.entry_count()
    }
}

impl std::fmt::Debug for ResponseCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseCache")
            .field("entries", &self.inner.entry_count())
            .finish()
    }
}
