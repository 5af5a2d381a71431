//! Two-tier cache: shared remote tier first, in-process tier second.
//!
//! The remote tier is a pure optimization. Every remote failure (error,
//! timeout, undecodable bytes) is logged and treated as absent; nothing
//! here returns a remote error to a read or write caller. The local tier is
//! written on every `set` regardless of the remote outcome, so a process
//! keeps caching while the remote tier is down.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlcache_core::{CacheError, CacheKey, CacheSettings, Payload, SqlCacheResult};

use super::local::LocalTier;
use super::traits::{CacheStats, CacheTier, RemoteCache};

/// Bytes stored in the remote tier.
#[derive(Serialize)]
struct EnvelopeRef<'a> {
    payload: &'a Payload,
    cached_at: DateTime<Utc>,
}

#[derive(Deserialize)]
struct Envelope {
    payload: Payload,
    cached_at: DateTime<Utc>,
}

/// A cache hit.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheLookup {
    pub payload: Payload,
    pub tier: CacheTier,
    pub cached_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct TierCounters {
    remote_hits: AtomicU64,
    local_hits: AtomicU64,
    misses: AtomicU64,
    remote_errors: AtomicU64,
    writes: AtomicU64,
    invalidations: AtomicU64,
}

/// Remote tier plus local fallback tier.
pub struct TieredCache<R: RemoteCache> {
    remote: Arc<R>,
    local: LocalTier,
    remote_timeout: Option<Duration>,
    clear_local_on_invalidate: bool,
    counters: TierCounters,
}

impl<R: RemoteCache> TieredCache<R> {
    /// Create a tiered cache after validating `settings`.
    pub fn try_new(remote: Arc<R>, settings: &CacheSettings) -> SqlCacheResult<Self> {
        settings.validate()?;
        Ok(Self::new(remote, settings))
    }

    /// Create a tiered cache over an injected remote tier.
    ///
    /// Settings are not validated; see [`TieredCache::try_new`].
    pub fn new(remote: Arc<R>, settings: &CacheSettings) -> Self {
        Self {
            remote,
            local: LocalTier::new(settings.local_max_entries),
            remote_timeout: settings.remote_timeout(),
            clear_local_on_invalidate: settings.clear_local_on_invalidate,
            counters: TierCounters::default(),
        }
    }

    pub fn remote(&self) -> &R {
        &self.remote
    }

    pub fn local(&self) -> &LocalTier {
        &self.local
    }

    /// Run a remote call under the configured time bound.
    async fn bounded<T, F>(&self, call: F) -> Result<T, CacheError>
    where
        F: Future<Output = Result<T, CacheError>>,
    {
        match self.remote_timeout {
            Some(limit) => tokio::time::timeout(limit, call).await.unwrap_or_else(|_| {
                Err(CacheError::Timeout {
                    elapsed_ms: u64::try_from(limit.as_millis()).unwrap_or(u64::MAX),
                })
            }),
            None => call.await,
        }
    }

    fn remote_failed(&self, key: &str, op: &'static str, error: &CacheError) {
        self.counters.remote_errors.fetch_add(1, Ordering::Relaxed);
        tracing::warn!(key = %key, op, error = %error, "Remote cache call failed, continuing without it");
    }

    /// Look a key up in the remote tier, then the local tier.
    pub async fn get(&self, key: &CacheKey) -> Option<CacheLookup> {
        match self.bounded(self.remote.get(key.as_str())).await {
            Ok(Some(bytes)) => match serde_json::from_slice::<Envelope>(&bytes) {
                Ok(envelope) => {
                    self.counters.remote_hits.fetch_add(1, Ordering::Relaxed);
                    return Some(CacheLookup {
                        payload: envelope.payload,
                        tier: CacheTier::Remote,
                        cached_at: envelope.cached_at,
                    });
                }
                Err(e) => {
                    let error = CacheError::Deserialization {
                        reason: e.to_string(),
                    };
                    tracing::warn!(key = %key, error = %error, "Ignoring undecodable remote entry");
                }
            },
            Ok(None) => {}
            Err(e) => self.remote_failed(key.as_str(), "get", &e),
        }

        if let Some((payload, cached_at)) = self.local.get(key.as_str()) {
            self.counters.local_hits.fetch_add(1, Ordering::Relaxed);
            return Some(CacheLookup {
                payload,
                tier: CacheTier::Local,
                cached_at,
            });
        }

        self.counters.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Store a payload in both tiers. `None` stores without expiry.
    ///
    /// Returns whether the remote write succeeded. The local write always
    /// happens.
    pub async fn set(&self, key: &CacheKey, payload: &Payload, ttl: Option<Duration>) -> bool {
        self.counters.writes.fetch_add(1, Ordering::Relaxed);
        let cached_at = Utc::now();

        let remote_ok = match serde_json::to_vec(&EnvelopeRef { payload, cached_at }) {
            Ok(bytes) => match self.bounded(self.remote.set(key.as_str(), bytes, ttl)).await {
                Ok(()) => true,
                Err(e) => {
                    self.remote_failed(key.as_str(), "set", &e);
                    false
                }
            },
            Err(e) => {
                let error = CacheError::Serialization {
                    reason: e.to_string(),
                };
                tracing::warn!(key = %key, error = %error, "Payload cannot be stored remotely");
                false
            }
        };

        self.local.insert(key.as_str(), payload.clone(), ttl);
        remote_ok
    }

    /// Delete every remote key under `prefix:*`, returning how many.
    ///
    /// Local entries of the namespace are removed first when
    /// `clear_local_on_invalidate` is set, even if the remote tier fails.
    /// Keys are deleted one scan page at a time and the remote timeout
    /// applies to each round trip, not to the whole pass.
    pub async fn invalidate_namespace(&self, prefix: &str) -> Result<u64, CacheError> {
        self.counters.invalidations.fetch_add(1, Ordering::Relaxed);

        if self.clear_local_on_invalidate {
            let removed = self.local.remove_namespace(prefix);
            tracing::debug!(prefix = %prefix, removed, "Cleared local tier namespace");
        }

        let pattern = CacheKey::namespace_pattern(prefix);
        let mut deleted = 0;
        let mut cursor = 0;
        loop {
            let page = self.bounded(self.remote.scan(&pattern, cursor)).await?;
            if !page.keys.is_empty() {
                deleted += self.bounded(self.remote.delete(&page.keys)).await?;
            }
            if page.next_cursor == 0 {
                return Ok(deleted);
            }
            cursor = page.next_cursor;
        }
    }

    /// Snapshot of usage counters.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            remote_hits: self.counters.remote_hits.load(Ordering::Relaxed),
            local_hits: self.counters.local_hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            remote_errors: self.counters.remote_errors.load(Ordering::Relaxed),
            writes: self.counters.writes.load(Ordering::Relaxed),
            invalidations: self.counters.invalidations.load(Ordering::Relaxed),
            local_entries: self.local.len() as u64,
        }
    }
}

impl<R: RemoteCache> std::fmt::Debug for TieredCache<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TieredCache")
            .field("local", &self.local)
            .field("remote_timeout", &self.remote_timeout)
            .field("clear_local_on_invalidate", &self.clear_local_on_invalidate)
            .finish_non_exhaustive()
    }
}
