//! Cache tier traits and shared types.

use async_trait::async_trait;
use sqlcache_core::CacheError;
use std::time::Duration;

/// Key-value capability of the remote cache tier.
///
/// The remote tier is shared across processes and treated as unreliable:
/// callers of this trait never let its errors reach a query caller.
#[async_trait]
pub trait RemoteCache: Send + Sync {
    /// Fetch the raw bytes stored under `key`, if any.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError>;

    /// Store `value` under `key`. `None` stores without expiry.
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<(), CacheError>;

    /// One page of keys matching a glob pattern such as `prefix:*`.
    ///
    /// Iteration starts at cursor 0 and is finished when the returned page
    /// carries a `next_cursor` of 0. A key may appear on more than one page.
    async fn scan(&self, pattern: &str, cursor: u64) -> Result<ScanPage, CacheError>;

    /// List every key matching a glob pattern, walking all pages.
    async fn keys(&self, pattern: &str) -> Result<Vec<String>, CacheError> {
        let mut keys = Vec::new();
        let mut cursor = 0;
        loop {
            let page = self.scan(pattern, cursor).await?;
            keys.extend(page.keys);
            if page.next_cursor == 0 {
                break;
            }
            cursor = page.next_cursor;
        }
        keys.sort_unstable();
        keys.dedup();
        Ok(keys)
    }

    /// Delete the given keys, returning how many existed.
    async fn delete(&self, keys: &[String]) -> Result<u64, CacheError>;
}

/// Keys returned by one [`RemoteCache::scan`] round trip.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanPage {
    /// Cursor for the next call, 0 once iteration is complete.
    pub next_cursor: u64,
    pub keys: Vec<String>,
}

impl ScanPage {
    /// A page that ends the iteration.
    pub fn last(keys: Vec<String>) -> Self {
        Self { next_cursor: 0, keys }
    }
}

/// Which tier served a cache hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheTier {
    Remote,
    Local,
}

/// Statistics about cache usage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of hits served by the remote tier.
    pub remote_hits: u64,
    /// Number of hits served by the local tier.
    pub local_hits: u64,
    /// Number of lookups that found nothing in either tier.
    pub misses: u64,
    /// Number of remote calls that failed or timed out.
    pub remote_errors: u64,
    /// Number of `set` calls.
    pub writes: u64,
    /// Number of namespace invalidations performed.
    pub invalidations: u64,
    /// Number of entries currently held by the local tier.
    pub local_entries: u64,
}

impl CacheStats {
    /// Total hits across both tiers.
    pub fn hits(&self) -> u64 {
        self.remote_hits + self.local_hits
    }

    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits() + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits() as f64 / total as f64
        }
    }
}
