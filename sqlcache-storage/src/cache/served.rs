//! Served-by metadata for read-through results.

use chrono::{DateTime, Utc};
use std::time::Duration;

use super::traits::CacheTier;

/// Where the answer to a call came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Origin {
    /// Served from one of the cache tiers.
    Cache,
    /// Served by executing against the store.
    Store,
}

/// Result of a read-through call, carrying where and when it was produced.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheRead<T> {
    value: T,
    origin: Origin,
    tier: Option<CacheTier>,
    /// When the value was cached (or fetched from the store).
    cached_at: DateTime<Utc>,
}

impl<T> CacheRead<T> {
    /// A value served from a cache tier.
    pub fn from_cache(value: T, cached_at: DateTime<Utc>, tier: CacheTier) -> Self {
        Self {
            value,
            origin: Origin::Cache,
            tier: Some(tier),
            cached_at,
        }
    }

    /// A value just produced by the store.
    pub fn from_store(value: T) -> Self {
        Self {
            value,
            origin: Origin::Store,
            tier: None,
            cached_at: Utc::now(),
        }
    }

    pub fn into_value(self) -> T {
        self.value
    }

    pub fn value(&self) -> &T {
        &self.value
    }

    pub fn origin(&self) -> Origin {
        self.origin
    }

    /// The tier that served a cache hit, `None` for store results.
    pub fn tier(&self) -> Option<CacheTier> {
        self.tier
    }

    pub fn was_cache_hit(&self) -> bool {
        self.origin == Origin::Cache
    }

    pub fn was_cache_miss(&self) -> bool {
        !self.was_cache_hit()
    }

    pub fn cached_at(&self) -> DateTime<Utc> {
        self.cached_at
    }

    /// How long ago the value was produced by the store.
    pub fn staleness(&self) -> Duration {
        Utc::now()
            .signed_duration_since(self.cached_at)
            .to_std()
            .unwrap_or(Duration::ZERO)
    }

    /// Map the value, keeping the metadata.
    pub fn map<U, F: FnOnce(T) -> U>(self, f: F) -> CacheRead<U> {
        CacheRead {
            value: f(self.value),
            origin: self.origin,
            tier: self.tier,
            cached_at: self.cached_at,
        }
    }
}

impl<T> AsRef<T> for CacheRead<T> {
    fn as_ref(&self) -> &T {
        &self.value
    }
}
