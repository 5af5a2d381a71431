//! Read-through query executor.
//!
//! Wraps a [`QueryStore`] and exposes the same `execute` contract. Every
//! call is classified first:
//!
//! - reads derive a key and consult the [`TieredCache`]; a hit is returned
//!   as-is, a miss executes against the store, materializes the result,
//!   stores it in both tiers and returns the materialized payload
//! - writes and unknown statements bypass the cache and return the store's
//!   native result; a successful write then schedules namespace
//!   invalidation on the attached [`InvalidationListener`]
//!
//! Store errors are returned to the caller unchanged. Cache problems never
//! are: they only show up as store-served calls.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use sqlcache_core::{
    classify, CacheError, CacheKey, CacheSettings, Params, Payload, Query, QueryKind, RawResult,
    SqlCacheResult, StoreError,
};

use super::invalidation::InvalidationListener;
use super::served::{CacheRead, Origin};
use super::tiered::TieredCache;
use super::traits::RemoteCache;
use crate::materialize::{materialize, try_materialize};
use crate::store::QueryStore;

const ORIGIN_UNSET: u8 = 0;
const ORIGIN_CACHE: u8 = 1;
const ORIGIN_STORE: u8 = 2;

/// Result of [`ReadThroughExecutor::execute`].
#[derive(Debug, Clone)]
pub enum QueryOutput {
    /// A read served through the cache path.
    Read(CacheRead<Payload>),
    /// The store's native result for a bypassed statement.
    Passthrough(RawResult),
}

impl QueryOutput {
    pub fn origin(&self) -> Origin {
        match self {
            Self::Read(read) => read.origin(),
            Self::Passthrough(_) => Origin::Store,
        }
    }

    pub fn payload(&self) -> Option<&Payload> {
        match self {
            Self::Read(read) => Some(read.value()),
            Self::Passthrough(_) => None,
        }
    }

    pub fn into_payload(self) -> Option<Payload> {
        match self {
            Self::Read(read) => Some(read.into_value()),
            Self::Passthrough(_) => None,
        }
    }

    pub fn raw(&self) -> Option<&RawResult> {
        match self {
            Self::Read(_) => None,
            Self::Passthrough(raw) => Some(raw),
        }
    }
}

/// Read-through executor over a store and a tiered cache.
///
/// # Type Parameters
///
/// - `S`: The store executing statements on cache miss or bypass
/// - `R`: The remote cache tier
///
/// # Example
///
/// ```ignore
/// let remote = Arc::new(RedisRemoteCache::connect(&settings.redis_url).await?);
/// let cache = Arc::new(TieredCache::try_new(remote, &settings)?);
/// let (listener, worker) =
///     InvalidationListener::spawn(Arc::clone(&cache), settings.invalidation_queue_capacity, shutdown_rx);
///
/// let executor = ReadThroughExecutor::try_new(store, cache, &settings)?.with_invalidation(listener);
///
/// let output = executor.execute(&Query::select(ACTIVE_USERS), &params).await?;
/// ```
pub struct ReadThroughExecutor<S, R>
where
    S: QueryStore,
    R: RemoteCache,
{
    store: Arc<S>,
    cache: Arc<TieredCache<R>>,
    prefix: String,
    ttl: Option<Duration>,
    invalidation: Option<InvalidationListener>,
    last_origin: AtomicU8,
}

impl<S, R> ReadThroughExecutor<S, R>
where
    S: QueryStore,
    R: RemoteCache,
{
    /// Create an executor after validating `settings`.
    ///
    /// # Errors
    ///
    /// Returns `SqlCacheError::Config` if the settings are invalid, for
    /// example a prefix containing glob characters.
    pub fn try_new(store: Arc<S>, cache: Arc<TieredCache<R>>, settings: &CacheSettings) -> SqlCacheResult<Self> {
        settings.validate()?;
        Ok(Self::new(store, cache, settings))
    }

    /// Create an executor without validating `settings`; see
    /// [`ReadThroughExecutor::try_new`].
    ///
    /// Without an attached listener, writes leave cached reads in place
    /// until they expire.
    pub fn new(store: Arc<S>, cache: Arc<TieredCache<R>>, settings: &CacheSettings) -> Self {
        Self {
            store,
            cache,
            prefix: settings.key_prefix.clone(),
            ttl: settings.ttl(),
            invalidation: None,
            last_origin: AtomicU8::new(ORIGIN_UNSET),
        }
    }

    /// Attach the listener notified after successful writes.
    pub fn with_invalidation(mut self, listener: InvalidationListener) -> Self {
        self.invalidation = Some(listener);
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn cache(&self) -> &Arc<TieredCache<R>> {
        &self.cache
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn invalidation(&self) -> Option<&InvalidationListener> {
        self.invalidation.as_ref()
    }

    /// Origin of the most recent successful call, `None` before the first.
    ///
    /// Shared by all callers of this executor: under concurrency it reflects
    /// whichever call finished last.
    pub fn last_origin(&self) -> Option<Origin> {
        match self.last_origin.load(Ordering::Relaxed) {
            ORIGIN_CACHE => Some(Origin::Cache),
            ORIGIN_STORE => Some(Origin::Store),
            _ => None,
        }
    }

    fn record_origin(&self, origin: Origin) {
        let value = match origin {
            Origin::Cache => ORIGIN_CACHE,
            Origin::Store => ORIGIN_STORE,
        };
        self.last_origin.store(value, Ordering::Relaxed);
    }

    /// Execute a statement, serving reads through the cache.
    pub async fn execute(&self, query: &Query, params: &Params) -> Result<QueryOutput, StoreError> {
        let kind = classify(query);
        if kind.is_cacheable() {
            self.read_through(query, params).await.map(QueryOutput::Read)
        } else {
            self.passthrough(query, params, kind)
                .await
                .map(QueryOutput::Passthrough)
        }
    }

    /// Execute a statement and always return a materialized payload.
    ///
    /// Reads go through the cache. Other statements are executed directly
    /// and their result materialized without being cached.
    pub async fn fetch(&self, query: &Query, params: &Params) -> Result<CacheRead<Payload>, StoreError> {
        let kind = classify(query);
        if kind.is_cacheable() {
            self.read_through(query, params).await
        } else {
            let raw = self.passthrough(query, params, kind).await?;
            Ok(CacheRead::from_store(materialize(&raw)))
        }
    }

    async fn read_through(&self, query: &Query, params: &Params) -> Result<CacheRead<Payload>, StoreError> {
        let key = CacheKey::derive(query, params, &self.prefix);

        if let Some(hit) = self.cache.get(&key).await {
            tracing::debug!(key = %key, tier = ?hit.tier, "Cache hit");
            self.record_origin(Origin::Cache);
            return Ok(CacheRead::from_cache(hit.payload, hit.cached_at, hit.tier));
        }

        tracing::debug!(key = %key, "Cache miss, executing against store");
        let raw = self.store.execute(query, params).await?;
        self.record_origin(Origin::Store);

        match try_materialize(&raw) {
            Ok(payload) => {
                self.cache.set(&key, &payload, self.ttl).await;
                Ok(CacheRead::from_store(payload))
            }
            Err(e) => {
                // A degraded payload is returned but never cached.
                tracing::warn!(key = %key, error = %e, "Failed to materialize result, not caching");
                Ok(CacheRead::from_store(Payload::empty()))
            }
        }
    }

    async fn passthrough(&self, query: &Query, params: &Params, kind: QueryKind) -> Result<RawResult, StoreError> {
        let raw = self.store.execute(query, params).await?;
        self.record_origin(Origin::Store);

        if kind.invalidates() {
            match &self.invalidation {
                Some(listener) => {
                    listener.notify(&self.prefix);
                }
                None => {
                    tracing::debug!(prefix = %self.prefix, "Write completed with no invalidation listener attached");
                }
            }
        }

        Ok(raw)
    }

    /// Clear this executor's namespace in both tiers now.
    ///
    /// Returns the number of remote keys removed.
    pub async fn clear_cache(&self) -> Result<u64, CacheError> {
        self.cache.local().remove_namespace(&self.prefix);
        self.cache.invalidate_namespace(&self.prefix).await
    }
}

impl<S, R> std::fmt::Debug for ReadThroughExecutor<S, R>
where
    S: QueryStore,
    R: RemoteCache,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadThroughExecutor")
            .field("prefix", &self.prefix)
            .field("ttl", &self.ttl)
            .field("last_origin", &self.last_origin())
            .finish_non_exhaustive()
    }
}
