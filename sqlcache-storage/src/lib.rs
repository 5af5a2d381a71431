//! sqlcache Storage - Read-through cache machinery
//!
//! Sits between an application issuing structured queries and the store
//! that executes them. Reads are served from a remote cache tier with an
//! in-process fallback, writes pass through and trigger namespace
//! invalidation on a background worker.

pub mod cache;
pub mod materialize;
pub mod store;

pub use cache::{
    invalidation_worker, CacheLookup, CacheRead, CacheStats, CacheTier, InMemoryRemoteCache,
    InvalidationListener, InvalidationMetrics, InvalidationMetricsSnapshot, LocalTier, Origin,
    QueryOutput, ReadThroughExecutor, RedisRemoteCache, RemoteCache, ScanPage, TieredCache,
};
pub use materialize::{materialize, try_materialize};
pub use store::QueryStore;
