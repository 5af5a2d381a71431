//! Read-through query cache.
//!
//! Reads are answered from a remote tier shared across processes, then from
//! a local in-process tier, and only then by the store. Writes bypass both
//! tiers and clear the whole namespace in the background once they succeed.
//!
//! # Consistency
//!
//! Caching never decides correctness. A read may observe data up to one TTL
//! old when invalidation fails or races a concurrent miss; this window is
//! accepted in exchange for never failing a call because of the cache.
//! Invalidation is deliberately coarse: any write clears every key under
//! the namespace prefix.
//!
//! # Key layout
//!
//! All keys are `<prefix>:<sha256 hex>`, built by [`sqlcache_core::CacheKey`].
//! Namespace invalidation matches `<prefix>:*`, with glob characters in the
//! prefix escaped.

pub mod invalidation;
pub mod local;
pub mod memory_backend;
pub mod read_through;
pub mod redis_backend;
pub mod served;
pub mod tiered;
pub mod traits;

pub use invalidation::{
    invalidation_worker, InvalidationListener, InvalidationMetrics, InvalidationMetricsSnapshot,
    InvalidationRequest, Offer, PendingNamespaces,
};
pub use local::LocalTier;
pub use memory_backend::InMemoryRemoteCache;
pub use read_through::{QueryOutput, ReadThroughExecutor};
pub use redis_backend::RedisRemoteCache;
pub use served::{CacheRead, Origin};
pub use tiered::{CacheLookup, TieredCache};
pub use traits::{CacheStats, CacheTier, RemoteCache, ScanPage};
