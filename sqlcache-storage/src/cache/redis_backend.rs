//! Redis-backed remote cache tier.
//!
//! Uses a `ConnectionManager`, which reconnects on its own after the server
//! drops. Each call clones the manager (a cheap handle) so concurrent
//! callers never contend on a lock. Pattern enumeration uses `SCAN` rather
//! than `KEYS` so large namespaces do not block the server; each `scan`
//! call is a single round trip.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, RedisError};
use sqlcache_core::CacheError;

use super::traits::{RemoteCache, ScanPage};

/// Keys requested per `SCAN` round trip.
const SCAN_BATCH: usize = 500;

fn unavailable(e: RedisError) -> CacheError {
    CacheError::Unavailable {
        reason: e.to_string(),
    }
}

/// Remote cache tier backed by a Redis server.
#[derive(Clone)]
pub struct RedisRemoteCache {
    conn: ConnectionManager,
}

impl RedisRemoteCache {
    /// Connect to the server at `url`.
    ///
    /// # Errors
    ///
    /// Returns `CacheError::Unavailable` if the URL is invalid or the first
    /// connection cannot be established.
    pub async fn connect(url: &str) -> Result<Self, CacheError> {
        let client = redis::Client::open(url).map_err(unavailable)?;
        let conn = client.get_connection_manager().await.map_err(unavailable)?;
        tracing::info!(url = %url, "Connected to remote cache");
        Ok(Self { conn })
    }

    /// Wrap a connection manager owned by the caller.
    pub fn from_manager(conn: ConnectionManager) -> Self {
        Self { conn }
    }
}

impl std::fmt::Debug for RedisRemoteCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisRemoteCache").finish_non_exhaustive()
    }
}

#[async_trait]
impl RemoteCache for RedisRemoteCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let mut conn = self.conn.clone();
        conn.get::<_, Option<Vec<u8>>>(key)
            .await
            .map_err(unavailable)
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        match ttl {
            // PSETEX rejects 0, so sub-millisecond TTLs round up.
            Some(ttl) => {
                let millis = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1);
                conn.pset_ex::<_, _, ()>(key, value, millis)
                    .await
                    .map_err(unavailable)
            }
            None => conn.set::<_, _, ()>(key, value).await.map_err(unavailable),
        }
    }

    async fn scan(&self, pattern: &str, cursor: u64) -> Result<ScanPage, CacheError> {
        let mut conn = self.conn.clone();
        let (next_cursor, keys): (u64, Vec<String>) = redis::cmd("SCAN")
            .arg(cursor)
            .arg("MATCH")
            .arg(pattern)
            .arg("COUNT")
            .arg(SCAN_BATCH)
            .query_async(&mut conn)
            .await
            .map_err(unavailable)?;
        Ok(ScanPage { next_cursor, keys })
    }

    async fn delete(&self, keys: &[String]) -> Result<u64, CacheError> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn.clone();
        conn.del::<_, u64>(keys).await.map_err(unavailable)
    }
}
