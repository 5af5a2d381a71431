//! In-process fallback tier.
//!
//! Always available, private to one executor. Entries carry their own
//! expiry and are evicted lazily when read after it. The map is guarded by
//! a single `std::sync::Mutex`; the guard is never held across an await,
//! so an abandoned caller cannot leave it locked.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlcache_core::{CacheKey, Payload};

#[derive(Debug, Clone)]
struct LocalEntry {
    payload: Payload,
    cached_at: DateTime<Utc>,
    expires_at: Option<DateTime<Utc>>,
}

impl LocalEntry {
    fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map_or(true, |at| at > now)
    }
}

/// Bounded, expiring in-memory cache tier.
#[derive(Debug)]
pub struct LocalTier {
    entries: Mutex<HashMap<String, LocalEntry>>,
    max_entries: usize,
}

impl LocalTier {
    /// Create a tier holding at most `max_entries` entries (minimum 1).
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            max_entries: max_entries.max(1),
        }
    }

    // A panic while holding the lock cannot leave the map half-updated, so
    // a poisoned lock is still safe to use.
    fn lock(&self) -> MutexGuard<'_, HashMap<String, LocalEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Look up a live entry, returning its payload and cache time.
    ///
    /// An expired entry is removed and reported as absent.
    pub fn get(&self, key: &str) -> Option<(Payload, DateTime<Utc>)> {
        let now = Utc::now();
        let mut entries = self.lock();
        let live = entries.get(key)?.is_live(now);
        if live {
            entries
                .get(key)
                .map(|entry| (entry.payload.clone(), entry.cached_at))
        } else {
            entries.remove(key);
            None
        }
    }

    /// Store a payload. `None` means the entry never expires on its own.
    ///
    /// When the tier is full, expired entries are purged first; if that frees
    /// nothing, the entry closest to expiry is evicted.
    pub fn insert(&self, key: impl Into<String>, payload: Payload, ttl: Option<Duration>) {
        let key = key.into();
        let now = Utc::now();
        let expires_at = ttl.and_then(|ttl| {
            chrono::Duration::from_std(ttl)
                .ok()
                .and_then(|d| now.checked_add_signed(d))
        });

        let mut entries = self.lock();
        if !entries.contains_key(&key) && entries.len() >= self.max_entries {
            entries.retain(|_, entry| entry.is_live(now));
            if entries.len() >= self.max_entries {
                // Entries without expiry sort last.
                let victim = entries
                    .iter()
                    .min_by_key(|(_, entry)| (entry.expires_at.is_none(), entry.expires_at, entry.cached_at))
                    .map(|(k, _)| k.clone());
                if let Some(victim) = victim {
                    entries.remove(&victim);
                }
            }
        }

        entries.insert(
            key,
            LocalEntry {
                payload,
                cached_at: now,
                expires_at,
            },
        );
    }

    /// Remove every entry belonging to a namespace. Returns how many.
    pub fn remove_namespace(&self, prefix: &str) -> u64 {
        let start = CacheKey::namespace_start(prefix);
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|key, _| !key.starts_with(&start));
        (before - entries.len()) as u64
    }

    /// Remove every entry. Returns how many.
    pub fn clear(&self) -> u64 {
        let mut entries = self.lock();
        let count = entries.len();
        entries.clear();
        count as u64
    }

    /// Number of entries held, including expired ones not yet evicted.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.max_entries
    }
}
