//! In-memory remote cache tier.
//!
//! Behaves like the Redis tier (per-key expiry, glob enumeration) without a
//! server. Useful for tests and for single-process deployments that still
//! want the remote code path exercised.
//!
//! Expired entries are reclaimed on `get` of the same key and swept from
//! the whole map on every `set` and `scan`, so the map never holds more
//! than the live entries plus those expired since the last write.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlcache_core::CacheError;
use tokio::sync::RwLock;

use super::traits::{RemoteCache, ScanPage};

#[derive(Debug, Clone)]
struct StoredValue {
    bytes: Vec<u8>,
    expires_at: Option<DateTime<Utc>>,
}

impl StoredValue {
    fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map_or(true, |at| at > now)
    }
}

/// Remote cache tier held in process memory.
#[derive(Debug, Default)]
pub struct InMemoryRemoteCache {
    entries: RwLock<HashMap<String, StoredValue>>,
}

impl InMemoryRemoteCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live entries.
    pub async fn len(&self) -> usize {
        let now = Utc::now();
        self.entries
            .read()
            .await
            .values()
            .filter(|v| v.is_live(now))
            .count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Number of stored entries, live or expired but not yet reclaimed.
    pub async fn stored(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Overwrite the raw bytes of an entry, bypassing any encoding.
    pub async fn insert_raw(&self, key: impl Into<String>, bytes: Vec<u8>) {
        self.entries.write().await.insert(
            key.into(),
            StoredValue {
                bytes,
                expires_at: None,
            },
        );
    }
}

#[async_trait]
impl RemoteCache for InMemoryRemoteCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let now = Utc::now();
        {
            let entries = self.entries.read().await;
            match entries.get(key) {
                Some(value) if value.is_live(now) => return Ok(Some(value.bytes.clone())),
                Some(_) => {}
                None => return Ok(None),
            }
        }

        // Expired: drop it, unless a concurrent set replaced it meanwhile.
        let mut entries = self.entries.write().await;
        if entries.get(key).is_some_and(|v| !v.is_live(now)) {
            entries.remove(key);
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<(), CacheError> {
        let expires_at = ttl.and_then(|ttl| {
            chrono::Duration::from_std(ttl)
                .ok()
                .and_then(|d| Utc::now().checked_add_signed(d))
        });
        let mut entries = self.entries.write().await;
        purge_expired(&mut entries, Utc::now());
        entries.insert(
            key.to_string(),
            StoredValue {
                bytes: value,
                expires_at,
            },
        );
        Ok(())
    }

    /// Returns every matching key on a single page.
    async fn scan(&self, pattern: &str, _cursor: u64) -> Result<ScanPage, CacheError> {
        let mut entries = self.entries.write().await;
        purge_expired(&mut entries, Utc::now());
        let mut keys: Vec<String> = entries
            .keys()
            .filter(|key| glob_match(pattern, key))
            .cloned()
            .collect();
        keys.sort_unstable();
        Ok(ScanPage::last(keys))
    }

    async fn delete(&self, keys: &[String]) -> Result<u64, CacheError> {
        let mut entries = self.entries.write().await;
        let removed = keys.iter().filter(|key| entries.remove(*key).is_some()).count();
        Ok(removed as u64)
    }
}

fn purge_expired(entries: &mut HashMap<String, StoredValue>, now: DateTime<Utc>) {
    entries.retain(|_, value| value.is_live(now));
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GlobToken {
    AnyRun,
    AnyOne,
    Literal(char),
}

fn tokenize(pattern: &str) -> Vec<GlobToken> {
    let mut tokens = Vec::new();
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        tokens.push(match c {
            '*' => GlobToken::AnyRun,
            '?' => GlobToken::AnyOne,
            '\\' => GlobToken::Literal(chars.next().unwrap_or('\\')),
            other => GlobToken::Literal(other),
        });
    }
    tokens
}

/// Match `text` against a glob supporting `*`, `?` and `\` escapes.
///
/// Character classes are not supported: `[` matches itself.
fn glob_match(pattern: &str, text: &str) -> bool {
    let pattern = tokenize(pattern);
    let text: Vec<char> = text.chars().collect();

    let (mut p, mut t) = (0, 0);
    let mut backtrack: Option<(usize, usize)> = None;

    while t < text.len() {
        match pattern.get(p) {
            Some(GlobToken::AnyRun) => {
                backtrack = Some((p, t));
                p += 1;
            }
            Some(GlobToken::AnyOne) => {
                p += 1;
                t += 1;
            }
            Some(GlobToken::Literal(c)) if *c == text[t] => {
                p += 1;
                t += 1;
            }
            _ => match backtrack {
                Some((star, matched)) => {
                    p = star + 1;
                    t = matched + 1;
                    backtrack = Some((star, matched + 1));
                }
                None => return false,
            },
        }
    }

    pattern[p..].iter().all(|&token| token == GlobToken::AnyRun)
}
