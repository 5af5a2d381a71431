//! Cache layer settings.
//!
//! Settings are consumed by the read-through layer, never loaded by it:
//! the owner builds them (usually via [`CacheSettings::from_env`]) and hands
//! them to the executor together with the remote cache connection.

use std::time::Duration;

use crate::{ConfigError, SqlCacheError, SqlCacheResult};

// ============================================================================
// DEFAULTS
// ============================================================================

pub const DEFAULT_KEY_PREFIX: &str = "sqlcache";
pub const DEFAULT_TTL_SECS: u64 = 60;
pub const DEFAULT_REMOTE_TIMEOUT_MS: u64 = 250;
pub const DEFAULT_LOCAL_MAX_ENTRIES: usize = 10_000;
pub const DEFAULT_INVALIDATION_QUEUE_CAPACITY: usize = 64;
pub const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1:6379/0";

/// Settings for one cache namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheSettings {
    /// Namespace prefix for every key this layer writes.
    pub key_prefix: String,

    /// Entry lifetime in seconds for both tiers. `0` means entries never
    /// expire on their own and leave only through invalidation.
    pub default_ttl_secs: u64,

    /// Upper bound for a single remote cache call in milliseconds.
    /// `0` disables the bound.
    pub remote_timeout_ms: u64,

    /// Maximum number of entries held by the local tier.
    pub local_max_entries: usize,

    /// Whether namespace invalidation also clears the local tier.
    /// When false, local entries may stay stale for up to one TTL.
    pub clear_local_on_invalidate: bool,

    /// Maximum number of distinct namespaces awaiting invalidation at once.
    /// Repeated requests for an already pending namespace never count twice.
    pub invalidation_queue_capacity: usize,

    /// Connection URL of the remote cache.
    pub redis_url: String,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            default_ttl_secs: DEFAULT_TTL_SECS,
            remote_timeout_ms: DEFAULT_REMOTE_TIMEOUT_MS,
            local_max_entries: DEFAULT_LOCAL_MAX_ENTRIES,
            clear_local_on_invalidate: true,
            invalidation_queue_capacity: DEFAULT_INVALIDATION_QUEUE_CAPACITY,
            redis_url: DEFAULT_REDIS_URL.to_string(),
        }
    }
}

impl CacheSettings {
    /// Create settings with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create settings from environment variables with fallback to defaults.
    ///
    /// Environment variables:
    /// - `SQLCACHE_KEY_PREFIX`: Namespace prefix (default: sqlcache)
    /// - `SQLCACHE_DEFAULT_TTL_SECS`: Entry TTL, 0 = no expiry (default: 60)
    /// - `SQLCACHE_REMOTE_TIMEOUT_MS`: Remote call bound, 0 = none (default: 250)
    /// - `SQLCACHE_LOCAL_MAX_ENTRIES`: Local tier capacity (default: 10000)
    /// - `SQLCACHE_CLEAR_LOCAL_ON_INVALIDATE`: "true" or "false" (default: true)
    /// - `SQLCACHE_INVALIDATION_QUEUE_CAPACITY`: Pending invalidations (default: 64)
    /// - `SQLCACHE_REDIS_URL`: Remote cache URL (default: redis://127.0.0.1:6379/0)
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            key_prefix: std::env::var("SQLCACHE_KEY_PREFIX")
                .ok()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .unwrap_or(defaults.key_prefix),
            default_ttl_secs: std::env::var("SQLCACHE_DEFAULT_TTL_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.default_ttl_secs),
            remote_timeout_ms: std::env::var("SQLCACHE_REMOTE_TIMEOUT_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.remote_timeout_ms),
            local_max_entries: std::env::var("SQLCACHE_LOCAL_MAX_ENTRIES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.local_max_entries),
            clear_local_on_invalidate: std::env::var("SQLCACHE_CLEAR_LOCAL_ON_INVALIDATE")
                .ok()
                .map(|s| s.to_lowercase() != "false")
                .unwrap_or(defaults.clear_local_on_invalidate),
            invalidation_queue_capacity: std::env::var("SQLCACHE_INVALIDATION_QUEUE_CAPACITY")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.invalidation_queue_capacity),
            redis_url: std::env::var("SQLCACHE_REDIS_URL")
                .ok()
                .filter(|s| !s.is_empty())
                .unwrap_or(defaults.redis_url),
        }
    }

    /// Set the namespace prefix.
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    /// Set the entry TTL in seconds (0 = no expiry).
    pub fn with_ttl_secs(mut self, secs: u64) -> Self {
        self.default_ttl_secs = secs;
        self
    }

    /// Set the remote call bound in milliseconds (0 = none).
    pub fn with_remote_timeout_ms(mut self, ms: u64) -> Self {
        self.remote_timeout_ms = ms;
        self
    }

    /// Set the local tier capacity.
    pub fn with_local_max_entries(mut self, max: usize) -> Self {
        self.local_max_entries = max;
        self
    }

    /// Choose whether invalidation clears the local tier too.
    pub fn with_clear_local_on_invalidate(mut self, enabled: bool) -> Self {
        self.clear_local_on_invalidate = enabled;
        self
    }

    /// Set the invalidation queue capacity.
    pub fn with_invalidation_queue_capacity(mut self, capacity: usize) -> Self {
        self.invalidation_queue_capacity = capacity;
        self
    }

    /// Set the remote cache URL.
    pub fn with_redis_url(mut self, url: impl Into<String>) -> Self {
        self.redis_url = url.into();
        self
    }

    /// Entry TTL, or `None` when entries do not expire.
    pub fn ttl(&self) -> Option<Duration> {
        (self.default_ttl_secs > 0).then(|| Duration::from_secs(self.default_ttl_secs))
    }

    /// Remote call bound, or `None` when disabled.
    pub fn remote_timeout(&self) -> Option<Duration> {
        (self.remote_timeout_ms > 0).then(|| Duration::from_millis(self.remote_timeout_ms))
    }

    /// Validate the settings.
    ///
    /// Validates:
    /// - key_prefix is non-empty and free of whitespace and glob characters
    /// - local_max_entries > 0
    /// - invalidation_queue_capacity > 0
    /// - redis_url is non-empty
    pub fn validate(&self) -> SqlCacheResult<()> {
        if self.key_prefix.is_empty() {
            return Err(SqlCacheError::Config(ConfigError::MissingRequired {
                field: "key_prefix".to_string(),
            }));
        }

        if self
            .key_prefix
            .chars()
            .any(|c| c.is_whitespace() || matches!(c, '*' | '?' | '[' | ']'))
        {
            return Err(SqlCacheError::Config(ConfigError::InvalidValue {
                field: "key_prefix".to_string(),
                value: self.key_prefix.clone(),
                reason: "key_prefix must not contain whitespace or glob characters".to_string(),
            }));
        }

        if self.local_max_entries == 0 {
            return Err(SqlCacheError::Config(ConfigError::InvalidValue {
                field: "local_max_entries".to_string(),
                value: self.local_max_entries.to_string(),
                reason: "local_max_entries must be greater than 0".to_string(),
            }));
        }

        if self.invalidation_queue_capacity == 0 {
            return Err(SqlCacheError::Config(ConfigError::InvalidValue {
                field: "invalidation_queue_capacity".to_string(),
                value: self.invalidation_queue_capacity.to_string(),
                reason: "invalidation_queue_capacity must be greater than 0".to_string(),
            }));
        }

        if self.redis_url.is_empty() {
            return Err(SqlCacheError::Config(ConfigError::MissingRequired {
                field: "redis_url".to_string(),
            }));
        }

        Ok(())
    }
}

// ============================================================================
// TESTS
// ============================================================================
