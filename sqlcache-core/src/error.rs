//! Error types for sqlcache operations

use thiserror::Error;

/// Errors raised by the authoritative store.
///
/// These are the only errors the read-through layer lets through to the
/// caller, unchanged.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("Statement execution failed: {reason}")]
    ExecutionFailed { reason: String },

    #[error("Store connection lost: {reason}")]
    ConnectionLost { reason: String },

    #[error("Unsupported statement: {statement}")]
    Unsupported { statement: String },
}

/// Remote cache tier errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("Remote cache unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("Payload serialization failed: {reason}")]
    Serialization { reason: String },

    #[error("Payload deserialization failed: {reason}")]
    Deserialization { reason: String },

    #[error("Remote cache call timed out after {elapsed_ms}ms")]
    Timeout { elapsed_ms: u64 },
}

/// Errors raised while turning a store result into a cacheable payload.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MaterializeError {
    #[error("Missing attribute: {attribute}")]
    MissingAttribute { attribute: String },

    #[error("Row shape mismatch: {columns} columns but {values} values")]
    ShapeMismatch { columns: usize, values: usize },

    #[error("Result cannot be materialized: {reason}")]
    Unsupported { reason: String },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Master error type for all sqlcache errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SqlCacheError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Materialize error: {0}")]
    Materialize(#[from] MaterializeError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

/// Result type alias for sqlcache operations.
pub type SqlCacheResult<T> = Result<T, SqlCacheError>;

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_error_display_execution_failed() {
        let err = StoreError::ExecutionFailed {
            reason: "constraint violated".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("Statement execution failed"));
        assert!(msg.contains("constraint violated"));
    }

    #[test]
    fn test_cache_error_display_timeout() {
        let err = CacheError::Timeout { elapsed_ms: 250 };
        let msg = format!("{}", err);
        assert!(msg.contains("timed out"));
        assert!(msg.contains("250"));
    }

    #[test]
    fn test_materialize_error_display_shape_mismatch() {
        let err = MaterializeError::ShapeMismatch {
            columns: 3,
            values: 2,
        };
        let msg = format!("{}", err);
        assert!(msg.contains("3 columns"));
        assert!(msg.contains("2 values"));
    }

    #[test]
    fn test_config_error_display_invalid_value() {
        let err = ConfigError::InvalidValue {
            field: "key_prefix".to_string(),
            value: "a*b".to_string(),
            reason: "must not contain glob characters".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("key_prefix"));
        assert!(msg.contains("a*b"));
        assert!(msg.contains("glob"));
    }

    #[test]
    fn test_sqlcache_error_from_variants() {
        let store = SqlCacheError::from(StoreError::ConnectionLost {
            reason: "reset".to_string(),
        });
        assert!(matches!(store, SqlCacheError::Store(_)));

        let cache = SqlCacheError::from(CacheError::Unavailable {
            reason: "refused".to_string(),
        });
        assert!(matches!(cache, SqlCacheError::Cache(_)));

        let materialize = SqlCacheError::from(MaterializeError::MissingAttribute {
            attribute: "id".to_string(),
        });
        assert!(matches!(materialize, SqlCacheError::Materialize(_)));

        let config = SqlCacheError::from(ConfigError::MissingRequired {
            field: "redis_url".to_string(),
        });
        assert!(matches!(config, SqlCacheError::Config(_)));
    }
}
