//! Namespace-scoped cache keys.
//!
//! A `CacheKey` can only be built by hashing a query and its parameters
//! under a namespace prefix, so every key the layer writes is guaranteed to
//! fall inside its namespace and to be removed by namespace invalidation.

use sha2::{Digest, Sha256};
use std::fmt;

use crate::{Params, Query};

/// Separator between the namespace prefix and the digest.
pub const SEPARATOR: char = ':';

/// Length of a hex-encoded SHA-256 digest.
const DIGEST_HEX_LEN: usize = 64;

/// A cache key of the form `<prefix>:<sha256 hex>`.
///
/// # Format
///
/// The digest covers the byte length of the trimmed query text, a `:`, the
/// text itself, and the canonical parameter encoding (see
/// [`Params::canonical`]). The length prefix keeps the boundary between text
/// and parameters unambiguous whatever the text contains. Named parameters
/// are sorted, so binding order does not change the key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey {
    /// Private inner data - cannot be constructed externally
    inner: CacheKeyInner,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
struct CacheKeyInner {
    key: String,
    prefix_len: usize,
}

impl CacheKey {
    /// Derive the key for a query and its bound parameters.
    pub fn derive(query: &Query, params: &Params, prefix: &str) -> Self {
        let text = query.canonical_text();
        let mut material = String::with_capacity(text.len() + 48);
        material.push_str(&text.len().to_string());
        material.push(':');
        material.push_str(text);
        material.push_str(&params.canonical());

        let digest = Sha256::digest(material.as_bytes());
        let key = format!("{}{}{}", prefix, SEPARATOR, hex::encode(digest));

        Self {
            inner: CacheKeyInner {
                key,
                prefix_len: prefix.len(),
            },
        }
    }

    /// Parse a key previously produced by [`CacheKey::derive`].
    ///
    /// Returns `None` if the string has no separator or the part after the
    /// last separator is not a 64-character lowercase hex digest.
    pub fn parse(raw: &str) -> Option<Self> {
        let split = raw.rfind(SEPARATOR)?;
        let digest = &raw[split + 1..];
        if digest.len() != DIGEST_HEX_LEN
            || !digest
                .bytes()
                .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
        {
            return None;
        }
        Some(Self {
            inner: CacheKeyInner {
                key: raw.to_string(),
                prefix_len: split,
            },
        })
    }

    /// The full key string.
    pub fn as_str(&self) -> &str {
        &self.inner.key
    }

    /// The namespace prefix this key belongs to.
    pub fn prefix(&self) -> &str {
        &self.inner.key[..self.inner.prefix_len]
    }

    /// The hex digest part of the key.
    pub fn digest(&self) -> &str {
        &self.inner.key[self.inner.prefix_len + SEPARATOR.len_utf8()..]
    }

    /// Whether this key lives in the given namespace.
    pub fn belongs_to(&self, prefix: &str) -> bool {
        self.prefix() == prefix
    }

    /// Glob pattern matching every key of a namespace: `<prefix>:*`.
    ///
    /// Glob characters in the prefix are backslash-escaped, so the pattern
    /// never reaches into another namespace.
    pub fn namespace_pattern(prefix: &str) -> String {
        let mut pattern = String::with_capacity(prefix.len() + 2);
        for c in prefix.chars() {
            if matches!(c, '*' | '?' | '[' | ']' | '\\') {
                pattern.push('\\');
            }
            pattern.push(c);
        }
        pattern.push(SEPARATOR);
        pattern.push('*');
        pattern
    }

    /// String prefix shared by every key of a namespace: `<prefix>:`.
    pub fn namespace_start(prefix: &str) -> String {
        format!("{}{}", prefix, SEPARATOR)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.inner.key)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Scalar;

    fn users_query() -> Query {
        Query::select("SELECT users.id, users.username FROM users WHERE users.is_active = :active")
    }

    #[test]
    fn test_derive_format() {
        let key = CacheKey::derive(&users_query(), &Params::new(), "sqlcache");
        assert!(key.as_str().starts_with("sqlcache:"));
        assert_eq!(key.prefix(), "sqlcache");
        assert_eq!(key.digest().len(), 64);
        assert!(key.belongs_to("sqlcache"));
        assert!(!key.belongs_to("sqlcach"));
    }

    #[test]
    fn test_derive_is_deterministic() {
        let params = Params::new().bind("active", true);
        let a = CacheKey::derive(&users_query(), &params, "app");
        let b = CacheKey::derive(&users_query(), &params.clone(), "app");
        assert_eq!(a, b);
    }

    #[test]
    fn test_param_value_changes_key() {
        let a = CacheKey::derive(&users_query(), &Params::new().bind("active", true), "app");
        let b = CacheKey::derive(&users_query(), &Params::new().bind("active", false), "app");
        assert_ne!(a, b);
    }

    #[test]
    fn test_empty_params_still_keyed_by_query() {
        let a = CacheKey::derive(&Query::select("SELECT 1"), &Params::new(), "app");
        let b = CacheKey::derive(&Query::select("SELECT 2"), &Params::new(), "app");
        assert_ne!(a, b);
        assert_eq!(a.digest().len(), 64);
    }

    #[test]
    fn test_prefix_scopes_key() {
        let a = CacheKey::derive(&users_query(), &Params::new(), "tenant-a");
        let b = CacheKey::derive(&users_query(), &Params::new(), "tenant-b");
        assert_ne!(a, b);
        assert_eq!(a.digest(), b.digest());
    }

    #[test]
    fn test_surrounding_whitespace_ignored() {
        let a = CacheKey::derive(&Query::select("SELECT 1"), &Params::new(), "app");
        let b = CacheKey::derive(&Query::select("  SELECT 1\n"), &Params::new(), "app");
        assert_eq!(a, b);
    }

    #[test]
    fn test_query_text_with_control_and_param_characters() {
        let params = Params::positional(vec![Scalar::Int(7)]);
        let a = CacheKey::derive(&Query::select("SELECT '\u{1f}'"), &params, "app");
        let b = CacheKey::derive(&Query::select("SELECT ''"), &params, "app");
        assert_ne!(a, b);

        let embedded = format!("SELECT 1{}", params.canonical());
        let c = CacheKey::derive(&Query::select("SELECT 1"), &params, "app");
        let d = CacheKey::derive(&Query::select(embedded), &params, "app");
        assert_ne!(c, d);
    }

    #[test]
    fn test_parse_roundtrip_and_rejects_garbage() {
        let key = CacheKey::derive(&users_query(), &Params::new(), "a:b");
        let parsed = CacheKey::parse(key.as_str()).expect("parse should succeed");
        assert_eq!(parsed, key);
        assert_eq!(parsed.prefix(), "a:b");

        assert!(CacheKey::parse("no-separator").is_none());
        assert!(CacheKey::parse("app:short").is_none());
        assert!(CacheKey::parse(&format!("app:{}", "G".repeat(64))).is_none());
    }

    #[test]
    fn test_namespace_pattern() {
        assert_eq!(CacheKey::namespace_pattern("sqlcache"), "sqlcache:*");
        assert_eq!(CacheKey::namespace_pattern("a*"), r"a\*:*");
        assert_eq!(CacheKey::namespace_pattern(r"t[1]?\"), r"t\[1\]\?\\:*");
        let key = CacheKey::derive(&users_query(), &Params::positional(vec![Scalar::Int(1)]), "sqlcache");
        assert!(key.as_str().starts_with(&CacheKey::namespace_start("sqlcache")));
    }
}
