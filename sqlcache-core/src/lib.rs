//! sqlcache Core - Data Types
//!
//! Pure data structures shared by the read-through layer: scalar values,
//! flat records, cache payloads, bound parameters and raw store results.
//! Also hosts cache key derivation, query classification, settings and
//! the error taxonomy. All other crates depend on this.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

pub mod config;
pub mod error;
pub mod key;
pub mod query;

pub use config::CacheSettings;
pub use error::{
    CacheError, ConfigError, MaterializeError, SqlCacheError, SqlCacheResult, StoreError,
};
pub use key::CacheKey;
pub use query::{classify, Query, QueryKind, StatementKind};

// ============================================================================
// SCALARS AND RECORDS
// ============================================================================

/// A single portable value, as found in one column of one row.
///
/// Floats serialize as their IEEE-754 bit pattern, so every value,
/// including NaN and the infinities, decodes to exactly the bits it was
/// stored with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Scalar {
    Null,
    Bool(bool),
    Int(i64),
    Float(#[serde(with = "float_bits")] f64),
    Text(String),
    Bytes(Vec<u8>),
}

impl Scalar {
    /// Returns true for `Scalar::Null`.
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Append an unambiguous, type-tagged encoding of this value.
    ///
    /// Text and bytes are length-prefixed and floats are encoded by their bit
    /// pattern, so two different values never share an encoding.
    pub fn write_canonical(&self, out: &mut String) {
        match self {
            Self::Null => out.push('n'),
            Self::Bool(b) => {
                out.push_str(if *b { "b1" } else { "b0" });
            }
            Self::Int(i) => {
                out.push('i');
                out.push_str(&i.to_string());
                out.push(';');
            }
            Self::Float(f) => {
                out.push('f');
                out.push_str(&format!("{:016x}", f.to_bits()));
            }
            Self::Text(s) => {
                out.push('t');
                out.push_str(&s.len().to_string());
                out.push(':');
                out.push_str(s);
            }
            Self::Bytes(bytes) => {
                out.push('x');
                out.push_str(&bytes.len().to_string());
                out.push(':');
                out.push_str(&hex::encode(bytes));
            }
        }
    }
}

mod float_bits {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.to_bits())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        u64::deserialize(deserializer).map(f64::from_bits)
    }
}

impl From<bool> for Scalar {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for Scalar {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<i32> for Scalar {
    fn from(value: i32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<f64> for Scalar {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<&str> for Scalar {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for Scalar {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<Vec<u8>> for Scalar {
    fn from(value: Vec<u8>) -> Self {
        Self::Bytes(value)
    }
}

impl<T: Into<Scalar>> From<Option<T>> for Scalar {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Self::Null)
    }
}

/// A flat attribute-name to value mapping. Sorted by attribute name.
pub type Record = BTreeMap<String, Scalar>;

/// Explicit serialization capability for mapped entities.
///
/// Entities returned by the store implement this instead of being
/// introspected at runtime. Failing here degrades the cached payload,
/// never the caller's query.
pub trait ToRecord: fmt::Debug + Send + Sync {
    fn to_record(&self) -> Result<Record, MaterializeError>;
}

// ============================================================================
// PAYLOAD
// ============================================================================

/// Cache-portable query result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Payload {
    /// Bare values, one per result row.
    Scalars(Vec<Scalar>),
    /// One flat record per mapped object or projected row.
    Records(Vec<Record>),
}

impl Default for Payload {
    fn default() -> Self {
        Self::Records(Vec::new())
    }
}

impl Payload {
    /// The payload used when a result cannot be materialized.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Scalars(values) => values.len(),
            Self::Records(records) => records.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_records(&self) -> Option<&[Record]> {
        match self {
            Self::Records(records) => Some(records),
            Self::Scalars(_) => None,
        }
    }

    pub fn as_scalars(&self) -> Option<&[Scalar]> {
        match self {
            Self::Scalars(values) => Some(values),
            Self::Records(_) => None,
        }
    }
}

// ============================================================================
// PARAMETERS
// ============================================================================

/// Parameters bound to a query.
///
/// Named parameters are kept sorted by name, so binding order never affects
/// the derived cache key. Positional parameters keep their order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Params {
    Named(BTreeMap<String, Scalar>),
    Positional(Vec<Scalar>),
}

impl Default for Params {
    fn default() -> Self {
        Self::Named(BTreeMap::new())
    }
}

impl Params {
    /// Empty named parameter set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Positional parameter list.
    pub fn positional(values: Vec<Scalar>) -> Self {
        Self::Positional(values)
    }

    /// Bind a named parameter, replacing any previous value.
    ///
    /// Binding a name onto a positional set converts it into a named set
    /// keyed by position (`"0"`, `"1"`, ...).
    pub fn bind(self, name: impl Into<String>, value: impl Into<Scalar>) -> Self {
        let mut named = match self {
            Self::Named(map) => map,
            Self::Positional(values) => values
                .into_iter()
                .enumerate()
                .map(|(i, v)| (i.to_string(), v))
                .collect(),
        };
        named.insert(name.into(), value.into());
        Self::Named(named)
    }

    /// Look up a named parameter.
    pub fn get(&self, name: &str) -> Option<&Scalar> {
        match self {
            Self::Named(map) => map.get(name),
            Self::Positional(values) => name.parse::<usize>().ok().and_then(|i| values.get(i)),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Named(map) => map.len(),
            Self::Positional(values) => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deterministic textual form used for key derivation.
    pub fn canonical(&self) -> String {
        let mut out = String::new();
        match self {
            Self::Named(map) => {
                out.push('{');
                for (name, value) in map {
                    out.push_str(&name.len().to_string());
                    out.push(':');
                    out.push_str(name);
                    out.push('=');
                    value.write_canonical(&mut out);
                    out.push(',');
                }
                out.push('}');
            }
            Self::Positional(values) => {
                out.push('[');
                for value in values {
                    value.write_canonical(&mut out);
                    out.push(',');
                }
                out.push(']');
            }
        }
        out
    }
}

// ============================================================================
// RAW STORE RESULTS
// ============================================================================

/// A column-projected row with named fields.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    columns: Vec<String>,
    values: Vec<Scalar>,
}

impl Row {
    pub fn new(columns: Vec<String>, values: Vec<Scalar>) -> Self {
        Self { columns, values }
    }

    /// Build a row from `(column, value)` pairs.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Scalar>,
    {
        let (columns, values) = pairs
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .unzip();
        Self { columns, values }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn values(&self) -> &[Scalar] {
        &self.values
    }
}

/// Native result of executing a statement against the store.
#[derive(Debug, Clone)]
pub enum RawResult {
    /// Mapped entities with a declared record form.
    Entities(Vec<Arc<dyn ToRecord>>),
    /// Bare scalar values.
    Scalars(Vec<Scalar>),
    /// Column-projected rows.
    Rows(Vec<Row>),
    /// Row count reported by a write.
    Affected(u64),
}

impl RawResult {
    /// Number of rows carried (or affected).
    pub fn row_count(&self) -> u64 {
        match self {
            Self::Entities(entities) => entities.len() as u64,
            Self::Scalars(values) => values.len() as u64,
            Self::Rows(rows) => rows.len() as u64,
            Self::Affected(count) => *count,
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
