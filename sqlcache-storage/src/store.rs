//! Store boundary.

use async_trait::async_trait;
use sqlcache_core::{Params, Query, RawResult, StoreError};

/// Query execution capability of the authoritative store.
///
/// Implemented by the database driver or session wrapper. The read-through
/// executor wraps an implementation of this trait and exposes the same
/// `execute` contract.
#[async_trait]
pub trait QueryStore: Send + Sync {
    /// Execute a statement with its bound parameters.
    async fn execute(&self, query: &Query, params: &Params) -> Result<RawResult, StoreError>;
}
