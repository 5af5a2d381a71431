//! sqlcache Test Utilities
//!
//! Shared test infrastructure for the sqlcache workspace:
//! - A `User` entity and an in-memory `MockUserStore`
//! - Remote cache tiers that fail on demand
//! - Proptest generators for values, parameters and users
//! - Fixtures wiring an executor with its invalidation worker

pub use sqlcache_core::{
    CacheError, CacheKey, CacheSettings, MaterializeError, Params, Payload, Query, QueryKind,
    RawResult, Record, Row, Scalar, StoreError, ToRecord,
};
pub use sqlcache_storage::{
    CacheTier, InMemoryRemoteCache, InvalidationListener, InvalidationMetrics, Origin,
    QueryOutput, QueryStore, ReadThroughExecutor, RemoteCache, ScanPage, TieredCache,
};

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

// ============================================================================
// USER ENTITY
// ============================================================================

/// The mapped entity used throughout the tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub email: Option<String>,
    pub is_active: bool,
}

impl User {
    pub fn new(id: i64, username: impl Into<String>, is_active: bool) -> Self {
        let username = username.into();
        Self {
            id,
            email: Some(format!("{}@example.com", username)),
            username,
            is_active,
        }
    }

    /// The record this user materializes into.
    pub fn record(&self) -> Record {
        let mut record = Record::new();
        record.insert("id".to_string(), Scalar::Int(self.id));
        record.insert("username".to_string(), Scalar::Text(self.username.clone()));
        record.insert("email".to_string(), self.email.clone().into());
        record.insert("is_active".to_string(), Scalar::Bool(self.is_active));
        record
    }

    /// Parameters for [`statements::INSERT_USER`].
    pub fn insert_params(&self) -> Params {
        Params::new()
            .bind("id", self.id)
            .bind("username", self.username.as_str())
            .bind("email", self.email.clone())
            .bind("is_active", self.is_active)
    }
}

impl ToRecord for User {
    fn to_record(&self) -> Result<Record, MaterializeError> {
        Ok(self.record())
    }
}

// ============================================================================
// MOCK STORE
// ============================================================================

/// Statements understood by [`MockUserStore`].
pub mod statements {
    /// Mapped entities, filtered by `:is_active`.
    pub const SELECT_USERS_BY_ACTIVE: &str =
        "SELECT users.id, users.username, users.email, users.is_active FROM users WHERE users.is_active = :is_active";
    /// Bare scalar ids, ordered.
    pub const SELECT_USER_IDS: &str = "SELECT users.id FROM users ORDER BY users.id";
    /// Column-projected rows for one `:id`.
    pub const SELECT_USERNAME_BY_ID: &str = "SELECT users.id, users.username FROM users WHERE users.id = :id";
    pub const INSERT_USER: &str =
        "INSERT INTO users (id, username, email, is_active) VALUES (:id, :username, :email, :is_active)";
    pub const UPDATE_USER_ACTIVE: &str = "UPDATE users SET is_active = :is_active WHERE users.id = :id";
    pub const DELETE_USER: &str = "DELETE FROM users WHERE users.id = :id";
}

/// In-memory `users` table implementing [`QueryStore`].
///
/// Counts every execution so tests can tell cache-served calls from
/// store-served ones.
#[derive(Debug, Default)]
pub struct MockUserStore {
    users: RwLock<Vec<User>>,
    executions: AtomicU64,
    failing: AtomicBool,
}

impl MockUserStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_users(users: impl IntoIterator<Item = User>) -> Self {
        let store = Self::new();
        store.users.write().unwrap().extend(users);
        store
    }

    /// Number of statements executed so far.
    pub fn executions(&self) -> u64 {
        self.executions.load(Ordering::SeqCst)
    }

    /// Make every following execution fail with `ConnectionLost`.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn users(&self) -> Vec<User> {
        self.users.read().unwrap().clone()
    }

    fn param<'a>(params: &'a Params, name: &str) -> Result<&'a Scalar, StoreError> {
        params.get(name).ok_or_else(|| StoreError::ExecutionFailed {
            reason: format!("missing parameter :{}", name),
        })
    }

    fn int_param(params: &Params, name: &str) -> Result<i64, StoreError> {
        Self::param(params, name)?
            .as_int()
            .ok_or_else(|| StoreError::ExecutionFailed {
                reason: format!("parameter :{} must be an integer", name),
            })
    }

    fn bool_param(params: &Params, name: &str) -> Result<bool, StoreError> {
        Self::param(params, name)?
            .as_bool()
            .ok_or_else(|| StoreError::ExecutionFailed {
                reason: format!("parameter :{} must be a boolean", name),
            })
    }
}

#[async_trait]
impl QueryStore for MockUserStore {
    async fn execute(&self, query: &Query, params: &Params) -> Result<RawResult, StoreError> {
        self.executions.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(StoreError::ConnectionLost {
                reason: "mock store offline".to_string(),
            });
        }

        match query.canonical_text() {
            statements::SELECT_USERS_BY_ACTIVE => {
                let active = Self::bool_param(params, "is_active")?;
                let users = self.users.read().unwrap();
                let entities = users
                    .iter()
                    .filter(|u| u.is_active == active)
                    .map(|u| Arc::new(u.clone()) as Arc<dyn ToRecord>)
                    .collect();
                Ok(RawResult::Entities(entities))
            }
            statements::SELECT_USER_IDS => {
                let mut ids: Vec<i64> = self.users.read().unwrap().iter().map(|u| u.id).collect();
                ids.sort_unstable();
                Ok(RawResult::Scalars(ids.into_iter().map(Scalar::Int).collect()))
            }
            statements::SELECT_USERNAME_BY_ID => {
                let id = Self::int_param(params, "id")?;
                let rows = self
                    .users
                    .read()
                    .unwrap()
                    .iter()
                    .filter(|u| u.id == id)
                    .map(|u| Row::from_pairs([("id", Scalar::Int(u.id)), ("username", Scalar::from(u.username.as_str()))]))
                    .collect();
                Ok(RawResult::Rows(rows))
            }
            statements::INSERT_USER => {
                let user = User {
                    id: Self::int_param(params, "id")?,
                    username: Self::param(params, "username")?
                        .as_text()
                        .map(str::to_string)
                        .ok_or_else(|| StoreError::ExecutionFailed {
                            reason: "parameter :username must be text".to_string(),
                        })?,
                    email: params.get("email").and_then(Scalar::as_text).map(str::to_string),
                    is_active: Self::bool_param(params, "is_active")?,
                };
                let mut users = self.users.write().unwrap();
                if users.iter().any(|u| u.id == user.id) {
                    return Err(StoreError::ExecutionFailed {
                        reason: format!("duplicate key users.id = {}", user.id),
                    });
                }
                users.push(user);
                Ok(RawResult::Affected(1))
            }
            statements::UPDATE_USER_ACTIVE => {
                let id = Self::int_param(params, "id")?;
                let active = Self::bool_param(params, "is_active")?;
                let mut users = self.users.write().unwrap();
                let mut affected = 0;
                for user in users.iter_mut().filter(|u| u.id == id) {
                    user.is_active = active;
                    affected += 1;
                }
                Ok(RawResult::Affected(affected))
            }
            statements::DELETE_USER => {
                let id = Self::int_param(params, "id")?;
                let mut users = self.users.write().unwrap();
                let before = users.len();
                users.retain(|u| u.id != id);
                Ok(RawResult::Affected((before - users.len()) as u64))
            }
            other => Err(StoreError::Unsupported {
                statement: other.to_string(),
            }),
        }
    }
}

// ============================================================================
// REMOTE TIERS THAT FAIL
// ============================================================================

fn refused() -> CacheError {
    CacheError::Unavailable {
        reason: "connection refused".to_string(),
    }
}

/// Remote tier that is always unreachable.
#[derive(Debug, Default)]
pub struct FailingRemoteCache {
    calls: AtomicU64,
}

impl FailingRemoteCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of calls attempted against this tier.
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RemoteCache for FailingRemoteCache {
    async fn get(&self, _key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(refused())
    }

    async fn set(&self, _key: &str, _value: Vec<u8>, _ttl: Option<Duration>) -> Result<(), CacheError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(refused())
    }

    async fn scan(&self, _pattern: &str, _cursor: u64) -> Result<ScanPage, CacheError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(refused())
    }

    async fn delete(&self, _keys: &[String]) -> Result<u64, CacheError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(refused())
    }
}

/// In-memory remote tier that can be taken offline and back.
#[derive(Debug)]
pub struct SwitchableRemoteCache {
    inner: InMemoryRemoteCache,
    online: AtomicBool,
}

impl Default for SwitchableRemoteCache {
    fn default() -> Self {
        Self {
            inner: InMemoryRemoteCache::new(),
            online: AtomicBool::new(true),
        }
    }
}

impl SwitchableRemoteCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    pub fn inner(&self) -> &InMemoryRemoteCache {
        &self.inner
    }

    fn check(&self) -> Result<(), CacheError> {
        if self.online.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(refused())
        }
    }
}

#[async_trait]
impl RemoteCache for SwitchableRemoteCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        self.check()?;
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<(), CacheError> {
        self.check()?;
        self.inner.set(key, value, ttl).await
    }

    async fn scan(&self, pattern: &str, cursor: u64) -> Result<ScanPage, CacheError> {
        self.check()?;
        self.inner.scan(pattern, cursor).await
    }

    async fn delete(&self, keys: &[String]) -> Result<u64, CacheError> {
        self.check()?;
        self.inner.delete(keys).await
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    use super::*;
    use proptest::prelude::*;
    use std::collections::BTreeMap;

    /// Every float except NaN, which never compares equal to itself.
    pub fn arb_comparable_float() -> impl Strategy<Value = f64> {
        use proptest::num::f64::{INFINITE, NEGATIVE, NORMAL, POSITIVE, SUBNORMAL, ZERO};
        POSITIVE | NEGATIVE | NORMAL | SUBNORMAL | ZERO | INFINITE
    }

    pub fn arb_scalar() -> impl Strategy<Value = Scalar> {
        prop_oneof![
            Just(Scalar::Null),
            any::<bool>().prop_map(Scalar::Bool),
            any::<i64>().prop_map(Scalar::Int),
            arb_comparable_float().prop_map(Scalar::Float),
            Just(Scalar::Float(f64::INFINITY)),
            Just(Scalar::Float(f64::NEG_INFINITY)),
            "[a-zA-Z0-9 _-]{0,16}".prop_map(Scalar::Text),
            prop::collection::vec(any::<u8>(), 0..8).prop_map(Scalar::Bytes),
        ]
    }

    pub fn arb_param_name() -> impl Strategy<Value = String> {
        "[a-z][a-z0-9_]{0,7}"
    }

    pub fn arb_named_params() -> impl Strategy<Value = Params> {
        prop::collection::btree_map(arb_param_name(), arb_scalar(), 0..6).prop_map(Params::Named)
    }

    pub fn arb_positional_params() -> impl Strategy<Value = Params> {
        prop::collection::vec(arb_scalar(), 0..6).prop_map(Params::Positional)
    }

    pub fn arb_params() -> impl Strategy<Value = Params> {
        prop_oneof![arb_named_params(), arb_positional_params()]
    }

    pub fn arb_record() -> impl Strategy<Value = Record> {
        prop::collection::btree_map(arb_param_name(), arb_scalar(), 0..5)
            .prop_map(|m: BTreeMap<String, Scalar>| m.into_iter().collect())
    }

    pub fn arb_payload() -> impl Strategy<Value = Payload> {
        prop_oneof![
            prop::collection::vec(arb_scalar(), 0..6).prop_map(Payload::Scalars),
            prop::collection::vec(arb_record(), 0..4).prop_map(Payload::Records),
        ]
    }

    /// Users with unique ids `1..=n`.
    pub fn arb_users() -> impl Strategy<Value = Vec<User>> {
        prop::collection::vec(("[a-z]{3,10}", any::<bool>()), 0..8).prop_map(|rows| {
            rows.into_iter()
                .enumerate()
                .map(|(i, (name, active))| User::new(i as i64 + 1, name, active))
                .collect()
        })
    }
}

// ============================================================================
// FIXTURES
// ============================================================================

pub mod fixtures {
    use super::*;
    use sqlcache_storage::InvalidationMetricsSnapshot;
    use tokio::sync::watch;
    use tokio::task::JoinHandle;

    /// Settings with a namespace no other test shares.
    pub fn test_settings() -> CacheSettings {
        CacheSettings::new().with_prefix(format!("sqlcache-test-{}", uuid::Uuid::now_v7().simple()))
    }

    pub fn alice() -> User {
        User::new(1, "alice", true)
    }

    pub fn bob() -> User {
        User::new(2, "bob", true)
    }

    pub fn active_users_query() -> (Query, Params) {
        (
            Query::select(statements::SELECT_USERS_BY_ACTIVE),
            Params::new().bind("is_active", true),
        )
    }

    /// An executor wired to a store, a remote tier and a running
    /// invalidation worker.
    pub struct Harness<R: RemoteCache + 'static> {
        pub store: Arc<MockUserStore>,
        pub remote: Arc<R>,
        pub executor: ReadThroughExecutor<MockUserStore, R>,
        pub shutdown_tx: watch::Sender<bool>,
        pub worker: JoinHandle<Arc<InvalidationMetrics>>,
    }

    impl<R: RemoteCache + 'static> Harness<R> {
        /// Build the harness. Must run inside a Tokio runtime.
        ///
        /// # Panics
        ///
        /// Panics if `settings` do not validate.
        pub fn new(store: MockUserStore, remote: Arc<R>, settings: &CacheSettings) -> Self {
            let store = Arc::new(store);
            let cache = Arc::new(
                TieredCache::try_new(Arc::clone(&remote), settings).expect("harness settings should validate"),
            );
            let (shutdown_tx, shutdown_rx) = watch::channel(false);
            let (listener, worker) = InvalidationListener::spawn(
                Arc::clone(&cache),
                settings.invalidation_queue_capacity,
                shutdown_rx,
            );
            let executor = ReadThroughExecutor::try_new(Arc::clone(&store), cache, settings)
                .expect("harness settings should validate")
                .with_invalidation(listener);

            Self {
                store,
                remote,
                executor,
                shutdown_tx,
                worker,
            }
        }

        pub fn invalidation_metrics(&self) -> InvalidationMetricsSnapshot {
            self.executor
                .invalidation()
                .map(|listener| listener.metrics().snapshot())
                .unwrap_or_default()
        }

        /// Wait until at least `expected` invalidation passes have finished.
        pub async fn wait_for_invalidations(&self, expected: u64) {
            for _ in 0..400 {
                if self.invalidation_metrics().settled() >= expected {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            panic!(
                "timed out waiting for {} invalidations: {:?}",
                expected,
                self.invalidation_metrics()
            );
        }

        /// Stop the worker and return its final metrics.
        pub async fn shutdown(self) -> InvalidationMetricsSnapshot {
            let _ = self.shutdown_tx.send(true);
            match self.worker.await {
                Ok(metrics) => metrics.snapshot(),
                Err(e) => panic!("invalidation worker panicked: {}", e),
            }
        }
    }
}
