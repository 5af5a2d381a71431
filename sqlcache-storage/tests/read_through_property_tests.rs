//! Property-Based Tests for the Read-Through Path
//!
//! **Property 1: Read-through idempotence**
//!
//! For any seeded table, issuing the same read twice SHALL be store-served
//! the first time and cache-served the second time, with equal payloads.
//!
//! **Property 2: Cache round-trip**
//!
//! For any payload, storing it and loading it back through either tier
//! SHALL yield an equal payload.
//!
//! Floats SHALL come back with the exact bits they were stored with, NaN
//! and the infinities included.
//!
//! **Property 3: Degradation**
//!
//! With the remote tier always failing, reads SHALL still succeed and
//! return what the store returns.

use std::sync::Arc;
use std::time::Duration;

use proptest::prelude::*;
use sqlcache_core::{CacheKey, CacheSettings, Params, Payload, Query, Scalar, StoreError};
use sqlcache_storage::{
    CacheTier, InMemoryRemoteCache, Origin, QueryOutput, ReadThroughExecutor, TieredCache,
};
use sqlcache_test_utils::fixtures::{active_users_query, alice, bob, test_settings, Harness};
use sqlcache_test_utils::generators::{arb_params, arb_payload, arb_users};
use sqlcache_test_utils::{statements, FailingRemoteCache, MockUserStore, SwitchableRemoteCache, User};
use tokio::runtime::Runtime;

// ============================================================================
// TEST CONFIGURATION
// ============================================================================

fn test_runtime() -> Result<Runtime, TestCaseError> {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| TestCaseError::fail(format!("Failed to create runtime: {}", e)))
}

fn active_records(users: &[User]) -> Payload {
    Payload::Records(users.iter().filter(|u| u.is_active).map(User::record).collect())
}

fn executor<R: sqlcache_storage::RemoteCache>(
    store: MockUserStore,
    remote: Arc<R>,
    settings: &CacheSettings,
) -> ReadThroughExecutor<MockUserStore, R> {
    let cache = Arc::new(TieredCache::new(remote, settings));
    ReadThroughExecutor::new(Arc::new(store), cache, settings)
}

// ============================================================================
// PROPERTY TESTS
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_second_read_is_cache_served(users in arb_users()) {
        let rt = test_runtime()?;
        rt.block_on(async {
            let settings = test_settings();
            let executor = executor(
                MockUserStore::with_users(users.clone()),
                Arc::new(InMemoryRemoteCache::new()),
                &settings,
            );
            let (query, params) = active_users_query();
            let expected = active_records(&users);

            let first = executor.execute(&query, &params).await
                .map_err(|e| TestCaseError::fail(e.to_string()))?;
            prop_assert_eq!(first.origin(), Origin::Store);
            prop_assert_eq!(first.payload(), Some(&expected));

            let second = executor.execute(&query, &params).await
                .map_err(|e| TestCaseError::fail(e.to_string()))?;
            prop_assert_eq!(second.origin(), Origin::Cache);
            prop_assert_eq!(executor.last_origin(), Some(Origin::Cache));
            prop_assert_eq!(first.payload(), second.payload());
            prop_assert_eq!(executor.store().executions(), 1);
            Ok::<(), TestCaseError>(())
        })?;
    }

    #[test]
    fn prop_payload_round_trips_through_remote_tier(payload in arb_payload(), params in arb_params()) {
        let rt = test_runtime()?;
        rt.block_on(async {
            let settings = test_settings();
            let cache = TieredCache::new(Arc::new(InMemoryRemoteCache::new()), &settings);
            let key = CacheKey::derive(&Query::select("SELECT * FROM t"), &params, &settings.key_prefix);

            prop_assert!(cache.set(&key, &payload, settings.ttl()).await);
            let hit = cache.get(&key).await
                .ok_or_else(|| TestCaseError::fail("entry missing after set"))?;
            prop_assert_eq!(hit.tier, CacheTier::Remote);
            prop_assert_eq!(hit.payload, payload);
            Ok::<(), TestCaseError>(())
        })?;
    }

    #[test]
    fn prop_float_bits_survive_remote_tier(bits in prop::collection::vec(any::<u64>(), 1..8)) {
        let rt = test_runtime()?;
        rt.block_on(async {
            let settings = test_settings();
            let cache = TieredCache::new(Arc::new(InMemoryRemoteCache::new()), &settings);
            let key = CacheKey::derive(&Query::select("SELECT x FROM t"), &Params::new(), &settings.key_prefix);
            let payload = Payload::Scalars(bits.iter().map(|b| Scalar::Float(f64::from_bits(*b))).collect());

            prop_assert!(cache.set(&key, &payload, settings.ttl()).await);
            let hit = cache.get(&key).await
                .ok_or_else(|| TestCaseError::fail("entry missing after set"))?;
            prop_assert_eq!(hit.tier, CacheTier::Remote);
            let served: Vec<u64> = match hit.payload {
                Payload::Scalars(values) => values
                    .iter()
                    .filter_map(|v| match v {
                        Scalar::Float(f) => Some(f.to_bits()),
                        _ => None,
                    })
                    .collect(),
                Payload::Records(_) => Vec::new(),
            };
            prop_assert_eq!(served, bits);
            prop_assert_eq!(cache.stats().remote_errors, 0);
            Ok::<(), TestCaseError>(())
        })?;
    }

    #[test]
    fn prop_payload_round_trips_through_local_tier(payload in arb_payload()) {
        let rt = test_runtime()?;
        rt.block_on(async {
            let settings = test_settings();
            let cache = TieredCache::new(Arc::new(FailingRemoteCache::new()), &settings);
            let key = CacheKey::derive(&Query::select("SELECT * FROM t"), &Params::new(), &settings.key_prefix);

            prop_assert!(!cache.set(&key, &payload, settings.ttl()).await);
            let hit = cache.get(&key).await
                .ok_or_else(|| TestCaseError::fail("entry missing after set"))?;
            prop_assert_eq!(hit.tier, CacheTier::Local);
            prop_assert_eq!(hit.payload, payload);
            Ok::<(), TestCaseError>(())
        })?;
    }

    #[test]
    fn prop_reads_survive_failing_remote(users in arb_users()) {
        let rt = test_runtime()?;
        rt.block_on(async {
            let settings = test_settings();
            let remote = Arc::new(FailingRemoteCache::new());
            let executor = executor(MockUserStore::with_users(users.clone()), Arc::clone(&remote), &settings);
            let (query, params) = active_users_query();
            let expected = active_records(&users);

            for _ in 0..3 {
                let output = executor.execute(&query, &params).await
                    .map_err(|e| TestCaseError::fail(e.to_string()))?;
                prop_assert_eq!(output.payload(), Some(&expected));
            }
            // Only the first call reached the store; the local tier served the rest.
            prop_assert_eq!(executor.store().executions(), 1);
            prop_assert!(remote.calls() >= 3);
            Ok::<(), TestCaseError>(())
        })?;
    }
}

// ============================================================================
// SCENARIO TESTS
// ============================================================================

#[tokio::test]
async fn test_active_users_scenario() {
    let settings = test_settings();
    let harness = Harness::new(
        MockUserStore::with_users([alice()]),
        Arc::new(InMemoryRemoteCache::new()),
        &settings,
    );
    let (query, params) = active_users_query();

    let first = harness.executor.execute(&query, &params).await.unwrap();
    assert_eq!(first.origin(), Origin::Store);
    let records = first.payload().unwrap().as_records().unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0]["id"], Scalar::Int(1));
    assert_eq!(records[0]["username"], Scalar::Text("alice".to_string()));
    assert_eq!(records[0]["is_active"], Scalar::Bool(true));

    let second = harness.executor.execute(&query, &params).await.unwrap();
    assert_eq!(second.origin(), Origin::Cache);
    assert_eq!(first.payload(), second.payload());

    let insert = harness
        .executor
        .execute(&Query::insert(statements::INSERT_USER), &bob().insert_params())
        .await
        .unwrap();
    assert!(matches!(insert, QueryOutput::Passthrough(_)));
    harness.wait_for_invalidations(1).await;

    let third = harness.executor.execute(&query, &params).await.unwrap();
    assert_eq!(third.origin(), Origin::Store);
    assert_eq!(third.into_payload(), Some(active_records(&[alice(), bob()])));

    let metrics = harness.shutdown().await;
    assert_eq!(metrics.completed, 1);
    assert_eq!(metrics.failed, 0);
}

#[tokio::test]
async fn test_expired_entries_fall_back_to_store() {
    let settings = test_settings().with_ttl_secs(1);
    let executor = executor(
        MockUserStore::with_users([alice()]),
        Arc::new(InMemoryRemoteCache::new()),
        &settings,
    );
    let (query, params) = active_users_query();

    executor.execute(&query, &params).await.unwrap();
    assert_eq!(executor.execute(&query, &params).await.unwrap().origin(), Origin::Cache);

    tokio::time::sleep(Duration::from_millis(1100)).await;

    let after = executor.execute(&query, &params).await.unwrap();
    assert_eq!(after.origin(), Origin::Store);
    assert_eq!(executor.store().executions(), 2);
}

#[tokio::test]
async fn test_zero_ttl_never_expires() {
    let settings = test_settings().with_ttl_secs(0);
    let executor = executor(
        MockUserStore::with_users([alice()]),
        Arc::new(InMemoryRemoteCache::new()),
        &settings,
    );
    let (query, params) = active_users_query();

    executor.execute(&query, &params).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(executor.execute(&query, &params).await.unwrap().origin(), Origin::Cache);
}

#[tokio::test]
async fn test_local_tier_serves_when_remote_goes_down() {
    let settings = test_settings();
    let remote = Arc::new(SwitchableRemoteCache::new());
    let executor = executor(MockUserStore::with_users([alice()]), Arc::clone(&remote), &settings);
    let (query, params) = active_users_query();

    executor.execute(&query, &params).await.unwrap();
    remote.set_online(false);

    match executor.execute(&query, &params).await.unwrap() {
        QueryOutput::Read(read) => {
            assert!(read.was_cache_hit());
            assert_eq!(read.tier(), Some(CacheTier::Local));
        }
        QueryOutput::Passthrough(_) => panic!("read should go through the cache"),
    }
    assert_eq!(executor.store().executions(), 1);
    assert!(executor.cache().stats().remote_errors >= 1);
}

#[tokio::test]
async fn test_store_errors_propagate_unchanged() {
    let settings = test_settings();
    let store = MockUserStore::with_users([alice()]);
    store.set_failing(true);
    let executor = executor(store, Arc::new(InMemoryRemoteCache::new()), &settings);
    let (query, params) = active_users_query();

    let err = executor.execute(&query, &params).await.unwrap_err();
    assert_eq!(
        err,
        StoreError::ConnectionLost {
            reason: "mock store offline".to_string()
        }
    );
    assert_eq!(executor.last_origin(), None);
    assert_eq!(executor.cache().stats().writes, 0);
}

#[tokio::test]
async fn test_unknown_statements_bypass_cache() {
    let settings = test_settings();
    let executor = executor(
        MockUserStore::with_users([alice()]),
        Arc::new(InMemoryRemoteCache::new()),
        &settings,
    );

    let err = executor
        .execute(&Query::raw("VACUUM users"), &Params::new())
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::Unsupported { .. }));

    let stats = executor.cache().stats();
    assert_eq!(stats.misses + stats.hits(), 0);
    assert_eq!(stats.writes, 0);
}

#[tokio::test]
async fn test_scalar_and_row_results() {
    let settings = test_settings();
    let executor = executor(
        MockUserStore::with_users([alice(), User::new(3, "carol", false)]),
        Arc::new(InMemoryRemoteCache::new()),
        &settings,
    );

    let ids = executor
        .fetch(&Query::raw(statements::SELECT_USER_IDS), &Params::new())
        .await
        .unwrap();
    assert_eq!(
        ids.into_value(),
        Payload::Scalars(vec![Scalar::Int(1), Scalar::Int(3)])
    );

    let rows = executor
        .fetch(&Query::select(statements::SELECT_USERNAME_BY_ID), &Params::new().bind("id", 3))
        .await
        .unwrap();
    let records = rows.value().as_records().unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0]["username"], Scalar::Text("carol".to_string()));
    assert!(!records[0].contains_key("is_active"));
}

#[tokio::test]
async fn test_different_params_are_cached_separately() {
    let settings = test_settings();
    let executor = executor(
        MockUserStore::with_users([alice(), User::new(3, "carol", false)]),
        Arc::new(InMemoryRemoteCache::new()),
        &settings,
    );
    let query = Query::select(statements::SELECT_USERS_BY_ACTIVE);

    let active = executor.execute(&query, &Params::new().bind("is_active", true)).await.unwrap();
    let inactive = executor.execute(&query, &Params::new().bind("is_active", false)).await.unwrap();

    assert_eq!(inactive.origin(), Origin::Store);
    assert_ne!(active.payload(), inactive.payload());
    assert_eq!(executor.store().executions(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_reads_agree() {
    let settings = test_settings();
    let executor = Arc::new(executor(
        MockUserStore::with_users([alice(), bob()]),
        Arc::new(InMemoryRemoteCache::new()),
        &settings,
    ));

    let mut handles = Vec::new();
    for _ in 0..16 {
        let executor = Arc::clone(&executor);
        handles.push(tokio::spawn(async move {
            let (query, params) = active_users_query();
            executor.execute(&query, &params).await.map(QueryOutput::into_payload)
        }));
    }

    let expected = Some(active_records(&[alice(), bob()]));
    for handle in handles {
        assert_eq!(handle.await.unwrap().unwrap(), expected);
    }
    // Concurrent misses may each reach the store, but never more than the callers.
    assert!(executor.store().executions() >= 1);
    assert!(executor.store().executions() <= 16);
}
