//! Write-triggered namespace invalidation.
//!
//! A completed write marks its namespace as pending and returns
//! immediately. A single worker task takes every pending namespace and
//! clears each through [`TieredCache::invalidate_namespace`].
//!
//! # Failure policy
//!
//! Invalidation is at most one attempt per request and never fails the
//! write that triggered it. A failed attempt is logged and counted; the
//! namespace then stays stale until its entries expire.
//!
//! # Backpressure
//!
//! Pending namespaces are kept in a set, one slot per namespace. Every pass
//! clears a whole namespace, so a request for a namespace that is already
//! pending is coalesced into it. Requests for other namespaces are never
//! affected by how often one namespace is written. A new namespace is only
//! refused when `capacity` distinct namespaces are already pending; that
//! refusal is logged as a warning and counted as dropped.
//!
//! A wake-up channel of capacity one tells the worker that the set changed;
//! a full wake-up channel already guarantees another pass.
//!
//! # Example
//!
//! ```ignore
//! let (shutdown_tx, shutdown_rx) = watch::channel(false);
//! let (listener, worker) = InvalidationListener::spawn(Arc::clone(&cache), 64, shutdown_rx);
//!
//! let executor = ReadThroughExecutor::new(store, cache, &settings).with_invalidation(listener);
//!
//! // Later, stop the worker
//! let _ = shutdown_tx.send(true);
//! let metrics = worker.await?;
//! ```

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use sqlcache_core::{classify, Query};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use super::tiered::TieredCache;
use super::traits::RemoteCache;

// ============================================================================
// REQUESTS AND METRICS
// ============================================================================

/// A pending request to clear one namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidationRequest {
    pub prefix: String,
    pub requested_at: DateTime<Utc>,
}

/// Metrics collected by the invalidation listener and worker.
#[derive(Debug, Default)]
pub struct InvalidationMetrics {
    /// Requests that made a namespace pending
    pub requested: AtomicU64,
    /// Requests refused because too many namespaces were pending or the
    /// worker had stopped
    pub dropped: AtomicU64,
    /// Requests merged into an already pending request for the same namespace
    pub coalesced: AtomicU64,
    /// Namespace passes that completed
    pub completed: AtomicU64,
    /// Namespace passes that failed
    pub failed: AtomicU64,
    /// Remote keys deleted across all passes
    pub keys_deleted: AtomicU64,
}

impl InvalidationMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a snapshot of current metrics.
    pub fn snapshot(&self) -> InvalidationMetricsSnapshot {
        InvalidationMetricsSnapshot {
            requested: self.requested.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            coalesced: self.coalesced.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            keys_deleted: self.keys_deleted.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time snapshot of invalidation metrics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InvalidationMetricsSnapshot {
    pub requested: u64,
    pub dropped: u64,
    pub coalesced: u64,
    pub completed: u64,
    pub failed: u64,
    pub keys_deleted: u64,
}

impl InvalidationMetricsSnapshot {
    /// Passes that have finished, successfully or not.
    pub fn settled(&self) -> u64 {
        self.completed + self.failed
    }
}

// ============================================================================
// PENDING NAMESPACES
// ============================================================================

/// Outcome of offering a namespace to [`PendingNamespaces`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Offer {
    /// The namespace is now pending.
    Queued,
    /// The namespace was already pending.
    Coalesced,
    /// `capacity` other namespaces are pending.
    Full,
}

/// Namespaces waiting for the worker, each at most once.
#[derive(Debug)]
pub struct PendingNamespaces {
    capacity: usize,
    prefixes: Mutex<BTreeMap<String, DateTime<Utc>>>,
}

impl PendingNamespaces {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            prefixes: Mutex::new(BTreeMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, DateTime<Utc>>> {
        self.prefixes.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Mark a namespace pending.
    pub fn offer(&self, prefix: &str) -> Offer {
        let mut prefixes = self.lock();
        if prefixes.contains_key(prefix) {
            Offer::Coalesced
        } else if prefixes.len() >= self.capacity {
            Offer::Full
        } else {
            prefixes.insert(prefix.to_string(), Utc::now());
            Offer::Queued
        }
    }

    /// Forget a namespace that will not be processed after all.
    fn withdraw(&self, prefix: &str) {
        self.lock().remove(prefix);
    }

    /// Take every pending namespace, oldest request first.
    pub fn take(&self) -> Vec<InvalidationRequest> {
        let mut requests: Vec<InvalidationRequest> = std::mem::take(&mut *self.lock())
            .into_iter()
            .map(|(prefix, requested_at)| InvalidationRequest { prefix, requested_at })
            .collect();
        requests.sort_by_key(|request| request.requested_at);
        requests
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ============================================================================
// LISTENER
// ============================================================================

/// Handle used to schedule namespace invalidation after writes.
///
/// Cloning the handle shares the same pending set and worker, so one
/// listener may serve executors with different prefixes.
#[derive(Debug, Clone)]
pub struct InvalidationListener {
    wake: mpsc::Sender<()>,
    pending: Arc<PendingNamespaces>,
    metrics: Arc<InvalidationMetrics>,
}

impl InvalidationListener {
    /// Spawn the worker on the current runtime and return its handle.
    ///
    /// `capacity` bounds the number of distinct namespaces pending at once.
    /// The worker stops when `shutdown_rx` turns true or every listener
    /// handle has been dropped, and yields its metrics.
    pub fn spawn<R>(
        cache: Arc<TieredCache<R>>,
        capacity: usize,
        shutdown_rx: watch::Receiver<bool>,
    ) -> (Self, JoinHandle<Arc<InvalidationMetrics>>)
    where
        R: RemoteCache + 'static,
    {
        let (wake, wake_rx) = mpsc::channel(1);
        let pending = Arc::new(PendingNamespaces::new(capacity));
        let metrics = Arc::new(InvalidationMetrics::new());
        let handle = tokio::spawn(invalidation_worker(
            cache,
            wake_rx,
            Arc::clone(&pending),
            Arc::clone(&metrics),
            shutdown_rx,
        ));
        (
            Self {
                wake,
                pending,
                metrics,
            },
            handle,
        )
    }

    /// Schedule invalidation of a namespace without waiting for it.
    ///
    /// Returns true if the namespace is pending after the call, whether
    /// this request made it so or an earlier one did.
    pub fn notify(&self, prefix: &str) -> bool {
        if self.wake.is_closed() {
            return self.refuse_stopped(prefix);
        }

        match self.pending.offer(prefix) {
            Offer::Coalesced => {
                self.metrics.coalesced.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(prefix = %prefix, "Namespace already pending invalidation");
                true
            }
            Offer::Full => {
                self.metrics.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    prefix = %prefix,
                    pending = self.pending.len(),
                    "Too many namespaces pending invalidation, request dropped"
                );
                false
            }
            Offer::Queued => match self.wake.try_send(()) {
                Ok(()) | Err(mpsc::error::TrySendError::Full(())) => {
                    self.metrics.requested.fetch_add(1, Ordering::Relaxed);
                    true
                }
                Err(mpsc::error::TrySendError::Closed(())) => {
                    self.pending.withdraw(prefix);
                    self.refuse_stopped(prefix)
                }
            },
        }
    }

    fn refuse_stopped(&self, prefix: &str) -> bool {
        self.metrics.dropped.fetch_add(1, Ordering::Relaxed);
        tracing::warn!(prefix = %prefix, "Invalidation worker stopped, request dropped");
        false
    }

    /// Schedule invalidation if `query` is a write.
    ///
    /// Call only after the write completed successfully against the store.
    pub fn observe(&self, query: &Query, prefix: &str) -> bool {
        if classify(query).invalidates() {
            self.notify(prefix)
        } else {
            false
        }
    }

    pub fn metrics(&self) -> &Arc<InvalidationMetrics> {
        &self.metrics
    }

    /// Namespaces currently waiting for the worker.
    pub fn pending(&self) -> &PendingNamespaces {
        &self.pending
    }
}

// ============================================================================
// WORKER
// ============================================================================

/// Clear pending namespaces whenever woken, until shutdown.
pub async fn invalidation_worker<R: RemoteCache>(
    cache: Arc<TieredCache<R>>,
    mut wake_rx: mpsc::Receiver<()>,
    pending: Arc<PendingNamespaces>,
    metrics: Arc<InvalidationMetrics>,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Arc<InvalidationMetrics> {
    tracing::info!("Invalidation worker started");

    loop {
        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    tracing::info!("Invalidation worker shutting down");
                    break;
                }
            }

            woken = wake_rx.recv() => {
                if woken.is_none() {
                    tracing::info!("All invalidation listeners dropped");
                    break;
                }

                for request in pending.take() {
                    run_invalidation(&cache, &request.prefix, &metrics).await;
                }
            }
        }
    }

    let snapshot = metrics.snapshot();
    tracing::info!(
        requested = snapshot.requested,
        dropped = snapshot.dropped,
        coalesced = snapshot.coalesced,
        completed = snapshot.completed,
        failed = snapshot.failed,
        keys_deleted = snapshot.keys_deleted,
        "Invalidation worker completed"
    );

    metrics
}

async fn run_invalidation<R: RemoteCache>(
    cache: &TieredCache<R>,
    prefix: &str,
    metrics: &InvalidationMetrics,
) {
    match cache.invalidate_namespace(prefix).await {
        Ok(deleted) => {
            metrics.completed.fetch_add(1, Ordering::Relaxed);
            metrics.keys_deleted.fetch_add(deleted, Ordering::Relaxed);
            tracing::debug!(prefix = %prefix, deleted, "Namespace invalidated");
        }
        Err(e) => {
            metrics.failed.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(prefix = %prefix, error = %e, "Namespace invalidation failed, entries stay until expiry");
        }
    }
}
