//! Shared Resource Pool
//!
//! Bounds capacity-sensitive work (rate-limited endpoints, venue clients,
//! compute) independently of how many agents exist. Work acquires a
//! `ResourceLease`; the slot returns to the pool when the lease is dropped,
//! whichever way the holder exits.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Notify, OwnedSemaphorePermit, Semaphore, TryAcquireError};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::{FleetError, Result};

/// Resource pool configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourcePoolConfig {
    /// Maximum concurrent leases
    pub capacity: usize,
    /// Maximum time a request waits for a slot; `None` waits indefinitely
    pub acquire_timeout_ms: Option<u64>,
}

impl Default for ResourcePoolConfig {
    fn default() -> Self {
        Self {
            capacity: 8,
            acquire_timeout_ms: Some(30_000),
        }
    }
}

#[derive(Debug, Default)]
struct PoolCounters {
    granted: AtomicU64,
    released: AtomicU64,
    timed_out: AtomicU64,
    waiting: AtomicUsize,
}

/// Pool statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStats {
    pub capacity: usize,
    pub in_use: usize,
    pub waiting: usize,
    pub granted_total: u64,
    pub released_total: u64,
    pub timed_out_total: u64,
    pub closed: bool,
}

impl std::fmt::Display for PoolStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Pool[{}/{}, waiting={}, granted={}, released={}, timeouts={}]",
            self.in_use,
            self.capacity,
            self.waiting,
            self.granted_total,
            self.released_total,
            self.timed_out_total
        )
    }
}

/// Bounded shared-resource arbiter
#[derive(Debug)]
pub struct ResourcePool {
    semaphore: Arc<Semaphore>,
    capacity: usize,
    acquire_timeout: Option<Duration>,
    counters: Arc<PoolCounters>,
    released: Arc<Notify>,
}

impl ResourcePool {
    pub fn new(config: &ResourcePoolConfig) -> Self {
        let capacity = config.capacity.max(1);
        if capacity != config.capacity {
            warn!("resource pool capacity must be at least 1, using 1");
        }
        info!(
            capacity,
            acquire_timeout_ms = ?config.acquire_timeout_ms,
            "resource pool created"
        );
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
            acquire_timeout: config.acquire_timeout_ms.map(Duration::from_millis),
            counters: Arc::new(PoolCounters::default()),
            released: Arc::new(Notify::new()),
        }
    }

    /// Pool with the given capacity and no acquire timeout
    pub fn with_capacity(capacity: usize) -> Self {
        Self::new(&ResourcePoolConfig {
            capacity,
            acquire_timeout_ms: None,
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn acquire_timeout(&self) -> Option<Duration> {
        self.acquire_timeout
    }

    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    pub fn in_use(&self) -> usize {
        if self.semaphore.is_closed() {
            // permits of a closed semaphore are no longer meaningful
            let granted = self.counters.granted.load(Ordering::SeqCst);
            let released = self.counters.released.load(Ordering::SeqCst);
            return granted.saturating_sub(released) as usize;
        }
        self.capacity.saturating_sub(self.available())
    }

    pub fn is_closed(&self) -> bool {
        self.semaphore.is_closed()
    }

    /// Wait for a slot, bounded by the configured acquire timeout.
    ///
    /// Suspends only the caller; other tasks keep running.
    pub async fn acquire(&self) -> Result<ResourceLease> {
        let started = Instant::now();
        let _waiting = WaitingGuard::enter(&self.counters);

        let acquired = match self.acquire_timeout {
            Some(limit) => {
                match tokio::time::timeout(limit, self.semaphore.clone().acquire_owned()).await {
                    Ok(result) => result,
                    Err(_) => {
                        self.counters.timed_out.fetch_add(1, Ordering::Relaxed);
                        let waited_ms = started.elapsed().as_millis() as u64;
                        warn!(waited_ms, "resource lease request timed out");
                        return Err(FleetError::ResourceTimeout { waited_ms });
                    }
                }
            }
            None => self.semaphore.clone().acquire_owned().await,
        };

        let permit = acquired.map_err(|_| FleetError::PoolClosed)?;
        Ok(self.lease(permit))
    }

    /// Take a slot only if one is free right now
    pub fn try_acquire(&self) -> Result<Option<ResourceLease>> {
        match self.semaphore.clone().try_acquire_owned() {
            Ok(permit) => Ok(Some(self.lease(permit))),
            Err(TryAcquireError::NoPermits) => Ok(None),
            Err(TryAcquireError::Closed) => Err(FleetError::PoolClosed),
        }
    }

    /// Count a request that gave up waiting elsewhere (e.g. in the scheduler)
    pub(crate) fn record_timeout(&self) {
        self.counters.timed_out.fetch_add(1, Ordering::Relaxed);
    }

    /// Resolves after some lease is released
    pub(crate) async fn released(&self) {
        self.released.notified().await;
    }

    /// Reject all future lease requests; outstanding leases stay valid
    pub fn close(&self) {
        if !self.semaphore.is_closed() {
            info!(in_use = self.in_use(), "resource pool closed");
            self.semaphore.close();
        }
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            capacity: self.capacity,
            in_use: self.in_use(),
            waiting: self.counters.waiting.load(Ordering::Relaxed),
            granted_total: self.counters.granted.load(Ordering::Relaxed),
            released_total: self.counters.released.load(Ordering::Relaxed),
            timed_out_total: self.counters.timed_out.load(Ordering::Relaxed),
            closed: self.semaphore.is_closed(),
        }
    }

    fn lease(&self, permit: OwnedSemaphorePermit) -> ResourceLease {
        self.counters.granted.fetch_add(1, Ordering::SeqCst);
        debug!(available = self.available(), "resource lease granted");
        ResourceLease {
            permit: Some(permit),
            acquired_at: Instant::now(),
            counters: self.counters.clone(),
            released: self.released.clone(),
        }
    }
}

struct WaitingGuard<'a>(&'a PoolCounters);

impl<'a> WaitingGuard<'a> {
    fn enter(counters: &'a PoolCounters) -> Self {
        counters.waiting.fetch_add(1, Ordering::Relaxed);
        Self(counters)
    }
}

impl Drop for WaitingGuard<'_> {
    fn drop(&mut self) {
        self.0.waiting.fetch_sub(1, Ordering::Relaxed);
    }
}

/// One slot of the pool, held for at most one cycle
#[derive(Debug)]
pub struct ResourceLease {
    permit: Option<OwnedSemaphorePermit>,
    acquired_at: Instant,
    counters: Arc<PoolCounters>,
    released: Arc<Notify>,
}

impl ResourceLease {
    /// How long this lease has been held
    pub fn held_for(&self) -> Duration {
        self.acquired_at.elapsed()
    }
}

impl Drop for ResourceLease {
    fn drop(&mut self) {
        // return the permit before waking anyone waiting on a release
        drop(self.permit.take());
        self.counters.released.fetch_add(1, Ordering::SeqCst);
        self.released.notify_one();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_lease_released_on_drop() {
        let pool = ResourcePool::with_capacity(2);
        let a = pool.acquire().await.unwrap();
        let _b = pool.acquire().await.unwrap();
        assert_eq!(pool.in_use(), 2);
        assert!(pool.try_acquire().unwrap().is_none());

        drop(a);
        assert_eq!(pool.in_use(), 1);
        assert!(pool.try_acquire().unwrap().is_some());

        let stats = pool.stats();
        assert_eq!(stats.granted_total, 3);
        assert_eq!(stats.released_total, 2);
    }

    #[tokio::test]
    async fn test_lease_released_on_error_path() {
        let pool = ResourcePool::with_capacity(1);

        async fn failing_work(pool: &ResourcePool) -> Result<()> {
            let _lease = pool.acquire().await?;
            Err(FleetError::strategy("venue rejected"))
        }

        assert!(failing_work(&pool).await.is_err());
        assert_eq!(pool.in_use(), 0);
        assert_eq!(pool.available(), 1);
    }

    #[tokio::test]
    async fn test_acquire_times_out_when_saturated() {
        let pool = ResourcePool::new(&ResourcePoolConfig {
            capacity: 1,
            acquire_timeout_ms: Some(30),
        });
        let _held = pool.acquire().await.unwrap();

        let err = pool.acquire().await.unwrap_err();
        assert!(matches!(err, FleetError::ResourceTimeout { .. }));
        assert_eq!(pool.stats().timed_out_total, 1);
        assert_eq!(pool.stats().waiting, 0);
    }

    #[tokio::test]
    async fn test_waiter_resumes_after_release() {
        let pool = Arc::new(ResourcePool::with_capacity(1));
        let held = pool.acquire().await.unwrap();

        let waiter = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.acquire().await.map(|_| ()) })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());
        assert_eq!(pool.stats().waiting, 1);

        drop(held);
        waiter.await.unwrap().unwrap();
        assert_eq!(pool.in_use(), 0);
    }

    #[tokio::test]
    async fn test_closed_pool_rejects() {
        let pool = ResourcePool::with_capacity(1);
        pool.close();
        assert!(matches!(pool.acquire().await, Err(FleetError::PoolClosed)));
        assert!(matches!(pool.try_acquire(), Err(FleetError::PoolClosed)));
    }
}
