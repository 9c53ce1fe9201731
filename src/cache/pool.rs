//! Free-list of module caches.
//!
//! A typical run executes dozens of modules. The pool hands out cleared
//! [`Cache`] instances and takes them back after each module, clearing them on
//! the way in so no key survives into the next module.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::trace;

use super::Cache;

/// Allocation counters for a [`CachePool`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Caches created because the free-list was empty
    pub allocated: u64,
    /// Caches handed out from the free-list
    pub reused: u64,
    /// Caches returned still shared and therefore not recycled
    pub detached: u64,
    /// Caches currently idle in the free-list
    pub idle: usize,
}

/// Reuse pool for module-scoped caches
#[derive(Debug, Default)]
pub struct CachePool {
    free: Mutex<Vec<Arc<Cache>>>,
    allocated: AtomicU64,
    reused: AtomicU64,
    detached: AtomicU64,
}

impl CachePool {
    /// Create an empty pool
    pub fn new() -> Self {
        Self::default()
    }

    /// Take a cleared cache from the pool, allocating one if none is idle
    pub fn acquire(&self) -> Arc<Cache> {
        if let Some(cache) = self.free.lock().pop() {
            self.reused.fetch_add(1, Ordering::Relaxed);
            trace!("Reusing pooled module cache");
            return cache;
        }
        self.allocated.fetch_add(1, Ordering::Relaxed);
        trace!("Allocating module cache");
        Arc::new(Cache::new())
    }

    /// Clear a cache and return it to the pool.
    ///
    /// A cache that is still referenced elsewhere (for example by a running
    /// server module) is left to its holder instead of being cleared under it.
    pub fn release(&self, cache: Arc<Cache>) {
        if Arc::strong_count(&cache) > 1 {
            self.detached.fetch_add(1, Ordering::Relaxed);
            trace!("Module cache still shared, detaching it from the pool");
            return;
        }
        cache.clean();
        self.free.lock().push(cache);
    }

    /// Current counters
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            allocated: self.allocated.load(Ordering::Relaxed),
            reused: self.reused.load(Ordering::Relaxed),
            detached: self.detached.load(Ordering::Relaxed),
            idle: self.free.lock().len(),
        }
    }
}
