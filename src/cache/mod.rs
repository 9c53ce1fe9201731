//! Scoped key/value caches for pipeline, module and host state.
//!
//! A [`Cache`] maps string keys to arbitrary shared values. Three scopes use it:
//!
//! - **Pipeline cache**: created once per [`Pipeline::start`](crate::executor::pipeline::Pipeline::start)
//!   and visible to every module, task and host for the whole run.
//! - **Module cache**: taken from a [`CachePool`] at the start of each module and
//!   cleared before it goes back, so nothing leaks from one module into the next.
//! - **Host cache**: owned by each inventory [`Host`](crate::inventory::Host) for
//!   host-local facts (detected OS, package manager, registered output).
//!
//! All operations are safe to call from many host tasks at once. The cache does
//! not preserve insertion order and offers no multi-key transactions; a
//! read-modify-write on one key goes through [`Cache::get_or_set`].

pub mod pool;

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

pub use pool::{CachePool, PoolStats};

/// A value stored in a [`Cache`].
pub type CacheValue = Arc<dyn Any + Send + Sync>;

/// Concurrency-safe string-keyed store with get-or-set semantics.
#[derive(Default)]
pub struct Cache {
    entries: DashMap<String, CacheValue>,
}

impl Cache {
    /// Create an empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a value, replacing any previous value under the same key
    pub fn set<T>(&self, key: impl Into<String>, value: T)
    where
        T: Any + Send + Sync,
    {
        self.entries.insert(key.into(), Arc::new(value));
    }

    /// Get the raw shared value for a key
    pub fn get(&self, key: &str) -> Option<CacheValue> {
        self.entries.get(key).map(|v| Arc::clone(v.value()))
    }

    /// Get a value downcast to `T`.
    ///
    /// Returns `None` when the key is missing or holds a different type.
    pub fn get_as<T>(&self, key: &str) -> Option<Arc<T>>
    where
        T: Any + Send + Sync,
    {
        self.get(key).and_then(|v| v.downcast::<T>().ok())
    }

    /// Get a `String` value
    pub fn get_string(&self, key: &str) -> Option<String> {
        self.get_as::<String>(key).map(|v| v.as_ref().clone())
    }

    /// Get a `bool` value
    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.get_as::<bool>(key).map(|v| *v)
    }

    /// Get an `i64` value
    pub fn get_int(&self, key: &str) -> Option<i64> {
        self.get_as::<i64>(key).map(|v| *v)
    }

    /// Atomically load the value under `key`, or store `value` if absent.
    ///
    /// Returns the value now in the cache and `true` if it was already present
    /// (`value` was dropped), `false` if `value` was just stored.
    pub fn get_or_set<T>(&self, key: impl Into<String>, value: T) -> (CacheValue, bool)
    where
        T: Any + Send + Sync,
    {
        match self.entries.entry(key.into()) {
            Entry::Occupied(existing) => (Arc::clone(existing.get()), true),
            Entry::Vacant(slot) => {
                let value: CacheValue = Arc::new(value);
                slot.insert(Arc::clone(&value));
                (value, false)
            }
        }
    }

    /// Remove a key, returning its value
    pub fn remove(&self, key: &str) -> Option<CacheValue> {
        self.entries.remove(key).map(|(_, v)| v)
    }

    /// Check whether a key is present
    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Visit every entry until `f` returns `false`.
    ///
    /// Iterates over a snapshot, so `f` may write to the cache. Entries added
    /// or removed concurrently may or may not be observed.
    pub fn range<F>(&self, mut f: F)
    where
        F: FnMut(&str, &CacheValue) -> bool,
    {
        let snapshot: Vec<(String, CacheValue)> = self
            .entries
            .iter()
            .map(|e| (e.key().clone(), Arc::clone(e.value())))
            .collect();
        for (key, value) in &snapshot {
            if !f(key, value) {
                break;
            }
        }
    }

    /// Snapshot of the current keys
    pub fn keys(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.key().clone()).collect()
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every entry
    pub fn clean(&self) {
        self.entries.clear();
    }
}

impl fmt::Debug for Cache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cache")
            .field("keys", &self.keys())
            .finish()
    }
}
