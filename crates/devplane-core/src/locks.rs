//! Per-resource serialization: DevBox operations serialize per
//! `username`, App lifecycle operations per `(username, appName)`. Locks are
//! held only long enough to initiate an async task or perform a fast-path
//! synchronous op — never across a slow adapter call.

use std::hash::Hash;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;

/// A table of named async mutexes, keyed by `K`, grown lazily. Uses a
/// double-checked insertion pattern: the fast path probes the map
/// read-only; insertion happens only on first use of a key, via
/// `DashMap`'s own sharded locking rather than a second explicit lock.
pub struct LockTable<K> {
    locks: DashMap<K, Arc<Mutex<()>>>,
}

impl<K> Default for LockTable<K>
where
    K: Eq + Hash + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K> LockTable<K>
where
    K: Eq + Hash + Clone,
{
    pub fn new() -> Self {
        Self { locks: DashMap::new() }
    }

    /// Returns the mutex for `key`, creating it if this is the first request
    /// for that key. The mutex is never removed — DevBox/App keys are
    /// bounded by the number of usernames/apps that have ever existed, a
    /// small and slow-growing set relative to request volume.
    pub fn get(&self, key: &K) -> Arc<Mutex<()>> {
        if let Some(existing) = self.locks.get(key) {
            return existing.clone();
        }
        self.locks.entry(key.clone()).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
    }
}

/// Lock table for DevBox operations, keyed by `username`.
pub type DevboxLocks = LockTable<String>;

/// Lock table for App lifecycle operations, keyed by `(username, appName)`.
pub type AppLocks = LockTable<(String, String)>;

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn same_key_serializes() {
        let table: DevboxLocks = LockTable::new();
        let lock_a = table.get(&"bob".to_string());
        let lock_b = table.get(&"bob".to_string());
        assert!(Arc::ptr_eq(&lock_a, &lock_b));

        let _guard = lock_a.lock().await;
        assert!(lock_b.try_lock().is_err());
    }

    #[tokio::test]
    async fn different_keys_independent() {
        let table: DevboxLocks = LockTable::new();
        let lock_a = table.get(&"bob".to_string());
        let lock_b = table.get(&"carol".to_string());
        let _guard = lock_a.lock().await;
        assert!(lock_b.try_lock().is_ok());
    }
}
