//! Keyed exclusive scopes.
//!
//! One async mutex per key, created on demand. Holding the guard for a goal
//! (or user) serializes every engine operation on that key while leaving
//! other keys free.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex};
use tokio::sync::OwnedMutexGuard;

/// Registry of per-key async locks.
pub struct ScopeLocks<K> {
    scopes: Mutex<HashMap<K, Arc<tokio::sync::Mutex<()>>>>,
}

impl<K: Eq + Hash + Clone> ScopeLocks<K> {
    /// Empty registry.
    pub fn new() -> Self {
        Self {
            scopes: Mutex::new(HashMap::new()),
        }
    }

    /// Wait for exclusive access to `key`.
    pub async fn acquire(&self, key: &K) -> OwnedMutexGuard<()> {
        let scope = {
            let mut scopes = self.scopes.lock().unwrap_or_else(|e| e.into_inner());
            // Drop scopes nobody holds or waits on.
            scopes.retain(|_, lock| Arc::strong_count(lock) > 1);
            scopes
                .entry(key.clone())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
                .clone()
        };
        scope.lock_owned().await
    }

    /// Number of keys currently tracked.
    pub fn len(&self) -> usize {
        self.scopes.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Whether no key is tracked.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<K: Eq + Hash + Clone> Default for ScopeLocks<K> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_same_key_is_exclusive() {
        let locks = Arc::new(ScopeLocks::<u32>::new());
        let inside = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let locks = locks.clone();
            let inside = inside.clone();
            let max_seen = max_seen.clone();
            handles.push(tokio::spawn(async move {
                let _guard = locks.acquire(&7).await;
                let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                max_seen.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                inside.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_different_keys_do_not_block() {
        let locks = ScopeLocks::<u32>::new();
        let _a = locks.acquire(&1).await;
        let b = tokio::time::timeout(Duration::from_millis(100), locks.acquire(&2)).await;
        assert!(b.is_ok());
    }

    #[tokio::test]
    async fn test_released_scopes_are_pruned() {
        let locks = ScopeLocks::<u32>::new();
        {
            let _a = locks.acquire(&1).await;
            assert_eq!(locks.len(), 1);
        }
        let _b = locks.acquire(&2).await;
        assert_eq!(locks.len(), 1);
    }
}
