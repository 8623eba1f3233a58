//! In-process mutual exclusion keyed by resource.
//!
//! Callers racing on the same key inside one process queue here (FIFO)
//! before they ever touch the cross-process file lock. This gives no
//! durability and no protection against other processes.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};

use once_cell::sync::Lazy;

static GLOBAL: Lazy<Arc<LockManager>> = Lazy::new(|| Arc::new(LockManager::new()));

/// A single async mutex that runs one closure at a time, in request order.
#[derive(Debug, Default)]
pub struct AsyncLock {
    // tokio's Mutex hands the lock to waiters in the order they queued
    inner: tokio::sync::Mutex<()>,
}

impl AsyncLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` with the lock held; the lock is released when its future
    /// completes, errors, or is dropped.
    pub async fn run_exclusive<F, Fut, T>(&self, f: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let _guard = self.inner.lock().await;
        f().await
    }

    pub fn is_locked(&self) -> bool {
        self.inner.try_lock().is_err()
    }
}

/// Registry of [`AsyncLock`]s, created lazily per key and never evicted.
#[derive(Debug, Default)]
pub struct LockManager {
    locks: Mutex<HashMap<String, Arc<AsyncLock>>>,
}

impl LockManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide manager shared by every client in this process.
    pub fn global() -> Arc<LockManager> {
        GLOBAL.clone()
    }

    pub fn lock_for(&self, key: &str) -> Arc<AsyncLock> {
        let mut locks = self.locks.lock().unwrap();
        locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(AsyncLock::new()))
            .clone()
    }

    pub async fn run_exclusive<F, Fut, T>(&self, key: &str, f: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let lock = self.lock_for(key);
        lock.run_exclusive(f).await
    }

    /// Number of keys seen so far
    pub fn len(&self) -> usize {
        self.locks.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_waiters_run_in_request_order() {
        let manager = Arc::new(LockManager::new());
        let order = Arc::new(Mutex::new(Vec::new()));
        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();

        let holder = {
            let manager = manager.clone();
            tokio::spawn(async move {
                manager
                    .run_exclusive("room", || async move {
                        let _ = release_rx.await;
                    })
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        let mut waiters = Vec::new();
        for i in 0..5 {
            let manager = manager.clone();
            let order = order.clone();
            waiters.push(tokio::spawn(async move {
                manager
                    .run_exclusive("room", || async move {
                        order.lock().unwrap().push(i);
                    })
                    .await
            }));
            // let each waiter enqueue before the next one is spawned
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        release_tx.send(()).unwrap();
        holder.await.unwrap();
        for w in waiters {
            w.await.unwrap();
        }
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_same_key_never_overlaps() {
        let manager = Arc::new(LockManager::new());
        let inside = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let mut tasks = Vec::new();
        for _ in 0..20 {
            let manager = manager.clone();
            let inside = inside.clone();
            let max_seen = max_seen.clone();
            tasks.push(tokio::spawn(async move {
                manager
                    .run_exclusive("k", || async move {
                        let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                        max_seen.fetch_max(now, Ordering::SeqCst);
                        tokio::task::yield_now().await;
                        inside.fetch_sub(1, Ordering::SeqCst);
                    })
                    .await
            }));
        }
        for t in tasks {
            t.await.unwrap();
        }
        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_different_keys_do_not_block() {
        let manager = LockManager::new();
        let a = manager.lock_for("a");
        let _held = a.inner.lock().await;
        assert!(a.is_locked());

        let result = tokio::time::timeout(
            Duration::from_millis(200),
            manager.run_exclusive("b", || async { 7 }),
        )
        .await;
        assert_eq!(result.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_lock_released_after_error() {
        let manager = LockManager::new();
        let failed: Result<(), &str> = manager.run_exclusive("k", || async { Err("boom") }).await;
        assert!(failed.is_err());
        assert!(!manager.lock_for("k").is_locked());
    }

    #[test]
    fn test_registry_reuses_locks() {
        let manager = LockManager::new();
        let first = manager.lock_for("k");
        let second = manager.lock_for("k");
        assert!(Arc::ptr_eq(&first, &second));
        manager.lock_for("other");
        assert_eq!(manager.len(), 2);
    }
}
