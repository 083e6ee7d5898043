//! Per-path single-flight mutual exclusion.
//!
//! The registry itself is only ever held for the instant needed to look up or
//! insert an `Arc<Mutex<()>>`; the actual critical section is the caller
//! holding that per-path lock, never the registry's own shard lock, so
//! unrelated paths never convoy behind one another.

use dashmap::DashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Hands out one `tokio::sync::Mutex` per distinct path, created on first request.
#[derive(Default)]
pub struct LockRegistry {
    locks: DashMap<PathBuf, Arc<Mutex<()>>>,
}

impl LockRegistry {
    pub fn new() -> Self {
        Self { locks: DashMap::new() }
    }

    fn lock_for(&self, path: &PathBuf) -> Arc<Mutex<()>> {
        Arc::clone(self.locks.entry(path.clone()).or_insert_with(|| Arc::new(Mutex::new(()))).value())
    }

    /// Acquire the lock for `path`, blocking concurrent callers for the same path
    /// until the returned guard is dropped.
    pub async fn acquire(&self, path: &PathBuf) -> OwnedPathGuard {
        let lock = self.lock_for(path);
        let guard = lock.lock_owned().await;
        OwnedPathGuard { _guard: guard, _lock: lock }
    }

    /// Number of distinct paths with a live (or recently live) lock entry.
    pub fn len(&self) -> usize {
        self.locks.len()
    }
}

/// Held while a caller has exclusive access to one path's extraction slot.
pub struct OwnedPathGuard {
    _guard: tokio::sync::OwnedMutexGuard<()>,
    _lock: Arc<Mutex<()>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn same_path_serializes_concurrent_callers() {
        let registry = Arc::new(LockRegistry::new());
        let counter = Arc::new(AtomicUsize::new(0));
        let max_concurrent = Arc::new(AtomicUsize::new(0));
        let path = PathBuf::from("/data/a.pdf");

        let mut tasks = Vec::new();
        for _ in 0..10 {
            let registry = Arc::clone(&registry);
            let counter = Arc::clone(&counter);
            let max_concurrent = Arc::clone(&max_concurrent);
            let path = path.clone();
            tasks.push(tokio::spawn(async move {
                let _guard = registry.acquire(&path).await;
                let now = counter.fetch_add(1, Ordering::SeqCst) + 1;
                max_concurrent.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                counter.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for t in tasks {
            t.await.unwrap();
        }

        assert_eq!(max_concurrent.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn distinct_paths_do_not_block_each_other() {
        let registry = Arc::new(LockRegistry::new());
        let path_a = PathBuf::from("/data/a.pdf");
        let path_b = PathBuf::from("/data/b.pdf");

        let guard_a = registry.acquire(&path_a).await;
        // Should not deadlock: different path, independent lock.
        let guard_b = tokio::time::timeout(Duration::from_millis(200), registry.acquire(&path_b))
            .await
            .expect("acquiring a distinct path's lock must not block");

        drop(guard_a);
        drop(guard_b);
    }

    #[tokio::test]
    async fn registry_lookup_creates_exactly_one_entry_per_path() {
        let registry = LockRegistry::new();
        let path = PathBuf::from("/data/a.pdf");
        let _g1 = registry.acquire(&path).await;
        drop(_g1);
        let _g2 = registry.acquire(&path).await;
        assert_eq!(registry.len(), 1);
    }
}
