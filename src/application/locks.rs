use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Per-key mutual exclusion for atomic units.
///
/// The account row is the unit of exclusion: conflicting units on the same
/// key queue up on one async mutex while unrelated keys never contend.
/// Lock cells are created lazily and kept for the lifetime of the map.
pub struct LockMap<K> {
    cells: Mutex<HashMap<K, Arc<AsyncMutex<()>>>>,
}

impl<K> LockMap<K>
where
    K: Eq + Hash + Ord + Clone,
{
    pub fn new() -> Self {
        Self {
            cells: Mutex::new(HashMap::new()),
        }
    }

    fn cell(&self, key: &K) -> Arc<AsyncMutex<()>> {
        let mut cells = self.cells.lock().unwrap_or_else(|e| e.into_inner());
        cells
            .entry(key.clone())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    /// Suspends until the key's unit scope is free.
    pub async fn acquire(&self, key: K) -> OwnedMutexGuard<()> {
        self.cell(&key).lock_owned().await
    }

    /// Locks two distinct keys in `Ord` order, so concurrent two-account
    /// units (transfers) cannot deadlock.
    pub async fn acquire_pair(
        &self,
        a: K,
        b: K,
    ) -> (OwnedMutexGuard<()>, OwnedMutexGuard<()>) {
        debug_assert!(a != b);
        if a < b {
            let first = self.cell(&a).lock_owned().await;
            let second = self.cell(&b).lock_owned().await;
            (first, second)
        } else {
            let first = self.cell(&b).lock_owned().await;
            let second = self.cell(&a).lock_owned().await;
            (first, second)
        }
    }
}

impl<K> Default for LockMap<K>
where
    K: Eq + Hash + Ord + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn same_key_serializes() {
        let locks = Arc::new(LockMap::new());
        let max_inside = Arc::new(AtomicU32::new(0));
        let inside = Arc::new(AtomicU32::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let locks = locks.clone();
            let inside = inside.clone();
            let max_inside = max_inside.clone();
            handles.push(tokio::spawn(async move {
                let _guard = locks.acquire(1u64).await;
                let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                max_inside.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(2)).await;
                inside.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(max_inside.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn pair_acquisition_is_deadlock_free() {
        let locks = Arc::new(LockMap::new());
        let mut handles = Vec::new();
        // Half the tasks lock (1, 2), the other half (2, 1).
        for i in 0..10u64 {
            let locks = locks.clone();
            handles.push(tokio::spawn(async move {
                let (a, b) = if i % 2 == 0 { (1u64, 2u64) } else { (2u64, 1u64) };
                let _guards = locks.acquire_pair(a, b).await;
                tokio::task::yield_now().await;
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
    }

    #[tokio::test]
    async fn distinct_keys_do_not_block() {
        let locks = LockMap::new();
        let _one = locks.acquire(1u64).await;
        // Would hang if key 2 shared key 1's lock.
        let _two = locks.acquire(2u64).await;
    }
}
