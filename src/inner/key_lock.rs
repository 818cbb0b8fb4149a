use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::OwnedMutexGuard;
use tracing::trace;

type Store<K> = Arc<Mutex<HashMap<K, Arc<tokio::sync::Mutex<()>>>>>;

/// Serializes async sections per key; entries are dropped once nobody holds or waits for them.
#[derive(Debug)]
pub(crate) struct KeyLock<K> {
    store: Store<K>,
}

impl<K> Default for KeyLock<K> {
    fn default() -> Self {
        Self {
            store: Default::default(),
        }
    }
}

pub(crate) struct KeyLockGuard<K>
where
    K: Hash + Eq,
{
    store: Store<K>,
    key: K,
    _guard: OwnedMutexGuard<()>,
}

impl<K> Drop for KeyLockGuard<K>
where
    K: Hash + Eq,
{
    fn drop(&mut self) {
        let mut store = self.store.lock().unwrap_or_else(PoisonError::into_inner);
        // the store and this guard are the only owners: nobody is waiting
        if store.get(&self.key).map(Arc::strong_count) == Some(2) {
            trace!("Removing released key");
            store.remove(&self.key);
        }
    }
}

impl<K> KeyLock<K>
where
    K: Hash + Eq + Clone,
{
    pub(crate) async fn lock_for(&self, key: K) -> KeyLockGuard<K> {
        let mutex = {
            let mut store = self.store.lock().unwrap_or_else(PoisonError::into_inner);
            store.entry(key.clone()).or_default().clone()
        };

        KeyLockGuard {
            store: self.store.clone(),
            key,
            _guard: mutex.lock_owned().await,
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.store.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::task::JoinSet;

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn serializes_same_key() {
        let lock = Arc::new(KeyLock::<usize>::default());
        let log = Arc::new(Mutex::new(vec![]));

        let mut join_set = JoinSet::new();
        for id in 0..3 {
            let lock = lock.clone();
            let log = log.clone();
            join_set.spawn(async move {
                let _guard = lock.lock_for(1).await;
                log.lock().unwrap().push((id, "enter"));
                tokio::time::sleep(Duration::from_millis(100)).await;
                log.lock().unwrap().push((id, "leave"));
            });
        }

        while let Some(result) = join_set.join_next().await {
            result.unwrap();
        }

        let log = log.lock().unwrap();
        for pair in log.chunks(2) {
            assert_eq!(pair[0].0, pair[1].0);
            assert_eq!((pair[0].1, pair[1].1), ("enter", "leave"));
        }
        assert_eq!(lock.len(), 0);
    }

    #[tokio::test]
    async fn different_keys_do_not_block() {
        let lock = KeyLock::<usize>::default();
        let first = lock.lock_for(1).await;
        let second = lock.lock_for(2).await;
        assert_eq!(lock.len(), 2);
        drop(first);
        drop(second);
        assert_eq!(lock.len(), 0);
    }
}
