use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::hash::Hash;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

/// Lets through at most one event per key within `period`.
pub(crate) struct DebounceLimiter<K> {
    store: Mutex<HashMap<K, Instant>>,
    period: Duration,
    purge_probability: f64,
}

impl<K> DebounceLimiter<K>
where
    K: Hash + Eq + Clone,
{
    pub(crate) fn new(period: Duration) -> Self {
        Self {
            store: Default::default(),
            period,
            purge_probability: 0.1,
        }
    }

    /// Returns `true` when the event must be dropped.
    pub(crate) async fn throttle(&self, key: K) -> bool {
        let now = Instant::now();
        let mut store = self.store.lock().await;
        if rand::random::<f64>() < self.purge_probability {
            store.retain(|_, last| now.saturating_duration_since(*last) < self.period);
        }

        match store.entry(key) {
            Entry::Occupied(mut entry) => {
                if now.saturating_duration_since(*entry.get()) < self.period {
                    true
                } else {
                    entry.insert(now);
                    false
                }
            }
            Entry::Vacant(entry) => {
                entry.insert(now);
                false
            }
        }
    }
}
