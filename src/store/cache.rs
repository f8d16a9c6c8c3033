use crate::store::error::StoreError;
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use log::{debug, info};
use lru::LruCache;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::num::NonZeroUsize;

type SharedLoad<V> = Shared<BoxFuture<'static, Result<V, StoreError>>>;

/// Item-count bounded LRU cache whose concurrent misses on one key share a single load.
pub struct BoundedCache<K, V> {
    name: &'static str,
    entries: Mutex<LruCache<K, V>>,
    in_flight: Mutex<HashMap<K, SharedLoad<V>>>,
}

impl<K, V> BoundedCache<K, V>
where
    K: Hash + Eq + Clone + Debug + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// A capacity of 0 is treated as 1.
    pub fn new(name: &'static str, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);

        Self {
            name,
            entries: Mutex::new(LruCache::new(capacity)),
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn capacity(&self) -> usize {
        self.entries.lock().cap().get()
    }

    /// Looks a key up and marks it most recently used.
    pub fn get(&self, key: &K) -> Option<V> {
        self.entries.lock().get(key).cloned()
    }

    pub fn contains(&self, key: &K) -> bool {
        self.entries.lock().contains(key)
    }

    pub fn insert(&self, key: K, value: V) {
        let evicted = self.entries.lock().push(key.clone(), value);

        if let Some((evicted_key, _)) = evicted
            && evicted_key != key
        {
            info!("Evicted {:?} from the {} cache", evicted_key, self.name);
        }
    }

    /// Returns the cached value or runs `load`, sharing it with every concurrent caller of the
    /// same key. Only successful loads are cached.
    pub async fn get_or_load<F>(&self, key: K, load: F) -> Result<V, StoreError>
    where
        F: Future<Output = Result<V, StoreError>> + Send + 'static,
    {
        if let Some(value) = self.get(&key) {
            debug!("{} cache hit for {:?}", self.name, key);
            return Ok(value);
        }

        let shared = {
            let mut in_flight = self.in_flight.lock();

            // A load may have finished between the lookup above and taking the lock
            if let Some(value) = self.get(&key) {
                return Ok(value);
            }

            in_flight
                .entry(key.clone())
                .or_insert_with(|| {
                    debug!("{} cache miss for {:?}", self.name, key);
                    load.boxed().shared()
                })
                .clone()
        };

        let result = shared.clone().await;

        // The first waiter to finish retires its own load and publishes the value. A newer load
        // of the same key, started after this one failed, stays in flight.
        let mut in_flight = self.in_flight.lock();
        if in_flight
            .get(&key)
            .is_some_and(|current| current.ptr_eq(&shared))
        {
            in_flight.remove(&key);
            if let Ok(value) = &result {
                self.insert(key, value.clone());
            }
        }

        result
    }
}
