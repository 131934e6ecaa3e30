use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

struct CacheEntry<V> {
    value: V,
    expires_at: Instant,
    last_used: Instant,
}

/// A keyed, TTL-bounded, get-or-compute store shielding expensive or
/// rate-limited upstream reads.
///
/// TTL expiry is lazy (checked on read); a bounded-capacity LRU policy caps
/// memory. Concurrent misses for the same key may each invoke the fallback;
/// single-flight coalescing is deliberately not provided.
pub struct Cache<K, V> {
    entries: Mutex<HashMap<K, CacheEntry<V>>>,
    ttl: Duration,
    capacity: usize,
}

impl<K, V> Cache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
            capacity: capacity.max(1),
        }
    }

    /// Returns the cached value if present and unexpired, otherwise invokes
    /// `fallback`, stores the result with the configured TTL, and returns it.
    pub async fn get_or_compute<F, Fut, E>(&self, key: K, fallback: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        if let Some(hit) = self.get(&key) {
            return Ok(hit);
        }
        let value = fallback().await?;
        self.insert(key, value.clone());
        Ok(value)
    }

    /// Returns an unexpired value, evicting the entry if its TTL has passed.
    pub fn get(&self, key: &K) -> Option<V> {
        let mut entries = self.entries.lock();
        let now = Instant::now();
        match entries.get_mut(key) {
            Some(entry) if entry.expires_at > now => {
                entry.last_used = now;
                Some(entry.value.clone())
            }
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    pub fn insert(&self, key: K, value: V) {
        let mut entries = self.entries.lock();
        let now = Instant::now();
        if entries.len() >= self.capacity && !entries.contains_key(&key) {
            // Expired entries go first; only then is a live entry sacrificed.
            entries.retain(|_, entry| entry.expires_at > now);
            if entries.len() >= self.capacity {
                let lru = entries
                    .iter()
                    .min_by_key(|(_, entry)| entry.last_used)
                    .map(|(key, _)| key.clone());
                if let Some(lru) = lru {
                    entries.remove(&lru);
                }
            }
        }
        entries.insert(
            key,
            CacheEntry {
                value,
                expires_at: now + self.ttl,
                last_used: now,
            },
        );
    }

    pub fn invalidate(&self, key: &K) {
        self.entries.lock().remove(key);
    }

    pub fn invalidate_all(&self) {
        self.entries.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}
