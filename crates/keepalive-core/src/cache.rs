use parking_lot::Mutex;
use std::collections::HashMap;
use std::hash::Hash;
use std::time::{Duration, Instant};

struct Entry<V> {
    value: V,
    inserted_at: Instant,
}

/// Capacity-bounded key/value cache whose entries expire after a fixed TTL.
///
/// When full, expired entries are pruned first and then the oldest entry is
/// evicted to make room.
pub struct TtlCache<K, V> {
    ttl: Duration,
    capacity: usize,
    entries: Mutex<HashMap<K, Entry<V>>>,
}

impl<K: Eq + Hash + Clone, V: Clone> TtlCache<K, V> {
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            ttl,
            capacity: capacity.max(1),
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn get(&self, key: &K) -> Option<V> {
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some(entry) if entry.inserted_at.elapsed() < self.ttl => Some(entry.value.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    pub fn set(&self, key: K, value: V) {
        let mut entries = self.entries.lock();
        if !entries.contains_key(&key) && entries.len() >= self.capacity {
            let ttl = self.ttl;
            entries.retain(|_, e| e.inserted_at.elapsed() < ttl);

            if entries.len() >= self.capacity {
                let oldest = entries
                    .iter()
                    .min_by_key(|(_, e)| e.inserted_at)
                    .map(|(k, _)| k.clone());
                if let Some(oldest) = oldest {
                    entries.remove(&oldest);
                }
            }
        }
        entries.insert(key, Entry { value, inserted_at: Instant::now() });
    }

    pub fn invalidate(&self, key: &K) {
        self.entries.lock().remove(key);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_then_get() {
        let cache = TtlCache::new(Duration::from_secs(60), 4);
        cache.set(1, "a");
        assert_eq!(cache.get(&1), Some("a"));
        assert_eq!(cache.get(&2), None);
    }

    #[test]
    fn expired_entries_are_dropped() {
        let cache = TtlCache::new(Duration::ZERO, 4);
        cache.set(1, "a");
        assert_eq!(cache.get(&1), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn oldest_entry_is_evicted_at_capacity() {
        let cache = TtlCache::new(Duration::from_secs(60), 2);
        cache.set(1, "a");
        std::thread::sleep(Duration::from_millis(2));
        cache.set(2, "b");
        cache.set(3, "c");
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get(&1), None);
        assert_eq!(cache.get(&3), Some("c"));
    }

    #[test]
    fn overwrite_does_not_evict() {
        let cache = TtlCache::new(Duration::from_secs(60), 2);
        cache.set(1, "a");
        cache.set(2, "b");
        cache.set(2, "bb");
        assert_eq!(cache.get(&1), Some("a"));
        assert_eq!(cache.get(&2), Some("bb"));
    }

    #[test]
    fn invalidate_removes_key() {
        let cache = TtlCache::new(Duration::from_secs(60), 2);
        cache.set("k", 1);
        cache.invalidate(&"k");
        assert_eq!(cache.get(&"k"), None);
    }
}
