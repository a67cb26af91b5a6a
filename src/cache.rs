use parking_lot::Mutex;
use std::collections::HashMap;
use std::hash::Hash;

/// Key/value lookup shared by every request worker.
pub trait KeyValueCache<K, V>: Send + Sync {
    /// Returns a copy of the value, or `None` when the key was never set.
    fn get(&self, key: &K) -> Option<V>;
    /// Inserts or fully replaces the value under `key`.
    fn set(&self, key: K, value: V);
    fn remove(&self, key: &K);
}

/// In-memory map guarded by one coarse lock, held for the whole of each operation.
pub struct Cache<K, V> {
    items: Mutex<HashMap<K, V>>,
}

impl<K, V> Cache<K, V>
where
    K: Eq + Hash,
{
    pub fn new() -> Self {
        Self {
            items: Mutex::new(HashMap::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }
}

impl<K, V> Default for Cache<K, V>
where
    K: Eq + Hash,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> KeyValueCache<K, V> for Cache<K, V>
where
    K: Eq + Hash + Send,
    V: Clone + Send,
{
    fn get(&self, key: &K) -> Option<V> {
        self.items.lock().get(key).cloned()
    }

    fn set(&self, key: K, value: V) {
        self.items.lock().insert(key, value);
    }

    fn remove(&self, key: &K) {
        self.items.lock().remove(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[derive(Debug, Clone, PartialEq)]
    struct User {
        name: String,
        age: u32,
    }

    #[test]
    fn set_then_get_returns_value() {
        let cache: Cache<String, User> = Cache::new();
        cache.set(
            "user1".to_string(),
            User {
                name: "christian".into(),
                age: 20,
            },
        );

        let got = cache.get(&"user1".to_string()).expect("cached user");
        assert_eq!(got.name, "christian");
        assert_eq!(got.age, 20);
    }

    #[test]
    fn missing_key_is_not_found() {
        let cache: Cache<&'static str, i64> = Cache::new();
        assert_eq!(cache.get(&"nope"), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn set_replaces_without_merging() {
        let cache: Cache<u8, Vec<i32>> = Cache::new();
        cache.set(1, vec![1, 2, 3]);
        cache.set(1, vec![9]);
        assert_eq!(cache.get(&1), Some(vec![9]));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn remove_drops_entry_and_tolerates_absent_keys() {
        let cache: Cache<u8, u8> = Cache::new();
        cache.set(7, 70);
        cache.remove(&7);
        cache.remove(&7);
        assert_eq!(cache.get(&7), None);
    }

    #[test]
    fn concurrent_writers_leave_one_consistent_value() {
        let cache: Arc<Cache<&'static str, usize>> = Arc::new(Cache::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let cache = Arc::clone(&cache);
                thread::spawn(move || {
                    for _ in 0..200 {
                        cache.set("slot", i);
                        let seen = cache.get(&"slot").expect("slot present");
                        assert!(seen < 8);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().expect("writer thread");
        }
        let last = cache.get(&"slot").expect("slot present");
        assert!(last < 8);
        assert_eq!(cache.len(), 1);
    }
}
