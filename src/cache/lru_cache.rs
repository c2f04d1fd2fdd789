use dashmap::DashMap;
use std::{
    hash::Hash,
    sync::Arc,
    time::{Duration, Instant},
};
use tracing::debug;

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    inserted_at: Instant,
    last_access: Instant,
}

impl<V> CacheEntry<V> {
    fn new(value: V, now: Instant) -> Self {
        Self {
            value,
            inserted_at: now,
            last_access: now,
        }
    }

    fn is_expired(&self, ttl: Duration, now: Instant) -> bool {
        now.saturating_duration_since(self.inserted_at) >= ttl
    }
}

/// Cache concurrente con TTL y capacidad acotada.
///
/// Al superar la capacidad se expulsa la entrada con el acceso más antiguo.
#[derive(Debug)]
pub struct TtlCache<K: Clone + Eq + Hash, V> {
    data: Arc<DashMap<K, CacheEntry<V>>>,
    capacity: usize,
    ttl: Duration,
}

impl<K, V> TtlCache<K, V>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            data: Arc::new(DashMap::new()),
            capacity: capacity.max(1),
            ttl,
        }
    }

    pub fn insert(&self, key: K, value: V) -> Option<V> {
        self.insert_at(key, value, Instant::now())
    }

    fn insert_at(&self, key: K, value: V, now: Instant) -> Option<V> {
        if !self.data.contains_key(&key) && self.data.len() >= self.capacity {
            self.cleanup_expired_at(now);
            if self.data.len() >= self.capacity {
                self.evict_oldest();
            }
        }
        self.data
            .insert(key, CacheEntry::new(value, now))
            .map(|old| old.value)
    }

    pub fn get(&self, key: &K) -> Option<V> {
        self.get_at(key, Instant::now())
    }

    fn get_at(&self, key: &K, now: Instant) -> Option<V> {
        let mut entry = self.data.get_mut(key)?;
        if entry.is_expired(self.ttl, now) {
            drop(entry);
            self.data.remove(key);
            return None;
        }
        entry.last_access = now;
        Some(entry.value.clone())
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Limpia entradas expiradas y retorna el número de elementos removidos
    pub fn cleanup_expired(&self) -> usize {
        self.cleanup_expired_at(Instant::now())
    }

    fn cleanup_expired_at(&self, now: Instant) -> usize {
        let before = self.data.len();
        self.data.retain(|_, entry| !entry.is_expired(self.ttl, now));
        let removed = before.saturating_sub(self.data.len());

        if removed > 0 {
            debug!("Limpiadas {} entradas expiradas del cache", removed);
        }

        removed
    }

    fn evict_oldest(&self) {
        let oldest = self
            .data
            .iter()
            .min_by_key(|entry| entry.value().last_access)
            .map(|entry| entry.key().clone());

        if let Some(key) = oldest {
            self.data.remove(&key);
        }
    }
}

impl<K, V> Clone for TtlCache<K, V>
where
    K: Clone + Eq + Hash,
    V: Clone,
{
    fn clone(&self) -> Self {
        Self {
            data: self.data.clone(),
            capacity: self.capacity,
            ttl: self.ttl,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entries_expire_after_ttl() {
        let cache = TtlCache::new(10, Duration::from_secs(60));
        let start = Instant::now();
        cache.insert_at("a", 1, start);

        assert_eq!(cache.get_at(&"a", start + Duration::from_secs(30)), Some(1));
        assert_eq!(cache.get_at(&"a", start + Duration::from_secs(61)), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_capacity_evicts_least_recently_used() {
        let cache = TtlCache::new(2, Duration::from_secs(600));
        let start = Instant::now();
        cache.insert_at("a", 1, start);
        cache.insert_at("b", 2, start + Duration::from_secs(1));

        // "a" se usa de nuevo, así que "b" queda como la más antigua
        cache.get_at(&"a", start + Duration::from_secs(2));
        cache.insert_at("c", 3, start + Duration::from_secs(3));

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get_at(&"b", start + Duration::from_secs(4)), None);
        assert_eq!(cache.get_at(&"a", start + Duration::from_secs(4)), Some(1));
        assert_eq!(cache.get_at(&"c", start + Duration::from_secs(4)), Some(3));
    }

    #[test]
    fn test_expired_entries_are_dropped_before_evicting() {
        let cache = TtlCache::new(2, Duration::from_secs(10));
        let start = Instant::now();
        cache.insert_at("old", 1, start);
        cache.insert_at("fresh", 2, start + Duration::from_secs(8));

        cache.insert_at("new", 3, start + Duration::from_secs(12));
        assert_eq!(cache.get_at(&"fresh", start + Duration::from_secs(12)), Some(2));
        assert_eq!(cache.get_at(&"new", start + Duration::from_secs(12)), Some(3));
    }
}
