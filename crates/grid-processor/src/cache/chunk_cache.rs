//! LRU cache for decoded GRIB2 messages.

use lru::LruCache;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Cache key for chunks: (source_path_hash, message_offset).
pub type ChunkKey = (u64, u64);

/// Cache statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
    pub memory_bytes: u64,
    pub evictions: u64,
}

impl CacheStats {
    /// Calculate the cache hit rate (0.0 - 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// LRU cache for decoded planes with memory-bounded eviction.
///
/// Entries are shared `Arc`s so a hit never copies the plane.
pub struct ChunkCache {
    cache: LruCache<ChunkKey, Arc<Vec<f32>>>,
    memory_limit: usize,
    current_memory: usize,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

fn plane_size(data: &[f32]) -> usize {
    std::mem::size_of_val(data)
}

impl ChunkCache {
    /// Create a new chunk cache with the given memory limit in bytes.
    pub fn new(memory_limit: usize) -> Self {
        Self {
            cache: LruCache::unbounded(),
            memory_limit,
            current_memory: 0,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Look up a decoded plane, counting the hit or miss.
    pub fn get(&mut self, key: &ChunkKey) -> Option<Arc<Vec<f32>>> {
        if let Some(data) = self.cache.get(key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            Some(Arc::clone(data))
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            None
        }
    }

    /// Insert a decoded plane, evicting least recently used entries to stay
    /// within the memory limit. Planes larger than the limit are not kept.
    pub fn insert(&mut self, key: ChunkKey, data: Arc<Vec<f32>>) {
        let data_size = plane_size(&data);
        if data_size > self.memory_limit {
            return;
        }

        while self.current_memory + data_size > self.memory_limit {
            match self.cache.pop_lru() {
                Some((_, evicted)) => {
                    self.current_memory = self.current_memory.saturating_sub(plane_size(&evicted));
                    self.evictions.fetch_add(1, Ordering::Relaxed);
                }
                None => break,
            }
        }

        if let Some(replaced) = self.cache.put(key, data) {
            self.current_memory = self.current_memory.saturating_sub(plane_size(&replaced));
        }
        self.current_memory += data_size;
    }

    /// Get cache statistics.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: self.cache.len(),
            memory_bytes: self.current_memory as u64,
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }

    /// Clear all entries from the cache.
    pub fn clear(&mut self) {
        self.cache.clear();
        self.current_memory = 0;
    }

    pub fn memory_usage(&self) -> usize {
        self.current_memory
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }
}

/// Stable hash of a source path, used as part of the cache key.
pub fn hash_path(path: &str) -> u64 {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    let mut hasher = DefaultHasher::new();
    path.hash(&mut hasher);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plane(value: f32, len: usize) -> Arc<Vec<f32>> {
        Arc::new(vec![value; len])
    }

    #[test]
    fn test_cache_insert_and_get() {
        let mut cache = ChunkCache::new(1024 * 1024);
        let key = (hash_path("/data/an.grib"), 0);

        assert!(cache.get(&key).is_none());
        cache.insert(key, plane(1.0, 4));
        assert_eq!(cache.get(&key).unwrap().as_slice(), &[1.0; 4]);
    }

    #[test]
    fn test_cache_lru_eviction() {
        // 64 bytes = 16 f32s
        let mut cache = ChunkCache::new(64);

        for i in 0..10u64 {
            cache.insert((0, i * 100), plane(i as f32, 4));
        }

        assert!(cache.get(&(0, 0)).is_none());
        assert!(cache.get(&(0, 900)).is_some());
        assert_eq!(cache.len(), 4);
        assert!(cache.memory_usage() <= 64);
        assert_eq!(cache.stats().evictions, 6);
    }

    #[test]
    fn test_oversized_plane_is_not_cached() {
        let mut cache = ChunkCache::new(8);
        cache.insert((0, 0), plane(0.0, 4));
        assert!(cache.is_empty());
        assert_eq!(cache.memory_usage(), 0);
    }

    #[test]
    fn test_reinsert_does_not_double_count() {
        let mut cache = ChunkCache::new(1024);
        cache.insert((0, 0), plane(0.0, 4));
        cache.insert((0, 0), plane(1.0, 4));
        assert_eq!(cache.memory_usage(), 16);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_cache_stats() {
        let mut cache = ChunkCache::new(1024 * 1024);
        cache.insert((0, 0), plane(1.0, 4));

        cache.get(&(0, 0));
        cache.get(&(0, 1));

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.entries, 1);
        assert_eq!(stats.memory_bytes, 16);
        assert!((stats.hit_rate() - 0.5).abs() < f64::EPSILON);

        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(cache.memory_usage(), 0);
    }

    #[test]
    fn test_hash_path() {
        assert_eq!(hash_path("/data/an.grib"), hash_path("/data/an.grib"));
        assert_ne!(hash_path("/data/an.grib"), hash_path("/data/pl.grib"));
    }
}
