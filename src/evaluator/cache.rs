//! Memoization of parsed statement forms.
//!
//! Evaluators see the same statement text over and over (a caller polling
//! `x * 2`, say). `HandleCache` keeps the parsed form of each distinct source
//! so it is only built once. It belongs to one evaluator instance; there is no
//! process-wide cache.
//!
//! Only successful constructions are stored. A source that failed to parse
//! is parsed again next time, so a fix to the evaluator's state (a variable
//! defined later, for example) is never masked.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::hash::Hash;

/// Entries kept before the cache starts over.
pub const DEFAULT_CACHE_CAPACITY: usize = 1024;

/// A bounded map from source keys to built handles.
#[derive(Debug)]
pub struct HandleCache<K, V> {
    entries: HashMap<K, V>,
    capacity: usize,
    hits: u64,
    misses: u64,
}

impl<K: Eq + Hash, V> Default for HandleCache<K, V> {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CACHE_CAPACITY)
    }
}

impl<K: Eq + Hash, V> HandleCache<K, V> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a cache holding at most `capacity` entries.
    ///
    /// When full, the next insertion clears the cache first.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: HashMap::new(),
            capacity: capacity.max(1),
            hits: 0,
            misses: 0,
        }
    }

    /// Returns the handle for `key`, building it with `make` on a miss.
    ///
    /// If `make` fails nothing is stored and the error is returned.
    pub fn get_or_try_insert_with<F, E>(&mut self, key: K, make: F) -> Result<&V, E>
    where
        F: FnOnce(&K) -> Result<V, E>,
    {
        if !self.entries.contains_key(&key) && self.entries.len() >= self.capacity {
            self.entries.clear();
        }

        match self.entries.entry(key) {
            Entry::Occupied(entry) => {
                self.hits += 1;
                Ok(entry.into_mut())
            }
            Entry::Vacant(entry) => {
                self.misses += 1;
                let handle = make(entry.key())?;
                Ok(entry.insert(handle))
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drops every entry. Hit and miss counters are kept.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.entries.len(),
            hits: self.hits,
            misses: self.misses,
        }
    }
}

/// Cache statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    /// Handles currently stored
    pub entries: usize,
    /// Lookups answered from the cache
    pub hits: u64,
    /// Lookups that had to build a handle
    pub misses: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builds_once() {
        let mut cache: HandleCache<String, usize> = HandleCache::new();
        let mut builds = 0;

        for _ in 0..3 {
            let value = cache
                .get_or_try_insert_with("abc".to_string(), |key| {
                    builds += 1;
                    Ok::<_, ()>(key.len())
                })
                .unwrap();
            assert_eq!(*value, 3);
        }

        assert_eq!(builds, 1);
        assert_eq!(
            cache.stats(),
            CacheStats {
                entries: 1,
                hits: 2,
                misses: 1
            }
        );
    }

    #[test]
    fn test_failures_not_cached() {
        let mut cache: HandleCache<&str, u32> = HandleCache::new();

        let result = cache.get_or_try_insert_with("x", |_| Err("bad"));
        assert_eq!(result, Err("bad"));
        assert!(cache.is_empty());

        let result = cache.get_or_try_insert_with("x", |_| Ok::<_, &str>(7));
        assert_eq!(result, Ok(&7));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_capacity_resets() {
        let mut cache: HandleCache<u32, u32> = HandleCache::with_capacity(2);

        for key in 0..2 {
            cache.get_or_try_insert_with(key, |k| Ok::<_, ()>(*k)).unwrap();
        }
        assert_eq!(cache.len(), 2);

        // Existing key: no reset
        cache.get_or_try_insert_with(1, |k| Ok::<_, ()>(*k)).unwrap();
        assert_eq!(cache.len(), 2);

        cache.get_or_try_insert_with(2, |k| Ok::<_, ()>(*k)).unwrap();
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_clear() {
        let mut cache: HandleCache<u32, u32> = HandleCache::new();
        cache.get_or_try_insert_with(1, |k| Ok::<_, ()>(*k)).unwrap();
        cache.clear();

        assert!(cache.is_empty());
        assert_eq!(cache.stats().misses, 1);
    }
}
