use std::collections::HashMap;
use std::hash::Hash;

use super::Result;

/// Memoizes native objects by the state they were built from.
pub struct ObjectCache<K, V> {
    entries: HashMap<K, V>,
    created: u64,
}

impl<K, V> Default for ObjectCache<K, V> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
            created: 0,
        }
    }
}

impl<K: Hash + Eq + Clone, V> ObjectCache<K, V> {
    pub fn get(&self, key: &K) -> Option<&V> {
        self.entries.get(key)
    }

    /// Returns the cached object for `key`, building it on first use.
    pub fn get_or_create<F>(&mut self, key: &K, create: F) -> Result<&V>
    where
        F: FnOnce(&K) -> Result<V>,
    {
        if !self.entries.contains_key(key) {
            let value = create(key)?;
            self.created += 1;
            self.entries.insert(key.clone(), value);
        }
        // Present by construction.
        Ok(&self.entries[key])
    }

    /// Removes and returns every entry matching `pred`.
    pub fn evict_where<P>(&mut self, mut pred: P) -> Vec<V>
    where
        P: FnMut(&K) -> bool,
    {
        let keys: Vec<K> = self.entries.keys().filter(|k| pred(k)).cloned().collect();
        keys.into_iter()
            .filter_map(|k| self.entries.remove(&k))
            .collect()
    }

    pub fn drain(&mut self) -> Vec<V> {
        self.entries.drain().map(|(_, v)| v).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Objects built over the cache's lifetime.
    pub fn created(&self) -> u64 {
        self.created
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::GPUError;

    #[test]
    fn creates_once_per_key() {
        let mut cache: ObjectCache<u32, String> = ObjectCache::default();
        let mut calls = 0;
        for _ in 0..3 {
            let v = cache
                .get_or_create(&7, |k| {
                    calls += 1;
                    Ok(format!("obj{}", k))
                })
                .unwrap();
            assert_eq!(v, "obj7");
        }
        assert_eq!(calls, 1);
        assert_eq!(cache.created(), 1);
    }

    #[test]
    fn failed_creation_is_not_cached() {
        let mut cache: ObjectCache<u32, u32> = ObjectCache::default();
        assert!(cache
            .get_or_create(&1, |_| Err(GPUError::OutOfMemory))
            .is_err());
        assert!(cache.is_empty());
        assert_eq!(*cache.get_or_create(&1, |_| Ok(5)).unwrap(), 5);
    }

    #[test]
    fn eviction_by_predicate() {
        let mut cache: ObjectCache<(u32, u32), u32> = ObjectCache::default();
        for shader in 0..2 {
            for variant in 0..3 {
                cache.get_or_create(&(shader, variant), |_| Ok(shader * 10 + variant)).unwrap();
            }
        }
        let mut evicted = cache.evict_where(|(shader, _)| *shader == 1);
        evicted.sort();
        assert_eq!(evicted, vec![10, 11, 12]);
        assert_eq!(cache.len(), 3);
    }
}
