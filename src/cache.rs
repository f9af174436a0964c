//! Advisory decode cache: callers that repeatedly decode the same canonical
//! byte sequence (e.g. a hot index key) can keep a bounded LRU of already
//! decoded [`AbV`]s keyed by their bytes, avoiding repeated partition/
//! segment/token walks. Purely advisory — nothing in this crate requires a
//! cache to be present or consulted; a cache miss just means "decode it".

use crate::abv::AbV;
use std::collections::{HashMap, VecDeque};

pub struct AbvCache {
    capacity: usize,
    order: VecDeque<Vec<u8>>,
    entries: HashMap<Vec<u8>, AbV>,
}

impl AbvCache {
    /// `capacity` is the maximum number of entries retained; `0` disables
    /// caching (every `get` misses, every `put` is a no-op).
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity,
            order: VecDeque::with_capacity(capacity),
            entries: HashMap::with_capacity(capacity),
        }
    }

    /// Look up a previously cached decode, without affecting recency.
    pub fn cache_get(&self, key: &[u8]) -> Option<&AbV> {
        self.entries.get(key)
    }

    /// Insert a decoded value, evicting the least recently inserted entry
    /// if at capacity. Overwrites an existing entry for the same key.
    pub fn cache_put(&mut self, key: Vec<u8>, value: AbV) {
        if self.capacity == 0 {
            return;
        }
        if !self.entries.contains_key(&key) {
            if self.order.len() >= self.capacity {
                if let Some(oldest) = self.order.pop_front() {
                    self.entries.remove(&oldest);
                }
            }
            self.order.push_back(key.clone());
        }
        self.entries.insert(key, value);
    }

    /// Adopt a value the caller already owns (e.g. just built with
    /// `AbV::from_sorted_ids`) under its canonical encoding, without
    /// re-deriving the bytes from a decode. Returns the bytes used as the
    /// key so the caller can reuse them.
    pub fn cache_adopt(&mut self, value: AbV) -> crate::error::Result<Vec<u8>> {
        let key = value.encode()?;
        self.cache_put(key.clone(), value);
        Ok(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() {
        crate::init().unwrap();
    }

    #[test]
    fn put_then_get_hits() {
        setup();
        let mut cache = AbvCache::with_capacity(4);
        let abv = AbV::from_sorted_ids(&[1, 2, 3]).unwrap();
        let key = abv.encode().unwrap();
        cache.cache_put(key.clone(), abv.clone());
        assert_eq!(cache.cache_get(&key), Some(&abv));
    }

    #[test]
    fn zero_capacity_never_caches() {
        setup();
        let mut cache = AbvCache::with_capacity(0);
        let abv = AbV::from_sorted_ids(&[1]).unwrap();
        let key = abv.encode().unwrap();
        cache.cache_put(key.clone(), abv);
        assert!(cache.is_empty());
        assert!(cache.cache_get(&key).is_none());
    }

    #[test]
    fn eviction_drops_oldest() {
        setup();
        let mut cache = AbvCache::with_capacity(2);
        let a = AbV::from_sorted_ids(&[1]).unwrap();
        let b = AbV::from_sorted_ids(&[2]).unwrap();
        let c = AbV::from_sorted_ids(&[3]).unwrap();
        let ka = cache.cache_adopt(a).unwrap();
        let _kb = cache.cache_adopt(b).unwrap();
        let _kc = cache.cache_adopt(c).unwrap();
        assert_eq!(cache.len(), 2);
        assert!(cache.cache_get(&ka).is_none());
    }
}
