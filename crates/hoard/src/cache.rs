// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The mutex-guarded, byte-accounted cache backing each group.

use hoard_lru::LruCache;
use parking_lot::Mutex;

use crate::ByteView;

/// A point-in-time snapshot of one cache's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Bytes currently held, counting key and value lengths.
    pub bytes: i64,
    /// Number of live entries.
    pub items: u64,
    /// Lookups performed.
    pub gets: u64,
    /// Lookups that found a value.
    pub hits: u64,
    /// Entries evicted over the cache's lifetime.
    pub evictions: u64,
}

/// An LRU of [`ByteView`]s that accounts bytes and optionally evicts to a
/// byte budget.
///
/// The byte count includes both key and value lengths, so the budget bounds
/// real memory, not just payloads. A `max_bytes` of 0 disables the budget;
/// the group engine uses that mode and drives eviction itself across its
/// main/hot pair.
#[derive(Debug)]
pub(crate) struct ByteCache {
    max_bytes: i64,
    state: Mutex<CacheState>,
}

#[derive(Debug, Default)]
struct CacheState {
    lru: Option<LruCache<String, ByteView>>,
    nbytes: i64,
    ngets: u64,
    nhits: u64,
    nevict: u64,
}

impl ByteCache {
    pub(crate) fn new(max_bytes: i64) -> Self {
        Self {
            max_bytes,
            state: Mutex::new(CacheState::default()),
        }
    }

    /// Inserts `value` under `key`, re-accounting a replaced entry, then
    /// evicts oldest entries while over the byte budget.
    pub(crate) fn add(&self, key: &str, value: ByteView) {
        let mut state = self.state.lock();
        let added = (key.len() + value.len()) as i64;

        let lru = state.lru.get_or_insert_with(|| LruCache::new(0));
        let replaced = lru
            .peek(key)
            .map(|old| (key.len() + old.len()) as i64)
            .unwrap_or(0);
        lru.add(key.to_owned(), value);

        state.nbytes += added - replaced;
        // Evict down to the budget, but keep at least one entry: a single
        // value larger than the whole budget is still worth serving.
        while self.max_bytes > 0
            && state.nbytes > self.max_bytes
            && state.lru.as_ref().is_some_and(|lru| lru.len() > 1)
        {
            Self::evict_oldest(&mut state);
        }
    }

    /// Returns the value for `key`, promoting it to most recent.
    pub(crate) fn get(&self, key: &str) -> Option<ByteView> {
        let mut state = self.state.lock();
        state.ngets += 1;
        let hit = state.lru.as_mut().and_then(|lru| lru.get(key)).cloned();
        if hit.is_some() {
            state.nhits += 1;
        }
        hit
    }

    /// Evicts the least recently used entry, if any.
    pub(crate) fn remove_oldest(&self) {
        Self::evict_oldest(&mut self.state.lock());
    }

    /// Bytes currently held.
    pub(crate) fn bytes(&self) -> i64 {
        self.state.lock().nbytes
    }

    /// Number of live entries.
    pub(crate) fn items(&self) -> usize {
        self.state
            .lock()
            .lru
            .as_ref()
            .map(|lru| lru.len())
            .unwrap_or(0)
    }

    pub(crate) fn stats(&self) -> CacheStats {
        let state = self.state.lock();
        CacheStats {
            bytes: state.nbytes,
            items: state.lru.as_ref().map(|lru| lru.len() as u64).unwrap_or(0),
            gets: state.ngets,
            hits: state.nhits,
            evictions: state.nevict,
        }
    }

    fn evict_oldest(state: &mut CacheState) {
        let evicted = state.lru.as_mut().and_then(LruCache::remove_oldest);
        if let Some((key, value)) = evicted {
            state.nbytes -= (key.len() + value.len()) as i64;
            state.nevict += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accounts_key_and_value_bytes() {
        let cache = ByteCache::new(0);
        cache.add("key", ByteView::from("value"));
        assert_eq!(cache.bytes(), 3 + 5);
        cache.add("k2", ByteView::from("v2"));
        assert_eq!(cache.bytes(), 8 + 4);
    }

    #[test]
    fn replacement_reaccounts() {
        let cache = ByteCache::new(0);
        cache.add("key", ByteView::from("short"));
        cache.add("key", ByteView::from("a much longer value"));
        assert_eq!(cache.bytes(), 3 + 19);
        assert_eq!(cache.stats().items, 1);
    }

    #[test]
    fn budget_evicts_oldest_until_within_bound() {
        // Each entry is 3 + 10 = 13 bytes; 100 / 13 = 7 entries fit.
        let cache = ByteCache::new(100);
        for i in 0..20 {
            cache.add(&format!("k{i:02}"), ByteView::from("0123456789"));
        }
        let stats = cache.stats();
        assert_eq!(stats.items, 7);
        assert!(stats.bytes <= 100);
        assert_eq!(stats.evictions, 13);
        // The survivors are the most recently inserted.
        assert!(cache.get("k19").is_some());
        assert!(cache.get("k13").is_some());
        assert!(cache.get("k12").is_none());
    }

    #[test]
    fn zero_budget_never_evicts() {
        let cache = ByteCache::new(0);
        for i in 0..1000 {
            cache.add(&format!("key-{i}"), ByteView::from("x".repeat(100)));
        }
        assert_eq!(cache.stats().items, 1000);
        assert_eq!(cache.stats().evictions, 0);
    }

    #[test]
    fn single_oversized_entry_survives() {
        let cache = ByteCache::new(10);
        cache.add("big", ByteView::from("far larger than the whole budget"));
        // One entry larger than the budget stays; there is nothing older
        // to evict below it.
        assert_eq!(cache.stats().items, 1);
    }

    #[test]
    fn get_tracks_hits_and_promotes() {
        let cache = ByteCache::new(0);
        cache.add("a", ByteView::from("1"));
        assert!(cache.get("a").is_some());
        assert!(cache.get("missing").is_none());
        let stats = cache.stats();
        assert_eq!(stats.gets, 2);
        assert_eq!(stats.hits, 1);
    }

    #[test]
    fn remove_oldest_follows_recency() {
        let cache = ByteCache::new(0);
        cache.add("a", ByteView::from("1"));
        cache.add("b", ByteView::from("2"));
        cache.get("a");
        cache.remove_oldest();
        assert!(cache.get("b").is_none());
        assert!(cache.get("a").is_some());
    }
}
