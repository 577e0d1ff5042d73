// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! A bounded, insertion-ordered map with recency promotion.
//!
//! [`LruCache`] keeps its entries in true access-recency order: every `add`
//! and `get` moves the touched entry to the most-recent end, and when a
//! capacity bound is configured the least-recent entry is evicted. The
//! recency list is an arena of index-linked slots (no pointer juggling, no
//! `unsafe`), with a `HashMap` from key to slot index for O(1) access.
//!
//! The cache performs no internal locking; callers serialize access.
//!
//! # Examples
//!
//! ```
//! use hoard_lru::LruCache;
//!
//! let mut cache = LruCache::new(2);
//! cache.add("a", 1);
//! cache.add("b", 2);
//! cache.get(&"a");
//! cache.add("c", 3); // evicts "b", the least recently used
//!
//! assert_eq!(cache.get(&"a"), Some(&1));
//! assert_eq!(cache.get(&"b"), None);
//! assert_eq!(cache.get(&"c"), Some(&3));
//! ```

use std::{
    borrow::Borrow,
    collections::HashMap,
    hash::Hash,
};

const NIL: usize = usize::MAX;

struct Entry<K, V> {
    key: K,
    value: V,
    prev: usize,
    next: usize,
}

/// An LRU cache. Not safe for concurrent access without external locking.
pub struct LruCache<K, V> {
    max_entries: usize,
    on_evicted: Option<Box<dyn FnMut(&K, &V) + Send>>,
    index: HashMap<K, usize>,
    entries: Vec<Option<Entry<K, V>>>,
    free: Vec<usize>,
    head: usize,
    tail: usize,
}

impl<K, V> std::fmt::Debug for LruCache<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LruCache")
            .field("max_entries", &self.max_entries)
            .field("len", &self.index.len())
            .finish_non_exhaustive()
    }
}

impl<K, V> LruCache<K, V>
where
    K: Clone + Eq + Hash,
{
    /// Creates a new cache holding at most `max_entries` entries.
    /// `max_entries == 0` means the cache has no entry-count bound.
    #[must_use]
    pub fn new(max_entries: usize) -> Self {
        Self {
            max_entries,
            on_evicted: None,
            index: HashMap::new(),
            entries: Vec::new(),
            free: Vec::new(),
            head: NIL,
            tail: NIL,
        }
    }

    /// Installs a hook invoked with every removed entry, whether it was
    /// removed explicitly or evicted by the capacity bound.
    pub fn set_eviction_hook(&mut self, hook: impl FnMut(&K, &V) + Send + 'static) {
        self.on_evicted = Some(Box::new(hook));
    }

    /// Returns the number of entries currently held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// Returns true if the cache holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Inserts or replaces the value for `key`, making it the most recent
    /// entry. Replacing does not count as a removal.
    ///
    /// Returns the entry evicted by the capacity bound, if any.
    pub fn add(&mut self, key: K, value: V) -> Option<(K, V)> {
        if let Some(&idx) = self.index.get(&key) {
            self.slot_mut(idx).value = value;
            self.promote(idx);
            return None;
        }

        let entry = Entry {
            key: key.clone(),
            value,
            prev: NIL,
            next: self.head,
        };
        let idx = match self.free.pop() {
            Some(idx) => {
                self.entries[idx] = Some(entry);
                idx
            }
            None => {
                self.entries.push(Some(entry));
                self.entries.len() - 1
            }
        };
        if self.head != NIL {
            self.slot_mut(self.head).prev = idx;
        }
        self.head = idx;
        if self.tail == NIL {
            self.tail = idx;
        }
        self.index.insert(key, idx);

        if self.max_entries != 0 && self.index.len() > self.max_entries {
            return self.remove_oldest();
        }
        None
    }

    /// Returns the value for `key`, promoting the entry to most recent.
    pub fn get<Q>(&mut self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        let idx = *self.index.get(key)?;
        self.promote(idx);
        Some(&self.slot(idx).value)
    }

    /// Returns the value for `key` without touching recency order.
    pub fn peek<Q>(&self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        let idx = *self.index.get(key)?;
        Some(&self.slot(idx).value)
    }

    /// Removes the entry for `key`, returning its value.
    pub fn remove<Q>(&mut self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        let idx = self.index.remove(key)?;
        let entry = self.take_slot(idx);
        if let Some(hook) = &mut self.on_evicted {
            hook(&entry.key, &entry.value);
        }
        Some(entry.value)
    }

    /// Removes and returns the least recently used entry.
    pub fn remove_oldest(&mut self) -> Option<(K, V)> {
        if self.tail == NIL {
            return None;
        }
        let entry = self.take_slot(self.tail);
        self.index.remove(&entry.key);
        if let Some(hook) = &mut self.on_evicted {
            hook(&entry.key, &entry.value);
        }
        Some((entry.key, entry.value))
    }

    /// Removes every entry, invoking the eviction hook for each.
    pub fn clear(&mut self) {
        while self.remove_oldest().is_some() {}
    }

    fn slot(&self, idx: usize) -> &Entry<K, V> {
        self.entries[idx].as_ref().expect("linked slot is occupied")
    }

    fn slot_mut(&mut self, idx: usize) -> &mut Entry<K, V> {
        self.entries[idx].as_mut().expect("linked slot is occupied")
    }

    /// Unlinks `idx` from the recency list.
    fn detach(&mut self, idx: usize) {
        let (prev, next) = {
            let entry = self.slot(idx);
            (entry.prev, entry.next)
        };
        match prev {
            NIL => self.head = next,
            _ => self.slot_mut(prev).next = next,
        }
        match next {
            NIL => self.tail = prev,
            _ => self.slot_mut(next).prev = prev,
        }
    }

    /// Moves `idx` to the most-recent end of the list.
    fn promote(&mut self, idx: usize) {
        if self.head == idx {
            return;
        }
        self.detach(idx);
        let old_head = self.head;
        {
            let entry = self.slot_mut(idx);
            entry.prev = NIL;
            entry.next = old_head;
        }
        if old_head != NIL {
            self.slot_mut(old_head).prev = idx;
        }
        self.head = idx;
        if self.tail == NIL {
            self.tail = idx;
        }
    }

    /// Unlinks `idx` and frees its slot, returning the entry.
    fn take_slot(&mut self, idx: usize) -> Entry<K, V> {
        self.detach(idx);
        self.free.push(idx);
        self.entries[idx].take().expect("linked slot is occupied")
    }
}
