// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! A consistent-hash ring with virtual nodes and an O(1) prefix-table
//! accelerator.
//!
//! Each member is represented by `replicas` virtual nodes on a 32-bit ring;
//! a lookup maps a key to the member owning the next virtual node at or
//! after the key's hash, wrapping around at the top. Adding or removing a
//! member therefore only disturbs the keys adjacent to its virtual nodes.
//!
//! Most lookups never touch the binary search: a prefix table keyed by the
//! high bits of the hash resolves a slot directly whenever every virtual
//! node sharing that prefix (plus the ring successor) agrees on one member.
//! Ambiguous slots fall back to the search.
//!
//! # Examples
//!
//! ```
//! use hoard_ring::Map;
//!
//! let mut ring = Map::new(50);
//! ring.add(["10.0.0.1:8000", "10.0.0.2:8000", "10.0.0.3:8000"]);
//!
//! let owner = ring.get("some-key").unwrap();
//! // The same key always maps to the same member.
//! assert_eq!(ring.get("some-key"), Some(owner));
//! ```

use std::{collections::HashMap, sync::Arc};

/// Number of prefix-table slots allocated per virtual node.
const DEFAULT_TABLE_EXPANSION: usize = 6;

/// Default number of virtual nodes per member.
pub const DEFAULT_REPLICAS: usize = 50;

type HashFn = Box<dyn Fn(&[u8]) -> u32 + Send + Sync>;

/// A consistent-hash ring mapping keys to member names.
pub struct Map {
    hash: HashFn,
    replicas: usize,
    expansion: usize,

    /// Virtual-node hashes, sorted.
    keys: Vec<u32>,
    /// Virtual-node hash back to the member it belongs to.
    members: HashMap<u32, Arc<str>>,
    /// Right-shift applied to a hash to index `prefix_table`.
    prefix_shift: u32,
    /// High-bits lookup table; `None` marks a prefix spanning an ownership
    /// boundary, which falls back to binary search.
    prefix_table: Vec<Option<Arc<str>>>,
}

impl std::fmt::Debug for Map {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Map")
            .field("replicas", &self.replicas)
            .field("virtual_nodes", &self.keys.len())
            .finish_non_exhaustive()
    }
}

impl Map {
    /// Creates an empty ring with `replicas` virtual nodes per member and
    /// the default CRC32-IEEE hash.
    ///
    /// More replicas smooth the ring and reduce the data moved when the
    /// member set changes, at the cost of memory.
    #[must_use]
    pub fn new(replicas: usize) -> Self {
        Self::with_hash(replicas, |data| crc32fast::hash(data))
    }

    /// Creates an empty ring with a caller-supplied hash function.
    #[must_use]
    pub fn with_hash(replicas: usize, hash: impl Fn(&[u8]) -> u32 + Send + Sync + 'static) -> Self {
        Self::with_table_expansion(replicas, DEFAULT_TABLE_EXPANSION, hash)
    }

    /// Creates an empty ring, additionally controlling the prefix-table
    /// expansion factor: the table allocates `expansion` slots per virtual
    /// node, so larger values resolve more lookups without a binary search.
    #[must_use]
    pub fn with_table_expansion(
        replicas: usize,
        expansion: usize,
        hash: impl Fn(&[u8]) -> u32 + Send + Sync + 'static,
    ) -> Self {
        Self {
            hash: Box::new(hash),
            replicas,
            expansion,
            keys: Vec::new(),
            members: HashMap::new(),
            prefix_shift: 0,
            prefix_table: Vec::new(),
        }
    }

    /// Returns true if the ring has no members.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Adds members to the ring and rebuilds the prefix table.
    ///
    /// Rings built from the same final member set answer identically for
    /// every key regardless of the order members were added in.
    pub fn add<I>(&mut self, members: I)
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        for member in members {
            let name: Arc<str> = Arc::from(member.as_ref());
            for i in 0..self.replicas {
                let hash = (self.hash)(format!("{i}{name}").as_bytes());
                self.keys.push(hash);
                self.members.insert(hash, Arc::clone(&name));
            }
        }
        self.keys.sort_unstable();
        self.rebuild_prefix_table();
    }

    /// Returns the member owning `key`, or `None` if the ring is empty.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        if self.is_empty() {
            return None;
        }
        let hash = (self.hash)(key.as_bytes());

        let slot = (hash >> self.prefix_shift) as usize;
        if let Some(member) = self.prefix_table.get(slot).and_then(Option::as_ref) {
            return Some(member.as_ref());
        }

        Some(self.members[&self.search(hash)].as_ref())
    }

    /// Walks the ring from the slot owning `key`, feeding each candidate
    /// member through `accept(already_chosen, candidate)`. Stops once `n`
    /// members are accepted or every ring slot has been visited.
    pub fn get_n<F>(&self, key: &str, n: usize, mut accept: F) -> Vec<String>
    where
        F: FnMut(&[String], &str) -> bool,
    {
        let mut chosen = Vec::new();
        if self.is_empty() || n == 0 {
            return chosen;
        }
        let hash = (self.hash)(key.as_bytes());
        let start = self.keys.partition_point(|&k| k < hash) % self.keys.len();
        for step in 0..self.keys.len() {
            let idx = (start + step) % self.keys.len();
            let candidate = self.members[&self.keys[idx]].as_ref();
            if accept(&chosen, candidate) {
                chosen.push(candidate.to_string());
                if chosen.len() == n {
                    break;
                }
            }
        }
        chosen
    }

    /// Binary search for the smallest virtual-node hash `>= hash`, wrapping
    /// to the first slot past the top of the ring.
    fn search(&self, hash: u32) -> u32 {
        let idx = self.keys.partition_point(|&k| k < hash);
        if idx == self.keys.len() {
            self.keys[0]
        } else {
            self.keys[idx]
        }
    }

    fn rebuild_prefix_table(&mut self) {
        if self.keys.is_empty() {
            self.prefix_shift = 0;
            self.prefix_table.clear();
            return;
        }

        // Minimum number of bits holding |keys| * expansion.
        let want = (self.keys.len().saturating_mul(self.expansion)).max(1) as u32;
        let prefix_bits = 32 - want.leading_zeros();
        self.prefix_shift = 32 - prefix_bits;

        let size = 1usize << prefix_bits;
        self.prefix_table = (0..size).map(|slot| self.resolve_slot(slot as u32)).collect();
    }

    /// Resolves a prefix slot to a member when every virtual node whose
    /// hash carries this prefix, plus the ring successor, agree on one.
    fn resolve_slot(&self, slot: u32) -> Option<Arc<str>> {
        let start = self.keys.partition_point(|&k| (k >> self.prefix_shift) < slot);
        let end = self.keys.partition_point(|&k| (k >> self.prefix_shift) <= slot);
        let successor = if end == self.keys.len() {
            self.keys[0]
        } else {
            self.keys[end]
        };
        let owner = &self.members[&successor];
        for key in &self.keys[start..end] {
            if self.members[key].as_ref() != owner.as_ref() {
                return None;
            }
        }
        Some(Arc::clone(owner))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Hashes a decimal string to its integer value, making ring positions
    /// easy to reason about in tests.
    fn decimal_hash(data: &[u8]) -> u32 {
        std::str::from_utf8(data)
            .ok()
            .and_then(|s| s.parse().ok())
            .expect("test keys are decimal")
    }

    #[test]
    fn hashing_with_wraparound() {
        let mut ring = Map::with_hash(3, decimal_hash);
        // Virtual nodes: 2, 4, 6, 12, 14, 16, 22, 24, 26.
        ring.add(["6", "4", "2"]);

        let cases = [("2", "2"), ("11", "2"), ("23", "4"), ("27", "2")];
        for (key, want) in cases {
            assert_eq!(ring.get(key), Some(want), "key {key}");
        }

        // Adds 8, 18, 28: 27 now belongs to 8.
        ring.add(["8"]);
        let cases = [("2", "2"), ("11", "2"), ("23", "4"), ("27", "8")];
        for (key, want) in cases {
            assert_eq!(ring.get(key), Some(want), "key {key}");
        }
    }

    #[test]
    fn insertion_order_does_not_matter() {
        let members = ["alpha", "beta", "gamma", "delta"];
        let mut forward = Map::new(50);
        forward.add(members);

        let mut reverse = Map::new(50);
        for member in members.iter().rev() {
            reverse.add([member]);
        }

        let mut split = Map::new(50);
        split.add(["gamma", "alpha"]);
        split.add(["delta", "beta"]);

        for i in 0..1000 {
            let key = format!("key-{i}");
            let want = forward.get(&key);
            assert_eq!(reverse.get(&key), want, "key {key}");
            assert_eq!(split.get(&key), want, "key {key}");
        }
    }

    #[test]
    fn empty_ring() {
        let ring = Map::new(50);
        assert!(ring.is_empty());
        assert_eq!(ring.get("anything"), None);
        assert!(ring.get_n("anything", 2, |_, _| true).is_empty());
    }

    #[test]
    fn prefix_table_agrees_with_binary_search() {
        let mut ring = Map::new(50);
        ring.add(["peer-a", "peer-b", "peer-c", "peer-d", "peer-e"]);

        for i in 0..10_000 {
            let key = format!("object/{i}");
            let hash = (ring.hash)(key.as_bytes());
            let searched = ring.members[&ring.search(hash)].as_ref();
            assert_eq!(ring.get(&key), Some(searched), "key {key}");
        }
    }

    #[test]
    fn prefix_table_shape() {
        let mut ring = Map::new(50);
        ring.add(["peer-a", "peer-b"]);

        // 100 virtual nodes, expansion 6 -> 600 -> 10 bits.
        assert_eq!(ring.prefix_table.len(), 1 << 10);
        assert_eq!(ring.prefix_shift, 22);
        // Two members with interleaved nodes leave some slots ambiguous and
        // resolve the rest; both kinds must exist at this density.
        assert!(ring.prefix_table.iter().any(Option::is_some));
        assert!(ring.prefix_table.iter().any(Option::is_none));
    }

    #[test]
    fn get_n_walks_successive_slots() {
        let mut ring = Map::with_hash(2, decimal_hash);
        // Virtual nodes: 3, 13 (member 3), 5, 15 (member 5), 7, 17 (member 7).
        ring.add(["3", "5", "7"]);

        let replicas = ring.get_n("4", 2, |chosen, candidate| {
            !chosen.iter().any(|c| c == candidate)
        });
        // Starting at node 5, the walk visits 5, 7, 13, ...
        assert_eq!(replicas, vec!["5".to_string(), "7".to_string()]);
    }

    #[test]
    fn get_n_exhausts_the_ring() {
        let mut ring = Map::with_hash(2, decimal_hash);
        ring.add(["3", "5", "7"]);

        let everyone = ring.get_n("0", 10, |chosen, candidate| {
            !chosen.iter().any(|c| c == candidate)
        });
        assert_eq!(everyone.len(), 3);

        let nobody = ring.get_n("0", 10, |_, _| false);
        assert!(nobody.is_empty());
    }

    #[test]
    fn single_member_owns_everything() {
        let mut ring = Map::new(50);
        ring.add(["only"]);
        for i in 0..100 {
            assert_eq!(ring.get(&format!("k{i}")), Some("only"));
        }
    }
}
