// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Atomic per-group event counters.

use std::sync::atomic::{AtomicU64, Ordering};

/// A monotonically increasing 64-bit counter.
#[derive(Debug, Default)]
pub struct Counter(AtomicU64);

impl Counter {
    /// Adds `n` to the counter.
    pub fn add(&self, n: u64) {
        self.0.fetch_add(n, Ordering::Relaxed);
    }

    /// Returns the current value.
    #[must_use]
    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Per-group statistics.
///
/// Counters are updated with relaxed atomic adds on the hot path; readers
/// observe monotonically increasing values with no ordering between
/// counters.
#[derive(Debug, Default)]
pub struct Stats {
    /// Any `get` request.
    pub gets: Counter,
    /// Requests served from either cache.
    pub cache_hits: Counter,
    /// Values fetched from the owning peer.
    pub peer_loads: Counter,
    /// Failed peer fetches (each falls back to a local fill).
    pub peer_errors: Counter,
    /// Fills actually executed (after single-flight collapsing).
    pub loads: Counter,
    /// Callers that waited on another caller's fill instead of executing.
    pub loads_deduped: Counter,
    /// Successful local fills via the user getter.
    pub local_loads: Counter,
    /// Failed local fills.
    pub local_load_errs: Counter,
    /// Requests this process served on behalf of peers.
    pub server_requests: Counter,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let stats = Stats::default();
        stats.gets.add(1);
        stats.gets.add(2);
        assert_eq!(stats.gets.get(), 3);
        assert_eq!(stats.cache_hits.get(), 0);
    }
}
