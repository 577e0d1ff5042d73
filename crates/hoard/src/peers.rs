// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! How a process finds and talks to the peers it shares a cache with.

use std::sync::Arc;

use futures::future::BoxFuture;

use crate::Result;

/// A value fetched from a peer, with the optional freshness hint the wire
/// protocol carries alongside it.
#[derive(Debug, Clone)]
pub struct PeerReply {
    /// The raw value bytes.
    pub value: Vec<u8>,
    /// The peer's recent queries-per-minute estimate for the key, when the
    /// transport provides one.
    pub minute_qps: Option<f64>,
}

/// A handle to a single peer, able to fetch values it owns.
pub trait PeerGetter: Send + Sync {
    /// Fetches `key` from the group `group` on this peer.
    fn get<'a>(&'a self, group: &'a str, key: &'a str) -> BoxFuture<'a, Result<PeerReply>>;
}

/// Locates the peer that owns a key.
///
/// One picker may be shared by every group in the process, or each group
/// may have its own (see
/// [`register_per_group_peer_picker`][crate::register_per_group_peer_picker]),
/// so different groups can span different peer subsets.
pub trait PeerPicker: Send + Sync {
    /// Returns the peer owning `key`, or `None` when this process is the
    /// owner and must fill locally.
    fn pick_peer(&self, key: &str) -> Option<Arc<dyn PeerGetter>>;
}

/// The picker used when no peers are configured: every key is local.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoPeers;

impl PeerPicker for NoPeers {
    fn pick_peer(&self, _key: &str) -> Option<Arc<dyn PeerGetter>> {
        None
    }
}
