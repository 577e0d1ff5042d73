// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! A distributed, cooperative, read-through cache.
//!
//! `hoard` shards key ownership across a set of peer processes with
//! consistent hashing. Every participating process is both a cache server
//! and a client of the cache: a `get` probes the local caches, asks the
//! owning peer when the key hashes elsewhere, and otherwise fills from the
//! group's authoritative [`Getter`] — with concurrent fills for one key
//! collapsed onto a single execution per process. Across a fleet, a
//! popular miss costs one authoritative fill plus replication to the
//! processes that asked.
//!
//! Values are immutable once cached: there is no versioning, no update,
//! and no explicit eviction — just byte-budget LRU pressure and an
//! optional coarse expiration/stale-serving layer.
//!
//! # Structure
//!
//! - [`Group`]: a named logical cache, built with [`Group::builder`] and
//!   registered in a [`Registry`] (usually the process-wide default via
//!   [`new_group`]).
//! - [`Sink`]: the caller-chosen destination a value materializes into.
//! - [`PeerPicker`]: how a process locates the peer owning a key; wired up
//!   once per process via [`register_peer_picker`]. The `hoard_http` crate
//!   provides the HTTP realization.
//!
//! # Example
//!
//! ```no_run
//! use futures::future::BoxFuture;
//! use hoard::{AllocatingByteSliceSink, Getter, GetterError, Sink};
//!
//! struct Thumbnailer;
//!
//! impl Getter for Thumbnailer {
//!     fn get<'a>(
//!         &'a self,
//!         key: &'a str,
//!         dest: &'a mut dyn Sink,
//!     ) -> BoxFuture<'a, Result<(), GetterError>> {
//!         Box::pin(async move {
//!             let thumbnail = render_thumbnail(key).await?;
//!             dest.set_bytes(&thumbnail)?;
//!             Ok(())
//!         })
//!     }
//! }
//! # async fn render_thumbnail(_key: &str) -> Result<Vec<u8>, GetterError> { Ok(Vec::new()) }
//!
//! # async fn example() -> hoard::Result<()> {
//! let thumbnails = hoard::new_group("thumbnails", 64 << 20, Thumbnailer);
//!
//! let mut data = Vec::new();
//! thumbnails
//!     .get("big-file.png", &mut AllocatingByteSliceSink::new(&mut data))
//!     .await?;
//! # Ok(())
//! # }
//! ```

mod byteview;
mod cache;
mod clock;
mod error;
mod group;
mod peers;
mod registry;
mod sink;
mod stats;
pub mod timestamp;

pub use byteview::ByteView;
pub use cache::CacheStats;
pub use clock::{Clock, ClockControl};
pub use error::{Error, GetterError, Result};
pub use group::{CacheKind, Getter, Group, GroupBuilder};
pub use peers::{NoPeers, PeerGetter, PeerPicker, PeerReply};
pub use registry::{
    Registry, get_group, new_group, register_peer_picker, register_per_group_peer_picker,
};
pub use sink::{
    AllocatingByteSliceSink, ByteViewSink, Sink, StringSink, TruncatingByteSliceSink,
};
pub use stats::{Counter, Stats};
pub use timestamp::{pack_timestamp, unpack_timestamp, view_timestamp};
