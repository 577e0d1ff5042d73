// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The lookup pipeline: caches, peer dispatch, collapsed fills, freshness.

use std::{
    sync::{
        Arc, OnceLock, Weak,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use futures::future::BoxFuture;
use oneflight::Flight;
use rand::Rng;
use tokio::sync::oneshot;
use tracing::warn;

use crate::{
    ByteView, Clock, Error, GetterError, Result, Stats,
    cache::{ByteCache, CacheStats},
    peers::{NoPeers, PeerPicker},
    registry::{Registry, RegistryInner},
    sink::{ByteViewSink, Sink},
    timestamp,
};

/// How often a value fetched from a peer is mirrored into the hot cache.
const HOT_CACHE_ODDS: u32 = 10;

/// The authoritative filler for a group's keys.
///
/// The cache treats `key -> value` as a pure function: the getter must
/// write exactly one value into `dest`, be idempotent by key, and be safe
/// to invoke from arbitrary tasks.
pub trait Getter: Send + Sync + 'static {
    /// Produces the value for `key` into `dest`.
    fn get<'a>(
        &'a self,
        key: &'a str,
        dest: &'a mut dyn Sink,
    ) -> BoxFuture<'a, std::result::Result<(), GetterError>>;
}

/// Which of a group's two caches to inspect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheKind {
    /// Keys this process owns authoritatively.
    Main,
    /// Keys owned by peers, mirrored here because they were requested
    /// through this process.
    Hot,
}

/// A named logical cache.
///
/// A `Group` pairs a user-supplied [`Getter`] with a byte budget split
/// across a main cache (keys this process owns) and a hot cache (popular
/// keys owned by peers). Handles are cheap to clone and share one
/// underlying cache.
///
/// # Examples
///
/// ```no_run
/// use futures::future::BoxFuture;
/// use hoard::{AllocatingByteSliceSink, Getter, GetterError, Group, Registry, Sink};
///
/// struct DbGetter;
///
/// impl Getter for DbGetter {
///     fn get<'a>(
///         &'a self,
///         key: &'a str,
///         dest: &'a mut dyn Sink,
///     ) -> BoxFuture<'a, Result<(), GetterError>> {
///         Box::pin(async move {
///             let row = format!("row for {key}");
///             dest.set_string(&row)?;
///             Ok(())
///         })
///     }
/// }
///
/// # async fn example() -> hoard::Result<()> {
/// let registry = Registry::new();
/// let group = registry.new_group("rows", 64 << 20, DbGetter);
///
/// let mut value = Vec::new();
/// group.get("user:1", &mut AllocatingByteSliceSink::new(&mut value)).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Group {
    inner: Arc<GroupInner>,
}

pub(crate) struct GroupInner {
    name: String,
    getter: Box<dyn Getter>,
    cache_bytes: i64,
    main_cache: ByteCache,
    hot_cache: ByteCache,
    load_group: Flight<String, Result<ByteView>>,
    stats: Stats,
    clock: Clock,
    expiration: Duration,
    stale_period: Duration,
    stale_deadline: Duration,
    disable_hot_cache: bool,
    registry: Weak<RegistryInner>,
    peers: OnceLock<Arc<dyn PeerPicker>>,
}

impl std::fmt::Debug for Group {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Group")
            .field("name", &self.inner.name)
            .field("cache_bytes", &self.inner.cache_bytes)
            .finish_non_exhaustive()
    }
}

impl Group {
    /// Starts building a group with the given name, combined byte budget
    /// for its two caches, and authoritative getter.
    ///
    /// A `cache_bytes` of zero or less disables caching entirely; every
    /// `get` goes to a peer or the getter.
    #[must_use]
    pub fn builder(name: impl Into<String>, cache_bytes: i64, getter: impl Getter) -> GroupBuilder {
        GroupBuilder {
            name: name.into(),
            cache_bytes,
            getter: Box::new(getter),
            expiration: Duration::ZERO,
            stale_period: Duration::ZERO,
            stale_deadline: Duration::ZERO,
            disable_hot_cache: false,
            clock: Clock::system(),
        }
    }

    /// Returns the group's name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Returns the group's event counters.
    #[must_use]
    pub fn stats(&self) -> &Stats {
        &self.inner.stats
    }

    /// Returns a snapshot of one of the group's caches.
    #[must_use]
    pub fn cache_stats(&self, kind: CacheKind) -> CacheStats {
        match kind {
            CacheKind::Main => self.inner.main_cache.stats(),
            CacheKind::Hot => self.inner.hot_cache.stats(),
        }
    }

    /// Retrieves the value for `key` into `dest`.
    ///
    /// Lookup order: main cache, hot cache, the owning peer (when a peer
    /// picker is configured and the key hashes elsewhere), and finally the
    /// group's getter. Concurrent misses for one key collapse onto a single
    /// fill whose result every caller shares; dropping a caller's future
    /// does not abort a fill other callers are waiting on.
    ///
    /// # Errors
    ///
    /// Fails if the getter fails (peer failures alone are not fatal — the
    /// load falls back to a local fill) or if the expiration path finds a
    /// cached value without a timestamp suffix.
    pub async fn get(&self, key: &str, dest: &mut dyn Sink) -> Result<()> {
        self.inner.stats.gets.add(1);

        if let Some(value) = self.inner.lookup_cache(key) {
            self.inner.stats.cache_hits.add(1);
            if self.inner.expiration > Duration::ZERO {
                return self.handle_expiration(key, dest, value).await;
            }
            return dest.set_view(value);
        }

        let value = self.load(key, false).await?;
        dest.set_view(value)
    }

    /// Runs the load path under the single-flight barrier.
    ///
    /// `regenerate` is set by the freshness path to force a fresh value:
    /// it skips the in-flight cache re-probe that would otherwise hand the
    /// stale entry straight back.
    async fn load(&self, key: &str, regenerate: bool) -> Result<ByteView> {
        let executed = Arc::new(AtomicBool::new(false));

        let inner = Arc::clone(&self.inner);
        let flight_key = key.to_owned();
        let flag = Arc::clone(&executed);
        let result = self
            .inner
            .load_group
            .work(key.to_owned(), move || fill(inner, flight_key, regenerate, flag))
            .await;

        if !executed.load(Ordering::Acquire) {
            self.inner.stats.loads_deduped.add(1);
        }
        result
    }

    /// Decides what to serve for a cache hit whose group has an expiration.
    async fn handle_expiration(&self, key: &str, dest: &mut dyn Sink, cached: ByteView) -> Result<()> {
        let inner = &self.inner;
        let cached_at = timestamp::view_timestamp(&cached)?;
        let age = inner.clock.unix_seconds() - cached_at;
        // Negative: still fresh. In [0, stale_period): serve stale while
        // regenerating. Past stale_period: must regenerate now.
        let expired_offset = age - inner.expiration.as_secs() as i64;

        if expired_offset >= inner.stale_period.as_secs() as i64 {
            let value = self.load(key, true).await?;
            return dest.set_view(value);
        }

        if expired_offset >= 0 {
            let (tx, rx) = oneshot::channel();
            let group = self.clone();
            let key = key.to_owned();
            tokio::spawn(async move {
                let _ = tx.send(group.load(&key, true).await);
            });

            tokio::select! {
                reloaded = rx => {
                    match reloaded {
                        Ok(result) => {
                            return dest.set_view(result?);
                        }
                        // The reload task dropped its channel; serve stale.
                        Err(_) => {}
                    }
                }
                () = inner.clock.after(inner.stale_deadline) => {
                    // Deadline hit: serve the stale value. The reload keeps
                    // running and updates the cache when it lands.
                }
            }
        }

        dest.set_view(cached)
    }
}

/// The body of one collapsed fill. Runs detached from any caller.
async fn fill(
    inner: Arc<GroupInner>,
    key: String,
    regenerate: bool,
    executed: Arc<AtomicBool>,
) -> Result<ByteView> {
    executed.store(true, Ordering::Release);

    if !regenerate {
        // A racing fill may have landed while this caller was queueing on
        // the flight; only overlapping calls collapse, so probe once more.
        if let Some(value) = inner.lookup_cache(&key) {
            inner.stats.cache_hits.add(1);
            return Ok(value);
        }
    }

    inner.stats.loads.add(1);

    if let Some(peer) = inner.peers().pick_peer(&key) {
        match peer.get(&inner.name, &key).await {
            Ok(reply) => {
                inner.stats.peer_loads.add(1);
                let value = ByteView::from(reply.value);
                if !inner.disable_hot_cache && rand::thread_rng().gen_ratio(1, HOT_CACHE_ODDS) {
                    inner.populate_cache(&key, value.clone(), CacheKind::Hot);
                }
                return Ok(value);
            }
            Err(err) => {
                inner.stats.peer_errors.add(1);
                warn!(group = %inner.name, key = %key, error = %err, "peer load failed; filling locally");
            }
        }
    }

    inner.get_locally(&key).await
}

impl GroupInner {
    /// Probes the main cache, then the hot cache.
    fn lookup_cache(&self, key: &str) -> Option<ByteView> {
        if self.cache_bytes <= 0 {
            return None;
        }
        self.main_cache.get(key).or_else(|| self.hot_cache.get(key))
    }

    /// Invokes the user getter and caches its output in the main cache.
    async fn get_locally(&self, key: &str) -> Result<ByteView> {
        let mut value = ByteView::default();
        {
            let mut sink = ByteViewSink::new(&mut value);
            if let Err(err) = self.getter.get(key, &mut sink).await {
                self.stats.local_load_errs.add(1);
                return Err(Error::fill(key, err));
            }
        }
        self.stats.local_loads.add(1);
        self.populate_cache(key, value.clone(), CacheKind::Main);
        Ok(value)
    }

    /// Inserts into the chosen cache, then rebalances the pair against the
    /// combined budget: the hot cache is evicted first whenever it exceeds
    /// an eighth of the main cache's footprint.
    fn populate_cache(&self, key: &str, value: ByteView, kind: CacheKind) {
        if self.cache_bytes <= 0 {
            return;
        }
        let cache = match kind {
            CacheKind::Main => &self.main_cache,
            CacheKind::Hot => &self.hot_cache,
        };
        cache.add(key, value);

        loop {
            let main_bytes = self.main_cache.bytes();
            let hot_bytes = self.hot_cache.bytes();
            if main_bytes + hot_bytes <= self.cache_bytes {
                return;
            }
            // Keep at least one entry across the pair: a single value
            // larger than the whole budget is still worth serving.
            if self.main_cache.items() + self.hot_cache.items() <= 1 {
                return;
            }
            let victim = if hot_bytes > main_bytes / 8 {
                &self.hot_cache
            } else {
                &self.main_cache
            };
            victim.remove_oldest();
        }
    }

    /// Materializes the peer picker on first use.
    fn peers(&self) -> &Arc<dyn PeerPicker> {
        self.peers.get_or_init(|| {
            self.registry
                .upgrade()
                .and_then(|registry| registry.picker_for(&self.name))
                .unwrap_or_else(|| Arc::new(NoPeers))
        })
    }
}

/// Configures and registers a [`Group`].
///
/// ```no_run
/// # use futures::future::BoxFuture;
/// # use hoard::{Getter, GetterError, Group, Registry, Sink};
/// # struct DbGetter;
/// # impl Getter for DbGetter {
/// #     fn get<'a>(&'a self, key: &'a str, dest: &'a mut dyn Sink)
/// #         -> BoxFuture<'a, Result<(), GetterError>> {
/// #         Box::pin(async move { Ok(()) })
/// #     }
/// # }
/// use std::time::Duration;
///
/// let registry = Registry::new();
/// let group = Group::builder("rows", 64 << 20, DbGetter)
///     .expiration(Duration::from_secs(300))
///     .stale_period(Duration::from_secs(300))
///     .stale_deadline(Duration::from_millis(1500))
///     .register(&registry);
/// ```
pub struct GroupBuilder {
    name: String,
    cache_bytes: i64,
    getter: Box<dyn Getter>,
    expiration: Duration,
    stale_period: Duration,
    stale_deadline: Duration,
    disable_hot_cache: bool,
    clock: Clock,
}

impl std::fmt::Debug for GroupBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GroupBuilder")
            .field("name", &self.name)
            .field("cache_bytes", &self.cache_bytes)
            .finish_non_exhaustive()
    }
}

impl GroupBuilder {
    /// Sets the cache expiration. Truncated internally to whole seconds.
    ///
    /// With an expiration set, getters must produce values through
    /// [`Sink::set_timestamp_bytes`] and callers unpack them with
    /// [`unpack_timestamp`][crate::unpack_timestamp]. Unset (or zero) means
    /// values never expire.
    #[must_use]
    pub fn expiration(mut self, d: Duration) -> Self {
        self.expiration = d;
        self
    }

    /// Sets how long after expiration stale data may still be served while
    /// a reload runs in the background. Truncated to whole seconds.
    #[must_use]
    pub fn stale_period(mut self, d: Duration) -> Self {
        self.stale_period = d;
        self
    }

    /// Sets how long a caller in the stale period waits for the background
    /// reload before settling for the stale value.
    #[must_use]
    pub fn stale_deadline(mut self, d: Duration) -> Self {
        self.stale_deadline = d;
        self
    }

    /// Disables mirroring of peer-owned values into the hot cache.
    ///
    /// With the hot cache disabled, each value is cached on exactly one
    /// server — its authoritative owner. Useful with expiration, where
    /// unsynchronized peer clocks could otherwise serve values of
    /// inconsistent freshness.
    #[must_use]
    pub fn disable_hot_cache(mut self) -> Self {
        self.disable_hot_cache = true;
        self
    }

    /// Substitutes the clock used by the expiration path.
    #[must_use]
    pub fn clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Builds the group and registers it.
    ///
    /// # Panics
    ///
    /// Panics if the registry already has a group with this name.
    #[must_use]
    pub fn register(self, registry: &Registry) -> Group {
        registry.register(self)
    }

    pub(crate) fn build(self, registry: Weak<RegistryInner>) -> Group {
        Group {
            inner: Arc::new(GroupInner {
                name: self.name,
                getter: self.getter,
                cache_bytes: self.cache_bytes,
                main_cache: ByteCache::new(0),
                hot_cache: ByteCache::new(0),
                load_group: Flight::new(),
                stats: Stats::default(),
                clock: self.clock,
                expiration: self.expiration,
                stale_period: self.stale_period,
                stale_deadline: self.stale_deadline,
                disable_hot_cache: self.disable_hot_cache,
                registry,
                peers: OnceLock::new(),
            }),
        }
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }
}
