// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! End-to-end peering tests: several pools, each with its own registry,
//! talking over real sockets in one process.

use std::sync::Arc;

use futures::future::BoxFuture;
use hoard::{
    AllocatingByteSliceSink, ByteView, ByteViewSink, Getter, GetterError, Group, Registry, Sink,
};
use hoard_http::HttpPool;
use tokio::net::TcpListener;

const GROUP: &str = "census";

/// Tags every value with the address of the process that generated it.
struct TaggingGetter {
    self_url: String,
}

impl Getter for TaggingGetter {
    fn get<'a>(
        &'a self,
        key: &'a str,
        dest: &'a mut dyn Sink,
    ) -> BoxFuture<'a, Result<(), GetterError>> {
        Box::pin(async move {
            dest.set_string(&format!("{}:{}", self.self_url, key))?;
            Ok(())
        })
    }
}

struct Peer {
    registry: Registry,
    group: Group,
    url: String,
}

/// Binds `n` peers on loopback ports, wires their rings together, and
/// starts serving each.
async fn start_fleet(n: usize) -> Vec<Peer> {
    let mut listeners = Vec::new();
    let mut urls = Vec::new();
    for _ in 0..n {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind loopback");
        let addr = listener.local_addr().expect("local addr");
        urls.push(format!("http://{addr}"));
        listeners.push(listener);
    }

    let mut peers = Vec::new();
    for (listener, url) in listeners.into_iter().zip(&urls) {
        let registry = Registry::new();
        let pool = HttpPool::new(&registry, url.clone());
        pool.set_peers(&urls);

        let group = registry.new_group(
            GROUP,
            1 << 20,
            TaggingGetter {
                self_url: url.clone(),
            },
        );

        tokio::spawn(async move {
            let _ = pool.serve(listener).await;
        });

        peers.push(Peer {
            registry,
            group,
            url: url.clone(),
        });
    }
    peers
}

/// An independent copy of the fleet's ring, for computing expected owners.
fn expected_owner(urls: &[String], key: &str) -> String {
    let mut ring = hoard_ring::Map::new(hoard_ring::DEFAULT_REPLICAS);
    ring.add(urls);
    ring.get(key).expect("non-empty ring").to_string()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn values_come_from_the_consistent_hash_owner() {
    let peers = start_fleet(4).await;
    let urls: Vec<String> = peers.iter().map(|p| p.url.clone()).collect();

    for i in 0..100 {
        let key = i.to_string();
        let owner = expected_owner(&urls, &key);

        // Ask a rotating entry point; the answer must always be generated
        // by the ring owner.
        let entry = &peers[i % peers.len()];
        let mut out = ByteView::default();
        entry
            .group
            .get(&key, &mut ByteViewSink::new(&mut out))
            .await
            .expect("fleet get");
        assert_eq!(
            out.to_string_lossy(),
            format!("{owner}:{key}"),
            "key {key} served by the wrong peer"
        );
    }

    // Every peer with remote keys recorded peer loads; the fleet as a
    // whole served requests for others.
    let peer_loads: u64 = peers.iter().map(|p| p.group.stats().peer_loads.get()).sum();
    let served: u64 = peers
        .iter()
        .map(|p| p.group.stats().server_requests.get())
        .sum();
    assert!(peer_loads > 0);
    assert_eq!(peer_loads, served);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn keys_needing_escaping_survive_the_wire() {
    let peers = start_fleet(2).await;

    for key in ["spaced out", "slash/ed", "per%cent", "ünïcode"] {
        // Force the remote path by asking a peer that does not own it.
        let urls: Vec<String> = peers.iter().map(|p| p.url.clone()).collect();
        let owner = expected_owner(&urls, key);
        let other = peers.iter().find(|p| p.url != owner).expect("two peers");

        let mut out = ByteView::default();
        other
            .group
            .get(key, &mut ByteViewSink::new(&mut out))
            .await
            .expect("escaped get");
        assert_eq!(out.to_string_lossy(), format!("{owner}:{key}"));
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unknown_group_is_not_found() {
    let peers = start_fleet(2).await;

    // A group registered on one peer only: remote fetches for it 404 and
    // the caller falls back to a local fill.
    let lonely = peers[0].registry.new_group(
        "lonely",
        1 << 20,
        TaggingGetter {
            self_url: peers[0].url.clone(),
        },
    );

    for i in 0..20 {
        let key = format!("k{i}");
        let mut out = Vec::new();
        lonely
            .get(&key, &mut AllocatingByteSliceSink::new(&mut out))
            .await
            .expect("local fallback");
        assert_eq!(
            String::from_utf8_lossy(&out),
            format!("{}:{}", peers[0].url, key)
        );
    }

    // With two peers, some keys hashed remotely, 404ed, and were counted.
    assert!(lonely.stats().peer_errors.get() > 0);
    assert_eq!(
        lonely.stats().local_loads.get(),
        lonely.stats().loads.get()
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn peer_failure_falls_back_to_local_fill() {
    // One live peer configured to think a dead address owns some keys.
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind loopback");
    let addr = listener.local_addr().expect("local addr");
    let url = format!("http://{addr}");
    // A port nothing listens on.
    let dead = "http://127.0.0.1:1".to_string();

    let registry = Registry::new();
    let pool = HttpPool::new(&registry, url.clone());
    pool.set_peers([url.clone(), dead]);
    let group = registry.new_group(
        GROUP,
        1 << 20,
        TaggingGetter {
            self_url: url.clone(),
        },
    );
    tokio::spawn(async move {
        let _ = pool.serve(listener).await;
    });

    for i in 0..20 {
        let key = format!("k{i}");
        let mut out = ByteView::default();
        group
            .get(&key, &mut ByteViewSink::new(&mut out))
            .await
            .expect("peer failure is never fatal");
        assert_eq!(out.to_string_lossy(), format!("{url}:{key}"));
    }
    assert!(group.stats().peer_errors.get() > 0);
}

/// Keeps `Arc` in the imports honest and checks handles share state.
#[tokio::test]
async fn group_handles_share_their_cache() {
    let registry = Registry::new();
    let group = registry.new_group(
        GROUP,
        1 << 20,
        TaggingGetter {
            self_url: "http://solo".to_string(),
        },
    );
    let clone = group.clone();
    let shared: Arc<Group> = Arc::new(clone);

    let mut out = ByteView::default();
    group.get("k", &mut ByteViewSink::new(&mut out)).await.unwrap();
    let mut out2 = ByteView::default();
    shared.get("k", &mut ByteViewSink::new(&mut out2)).await.unwrap();

    assert_eq!(out, out2);
    assert_eq!(group.stats().cache_hits.get(), 1);
}
